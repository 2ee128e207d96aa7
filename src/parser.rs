//! Streaming GPX reader.
//!
//! [`GpxParser`] is driven by element-start, character-data and element-end
//! events and rebuilds the waypoint/route/track tree with an explicit state
//! and a stack of in-progress entities. [`parse_gpx`] feeds it from a
//! `quick_xml` reader in a single pass.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rust_decimal::Decimal;
use tracing::trace;

use crate::error::Error;
use crate::gpx_types::*;

type Result<T> = std::result::Result<T, Error>;

/// Elements that open or close an entity; closing one out of place is an error.
const STRUCTURAL: &[&str] = &["wpt", "rte", "rtept", "trk", "trkseg", "trkpt"];

/// Where the parser currently is in the entity tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Idle,
    InWaypoint,
    InRoute,
    InRouteWaypoint,
    InTrack,
    InTrackSegment,
    InTrackSegmentWaypoint,
}

impl fmt::Display for ParseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "outside any entity",
            Self::InWaypoint => "inside <wpt>",
            Self::InRoute => "inside <rte>",
            Self::InRouteWaypoint => "inside <rtept>",
            Self::InTrack => "inside <trk>",
            Self::InTrackSegment => "inside <trkseg>",
            Self::InTrackSegmentWaypoint => "inside <trkpt>",
        };
        f.write_str(name)
    }
}

/// Point fields addressable by element or attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PointField {
    Lat,
    Lon,
    Elevation,
    Time,
    MagneticVariation,
    GeoidHeight,
    Name,
    Comment,
    Description,
    Source,
    Link,
    Symbol,
    Type,
    Fix,
    Satellites,
    Hdop,
    Vdop,
    Pdop,
    AgeOfDgpsData,
    DgpsId,
    Speed,
}

impl PointField {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "lat" => Self::Lat,
            "lon" => Self::Lon,
            "ele" => Self::Elevation,
            "time" => Self::Time,
            "magvar" => Self::MagneticVariation,
            "geoidheight" => Self::GeoidHeight,
            "name" => Self::Name,
            "cmt" => Self::Comment,
            "desc" => Self::Description,
            "src" => Self::Source,
            "link" | "href" => Self::Link,
            "sym" => Self::Symbol,
            "type" => Self::Type,
            "fix" => Self::Fix,
            "sat" => Self::Satellites,
            "hdop" => Self::Hdop,
            "vdop" => Self::Vdop,
            "pdop" => Self::Pdop,
            "ageofdgpsdata" => Self::AgeOfDgpsData,
            "dgpsid" => Self::DgpsId,
            "speed" => Self::Speed,
            _ => return None,
        })
    }
}

/// Route and track fields addressable by element or attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RecordField {
    Name,
    Comment,
    Description,
    Source,
    Link,
    Number,
    Type,
}

impl RecordField {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "name" => Self::Name,
            "cmt" => Self::Comment,
            "desc" => Self::Description,
            "src" => Self::Source,
            "link" | "href" => Self::Link,
            "number" => Self::Number,
            "type" => Self::Type,
            _ => return None,
        })
    }
}

#[derive(Debug, Default)]
struct WaypointDraft {
    fields: BTreeMap<PointField, String>,
}

impl WaypointDraft {
    fn finalize(self) -> Result<Waypoint> {
        let mut f = self.fields;
        Ok(Waypoint {
            lat: coordinate(f.remove(&PointField::Lat), "lat")?,
            lon: coordinate(f.remove(&PointField::Lon), "lon")?,
            elevation: decimal(f.remove(&PointField::Elevation), "ele")?,
            time: timestamp(f.remove(&PointField::Time), "time")?,
            magnetic_variation: decimal(f.remove(&PointField::MagneticVariation), "magvar")?,
            geoid_height: decimal(f.remove(&PointField::GeoidHeight), "geoidheight")?,
            name: f.remove(&PointField::Name),
            comment: f.remove(&PointField::Comment),
            description: f.remove(&PointField::Description),
            source: f.remove(&PointField::Source),
            link: f.remove(&PointField::Link),
            symbol: f.remove(&PointField::Symbol),
            point_type: f.remove(&PointField::Type),
            fix_type: fix(f.remove(&PointField::Fix))?,
            satellite_count: integer(f.remove(&PointField::Satellites), "sat")?,
            hdop: decimal(f.remove(&PointField::Hdop), "hdop")?,
            vdop: decimal(f.remove(&PointField::Vdop), "vdop")?,
            pdop: decimal(f.remove(&PointField::Pdop), "pdop")?,
            age_of_dgps_data: decimal(f.remove(&PointField::AgeOfDgpsData), "ageofdgpsdata")?,
            dgps_station_id: integer(f.remove(&PointField::DgpsId), "dgpsid")?,
            speed: decimal(f.remove(&PointField::Speed), "speed")?,
        })
    }
}

/// Text fields shared by routes and tracks, coerced on finalize.
#[derive(Debug, Default)]
struct RecordDraft {
    fields: BTreeMap<RecordField, String>,
}

struct Record {
    name: Option<String>,
    comment: Option<String>,
    description: Option<String>,
    source: Option<String>,
    link: Option<String>,
    number: Option<u32>,
    kind: Option<String>,
}

impl RecordDraft {
    fn finalize(self) -> Result<Record> {
        let mut f = self.fields;
        Ok(Record {
            name: f.remove(&RecordField::Name),
            comment: f.remove(&RecordField::Comment),
            description: f.remove(&RecordField::Description),
            source: f.remove(&RecordField::Source),
            link: f.remove(&RecordField::Link),
            number: integer(f.remove(&RecordField::Number), "number")?,
            kind: f.remove(&RecordField::Type),
        })
    }
}

#[derive(Debug, Default)]
struct RouteDraft {
    record: RecordDraft,
    points: Vec<Waypoint>,
}

impl RouteDraft {
    fn finalize(self) -> Result<Route> {
        let r = self.record.finalize()?;
        Ok(Route {
            name: r.name,
            comment: r.comment,
            description: r.description,
            source: r.source,
            link: r.link,
            number: r.number,
            route_type: r.kind,
            points: self.points,
        })
    }
}

#[derive(Debug, Default)]
struct TrackDraft {
    record: RecordDraft,
    segments: Vec<TrackSegment>,
}

impl TrackDraft {
    fn finalize(self) -> Result<Track> {
        let r = self.record.finalize()?;
        Ok(Track {
            name: r.name,
            comment: r.comment,
            description: r.description,
            source: r.source,
            link: r.link,
            number: r.number,
            track_type: r.kind,
            segments: self.segments,
        })
    }
}

/// An entity under construction, one per open structural element.
#[derive(Debug)]
enum Frame {
    Waypoint(WaypointDraft),
    Route(RouteDraft),
    Track(TrackDraft),
    Segment(TrackSegment),
}

impl Frame {
    fn assign(&mut self, name: &str, value: String) {
        let known = match self {
            Self::Waypoint(d) => PointField::from_name(name).map(|f| d.fields.insert(f, value)),
            Self::Route(d) => RecordField::from_name(name).map(|f| d.record.fields.insert(f, value)),
            Self::Track(d) => RecordField::from_name(name).map(|f| d.record.fields.insert(f, value)),
            Self::Segment(_) => None,
        };
        if known.is_none() {
            trace!(field = %name, "ignoring unknown GPX field");
        }
    }
}

/// Event-driven GPX state machine. One instance parses one document.
#[derive(Debug)]
pub struct GpxParser {
    state: ParseState,
    document: GpxDocument,
    stack: Vec<Frame>,
    text: String,
    position: u64,
}

impl Default for GpxParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GpxParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Idle,
            document: GpxDocument::default(),
            stack: Vec::new(),
            text: String::new(),
            position: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Byte offset reported in errors raised by the following events.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// Handle an element start. Attributes are assigned, by name, to the
    /// entity on top of the stack.
    pub fn start_element<I>(&mut self, name: &str, attributes: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        use ParseState::*;

        self.text.clear();
        let next = match (self.state, name) {
            (Idle, "wpt") => self.push(Frame::Waypoint(WaypointDraft::default()), InWaypoint),
            (Idle, "rte") => self.push(Frame::Route(RouteDraft::default()), InRoute),
            (Idle, "trk") => self.push(Frame::Track(TrackDraft::default()), InTrack),
            (Idle, _) => return,
            (InRoute, "rtept") => {
                self.push(Frame::Waypoint(WaypointDraft::default()), InRouteWaypoint)
            }
            (InTrack, "trkseg") => self.push(Frame::Segment(TrackSegment::default()), InTrackSegment),
            (InTrackSegment, "trkpt") => self.push(
                Frame::Waypoint(WaypointDraft::default()),
                InTrackSegmentWaypoint,
            ),
            (state, _) => state,
        };
        self.state = next;

        if let Some(top) = self.stack.last_mut() {
            for (key, value) in attributes {
                top.assign(&key, value);
            }
        }
    }

    /// Accumulate character data for the element being read.
    pub fn characters(&mut self, text: &str) {
        if self.state != ParseState::Idle {
            self.text.push_str(text);
        }
    }

    /// Handle an element end: close the current entity, or assign the
    /// accumulated text to the field named by the (lower-cased) tag.
    pub fn end_element(&mut self, name: &str) -> Result<()> {
        use ParseState::*;

        let name = name.to_lowercase();
        let text = std::mem::take(&mut self.text);

        match (self.state, name.as_str()) {
            (InWaypoint, "wpt") => {
                let waypoint = self.pop_waypoint()?;
                self.document.waypoints.push(waypoint);
                self.transition(Idle);
            }
            (InRoute, "rte") => {
                let route = match self.pop()? {
                    Frame::Route(draft) => draft.finalize()?,
                    other => return Err(self.mismatch(&other)),
                };
                self.document.routes.push(route);
                self.transition(Idle);
            }
            (InRouteWaypoint, "rtept") => {
                let waypoint = self.pop_waypoint()?;
                match self.stack.last_mut() {
                    Some(Frame::Route(route)) => route.points.push(waypoint),
                    _ => return Err(malformed(self.position, "<rtept> outside of a route")),
                }
                self.transition(InRoute);
            }
            (InTrack, "trk") => {
                let track = match self.pop()? {
                    Frame::Track(draft) => draft.finalize()?,
                    other => return Err(self.mismatch(&other)),
                };
                self.document.tracks.push(track);
                self.transition(Idle);
            }
            (InTrackSegment, "trkseg") => {
                let segment = match self.pop()? {
                    Frame::Segment(segment) => segment,
                    other => return Err(self.mismatch(&other)),
                };
                match self.stack.last_mut() {
                    Some(Frame::Track(track)) => track.segments.push(segment),
                    _ => return Err(malformed(self.position, "<trkseg> outside of a track")),
                }
                self.transition(InTrack);
            }
            (InTrackSegmentWaypoint, "trkpt") => {
                let waypoint = self.pop_waypoint()?;
                match self.stack.last_mut() {
                    Some(Frame::Segment(segment)) => segment.points.push(waypoint),
                    _ => return Err(malformed(self.position, "<trkpt> outside of a segment")),
                }
                self.transition(InTrackSegment);
            }
            (state, tag) if STRUCTURAL.contains(&tag) => {
                return Err(malformed(
                    self.position,
                    format!("unexpected </{tag}> {state}"),
                ));
            }
            (_, tag) => {
                if !text.trim().is_empty() {
                    if let Some(top) = self.stack.last_mut() {
                        top.assign(tag, text);
                    }
                }
            }
        }
        Ok(())
    }

    /// Complete the parse. Fails if an entity is still open.
    pub fn finish(self) -> Result<GpxDocument> {
        if self.state != ParseState::Idle || !self.stack.is_empty() {
            return Err(malformed(
                self.position,
                format!("document ended {}", self.state),
            ));
        }
        Ok(self.document)
    }

    fn push(&mut self, frame: Frame, next: ParseState) -> ParseState {
        trace!(from = %self.state, to = %next, "open entity");
        self.stack.push(frame);
        next
    }

    fn transition(&mut self, next: ParseState) {
        trace!(from = %self.state, to = %next, "close entity");
        self.state = next;
    }

    fn pop(&mut self) -> Result<Frame> {
        let position = self.position;
        self.stack
            .pop()
            .ok_or_else(|| malformed(position, "closing tag without an open entity"))
    }

    fn pop_waypoint(&mut self) -> Result<Waypoint> {
        match self.pop()? {
            Frame::Waypoint(draft) => draft.finalize(),
            other => Err(self.mismatch(&other)),
        }
    }

    fn mismatch(&self, frame: &Frame) -> Error {
        let open = match frame {
            Frame::Waypoint(_) => "point",
            Frame::Route(_) => "route",
            Frame::Track(_) => "track",
            Frame::Segment(_) => "segment",
        };
        malformed(
            self.position,
            format!("entity stack holds a {open} {}", self.state),
        )
    }
}

/// Parse a GPX XML string into a [`GpxDocument`].
pub fn parse_gpx(xml: &str) -> Result<GpxDocument> {
    let mut reader = Reader::from_str(xml);
    let mut parser = GpxParser::new();

    loop {
        parser.set_position(reader.buffer_position() as u64);
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = element_name(&e, &parser)?;
                let attributes = element_attributes(&e, &parser)?;
                parser.start_element(&name, attributes);
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(&e, &parser)?;
                let attributes = element_attributes(&e, &parser)?;
                parser.start_element(&name, attributes);
                parser.end_element(&name)?;
            }
            Ok(Event::End(e)) => {
                let name = utf8(e.local_name().into_inner(), &parser)?;
                parser.end_element(name)?;
            }
            Ok(Event::Text(e)) => {
                let text = utf8(e.as_ref(), &parser)?;
                parser.characters(text);
            }
            Ok(Event::CData(e)) => {
                let text = utf8(e.as_ref(), &parser)?;
                parser.characters(text);
            }
            Ok(Event::GeneralRef(e)) => {
                // Character references (&#60; &#x3C;) and the predefined entities
                if let Ok(Some(ch)) = e.resolve_char_ref() {
                    parser.characters(ch.encode_utf8(&mut [0; 4]));
                } else {
                    match utf8(e.as_ref(), &parser)? {
                        "amp" => parser.characters("&"),
                        "lt" => parser.characters("<"),
                        "gt" => parser.characters(">"),
                        "quot" => parser.characters("\""),
                        "apos" => parser.characters("'"),
                        other => trace!(entity = other, "skipping unknown entity"),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(reader.error_position() as u64, e.to_string())),
            _ => {}
        }
    }

    parser.finish()
}

fn element_name(e: &BytesStart<'_>, parser: &GpxParser) -> Result<String> {
    utf8(e.local_name().into_inner(), parser).map(str::to_owned)
}

fn element_attributes(e: &BytesStart<'_>, parser: &GpxParser) -> Result<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| malformed(parser.position, err.to_string()))?;
        let key = utf8(attr.key.as_ref(), parser)?.to_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| malformed(parser.position, err.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

fn utf8<'a>(bytes: &'a [u8], parser: &GpxParser) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|err| malformed(parser.position, err.to_string()))
}

fn malformed(position: u64, reason: impl Into<String>) -> Error {
    Error::MalformedDocument {
        position,
        reason: reason.into(),
    }
}

fn coercion(field: &'static str, text: String) -> Error {
    Error::Coercion { field, text }
}

fn decimal(text: Option<String>, field: &'static str) -> Result<Option<Decimal>> {
    let Some(text) = text else {
        return Ok(None);
    };
    let trimmed = text.trim();
    // Text that would have to be rounded to fit is rejected, not truncated.
    let parsed = if trimmed.contains(['e', 'E']) {
        Decimal::from_scientific(trimmed)
    } else {
        Decimal::from_str_exact(trimmed)
    };
    match parsed {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(coercion(field, text)),
    }
}

/// Like [`decimal`], but the absent-marker written for unset coordinates reads back as absent.
fn coordinate(text: Option<String>, field: &'static str) -> Result<Option<Decimal>> {
    match text {
        Some(t) if t.trim() == ABSENT_MARKER => Ok(None),
        other => decimal(other, field),
    }
}

fn integer(text: Option<String>, field: &'static str) -> Result<Option<u32>> {
    let Some(text) = text else {
        return Ok(None);
    };
    match text.trim().parse::<u32>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(coercion(field, text)),
    }
}

fn timestamp(text: Option<String>, field: &'static str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let Some(text) = text else {
        return Ok(None);
    };
    match NaiveDateTime::parse_from_str(text.trim(), TIME_FORMAT) {
        Ok(value) => Ok(Some(value.and_utc())),
        Err(_) => Err(coercion(field, text)),
    }
}

fn fix(text: Option<String>) -> Result<Option<FixType>> {
    let Some(text) = text else {
        return Ok(None);
    };
    match text.trim().parse::<FixType>() {
        Ok(value) => Ok(Some(value)),
        Err(()) => Err(coercion("fix", text)),
    }
}
