use std::fmt::{self, Display, Write};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use rust_decimal::Decimal;

/// Text rendered for a `lat`/`lon` attribute that was never set.
pub const ABSENT_MARKER: &str = "None";

/// The only timestamp layout accepted and produced for `<time>`.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Default `creator` attribute of the `<gpx>` root.
pub const DEFAULT_CREATOR: &str = "gpsbabel-rs";

/// GPS fix reported for a point (`<fix>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixType {
    None,
    TwoD,
    ThreeD,
    Dgps,
    Pps,
}

impl FixType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TwoD => "2d",
            Self::ThreeD => "3d",
            Self::Dgps => "dgps",
            Self::Pps => "pps",
        }
    }
}

impl FromStr for FixType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "2d" => Ok(Self::TwoD),
            "3d" => Ok(Self::ThreeD),
            "dgps" => Ok(Self::Dgps),
            "pps" => Ok(Self::Pps),
            _ => Err(()),
        }
    }
}

impl Display for FixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single GPX point (used for wpt, rtept, trkpt).
///
/// Every field may be absent, including the coordinates: an empty point
/// renders its coordinates as [`ABSENT_MARKER`] instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Waypoint {
    pub lat: Option<Decimal>,
    pub lon: Option<Decimal>,
    pub elevation: Option<Decimal>,
    pub time: Option<DateTime<Utc>>,
    pub magnetic_variation: Option<Decimal>,
    pub geoid_height: Option<Decimal>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link: Option<String>,
    pub symbol: Option<String>,
    pub point_type: Option<String>,
    pub fix_type: Option<FixType>,
    pub satellite_count: Option<u32>,
    pub hdop: Option<Decimal>,
    pub vdop: Option<Decimal>,
    pub pdop: Option<Decimal>,
    pub age_of_dgps_data: Option<Decimal>,
    pub dgps_station_id: Option<u32>,
    pub speed: Option<Decimal>,
}

impl Waypoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point with both coordinates set and nothing else.
    pub fn at(lat: Decimal, lon: Decimal) -> Self {
        Self {
            lat: Some(lat),
            lon: Some(lon),
            ..Self::default()
        }
    }

    /// Serialize as `<tag lat=".." lon="..">children</tag>`.
    pub fn to_xml(&self, tag: &str) -> String {
        let mut out = String::new();
        self.write_xml(tag, &mut out);
        out
    }

    pub(crate) fn write_xml(&self, tag: &str, out: &mut String) {
        let _ = write!(
            out,
            r#"<{tag} lat="{}" lon="{}">"#,
            coordinate(self.lat.as_ref()),
            coordinate(self.lon.as_ref()),
        );
        push_element(out, "ele", self.elevation.as_ref());
        push_element(out, "time", self.time.map(format_time).as_ref());
        push_element(out, "magvar", self.magnetic_variation.as_ref());
        push_element(out, "geoidheight", self.geoid_height.as_ref());
        push_element(out, "name", self.name.as_ref());
        push_element(out, "cmt", self.comment.as_ref());
        push_element(out, "desc", self.description.as_ref());
        push_element(out, "src", self.source.as_ref());
        push_element(out, "link", self.link.as_ref());
        push_element(out, "sym", self.symbol.as_ref());
        push_element(out, "type", self.point_type.as_ref());
        push_element(out, "fix", self.fix_type.as_ref());
        push_element(out, "sat", self.satellite_count.as_ref());
        push_element(out, "hdop", self.hdop.as_ref());
        push_element(out, "vdop", self.vdop.as_ref());
        push_element(out, "pdop", self.pdop.as_ref());
        push_element(out, "ageofdgpsdata", self.age_of_dgps_data.as_ref());
        push_element(out, "dgpsid", self.dgps_station_id.as_ref());
        push_element(out, "speed", self.speed.as_ref());
        let _ = write!(out, "</{tag}>");
    }
}

/// A GPX route (<rte>).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub name: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link: Option<String>,
    pub number: Option<u32>,
    pub route_type: Option<String>,
    pub points: Vec<Waypoint>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    pub(crate) fn write_xml(&self, out: &mut String) {
        out.push_str("<rte>");
        push_element(out, "name", self.name.as_ref());
        push_element(out, "cmt", self.comment.as_ref());
        push_element(out, "desc", self.description.as_ref());
        push_element(out, "src", self.source.as_ref());
        push_element(out, "link", self.link.as_ref());
        push_element(out, "number", self.number.as_ref());
        push_element(out, "type", self.route_type.as_ref());
        for point in &self.points {
            point.write_xml("rtept", out);
        }
        out.push_str("</rte>");
    }
}

/// A GPX track segment (<trkseg>).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSegment {
    pub points: Vec<Waypoint>,
}

impl TrackSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    pub(crate) fn write_xml(&self, out: &mut String) {
        out.push_str("<trkseg>");
        for point in &self.points {
            point.write_xml("trkpt", out);
        }
        out.push_str("</trkseg>");
    }
}

/// A GPX track (<trk>).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Track {
    pub name: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub link: Option<String>,
    pub number: Option<u32>,
    pub track_type: Option<String>,
    pub segments: Vec<TrackSegment>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    pub(crate) fn write_xml(&self, out: &mut String) {
        out.push_str("<trk>");
        push_element(out, "name", self.name.as_ref());
        push_element(out, "cmt", self.comment.as_ref());
        push_element(out, "desc", self.description.as_ref());
        push_element(out, "src", self.source.as_ref());
        push_element(out, "link", self.link.as_ref());
        push_element(out, "number", self.number.as_ref());
        push_element(out, "type", self.track_type.as_ref());
        for segment in &self.segments {
            segment.write_xml(out);
        }
        out.push_str("</trk>");
    }
}

/// Parsed GPX data containing all waypoints, routes, and tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpxDocument {
    pub waypoints: Vec<Waypoint>,
    pub routes: Vec<Route>,
    pub tracks: Vec<Track>,
}

impl GpxDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty() && self.routes.is_empty() && self.tracks.is_empty()
    }

    /// Serialize with the default `creator` attribute.
    pub fn to_xml(&self) -> String {
        self.to_xml_with_creator(DEFAULT_CREATOR)
    }

    /// Serialize without prolog or namespaces: waypoints, then routes, then tracks.
    pub fn to_xml_with_creator(&self, creator: &str) -> String {
        let mut out = format!(r#"<gpx version="1.1" creator="{}">"#, escape(creator));
        for waypoint in &self.waypoints {
            waypoint.write_xml("wpt", &mut out);
        }
        for route in &self.routes {
            route.write_xml(&mut out);
        }
        for track in &self.tracks {
            track.write_xml(&mut out);
        }
        out.push_str("</gpx>");
        out
    }
}

pub fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn coordinate(value: Option<&Decimal>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => ABSENT_MARKER.to_string(),
    }
}

fn push_element<T: Display>(out: &mut String, name: &str, value: Option<&T>) {
    if let Some(value) = value {
        let text = value.to_string();
        let _ = write!(out, "<{name}>{}</{name}>", escape(text.as_str()));
    }
}
