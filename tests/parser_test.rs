use gpsbabel::gpx_types::format_time;
use gpsbabel::{Error, FixType, GpxDocument, GpxParser, ParseState, Waypoint, parse_gpx};
use rust_decimal::Decimal;

fn load_fixture(path: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{path}")).unwrap()
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn parse_fixture(path: &str) -> GpxDocument {
    parse_gpx(&load_fixture(path)).unwrap()
}

#[test]
fn test_gpsbabel_output_counts() {
    let doc = parse_fixture("gpsbabel_output.gpx");
    assert_eq!(doc.waypoints.len(), 2);
    assert_eq!(doc.routes.len(), 1);
    assert_eq!(doc.tracks.len(), 1);
}

#[test]
fn test_gpsbabel_output_waypoint_fields() {
    let doc = parse_fixture("gpsbabel_output.gpx");
    let wpt = &doc.waypoints[0];
    assert_eq!(wpt.lat, Some(dec("48.2082")));
    assert_eq!(wpt.lon, Some(dec("16.3738")));
    assert_eq!(wpt.elevation, Some(dec("171")));
    assert_eq!(
        wpt.time.map(format_time).as_deref(),
        Some("2008-10-14T21:19:38Z")
    );
    assert_eq!(wpt.name.as_deref(), Some("STEPHAN"));
    assert_eq!(wpt.comment.as_deref(), Some("Cathedral & square"));
    assert_eq!(wpt.description.as_deref(), Some("Cathedral & square"));
    assert_eq!(wpt.link.as_deref(), Some("http://example.org/stephansdom"));
    assert_eq!(wpt.symbol.as_deref(), Some("Church"));
    assert_eq!(wpt.fix_type, Some(FixType::ThreeD));
    assert_eq!(wpt.satellite_count, Some(7));
    assert_eq!(wpt.hdop, Some(dec("1.2")));
    assert_eq!(wpt.vdop, None);

    // extensions are skipped, the document-level <time> never lands on a point
    let second = &doc.waypoints[1];
    assert_eq!(second.symbol.as_deref(), Some("Flag, Blue"));
    assert_eq!(second.time, None);
}

#[test]
fn test_gpsbabel_output_route_and_track() {
    let doc = parse_fixture("gpsbabel_output.gpx");

    let route = &doc.routes[0];
    assert_eq!(route.name.as_deref(), Some("RING"));
    assert_eq!(route.number, Some(1));
    let names: Vec<_> = route
        .points
        .iter()
        .map(|p| p.name.as_deref().unwrap())
        .collect();
    assert_eq!(names, ["STEPHAN", "RATHAUS", "PARLMT"]);

    let track = &doc.tracks[0];
    assert_eq!(track.name.as_deref(), Some("ACTIVE LOG"));
    assert_eq!(track.number, Some(2));
    assert_eq!(track.segments.len(), 2);
    assert_eq!(track.segments[0].points.len(), 2);
    assert_eq!(track.segments[0].points[0].speed, Some(dec("1.25")));
    let last = &track.segments[1].points[0];
    assert_eq!(last.fix_type, Some(FixType::Dgps));
    assert_eq!(last.dgps_station_id, Some(312));
}

#[test]
fn test_round_trip_through_serializer() {
    let doc = parse_fixture("gpsbabel_output.gpx");
    let xml = doc.to_xml();
    assert!(xml.starts_with(r#"<gpx version="1.1" creator="gpsbabel-rs">"#));
    assert_eq!(parse_gpx(&xml).unwrap(), doc);
}

#[test]
fn test_round_trip_with_absent_coordinates() {
    let mut doc = GpxDocument::new();
    doc.waypoints.push(Waypoint {
        name: Some("nowhere <yet>".into()),
        ..Waypoint::new()
    });
    doc.waypoints.push(Waypoint::at(dec("-33.865143"), dec("151.209900")));

    let xml = doc.to_xml_with_creator("test");
    assert!(xml.contains(r#"<wpt lat="None" lon="None">"#));
    assert_eq!(parse_gpx(&xml).unwrap(), doc);
}

#[test]
fn test_metadata_only_document_is_empty() {
    let doc = parse_fixture("metadata_only.gpx");
    assert!(doc.is_empty());
}

#[test]
fn test_unclosed_track_is_malformed() {
    let err = parse_gpx(&load_fixture("unclosed_track.gpx")).unwrap_err();
    assert!(matches!(err, Error::MalformedDocument { .. }), "{err}");
}

#[test]
fn test_coercion_failure_reports_field() {
    let xml = r#"<gpx><trk><trkseg><trkpt lat="1" lon="2"><sat>many</sat></trkpt></trkseg></trk></gpx>"#;
    match parse_gpx(xml) {
        Err(Error::Coercion { field, text }) => {
            assert_eq!(field, "sat");
            assert_eq!(text, "many");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_event_driven_parser() {
    let attrs = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };

    let mut parser = GpxParser::new();
    parser.start_element("gpx", attrs(&[("version", "1.1")]));
    parser.start_element("rte", attrs(&[]));
    assert_eq!(parser.state(), ParseState::InRoute);
    parser.start_element("rtept", attrs(&[("lat", "10"), ("lon", "20")]));
    assert_eq!(parser.state(), ParseState::InRouteWaypoint);
    parser.start_element("name", attrs(&[]));
    parser.characters("Fi");
    parser.characters("rst");
    parser.end_element("name").unwrap();
    parser.end_element("rtept").unwrap();
    assert_eq!(parser.state(), ParseState::InRoute);
    parser.end_element("rte").unwrap();
    parser.end_element("gpx").unwrap();
    assert_eq!(parser.state(), ParseState::Idle);

    let doc = parser.finish().unwrap();
    let point = &doc.routes[0].points[0];
    assert_eq!(point.name.as_deref(), Some("First"));
    assert_eq!(point.lat, Some(dec("10")));
}

#[test]
fn test_prefixed_element_names() {
    let xml = r#"<g:gpx xmlns:g="http://www.topografix.com/GPX/1/1"><g:wpt lat="1.5" lon="2.5"><g:name>P</g:name></g:wpt></g:gpx>"#;
    let doc = parse_gpx(xml).unwrap();
    assert_eq!(doc.waypoints[0].name.as_deref(), Some("P"));
}
