//! Pure conversion from an Esri-JSON feature to a GeoJSON `Feature`.
//!
//! Every function here is total and side-effect free: given the same
//! input it always produces the same output, and it never performs I/O.
//! That is what makes it safe to unit test exhaustively without a mock
//! server.

use geojson::{Feature, Geometry, JsonObject, Value as GeoValue};
use serde_json::{Map, Value};

use crate::metadata::GeometryType;

/// Converts one Esri-JSON feature (`{geometry, attributes}`) into a
/// GeoJSON `Feature`, per the rules in the geometry converter contract.
pub fn feature_to_geojson(geometry_type: Option<&GeometryType>, esri_feature: &Map<String, Value>) -> Feature {
    let geometry = esri_feature
        .get("geometry")
        .and_then(|g| if g.is_null() { None } else { g.as_object() })
        .and_then(|geom_obj| convert_geometry(geometry_type, geom_obj));

    let properties = esri_feature.get("attributes").and_then(|attrs| attrs.as_object()).map(to_json_object);

    Feature {
        bbox: None,
        geometry: geometry.map(Geometry::new),
        id: None,
        properties,
        foreign_members: None,
    }
}

fn to_json_object(map: &Map<String, Value>) -> JsonObject {
    map.clone().into_iter().collect()
}

fn convert_geometry(geometry_type: Option<&GeometryType>, geom: &Map<String, Value>) -> Option<GeoValue> {
    match geometry_type {
        Some(GeometryType::Point) => convert_point(geom),
        Some(GeometryType::MultiPoint) => convert_multipoint(geom),
        Some(GeometryType::Polyline) => convert_polyline(geom),
        Some(GeometryType::Polygon) => convert_polygon(geom),
        // Envelopes and the absence of an advertised geometry type are not
        // geometries the GeoJSON spec has a shape for; the server-provided
        // `geometry` object is attribute-shaped in that case, not a shape
        // to render.
        Some(GeometryType::Envelope) | None => {
            if geom.contains_key("x") || geom.contains_key("y") {
                convert_point(geom)
            } else if geom.contains_key("points") {
                convert_multipoint(geom)
            } else if geom.contains_key("paths") {
                convert_polyline(geom)
            } else if geom.contains_key("rings") {
                convert_polygon(geom)
            } else {
                None
            }
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn convert_point(geom: &Map<String, Value>) -> Option<GeoValue> {
    let x = geom.get("x").and_then(as_f64);
    let y = geom.get("y").and_then(as_f64);
    match (x, y) {
        (Some(x), Some(y)) => Some(GeoValue::Point(vec![x, y])),
        _ => None,
    }
}

fn positions_from(points: &Value) -> Vec<Vec<f64>> {
    points
        .as_array()
        .map(|pts| {
            pts.iter()
                .filter_map(|p| p.as_array())
                .map(|p| p.iter().filter_map(as_f64).collect::<Vec<f64>>())
                .collect()
        })
        .unwrap_or_default()
}

fn convert_multipoint(geom: &Map<String, Value>) -> Option<GeoValue> {
    let points = geom.get("points")?;
    let positions = positions_from(points);
    if positions.is_empty() {
        return None;
    }
    if positions.len() == 1 {
        Some(GeoValue::Point(positions.into_iter().next().unwrap()))
    } else {
        Some(GeoValue::MultiPoint(positions))
    }
}

fn convert_polyline(geom: &Map<String, Value>) -> Option<GeoValue> {
    let paths = geom.get("paths")?.as_array()?;
    let lines: Vec<Vec<Vec<f64>>> = paths.iter().map(positions_from).collect();
    if lines.is_empty() {
        return None;
    }
    if lines.len() == 1 {
        Some(GeoValue::LineString(lines.into_iter().next().unwrap()))
    } else {
        Some(GeoValue::MultiLineString(lines))
    }
}

/// A ring is degenerate when it is a closed, zero-area sliver: three
/// points where the first and last coincide.
fn is_degenerate_ring(ring: &[Vec<f64>]) -> bool {
    ring.len() == 3 && ring.first() == ring.last()
}

fn ensure_closed(mut ring: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    if ring.first() != ring.last() {
        if let Some(first) = ring.first().cloned() {
            ring.push(first);
        }
    }
    ring
}

/// `>= 0` (per the shoelace-style sum below) means clockwise, which in
/// Esri's winding convention marks an outer ring; negative means a hole.
fn ring_is_clockwise(ring: &[Vec<f64>]) -> bool {
    let mut total = 0.0;
    for window in ring.windows(2) {
        let (x1, y1) = (window[0][0], window[0][1]);
        let (x2, y2) = (window[1][0], window[1][1]);
        total += (x2 - x1) * (y2 + y1);
    }
    total >= 0.0
}

fn convert_polygon(geom: &Map<String, Value>) -> Option<GeoValue> {
    let rings = geom.get("rings")?.as_array()?;
    let clean_rings: Vec<Vec<Vec<f64>>> = rings
        .iter()
        .map(positions_from)
        .filter(|ring| !is_degenerate_ring(ring))
        .map(ensure_closed)
        .collect();

    if clean_rings.is_empty() {
        return None;
    }

    let mut polygons: Vec<Vec<Vec<Vec<f64>>>> = Vec::new();
    for ring in clean_rings {
        if ring_is_clockwise(&ring) {
            polygons.push(vec![ring]);
        } else if let Some(outer) = polygons.last_mut() {
            outer.push(ring);
        }
        // A hole arriving before any outer ring is silently skipped.
    }

    if polygons.is_empty() {
        None
    } else if polygons.len() == 1 {
        Some(GeoValue::Polygon(polygons.into_iter().next().unwrap()))
    } else {
        Some(GeoValue::MultiPolygon(polygons))
    }
}
