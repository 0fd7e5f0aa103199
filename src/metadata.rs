use std::fmt::{Display, Formatter};

use serde_json::Value;

use crate::error::MetadataError;
use crate::http::Requester;

/// Esri's geometry-type vocabulary, as advertised by a layer descriptor's
/// `geometryType` key.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum GeometryType {
    Point,
    MultiPoint,
    Polyline,
    Polygon,
    Envelope,
}

impl Display for GeometryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryType::Point => write!(f, "esriGeometryPoint"),
            GeometryType::MultiPoint => write!(f, "esriGeometryMultipoint"),
            GeometryType::Polyline => write!(f, "esriGeometryPolyline"),
            GeometryType::Polygon => write!(f, "esriGeometryPolygon"),
            GeometryType::Envelope => write!(f, "esriGeometryEnvelope"),
        }
    }
}

impl GeometryType {
    pub fn from_str(geo_type: &str) -> Result<GeometryType, MetadataError> {
        match geo_type {
            "esriGeometryPoint" => Ok(GeometryType::Point),
            "esriGeometryMultipoint" => Ok(GeometryType::MultiPoint),
            "esriGeometryPolyline" => Ok(GeometryType::Polyline),
            "esriGeometryPolygon" => Ok(GeometryType::Polygon),
            "esriGeometryEnvelope" => Ok(GeometryType::Envelope),
            other => Err(MetadataError::FieldTypeParsing(format!("Could not decode the geometry type of \"{}\"", other))),
        }
    }
}

/// Esri's field-type vocabulary. Only `OID` drives any decision in this
/// crate (object-ID field discovery); the rest are carried for the sake
/// of parsing a field descriptor without data loss.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FieldType {
    Blob,
    Date,
    Double,
    Float,
    Geometry,
    GlobalID,
    GUID,
    Integer,
    OID,
    Raster,
    Single,
    SmallInteger,
    String,
    XML,
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Blob => write!(f, "esriFieldTypeBlob"),
            FieldType::Date => write!(f, "esriFieldTypeDate"),
            FieldType::Double => write!(f, "esriFieldTypeDouble"),
            FieldType::Float => write!(f, "esriFieldTypeFloat"),
            FieldType::Geometry => write!(f, "esriFieldTypeGeometry"),
            FieldType::GlobalID => write!(f, "esriFieldTypeGlobalID"),
            FieldType::GUID => write!(f, "esriFieldTypeGUID"),
            FieldType::Integer => write!(f, "esriFieldTypeInteger"),
            FieldType::OID => write!(f, "esriFieldTypeOID"),
            FieldType::Raster => write!(f, "esriFieldTypeRaster"),
            FieldType::Single => write!(f, "esriFieldTypeSingle"),
            FieldType::SmallInteger => write!(f, "esriFieldTypeSmallInteger"),
            FieldType::String => write!(f, "esriFieldTypeString"),
            FieldType::XML => write!(f, "esriFieldTypeXML"),
        }
    }
}

impl FieldType {
    pub fn from_str(field_type: &str) -> Result<FieldType, MetadataError> {
        match field_type {
            "esriFieldTypeBlob" => Ok(FieldType::Blob),
            "esriFieldTypeDate" => Ok(FieldType::Date),
            "esriFieldTypeDouble" => Ok(FieldType::Double),
            "esriFieldTypeFloat" => Ok(FieldType::Float),
            "esriFieldTypeGeometry" => Ok(FieldType::Geometry),
            "esriFieldTypeGlobalID" => Ok(FieldType::GlobalID),
            "esriFieldTypeGUID" => Ok(FieldType::GUID),
            "esriFieldTypeInteger" => Ok(FieldType::Integer),
            "esriFieldTypeOID" => Ok(FieldType::OID),
            "esriFieldTypeRaster" => Ok(FieldType::Raster),
            "esriFieldTypeSingle" => Ok(FieldType::Single),
            "esriFieldTypeSmallInteger" => Ok(FieldType::SmallInteger),
            "esriFieldTypeString" => Ok(FieldType::String),
            "esriFieldTypeXML" => Ok(FieldType::XML),
            other => Err(MetadataError::FieldTypeParsing(format!("Could not decode the field type of \"{}\"", other))),
        }
    }
}

#[derive(Debug, Clone)]
struct FieldDescriptor {
    name: String,
    field_type: FieldType,
}

impl FieldDescriptor {
    fn new(field: &Value) -> Result<Self, MetadataError> {
        let name = field["name"]
            .as_str()
            .ok_or_else(|| MetadataError::FieldParsing("No name found".to_owned(), field.to_string()))?;
        let field_type = field["type"]
            .as_str()
            .ok_or_else(|| MetadataError::FieldParsing("No type found".to_owned(), field.to_string()))?;
        Ok(FieldDescriptor { name: name.to_owned(), field_type: FieldType::from_str(field_type)? })
    }
}

/// `{xmin, ymin, xmax, ymax, spatialReference}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub spatial_reference: Option<i64>,
}

/// The layer descriptor, fetched once and treated as immutable for the
/// life of an iterator.
#[derive(Debug, Clone)]
pub struct LayerMetadata {
    pub url: String,
    pub name: String,
    pub max_record_count: i64,
    pub is_table: bool,
    pub oid_field: Option<String>,
    pub geometry_type: Option<GeometryType>,
    pub extent: Option<Extent>,
    pub supports_pagination: bool,
    pub supports_statistics: bool,
    pub supports_advanced_pagination: bool,
}

fn parse_extent(metadata_json: &Value) -> Option<Extent> {
    let extent = metadata_json.get("extent")?.as_object()?;
    let xmin = extent.get("xmin")?.as_f64()?;
    let ymin = extent.get("ymin")?.as_f64()?;
    let xmax = extent.get("xmax")?.as_f64()?;
    let ymax = extent.get("ymax")?.as_f64()?;
    let spatial_reference = extent.get("spatialReference").and_then(|sr| sr.get("wkid")).and_then(|wkid| wkid.as_i64());
    Some(Extent { xmin, ymin, xmax, ymax, spatial_reference })
}

/// Reads `supportsPagination`/`supportsStatistics`, preferring the
/// `advancedQueryCapabilities` object when the server carries one:
/// servers that advertise advanced capabilities report the authoritative
/// values there, and the top-level keys can be stale or absent.
fn capability_flags(metadata_json: &Value) -> (bool, bool, bool) {
    let supports_pagination = metadata_json.get("supportsPagination").and_then(Value::as_bool).unwrap_or(false);
    match metadata_json.get("advancedQueryCapabilities").and_then(Value::as_object) {
        Some(advanced) => {
            let supports_statistics = advanced.get("supportsStatistics").and_then(Value::as_bool).unwrap_or(false);
            let supports_advanced_pagination = advanced.get("supportsPagination").and_then(Value::as_bool).unwrap_or(false);
            (supports_pagination, supports_statistics, supports_advanced_pagination)
        }
        None => {
            let supports_statistics = metadata_json.get("supportsStatistics").and_then(Value::as_bool).unwrap_or(false);
            (supports_pagination, supports_statistics, false)
        }
    }
}

/// Precedence from the layer metadata contract: the `objectIdField` key,
/// then the first field of Esri OID type, then a case-insensitive name
/// match on `objectid`. Every field is checked before giving up on a
/// tier — never break on the first unrelated field.
fn discover_oid_field(metadata_json: &Value, fields: &[FieldDescriptor]) -> Option<String> {
    if let Some(declared) = metadata_json.get("objectIdField").and_then(Value::as_str) {
        return Some(declared.to_owned());
    }
    if let Some(typed) = fields.iter().find(|field| field.field_type == FieldType::OID) {
        return Some(typed.name.clone());
    }
    fields.iter().find(|field| field.name.eq_ignore_ascii_case("objectid")).map(|field| field.name.clone())
}

/// Fetches and parses the layer descriptor (`GET <url>?f=json`).
pub async fn fetch_layer_metadata(requester: &Requester, url: &str) -> Result<LayerMetadata, MetadataError> {
    let metadata_json = requester
        .request_get(url, &[("f", "json")], "layer metadata")
        .await
        .map_err(|err| MetadataError::MissingKey(err.to_string()))?;

    let name = metadata_json
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| MetadataError::MissingKey("name".to_owned()))?
        .to_owned();
    let max_record_count =
        metadata_json.get("maxRecordCount").and_then(Value::as_i64).ok_or_else(|| MetadataError::MissingKey("maxRecordCount".to_owned()))?;
    let server_type = metadata_json.get("type").and_then(Value::as_str).unwrap_or_default();
    let is_table = server_type.eq_ignore_ascii_case("table");

    let geometry_type = if is_table {
        None
    } else {
        match metadata_json.get("geometryType").and_then(Value::as_str) {
            Some(geo_type_str) => Some(GeometryType::from_str(geo_type_str)?),
            None => None,
        }
    };

    let fields_json = metadata_json.get("fields").and_then(Value::as_array).ok_or_else(|| MetadataError::MissingKey("fields".to_owned()))?;
    let fields = fields_json.iter().map(FieldDescriptor::new).collect::<Result<Vec<_>, _>>()?;
    let oid_field = discover_oid_field(&metadata_json, &fields);
    let extent = parse_extent(&metadata_json);
    let (supports_pagination, supports_statistics, supports_advanced_pagination) = capability_flags(&metadata_json);

    Ok(LayerMetadata {
        url: url.to_owned(),
        name,
        max_record_count,
        is_table,
        oid_field,
        geometry_type,
        extent,
        supports_pagination,
        supports_statistics,
        supports_advanced_pagination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_str_should_return_oid_when_passed_oid_field_type() {
        assert_eq!(FieldType::from_str("esriFieldTypeOID").unwrap(), FieldType::OID);
    }

    #[test]
    fn from_str_should_fail_when_passed_invalid_field_type() {
        let result = FieldType::from_str("esriFieldTypeUnknown");
        assert!(result.is_err());
    }

    #[test]
    fn geometry_type_round_trips_through_display_and_from_str() {
        for geo_type in [GeometryType::Point, GeometryType::MultiPoint, GeometryType::Polyline, GeometryType::Polygon, GeometryType::Envelope] {
            assert_eq!(GeometryType::from_str(&geo_type.to_string()).unwrap(), geo_type);
        }
    }

    #[test]
    fn discover_oid_field_prefers_the_declared_object_id_field() {
        let metadata_json = json!({ "objectIdField": "FID" });
        let fields = vec![FieldDescriptor { name: "OBJECTID".to_owned(), field_type: FieldType::OID }];
        assert_eq!(discover_oid_field(&metadata_json, &fields), Some("FID".to_owned()));
    }

    #[test]
    fn discover_oid_field_falls_back_to_typed_field() {
        let metadata_json = json!({});
        let fields = vec![
            FieldDescriptor { name: "NAME".to_owned(), field_type: FieldType::String },
            FieldDescriptor { name: "OBJECTID".to_owned(), field_type: FieldType::OID },
        ];
        assert_eq!(discover_oid_field(&metadata_json, &fields), Some("OBJECTID".to_owned()));
    }

    #[test]
    fn discover_oid_field_falls_back_to_case_insensitive_name_match() {
        let metadata_json = json!({});
        let fields = vec![FieldDescriptor { name: "ObjectId".to_owned(), field_type: FieldType::Integer }];
        assert_eq!(discover_oid_field(&metadata_json, &fields), Some("ObjectId".to_owned()));
    }

    #[test]
    fn discover_oid_field_does_not_stop_at_the_first_unrelated_field() {
        let metadata_json = json!({});
        let fields = vec![
            FieldDescriptor { name: "SHAPE".to_owned(), field_type: FieldType::Geometry },
            FieldDescriptor { name: "NAME".to_owned(), field_type: FieldType::String },
            FieldDescriptor { name: "OBJECTID".to_owned(), field_type: FieldType::OID },
        ];
        assert_eq!(discover_oid_field(&metadata_json, &fields), Some("OBJECTID".to_owned()));
    }

    #[test]
    fn discover_oid_field_returns_none_when_nothing_matches() {
        let metadata_json = json!({});
        let fields = vec![FieldDescriptor { name: "NAME".to_owned(), field_type: FieldType::String }];
        assert_eq!(discover_oid_field(&metadata_json, &fields), None);
    }

    #[test]
    fn capability_flags_prefers_advanced_query_capabilities_object() {
        let metadata_json = json!({
            "supportsPagination": true,
            "supportsStatistics": false,
            "advancedQueryCapabilities": { "supportsStatistics": true, "supportsPagination": false }
        });
        let (pagination, statistics, advanced_pagination) = capability_flags(&metadata_json);
        assert!(pagination);
        assert!(statistics);
        assert!(!advanced_pagination);
    }

    #[test]
    fn capability_flags_falls_back_to_top_level_keys() {
        let metadata_json = json!({ "supportsPagination": true, "supportsStatistics": true });
        let (pagination, statistics, advanced_pagination) = capability_flags(&metadata_json);
        assert!(pagination);
        assert!(statistics);
        assert!(!advanced_pagination);
    }

    #[test]
    fn parse_extent_reads_bounds_and_wkid() {
        let metadata_json = json!({ "extent": { "xmin": -1.0, "ymin": -2.0, "xmax": 1.0, "ymax": 2.0, "spatialReference": { "wkid": 4326 } } });
        let extent = parse_extent(&metadata_json).unwrap();
        assert_eq!(extent, Extent { xmin: -1.0, ymin: -2.0, xmax: 1.0, ymax: 2.0, spatial_reference: Some(4326) });
    }
}
