//! End-to-end coverage for the canonical scenarios driving a
//! [`esri_layer_dump::LayerDumper`] against a fake Esri endpoint, with no
//! real network access.

use esri_layer_dump::{DumperError, DumperOptions, LayerDumper};
use mockito::Matcher;
use serde_json::json;

/// S1: a server with no offset pagination and no statistics support falls
/// back to enumerating every advertised object ID.
#[tokio::test]
async fn oid_enumeration_yields_every_object_id() {
    let mut server = mockito::Server::new_async().await;
    let layer_url = format!("{}/MapServer/0", server.url());

    let metadata = json!({
        "name": "Layer",
        "type": "FeatureLayer",
        "maxRecordCount": 1000,
        "objectIdField": "OBJECTID",
        "geometryType": "esriGeometryPoint",
        "fields": [{ "name": "OBJECTID", "type": "esriFieldTypeOID" }],
        "supportsPagination": false,
        "supportsStatistics": false
    });
    server.mock("GET", "/MapServer/0").match_query(Matcher::UrlEncoded("f".into(), "json".into())).with_body(metadata.to_string()).create_async().await;

    server
        .mock("GET", "/MapServer/0/query")
        .match_query(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
        .with_body(json!({ "count": 6 }).to_string())
        .create_async()
        .await;

    server
        .mock("GET", "/MapServer/0/query")
        .match_query(Matcher::UrlEncoded("returnIdsOnly".into(), "true".into()))
        .with_body(json!({ "objectIds": [1, 2, 3, 4, 5, 6] }).to_string())
        .create_async()
        .await;

    let features: Vec<_> = (1..=6).map(|oid| json!({ "attributes": { "OBJECTID": oid } })).collect();
    server
        .mock("POST", "/MapServer/0/query")
        .match_body(Matcher::UrlEncoded("where".into(), "OBJECTID >= 1 AND OBJECTID <= 6".into()))
        .with_body(json!({ "features": features }).to_string())
        .create_async()
        .await;

    let options = DumperOptions::new(layer_url);
    let mut dumper = LayerDumper::open(options).await.unwrap();
    let all = dumper.get_all().await.unwrap();
    assert_eq!(all.len(), 6);
}

/// S3: a server advertising advanced-query offset pagination is paginated
/// with `resultOffset`/`resultRecordCount` instead of any OID strategy.
#[tokio::test]
async fn advanced_pagination_yields_exact_count() {
    let mut server = mockito::Server::new_async().await;
    let layer_url = format!("{}/MapServer/1", server.url());

    let metadata = json!({
        "name": "Layer",
        "type": "FeatureLayer",
        "maxRecordCount": 1000,
        "objectIdField": "OBJECTID",
        "geometryType": "esriGeometryPoint",
        "fields": [{ "name": "OBJECTID", "type": "esriFieldTypeOID" }],
        "advancedQueryCapabilities": { "supportsPagination": true, "supportsStatistics": false }
    });
    server.mock("GET", "/MapServer/1").match_query(Matcher::UrlEncoded("f".into(), "json".into())).with_body(metadata.to_string()).create_async().await;

    server
        .mock("GET", "/MapServer/1/query")
        .match_query(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
        .with_body(json!({ "count": 1000 }).to_string())
        .create_async()
        .await;

    let features: Vec<_> = (0..1000).map(|oid| json!({ "attributes": { "OBJECTID": oid } })).collect();
    server
        .mock("POST", "/MapServer/1/query")
        .match_body(Matcher::UrlEncoded("resultOffset".into(), "0".into()))
        .with_body(json!({ "features": features }).to_string())
        .create_async()
        .await;

    let options = DumperOptions::new(layer_url);
    let mut dumper = LayerDumper::open(options).await.unwrap();
    let all = dumper.get_all().await.unwrap();
    assert_eq!(all.len(), 1000);
}

/// S2: a server that advertises statistics support, whose min/max agree
/// with a `returnIdsOnly` cross-check, is paginated as a single
/// `OID_WHERE_CLAUSE` window.
#[tokio::test]
async fn statistics_pagination_yields_the_single_bounded_feature() {
    let mut server = mockito::Server::new_async().await;
    let layer_url = format!("{}/MapServer/3", server.url());

    let metadata = json!({
        "name": "Layer",
        "type": "FeatureLayer",
        "maxRecordCount": 1000,
        "objectIdField": "OBJECTID",
        "geometryType": "esriGeometryPoint",
        "fields": [{ "name": "OBJECTID", "type": "esriFieldTypeOID" }],
        "supportsPagination": false,
        "supportsStatistics": true
    });
    server.mock("GET", "/MapServer/3").match_query(Matcher::UrlEncoded("f".into(), "json".into())).with_body(metadata.to_string()).create_async().await;

    server
        .mock("GET", "/MapServer/3/query")
        .match_query(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
        .with_body(json!({}).to_string())
        .create_async()
        .await;

    server
        .mock("GET", "/MapServer/3/query")
        .match_query(Matcher::UrlEncoded("outFields".into(), "".into()))
        .with_body(json!({ "features": [{ "attributes": { "THE_MIN": 1, "THE_MAX": 1 } }] }).to_string())
        .create_async()
        .await;

    server
        .mock("GET", "/MapServer/3/query")
        .match_query(Matcher::UrlEncoded("where".into(), "OBJECTID = 1 OR OBJECTID = 1".into()))
        .with_body(json!({ "objectIds": [1] }).to_string())
        .create_async()
        .await;

    server
        .mock("POST", "/MapServer/3/query")
        .match_body(Matcher::UrlEncoded("where".into(), "OBJECTID > 0 AND OBJECTID <= 1".into()))
        .with_body(json!({ "features": [{ "attributes": { "OBJECTID": 1 } }] }).to_string())
        .create_async()
        .await;

    let options = DumperOptions::new(layer_url);
    let mut dumper = LayerDumper::open(options).await.unwrap();
    let all = dumper.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
}

/// S4: statistics report a min/max that a `returnIdsOnly` probe can't
/// confirm, so the selector falls back to enumerating every object ID.
#[tokio::test]
async fn statistics_disagreement_falls_back_to_oid_enumeration() {
    let mut server = mockito::Server::new_async().await;
    let layer_url = format!("{}/MapServer/4", server.url());

    let metadata = json!({
        "name": "Layer",
        "type": "FeatureLayer",
        "maxRecordCount": 1000,
        "objectIdField": "OBJECTID",
        "geometryType": "esriGeometryPoint",
        "fields": [{ "name": "OBJECTID", "type": "esriFieldTypeOID" }],
        "supportsPagination": false,
        "supportsStatistics": true
    });
    server.mock("GET", "/MapServer/4").match_query(Matcher::UrlEncoded("f".into(), "json".into())).with_body(metadata.to_string()).create_async().await;

    server
        .mock("GET", "/MapServer/4/query")
        .match_query(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
        .with_body(json!({}).to_string())
        .create_async()
        .await;

    server
        .mock("GET", "/MapServer/4/query")
        .match_query(Matcher::UrlEncoded("outFields".into(), "".into()))
        .with_body(json!({ "features": [{ "attributes": { "THE_MIN": 1, "THE_MAX": 10 } }] }).to_string())
        .create_async()
        .await;

    // The cross-check comes back empty: the statistics lied.
    server
        .mock("GET", "/MapServer/4/query")
        .match_query(Matcher::UrlEncoded("where".into(), "OBJECTID = 1 OR OBJECTID = 10".into()))
        .with_body(json!({ "objectIds": [] }).to_string())
        .create_async()
        .await;

    server
        .mock("GET", "/MapServer/4/query")
        .match_query(Matcher::UrlEncoded("where".into(), "1=1".into()))
        .with_body(json!({ "objectIds": (1..=10).collect::<Vec<i64>>() }).to_string())
        .create_async()
        .await;

    let features: Vec<_> = (1..=10).map(|oid| json!({ "attributes": { "OBJECTID": oid } })).collect();
    server
        .mock("POST", "/MapServer/4/query")
        .match_body(Matcher::UrlEncoded("where".into(), "OBJECTID >= 1 AND OBJECTID <= 10".into()))
        .with_body(json!({ "features": features }).to_string())
        .create_async()
        .await;

    let options = DumperOptions::new(layer_url);
    let mut dumper = LayerDumper::open(options).await.unwrap();
    let all = dumper.get_all().await.unwrap();
    assert_eq!(all.len(), 10);
}

/// S5: a server with none of count, statistics, or ID enumeration support
/// forces the quadtree geo-query fallback; a saturated root page splits
/// into quadrants, and the distinct features across them are deduped.
#[tokio::test]
async fn geo_queries_subdivide_a_saturated_root_and_yield_distinct_features() {
    let mut server = mockito::Server::new_async().await;
    let layer_url = format!("{}/MapServer/5", server.url());

    let metadata = json!({
        "name": "Layer",
        "type": "FeatureLayer",
        "maxRecordCount": 2,
        "objectIdField": "OBJECTID",
        "geometryType": "esriGeometryPoint",
        "fields": [{ "name": "OBJECTID", "type": "esriFieldTypeOID" }],
        "extent": { "xmin": 0.0, "ymin": 0.0, "xmax": 100.0, "ymax": 100.0, "spatialReference": { "wkid": 4326 } },
        "supportsPagination": false,
        "supportsStatistics": false
    });
    server.mock("GET", "/MapServer/5").match_query(Matcher::UrlEncoded("f".into(), "json".into())).with_body(metadata.to_string()).create_async().await;

    server
        .mock("GET", "/MapServer/5/query")
        .match_query(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
        .with_body(json!({}).to_string())
        .create_async()
        .await;

    server
        .mock("GET", "/MapServer/5/query")
        .match_query(Matcher::UrlEncoded("returnIdsOnly".into(), "true".into()))
        .with_body(json!({}).to_string())
        .create_async()
        .await;

    // Root box is saturated (2 features for a page size of 2): split.
    server
        .mock("POST", "/MapServer/5/query")
        .match_body(Matcher::UrlEncoded("geometry".into(), "0,0,100,100".into()))
        .with_body(json!({ "features": [{ "attributes": { "OBJECTID": 1 } }, { "attributes": { "OBJECTID": 2 } }] }).to_string())
        .create_async()
        .await;

    // SW quadrant: one real feature.
    server
        .mock("POST", "/MapServer/5/query")
        .match_body(Matcher::UrlEncoded("geometry".into(), "0,0,50,50".into()))
        .with_body(json!({ "features": [{ "attributes": { "OBJECTID": 1 } }] }).to_string())
        .create_async()
        .await;

    // SE quadrant: the other real feature.
    server
        .mock("POST", "/MapServer/5/query")
        .match_body(Matcher::UrlEncoded("geometry".into(), "50,0,100,50".into()))
        .with_body(json!({ "features": [{ "attributes": { "OBJECTID": 2 } }] }).to_string())
        .create_async()
        .await;

    // NW and NE quadrants are empty.
    server
        .mock("POST", "/MapServer/5/query")
        .match_body(Matcher::UrlEncoded("geometry".into(), "0,50,50,100".into()))
        .with_body(json!({ "features": [] }).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/MapServer/5/query")
        .match_body(Matcher::UrlEncoded("geometry".into(), "50,50,100,100".into()))
        .with_body(json!({ "features": [] }).to_string())
        .create_async()
        .await;

    let options = DumperOptions::new(layer_url);
    let mut dumper = LayerDumper::open(options).await.unwrap();
    let all = dumper.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
}

/// S6: an Esri `error` payload on a page request surfaces as a fatal
/// `Download` error, never retried (it isn't `TransportRetryable`).
#[tokio::test]
async fn a_page_level_esri_error_propagates_as_download() {
    let mut server = mockito::Server::new_async().await;
    let layer_url = format!("{}/MapServer/2", server.url());

    let metadata = json!({
        "name": "Layer",
        "type": "FeatureLayer",
        "maxRecordCount": 1000,
        "objectIdField": "OBJECTID",
        "geometryType": "esriGeometryPoint",
        "fields": [{ "name": "OBJECTID", "type": "esriFieldTypeOID" }],
        "advancedQueryCapabilities": { "supportsPagination": true, "supportsStatistics": false }
    });
    server.mock("GET", "/MapServer/2").match_query(Matcher::UrlEncoded("f".into(), "json".into())).with_body(metadata.to_string()).create_async().await;

    server
        .mock("GET", "/MapServer/2/query")
        .match_query(Matcher::UrlEncoded("returnCountOnly".into(), "true".into()))
        .with_body(json!({ "count": 10 }).to_string())
        .create_async()
        .await;

    server
        .mock("POST", "/MapServer/2/query")
        .with_body(json!({ "error": { "code": 500, "message": "Internal server error" } }).to_string())
        .create_async()
        .await;

    let options = DumperOptions::new(layer_url);
    let mut dumper = LayerDumper::open(options).await.unwrap();
    let err = dumper.next().await.unwrap_err();
    match err {
        DumperError::Download { message, .. } => assert!(message.contains("Internal server error")),
        other => panic!("expected Download, got {:?}", other),
    }
}
