//! Strategy Selector: decides which of the five pagination modes can
//! enumerate a layer, in the order that costs the server the least.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::config::DumperOptions;
use crate::error::DumperError;
use crate::http::Requester;
use crate::metadata::LayerMetadata;
use crate::state::{DumperState, GeoQueriesParams, OidEnumerationParams, OidWhereClauseParams, ResultOffsetParams};

/// `where=1=1, returnCountOnly=true`. A server that doesn't support this
/// returns a body with no `count` key, which we treat the same as "row
/// count unknown" rather than a hard failure.
async fn feature_count(requester: &Requester, url: &str) -> Result<Option<i64>, DumperError> {
    let query_url = format!("{}/query", url);
    let params: Vec<(&str, &str)> = vec![("where", "1=1"), ("returnCountOnly", "true"), ("f", "json")];
    let body = requester.request_get(&query_url, &params, "Could not retrieve row count").await?;
    Ok(body.get("count").and_then(Value::as_i64))
}

/// §4.4: a single restricted-fields probe page. Pagination-with-fields is
/// considered broken iff the body carries an `error` whose message isn't
/// the literal string the original scraper special-cased.
async fn can_handle_pagination(requester: &Requester, url: &str, fields: &[String]) -> bool {
    let query_url = format!("{}/query", url);
    let joined = fields.join(",");
    let params: Vec<(&str, &str)> =
        vec![("resultOffset", "0"), ("resultRecordCount", "1"), ("where", "1=1"), ("returnGeometry", "false"), ("outFields", &joined), ("f", "json")];
    match requester.request_query(&query_url, &params, "pagination check", true).await {
        Ok(body) => match body.get("error").and_then(Value::as_object).and_then(|err| err.get("message")).and_then(Value::as_str) {
            Some(message) => message != "Failed to execute query.",
            None => false,
        },
        // A transport failure here doesn't tell us anything about the
        // field-pagination bug specifically; assume fields are fine and
        // let the real pages surface the problem if there is one.
        Err(_) => false,
    }
}

/// §4.3 step 4: `outStatistics` request for `min`/`max` of the OID field.
/// The wire shape (`THE_MIN`/`THE_MAX` field names) is pinned by the
/// original scraper for compatibility with servers that relabel the
/// requested output field names.
async fn oid_min_max(requester: &Requester, url: &str, oid_field: &str) -> Result<(i64, i64), DumperError> {
    let query_url = format!("{}/query", url);
    let statistics = serde_json::json!([
        { "statisticType": "min", "onStatisticField": oid_field, "outStatisticFieldName": "THE_MIN" },
        { "statisticType": "max", "onStatisticField": oid_field, "outStatisticFieldName": "THE_MAX" },
    ])
    .to_string();
    let params: Vec<(&str, &str)> = vec![("f", "json"), ("outFields", ""), ("outStatistics", &statistics)];
    let body = requester.request_get(&query_url, &params, "Could not retrieve min/max oid values").await?;
    let attributes = body
        .get("features")
        .and_then(Value::as_array)
        .and_then(|features| features.first())
        .and_then(|feature| feature.get("attributes"))
        .and_then(Value::as_object)
        .ok_or_else(|| statistics_disagreement("no attributes returned from min/max statistics query"))?;

    // Some servers relabel the requested output field names (observed on
    // ArcGIS Server 10.11), so pick min/max over the returned *values*
    // rather than trusting `THE_MIN`/`THE_MAX` by name.
    let values: Vec<i64> = attributes.values().filter_map(Value::as_i64).collect();
    let min = values.iter().copied().min().ok_or_else(|| statistics_disagreement("min/max statistics returned no numeric values"))?;
    let max = values.iter().copied().max().ok_or_else(|| statistics_disagreement("min/max statistics returned no numeric values"))?;
    Ok((min, max))
}

/// Re-queries `where oid=min OR oid=max, returnIdsOnly=true` and checks
/// both extremes actually come back. A server can answer the statistics
/// query with values that don't correspond to real rows (e.g. a stale
/// materialized view), so we don't trust the statistics alone.
async fn verify_min_max_present(requester: &Requester, url: &str, oid_field: &str, min: i64, max: i64) -> Result<bool, DumperError> {
    let query_url = format!("{}/query", url);
    let where_clause = format!("{} = {} OR {} = {}", oid_field, min, oid_field, max);
    let params: Vec<(&str, &str)> = vec![("where", &where_clause), ("returnIdsOnly", "true"), ("f", "json")];
    let body = requester.request_get(&query_url, &params, "Could not verify min/max oid values").await?;
    let ids: BTreeSet<i64> = body.get("objectIds").and_then(Value::as_array).map(|arr| arr.iter().filter_map(Value::as_i64).collect()).unwrap_or_default();
    Ok(ids.contains(&min) && ids.contains(&max))
}

/// `None` means the server doesn't support `returnIdsOnly` at all (no
/// `objectIds` key in an otherwise-successful response) — the signal that
/// sends the selector to `GEO_QUERIES`. `Some(ids)` (possibly empty)
/// means the server answered the question; an empty list means `NO_DATA`.
async fn all_oids(requester: &Requester, url: &str) -> Result<Option<Vec<i64>>, DumperError> {
    let query_url = format!("{}/query", url);
    let params: Vec<(&str, &str)> = vec![("where", "1=1"), ("returnIdsOnly", "true"), ("f", "json")];
    let body = requester.request_get(&query_url, &params, "Could not retrieve object IDs").await?;
    match body.get("objectIds").and_then(Value::as_array) {
        Some(arr) => {
            let mut ids: Vec<i64> = arr.iter().filter_map(Value::as_i64).collect();
            ids.sort_unstable();
            ids.dedup();
            Ok(Some(ids))
        }
        None => Ok(None),
    }
}

fn statistics_disagreement(detail: &str) -> DumperError {
    DumperError::Download { message: "statistics probe disagreement".to_owned(), details: vec![detail.to_owned()] }
}

/// Walks the decision tree of §4.3 and returns the chosen, freshly seeded
/// state. Never returns `NoData` mid-tree without actually having
/// confirmed there is nothing to fetch.
pub async fn select(requester: &Requester, metadata: &LayerMetadata, options: &DumperOptions) -> Result<DumperState, DumperError> {
    let row_count = feature_count(requester, &metadata.url).await.ok().flatten();

    if let Some(0) = row_count {
        return Ok(DumperState::NoData);
    }

    let supports_offset_pagination = metadata.supports_pagination || metadata.supports_advanced_pagination;
    if !options.paginate_oid {
        if let Some(row_count) = row_count {
            if supports_offset_pagination {
                let fields_pagination_ok = match &options.fields {
                    Some(fields) if !fields.is_empty() => !can_handle_pagination(requester, &metadata.url, fields).await,
                    _ => true,
                };
                return Ok(DumperState::ResultOffset(ResultOffsetParams {
                    row_count,
                    start_with: options.start_with.max(0),
                    fields_pagination_ok,
                }));
            }
        }
    }

    let oid_field = metadata.oid_field.clone().ok_or(DumperError::MissingOid)?;

    if metadata.supports_statistics {
        if let Ok((oid_min, oid_max)) = oid_min_max(requester, &metadata.url, &oid_field).await {
            match verify_min_max_present(requester, &metadata.url, &oid_field, oid_min, oid_max).await {
                Ok(true) => {
                    return Ok(DumperState::OidWhereClause(OidWhereClauseParams { oid_field, oid_min, oid_max, done: BTreeSet::new() }));
                }
                Ok(false) => {
                    log::warn!("Statistics min/max disagreed with a returnIdsOnly probe; falling back to OID enumeration");
                }
                Err(err) => {
                    log::warn!("Could not verify statistics min/max ({}); falling back to OID enumeration", err);
                }
            }
        } else {
            log::warn!("Finding max/min from statistics failed. Trying OID enumeration.");
        }
    }

    match all_oids(requester, &metadata.url).await? {
        Some(oids) if oids.is_empty() => Ok(DumperState::NoData),
        Some(oids) => Ok(DumperState::OidEnumeration(OidEnumerationParams { oid_field, all_oids: oids, done: BTreeSet::new() })),
        // `returnIdsOnly` itself is unsupported: the last resort the
        // decision tree names, a quadtree walk over the layer's extent.
        None => Ok(DumperState::GeoQueries(GeoQueriesParams { oid_field, explored_tree: Default::default(), done: BTreeSet::new() })),
    }
}
