use std::collections::{BTreeMap, HashMap};

use crate::config::DumperOptions;
use crate::state::{OidEnumerationParams, OidWhereClauseParams, ResultOffsetParams};

/// One query's full parameter set, in the canonical key order a server
/// sees it — a `BTreeMap` so the same page always serializes the same
/// way, which keeps state-resumption tests deterministic.
pub type QueryParams = BTreeMap<String, String>;

/// `P = min(max_page_size, max_record_count)`.
pub fn page_size(options: &DumperOptions, max_record_count: i64) -> i64 {
    options.max_page_size.min(max_record_count).max(1)
}

fn out_fields(options: &DumperOptions, fields_pagination_ok: bool) -> String {
    if !fields_pagination_ok {
        return "*".to_owned();
    }
    match &options.fields {
        Some(fields) if !fields.is_empty() => fields.join(","),
        _ => "*".to_owned(),
    }
}

fn common_fields(options: &DumperOptions, out_fields_value: String) -> QueryParams {
    let mut page = QueryParams::new();
    page.insert("returnGeometry".to_owned(), options.request_geometry.to_string());
    page.insert("outSR".to_owned(), options.out_sr.clone());
    page.insert("geometryPrecision".to_owned(), options.geometry_precision.to_string());
    page.insert("outFields".to_owned(), out_fields_value);
    page.insert("f".to_owned(), "json".to_owned());
    page
}

/// Caller-supplied `extra_query_args` overlay onto the planner-built
/// args. The one special case: a user-supplied `where` ANDs onto
/// whatever `where` the planner already built (even `1=1`), rather than
/// replacing it — losing the planner's own filter would break
/// completeness for the OID-indexed modes.
pub fn overlay_extra_args(mut page: QueryParams, extra_query_args: &HashMap<String, String>) -> QueryParams {
    for (key, value) in extra_query_args {
        if key == "where" {
            if let Some(existing) = page.get("where").cloned() {
                page.insert("where".to_owned(), format!("({}) AND ({})", existing, value));
                continue;
            }
        }
        page.insert(key.clone(), value.clone());
    }
    page
}

/// `RESULT_OFFSET`: one page per `[start_with, start_with+P)` window
/// while `start_with < row_count`. `None` once the layer is exhausted.
pub fn next_result_offset_page(params: &ResultOffsetParams, page_size: i64, options: &DumperOptions) -> Option<QueryParams> {
    if params.start_with >= params.row_count {
        return None;
    }
    let mut page = common_fields(options, out_fields(options, params.fields_pagination_ok));
    page.insert("where".to_owned(), "1=1".to_owned());
    page.insert("resultOffset".to_owned(), params.start_with.to_string());
    page.insert("resultRecordCount".to_owned(), page_size.to_string());
    Some(overlay_extra_args(page, &options.extra_query_args))
}

/// The half-open window `(page_min, page_max]` the next `OID_WHERE_CLAUSE`
/// page would cover, or `None` once `done_till` has reached `oid_max`.
/// Exposed separately so the runner can mark the whole window as
/// consumed even when it comes back empty (a sparse OID range must still
/// make progress, not replay the same window forever).
pub fn next_oid_where_window(params: &OidWhereClauseParams, page_size: i64) -> Option<(i64, i64)> {
    let page_min = params.done_till();
    if page_min >= params.oid_max {
        return None;
    }
    Some((page_min, (page_min + page_size).min(params.oid_max)))
}

/// `OID_WHERE_CLAUSE`: half-open windows `(done_till, done_till+P]`
/// clamped to `oid_max`, advancing until `done_till == oid_max`. Windows
/// never overlap: the left edge is a strict `>`, so the shared boundary
/// value belongs only to the window that closes on it.
pub fn next_oid_where_clause_page(params: &OidWhereClauseParams, page_size: i64, options: &DumperOptions) -> Option<QueryParams> {
    let (page_min, page_max) = next_oid_where_window(params, page_size)?;
    let where_clause = format!("{} > {} AND {} <= {}", params.oid_field, page_min, params.oid_field, page_max);
    let mut page = common_fields(options, "*".to_owned());
    page.insert("where".to_owned(), where_clause);
    Some(overlay_extra_args(page, &options.extra_query_args))
}

/// The up-to-`P` not-yet-done OIDs the next `OID_ENUMERATION` page would
/// cover. Exposed separately so the runner can mark the whole chunk done
/// even for OIDs the server silently omits from its response (deleted
/// since enumeration, for instance).
pub fn next_oid_enumeration_chunk(params: &OidEnumerationParams, page_size: i64) -> Vec<i64> {
    params.oids_left().into_iter().take(page_size.max(1) as usize).collect()
}

/// `OID_ENUMERATION`: the next up-to-`P` not-yet-done OIDs, queried as a
/// closed interval rather than an `objectIds=` list (some servers
/// truncate long URLs).
pub fn next_oid_enumeration_page(params: &OidEnumerationParams, page_size: i64, options: &DumperOptions) -> Option<QueryParams> {
    let chunk = next_oid_enumeration_chunk(params, page_size);
    if chunk.is_empty() {
        return None;
    }
    let chunk_min = *chunk.first().expect("chunk is non-empty");
    let chunk_max = *chunk.last().expect("chunk is non-empty");
    let where_clause = format!("{} >= {} AND {} <= {}", params.oid_field, chunk_min, params.oid_field, chunk_max);
    let mut page = common_fields(options, "*".to_owned());
    page.insert("where".to_owned(), where_clause);
    Some(overlay_extra_args(page, &options.extra_query_args))
}
