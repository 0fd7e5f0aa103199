use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DumperError;

/// Exploration status of one quadtree node, keyed by the string path
/// from the root described in the geo-query recursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExploreStatus {
    Open,
    Split,
    Explored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultOffsetParams {
    pub row_count: i64,
    pub start_with: i64,
    pub fields_pagination_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidWhereClauseParams {
    pub oid_field: String,
    pub oid_min: i64,
    pub oid_max: i64,
    pub done: BTreeSet<i64>,
}

impl OidWhereClauseParams {
    /// `max(done ∪ {oid_min - 1})` — the right edge of the half-open
    /// window already covered.
    pub fn done_till(&self) -> i64 {
        self.done.iter().copied().max().unwrap_or(self.oid_min - 1).max(self.oid_min - 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidEnumerationParams {
    pub oid_field: String,
    pub all_oids: Vec<i64>,
    pub done: BTreeSet<i64>,
}

impl OidEnumerationParams {
    pub fn oids_left(&self) -> Vec<i64> {
        self.all_oids.iter().copied().filter(|oid| !self.done.contains(oid)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoQueriesParams {
    pub oid_field: String,
    pub explored_tree: BTreeMap<String, ExploreStatus>,
    pub done: BTreeSet<i64>,
}

/// A persistable record of which pagination mode is driving an iterator
/// and what it has already yielded. One variant per mode in the
/// strategy selector's decision tree; `NoData` carries no parameters.
#[derive(Debug, Clone)]
pub enum DumperState {
    NoData,
    ResultOffset(ResultOffsetParams),
    OidWhereClause(OidWhereClauseParams),
    OidEnumeration(OidEnumerationParams),
    GeoQueries(GeoQueriesParams),
}

fn read_oid(feature: &geojson::Feature, oid_field: &str) -> Result<i64, DumperError> {
    feature
        .properties
        .as_ref()
        .and_then(|props| props.get(oid_field))
        .and_then(Value::as_i64)
        .ok_or(DumperError::MissingOid)
}

impl DumperState {
    pub fn mode_tag(&self) -> &'static str {
        match self {
            DumperState::NoData => "NO_DATA",
            DumperState::ResultOffset(_) => "RESULT_OFFSET",
            DumperState::OidWhereClause(_) => "OID_WHERE_CLAUSE",
            DumperState::OidEnumeration(_) => "OID_ENUMERATION",
            DumperState::GeoQueries(_) => "GEO_QUERIES",
        }
    }

    /// The object ID field name driving dedup for the OID-indexed modes,
    /// or `None` for `NoData`/`ResultOffset`, which never consult it.
    pub fn oid_field(&self) -> Option<&str> {
        match self {
            DumperState::OidWhereClause(params) => Some(&params.oid_field),
            DumperState::OidEnumeration(params) => Some(&params.oid_field),
            DumperState::GeoQueries(params) => Some(&params.oid_field),
            DumperState::NoData | DumperState::ResultOffset(_) => None,
        }
    }

    /// `already_covered(f) = oid(f) ∈ done` for the OID-indexed modes;
    /// always `false` for the modes that never revisit a position.
    pub fn already_covered(&self, oid: Option<i64>) -> bool {
        match (self, oid) {
            (DumperState::OidWhereClause(params), Some(oid)) => params.done.contains(&oid),
            (DumperState::OidEnumeration(params), Some(oid)) => params.done.contains(&oid),
            (DumperState::GeoQueries(params), Some(oid)) => params.done.contains(&oid),
            _ => false,
        }
    }

    /// Advances `ResultOffset`'s cursor by one yielded feature.
    pub fn advance_offset(&mut self) {
        if let DumperState::ResultOffset(params) = self {
            params.start_with += 1;
        }
    }

    /// Records a yielded feature's OID for the dedup-by-OID modes.
    pub fn record_oid(&mut self, oid: i64) {
        match self {
            DumperState::OidWhereClause(params) => {
                params.done.insert(oid);
            }
            DumperState::OidEnumeration(params) => {
                params.done.insert(oid);
            }
            DumperState::GeoQueries(params) => {
                params.done.insert(oid);
            }
            DumperState::NoData | DumperState::ResultOffset(_) => {}
        }
    }

    /// Marks a quadtree node's exploration status and, when it becomes
    /// `Explored`, prunes its strict descendants from the map — they
    /// can never be visited again.
    pub fn mark_node(&mut self, key: &str, status: ExploreStatus) {
        if let DumperState::GeoQueries(params) = self {
            params.explored_tree.insert(key.to_owned(), status);
            if status == ExploreStatus::Explored {
                let descendants: Vec<String> =
                    params.explored_tree.keys().filter(|candidate| candidate.as_str() != key && candidate.starts_with(key)).cloned().collect();
                for descendant in descendants {
                    params.explored_tree.remove(&descendant);
                }
            }
        }
    }

    pub fn node_status(&self, key: &str) -> Option<ExploreStatus> {
        match self {
            DumperState::GeoQueries(params) => params.explored_tree.get(key).copied(),
            _ => None,
        }
    }

    /// Folds one already-yielded GeoJSON feature into the state, for
    /// resuming from a previously written output file instead of (or in
    /// addition to) an explicitly saved state blob.
    pub fn absorb_geojson_feature(&mut self, feature: &geojson::Feature) -> Result<(), DumperError> {
        match self {
            DumperState::NoData => Ok(()),
            DumperState::ResultOffset(params) => {
                params.start_with += 1;
                Ok(())
            }
            DumperState::OidWhereClause(params) => {
                let oid = read_oid(feature, &params.oid_field)?;
                params.done.insert(oid);
                Ok(())
            }
            DumperState::OidEnumeration(params) => {
                let oid = read_oid(feature, &params.oid_field)?;
                params.done.insert(oid);
                Ok(())
            }
            DumperState::GeoQueries(params) => {
                let oid = read_oid(feature, &params.oid_field)?;
                params.done.insert(oid);
                Ok(())
            }
        }
    }

    /// A short human-readable summary, for progress display and logs —
    /// never for machine parsing.
    pub fn describe(&self) -> String {
        match self {
            DumperState::NoData => "<NO_DATA>".to_owned(),
            DumperState::ResultOffset(params) => {
                format!("<RESULT_OFFSET> start_with={}, row_count={}", params.start_with, params.row_count)
            }
            DumperState::OidWhereClause(params) => {
                format!(
                    "<OID_WHERE_CLAUSE> oid_field={}, oid_min={}, oid_max={}, done_till={}, done_count={}",
                    params.oid_field,
                    params.oid_min,
                    params.oid_max,
                    params.done_till(),
                    params.done.len()
                )
            }
            DumperState::OidEnumeration(params) => {
                format!(
                    "<OID_ENUMERATION> oid_field={}, all_oids_count={}, done_count={}",
                    params.oid_field,
                    params.all_oids.len(),
                    params.done.len()
                )
            }
            DumperState::GeoQueries(params) => {
                format!("<GEO_QUERIES> oid_field={}, done_count={}", params.oid_field, params.done.len())
            }
        }
    }

    /// Checks the invariants from the data model: most violations mean
    /// the state blob was hand-edited or came from an incompatible
    /// version and should be a fatal load-time error, never silently
    /// repaired.
    pub fn validate(&self) -> Result<(), DumperError> {
        match self {
            DumperState::NoData => Ok(()),
            DumperState::ResultOffset(params) => {
                if params.start_with < 0 || params.start_with > params.row_count {
                    return Err(invalid(format!("start_with={} is expected to be within [0, row_count={}]", params.start_with, params.row_count)));
                }
                Ok(())
            }
            DumperState::OidWhereClause(params) => {
                if params.oid_min > params.oid_max {
                    return Err(invalid(format!("oid_min={} is expected to be <= oid_max={}", params.oid_min, params.oid_max)));
                }
                if let Some(bad) = params.done.iter().find(|oid| **oid < params.oid_min || **oid > params.oid_max) {
                    return Err(invalid(format!("done contains {} outside [oid_min={}, oid_max={}]", bad, params.oid_min, params.oid_max)));
                }
                Ok(())
            }
            DumperState::OidEnumeration(params) => {
                let all_oids: BTreeSet<i64> = params.all_oids.iter().copied().collect();
                if let Some(bad) = params.done.iter().find(|oid| !all_oids.contains(oid)) {
                    return Err(invalid(format!("done contains {} which is not in all_oids", bad)));
                }
                Ok(())
            }
            DumperState::GeoQueries(_) => Ok(()),
        }
    }
}

fn invalid(message: String) -> DumperError {
    DumperError::Download { message: format!("invalid persisted state: {}", message), details: vec![] }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDumperState {
    mode: String,
    #[serde(default)]
    metadata: Value,
    params: Value,
}

impl DumperState {
    /// Serializes to the `{mode, metadata, params}` wire shape. The
    /// `metadata` slot is opaque to this crate — callers may stash
    /// whatever context (e.g. the layer URL) they want alongside the
    /// mode-specific params, and get it back unchanged from `decode`.
    pub fn encode(&self, metadata: Value) -> Result<String, DumperError> {
        let params = match self {
            DumperState::NoData => serde_json::json!({}),
            DumperState::ResultOffset(params) => serde_json::to_value(params)?,
            DumperState::OidWhereClause(params) => serde_json::to_value(params)?,
            DumperState::OidEnumeration(params) => serde_json::to_value(params)?,
            DumperState::GeoQueries(params) => serde_json::to_value(params)?,
        };
        let persisted = PersistedDumperState { mode: self.mode_tag().to_owned(), metadata, params };
        Ok(serde_json::to_string(&persisted)?)
    }

    /// Parses and validates a previously encoded state blob. Returns the
    /// state and whatever opaque `metadata` value was stashed alongside
    /// it.
    pub fn decode(raw: &str) -> Result<(DumperState, Value), DumperError> {
        let persisted: PersistedDumperState = serde_json::from_str(raw)?;
        let state = match persisted.mode.as_str() {
            "NO_DATA" => DumperState::NoData,
            "RESULT_OFFSET" => DumperState::ResultOffset(serde_json::from_value(persisted.params)?),
            "OID_WHERE_CLAUSE" => DumperState::OidWhereClause(serde_json::from_value(persisted.params)?),
            "OID_ENUMERATION" => DumperState::OidEnumeration(serde_json::from_value(persisted.params)?),
            "GEO_QUERIES" => DumperState::GeoQueries(serde_json::from_value(persisted.params)?),
            other => return Err(invalid(format!("unrecognized mode tag \"{}\"", other))),
        };
        state.validate()?;
        Ok((state, persisted.metadata))
    }
}
