use std::collections::BTreeMap;

use crate::config::DumperOptions;
use crate::plan::{overlay_extra_args, QueryParams};
use crate::state::ExploreStatus;

/// An axis-aligned bounding box in the layer's spatial reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Splits into four equal quadrants in `[SW, SE, NW, NE]` order, halving
/// at `(xmid, ymid)` — the order the quadtree's key digits index into.
fn subdivide(envelope: Envelope) -> [Envelope; 4] {
    let xmid = (envelope.xmin + envelope.xmax) / 2.0;
    let ymid = (envelope.ymin + envelope.ymax) / 2.0;
    [
        Envelope { xmin: envelope.xmin, ymin: envelope.ymin, xmax: xmid, ymax: ymid }, // SW
        Envelope { xmin: xmid, ymin: envelope.ymin, xmax: envelope.xmax, ymax: ymid }, // SE
        Envelope { xmin: envelope.xmin, ymin: ymid, xmax: xmid, ymax: envelope.ymax }, // NW
        Envelope { xmin: xmid, ymin: ymid, xmax: envelope.xmax, ymax: envelope.ymax }, // NE
    ]
}

/// Replays a node key's quadrant digits against the root extent. The
/// leading `"0"` denotes the root itself, not a quadrant choice.
pub fn envelope_for_key(root_extent: Envelope, key: &str) -> Envelope {
    let mut envelope = root_extent;
    for digit in key.chars().skip(1) {
        let index = digit.to_digit(10).expect("quadtree keys are digits 0-3") as usize;
        envelope = subdivide(envelope)[index];
    }
    envelope
}

/// Rebuilds the explicit DFS stack a persisted `explored_tree` implies:
/// `Explored` nodes contribute nothing (already covered and pruned),
/// `Split` nodes contribute whichever of their children still need
/// work, and anything else (`Open`, or simply absent) still needs a
/// request issued. Children are pushed in reverse quadrant order so
/// popping the stack visits `SW` before `SE` before `NW` before `NE`,
/// matching fresh-run DFS pre-order.
pub fn resume_stack(explored_tree: &BTreeMap<String, ExploreStatus>) -> Vec<String> {
    let mut stack = Vec::new();
    push_pending(ROOT_KEY.to_owned(), explored_tree, &mut stack);
    stack
}

const ROOT_KEY: &str = "0";

fn push_pending(key: String, explored_tree: &BTreeMap<String, ExploreStatus>, stack: &mut Vec<String>) {
    match explored_tree.get(&key) {
        Some(ExploreStatus::Explored) => {}
        Some(ExploreStatus::Split) => {
            for index in (0..4).rev() {
                push_pending(format!("{}{}", key, index), explored_tree, stack);
            }
        }
        Some(ExploreStatus::Open) | None => stack.push(key),
    }
}

/// Drives the depth-first quadtree walk one node at a time, each pull
/// issuing at most one HTTP request through the Page Runner. Holding
/// the pending-node stack explicitly is this crate's stand-in for the
/// generator the design notes describe — there are none in Rust.
pub struct GeoRecursor {
    root_extent: Envelope,
    stack: Vec<String>,
}

impl GeoRecursor {
    pub fn new(root_extent: Envelope, explored_tree: &BTreeMap<String, ExploreStatus>) -> Self {
        GeoRecursor { root_extent, stack: resume_stack(explored_tree) }
    }

    pub fn is_exhausted(&self) -> bool {
        self.stack.is_empty()
    }

    /// Pops the next node to visit along with its envelope. Does not
    /// itself mutate any persisted state — the caller marks the node
    /// `Open`/`Split`/`Explored` via `DumperState::mark_node` once it
    /// knows the outcome of the request.
    pub fn pop_next(&mut self) -> Option<(String, Envelope)> {
        let key = self.stack.pop()?;
        let envelope = envelope_for_key(self.root_extent, &key);
        Some((key, envelope))
    }

    /// Pushes a saturated node's four children for later visitation.
    pub fn push_children(&mut self, key: &str) {
        for index in (0..4).rev() {
            self.stack.push(format!("{}{}", key, index));
        }
    }
}

/// Builds the query parameters for one geo-query node: an intersects
/// test against `envelope`, one page only.
pub fn geo_query_params(envelope: Envelope, source_spatial_reference: Option<i64>, page_size: i64, options: &DumperOptions) -> QueryParams {
    let mut page = QueryParams::new();
    page.insert("geometry".to_owned(), format!("{},{},{},{}", envelope.xmin, envelope.ymin, envelope.xmax, envelope.ymax));
    page.insert("geometryType".to_owned(), "esriGeometryEnvelope".to_owned());
    page.insert("spatialRel".to_owned(), "esriSpatialRelIntersects".to_owned());
    page.insert("outFields".to_owned(), "*".to_owned());
    page.insert("returnGeometry".to_owned(), "true".to_owned());
    page.insert("resultRecordCount".to_owned(), page_size.to_string());
    if let Some(wkid) = source_spatial_reference {
        page.insert("inSR".to_owned(), wkid.to_string());
    }
    page.insert("outSR".to_owned(), options.out_sr.clone());
    page.insert("geometryPrecision".to_owned(), options.geometry_precision.to_string());
    page.insert("f".to_owned(), "json".to_owned());
    overlay_extra_args(page, &options.extra_query_args)
}

/// Treat `>= page_size` as saturated, per the design note: a server that
/// silently truncates to exactly `page_size` is indistinguishable from
/// one that legitimately had exactly that many features, so `==` would
/// under-split.
pub fn is_saturated(feature_count: usize, page_size: i64) -> bool {
    feature_count as i64 >= page_size
}
