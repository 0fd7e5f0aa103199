//! Iteration planner and paginated fetcher for an Esri Feature/Map
//! Service layer: given one layer endpoint, probes which pagination
//! strategy the server can serve, drives it to completion with retries
//! and optional checkpointing, and streams GeoJSON (or raw Esri-JSON)
//! features to a consumer.
//!
//! [`iter::LayerDumper`] is the public entry point; everything else is an
//! internal collaborator it wires together.

pub mod config;
pub mod error;
pub mod geo;
pub mod geometry;
pub mod http;
pub mod iter;
pub mod metadata;
pub mod plan;
pub mod runner;
pub mod state;
pub mod strategy;

pub use config::{DumperOptions, OutputFormat};
pub use error::DumperError;
pub use iter::LayerDumper;
pub use state::DumperState;
