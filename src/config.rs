use std::collections::HashMap;
use std::time::Duration;

use crate::state::DumperState;

/// What kind of object the [`crate::iter::LayerDumper`] hands back for
/// each feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Convert through the Geometry Converter (`crate::geometry`).
    GeoJson,
    /// Hand back the server's feature object unchanged.
    EsriJson,
}

/// Every constructor input a caller can set before opening a
/// [`crate::iter::LayerDumper`]. Defaults mirror the values baked into the
/// original scraper's hardcoded queries, generalized into data so a single
/// binary can point at any layer instead of one literal URL.
#[derive(Debug, Clone)]
pub struct DumperOptions {
    pub(crate) url: String,
    pub(crate) extra_query_args: HashMap<String, String>,
    pub(crate) extra_headers: HashMap<String, String>,
    pub(crate) timeout: Duration,
    pub(crate) fields: Option<Vec<String>>,
    pub(crate) request_geometry: bool,
    pub(crate) out_sr: String,
    pub(crate) proxy: Option<String>,
    pub(crate) start_with: i64,
    pub(crate) geometry_precision: u32,
    pub(crate) paginate_oid: bool,
    pub(crate) max_page_size: i64,
    pub(crate) state: Option<DumperState>,
    pub(crate) use_only_get: bool,
    pub(crate) pause_seconds: u64,
    pub(crate) requests_to_pause: u32,
    pub(crate) num_of_retry: u32,
    pub(crate) output_format: OutputFormat,
}

impl DumperOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extra_query_args: HashMap::new(),
            extra_headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            fields: None,
            request_geometry: true,
            out_sr: "4326".to_owned(),
            proxy: None,
            start_with: 0,
            geometry_precision: 7,
            paginate_oid: false,
            max_page_size: 1000,
            state: None,
            use_only_get: false,
            pause_seconds: 10,
            requests_to_pause: 5,
            num_of_retry: 5,
            output_format: OutputFormat::GeoJson,
        }
    }

    pub fn with_extra_query_args(mut self, args: HashMap<String, String>) -> Self {
        self.extra_query_args = args;
        self
    }

    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_request_geometry(mut self, request_geometry: bool) -> Self {
        self.request_geometry = request_geometry;
        self
    }

    pub fn with_out_sr(mut self, out_sr: impl Into<String>) -> Self {
        self.out_sr = out_sr.into();
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_start_with(mut self, start_with: i64) -> Self {
        self.start_with = start_with;
        self
    }

    pub fn with_geometry_precision(mut self, precision: u32) -> Self {
        self.geometry_precision = precision;
        self
    }

    pub fn with_paginate_oid(mut self, paginate_oid: bool) -> Self {
        self.paginate_oid = paginate_oid;
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: i64) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    pub fn with_state(mut self, state: DumperState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_use_only_get(mut self, use_only_get: bool) -> Self {
        self.use_only_get = use_only_get;
        self
    }

    pub fn with_pause_seconds(mut self, pause_seconds: u64) -> Self {
        self.pause_seconds = pause_seconds;
        self
    }

    pub fn with_requests_to_pause(mut self, requests_to_pause: u32) -> Self {
        self.requests_to_pause = requests_to_pause;
        self
    }

    pub fn with_num_of_retry(mut self, num_of_retry: u32) -> Self {
        self.num_of_retry = num_of_retry;
        self
    }

    pub fn with_output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }
}
