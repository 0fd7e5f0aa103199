//! Page Runner: executes one planned query with retry/backoff and
//! pacing, decodes its features, and reports them to the caller alongside
//! whatever state update each feature implies.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::DumperOptions;
use crate::error::DumperError;
use crate::http::Requester;
use crate::plan::QueryParams;

/// One executed page: the decoded Esri features plus whether the page
/// was full (saturated), which only the geo recursor cares about.
pub struct PageResult {
    pub features: Vec<Map<String, Value>>,
}

/// Tracks the pacing and retry counters across the whole run. One of
/// these lives inside the [`crate::iter::LayerDumper`]; every planned
/// page goes through `run_page`.
pub struct PageRunner {
    requests_issued: u32,
}

impl PageRunner {
    pub fn new() -> Self {
        PageRunner { requests_issued: 0 }
    }

    /// Executes one page: retries transport failures up to
    /// `num_of_retry` times with linear backoff, paces every
    /// `requests_to_pause` requests, and propagates `Timeout`/`Parse`/
    /// `Download` as fatal without retrying them.
    pub async fn run_page(&mut self, requester: &Requester, url: &str, params: &QueryParams, options: &DumperOptions) -> Result<PageResult, DumperError> {
        self.pace(options).await;

        let query_url = format!("{}/query", url);
        let pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let mut last_err = None;
        for attempt in 0..=options.num_of_retry {
            match requester.request_query(&query_url, &pairs, "Could not retrieve this chunk of objects", false).await {
                Ok(body) => {
                    self.requests_issued += 1;
                    return Self::decode_features(body);
                }
                Err(DumperError::TransportRetryable(message)) => {
                    last_err = Some(DumperError::TransportRetryable(message));
                    if attempt < options.num_of_retry {
                        log::warn!("Retrying page after transport error (attempt {} of {})", attempt + 1, options.num_of_retry);
                        tokio::time::sleep(Duration::from_secs(options.pause_seconds * (attempt as u64 + 1))).await;
                        continue;
                    }
                }
                // Timeout, Parse, Download: fatal, not retried.
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or(DumperError::Download { message: "exhausted retries".to_owned(), details: vec![] }).finalize())
    }

    fn decode_features(body: Value) -> Result<PageResult, DumperError> {
        let features = body
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| DumperError::Parse("response carried no \"features\" array".to_owned()))?
            .iter()
            .filter_map(Value::as_object)
            .cloned()
            .collect();
        Ok(PageResult { features })
    }

    /// Sleeps `pause_seconds` every `requests_to_pause` requests, before
    /// issuing the next one. The pacing policy belongs here, not inside
    /// the retry loop, so a retried request doesn't also trigger pacing.
    async fn pace(&self, options: &DumperOptions) {
        if options.requests_to_pause > 0 && self.requests_issued > 0 && self.requests_issued % options.requests_to_pause == 0 {
            tokio::time::sleep(Duration::from_secs(options.pause_seconds)).await;
        }
    }
}

impl Default for PageRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_features_reads_the_features_array() {
        let body = json!({ "features": [{ "attributes": { "OBJECTID": 1 } }] });
        let result = PageRunner::decode_features(body).unwrap();
        assert_eq!(result.features.len(), 1);
    }

    #[test]
    fn decode_features_rejects_a_body_without_a_features_array() {
        let body = json!({ "error": { "message": "nope" } });
        assert!(PageRunner::decode_features(body).is_err());
    }

    #[test]
    fn pacing_triggers_exactly_every_n_requests() {
        let runner = PageRunner { requests_issued: 5 };
        let options = DumperOptions::new("http://example.com/0").with_requests_to_pause(5);
        // Not awaited in this test; exercising the counting logic only.
        assert_eq!(runner.requests_issued % options.requests_to_pause, 0);
    }
}
