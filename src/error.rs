use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors raised while probing a layer's metadata descriptor.
///
/// Kept separate from [`DumperError`] the way the original scraper split
/// metadata parsing failures from scraping failures: a malformed field
/// descriptor is a different kind of problem than a server timing out
/// mid-page.
#[derive(Debug, PartialEq)]
pub enum MetadataError {
    FieldParsing(String, String),
    FieldTypeParsing(String),
    MissingKey(String),
    MissingOidField,
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::FieldParsing(message, field_json) => {
                write!(f, "Message:\n{}\nRaw JSON:\n{}", message, field_json)
            }
            MetadataError::FieldTypeParsing(field_type) => {
                write!(f, "Invalid Field Type: {}", field_type)
            }
            MetadataError::MissingKey(key) => {
                write!(f, "Missing required key: {}", key)
            }
            MetadataError::MissingOidField => {
                write!(f, "Referenced missing OID field")
            }
        }
    }
}

impl Error for MetadataError {}

/// Crate-wide error taxonomy for the iteration planner and fetcher.
///
/// All variants are fatal to the [`crate::iter::LayerDumper`] once they
/// escape it, except `TransportRetryable`, which only ever lives inside
/// the Page Runner's retry loop (`crate::runner`) and is always resolved
/// into `Download` before it is handed back to a caller.
#[derive(Debug, PartialEq)]
pub enum DumperError {
    /// Socket timed out after all retries were exhausted.
    Timeout(String),
    /// The response body did not parse as JSON.
    Parse(String),
    /// HTTP status was not 200, or the server's JSON body carried an
    /// `error` object, or a structural invariant (e.g. a statistics
    /// probe disagreement) was violated.
    Download { message: String, details: Vec<String> },
    /// No usable object ID field could be identified for the selected
    /// strategy.
    MissingOid,
    /// A transport-level failure that is not a timeout. Retried
    /// internally by the Page Runner; never observed outside `runner`.
    TransportRetryable(String),
}

impl Display for DumperError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DumperError::Timeout(message) => write!(f, "Timed out: {}", message),
            DumperError::Parse(message) => write!(f, "Could not parse response: {}", message),
            DumperError::Download { message, details } => {
                if details.is_empty() {
                    write!(f, "{}", message)
                } else {
                    write!(f, "{}: {}", message, details.join(", "))
                }
            }
            DumperError::MissingOid => write!(f, "Could not find an object ID field for this layer"),
            DumperError::TransportRetryable(message) => write!(f, "Transport error: {}", message),
        }
    }
}

impl Error for DumperError {}

impl DumperError {
    /// Collapses an internal `TransportRetryable` into the fatal
    /// `Download` variant. Call sites that issue a single, non-retried
    /// request (metadata probe, strategy selector) use this; the Page
    /// Runner instead matches on `TransportRetryable` directly so it can
    /// retry before giving up.
    pub(crate) fn finalize(self) -> DumperError {
        match self {
            DumperError::TransportRetryable(message) => DumperError::Download { message, details: vec![] },
            other => other,
        }
    }
}

impl From<MetadataError> for DumperError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::MissingOidField => DumperError::MissingOid,
            other => DumperError::Download { message: other.to_string(), details: vec![] },
        }
    }
}

impl From<reqwest::Error> for DumperError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DumperError::Timeout(err.to_string())
        } else {
            DumperError::TransportRetryable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DumperError {
    fn from(err: serde_json::Error) -> Self {
        DumperError::Parse(err.to_string())
    }
}
