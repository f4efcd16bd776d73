//! Error types surfaced by the mocking engine.

use thiserror::Error;

/// Errors produced while registering mocks, answering requests or
/// asserting on recorded requests.
#[derive(Debug, Error)]
pub enum MockError {
    /// The path part of a matcher URL could not be compiled.
    #[error("invalid path pattern {pattern:?}: {reason}")]
    InvalidPathPattern { pattern: String, reason: String },

    /// The matcher URL carries a scheme but no usable origin.
    #[error("invalid matcher url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// `get_request(0)` timed out and the mock never matched anything.
    #[error("No request matching mock [{mock}] found")]
    RequestNotFound { mock: String },

    /// `get_request(n)` timed out before the n-th match was recorded.
    #[error("{ordinal} request matching mock [{mock}] was not found")]
    NthRequestNotFound { ordinal: String, mock: String },

    /// A computed response function failed.
    #[error("response function of mock ({mock_id}) failed: {source}")]
    Responder {
        mock_id: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A templated response could not be rendered.
    #[error("response template of mock ({mock_id}) failed: {source}")]
    Template {
        mock_id: u64,
        #[source]
        source: handlebars::RenderError,
    },

    /// The response body could not be serialized.
    #[error("failed to serialize response body: {0}")]
    Body(#[from] serde_json::Error),

    /// The browser controller could not enable or disable interception.
    #[error("interception failed: {0}")]
    Interception(String),
}

/// Result alias used across the crate.
pub type Result<T, E = MockError> = std::result::Result<T, E>;

/// English ordinal for a 1-based position: `1st`, `2nd`, `3rd`, `11th`, `22nd`.
pub fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}
