//! Request matching logic.
//!
//! Evaluates a compiled filter against a normalized request. Checks run in a
//! fixed order, cheapest first, and stop at the first mismatch.

use crate::filter::CompiledFilter;
use crate::request::{NormalizedRequest, QueryMap};
use std::fmt;

/// Why a filter rejected a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    Method { expected: String, actual: String },
    Hostname { expected: String, actual: String },
    Path { expected: String, actual: String },
    Query { expected: String, actual: String },
}

impl MissReason {
    pub fn kind(&self) -> &'static str {
        match self {
            MissReason::Method { .. } => "method",
            MissReason::Hostname { .. } => "hostname",
            MissReason::Path { .. } => "path",
            MissReason::Query { .. } => "query",
        }
    }

    fn values(&self) -> (&str, &str) {
        match self {
            MissReason::Method { expected, actual }
            | MissReason::Hostname { expected, actual }
            | MissReason::Path { expected, actual }
            | MissReason::Query { expected, actual } => (expected, actual),
        }
    }
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (expected, actual) = self.values();
        write!(f, "{} not matched: mock={} req={}", self.kind(), expected, actual)
    }
}

/// Evaluate `filter` against `request`.
pub fn evaluate(filter: &CompiledFilter, request: &NormalizedRequest) -> Result<(), MissReason> {
    if let Some(method) = &filter.method {
        if *method != request.method {
            return Err(MissReason::Method {
                expected: method.clone(),
                actual: request.method.clone(),
            });
        }
    }

    // Without an explicit hostname the mock only serves the page's own origin.
    let expected_origin = filter.hostname.as_deref().unwrap_or(&request.source_origin);
    if expected_origin != request.hostname {
        return Err(MissReason::Hostname {
            expected: or_missing(expected_origin, "Filter origin missing"),
            actual: or_missing(&request.hostname, "Request origin missing"),
        });
    }

    if let Some(pattern) = &filter.path_pattern {
        if !pattern.is_match(&request.path) {
            return Err(MissReason::Path {
                expected: filter.path.clone().unwrap_or_default(),
                actual: or_missing(&request.path, "Request path missing"),
            });
        }
    }

    if !query_matches(&filter.query, &request.query) {
        return Err(MissReason::Query {
            expected: serde_json::to_string(&filter.query).unwrap_or_default(),
            actual: serde_json::to_string(&request.query).unwrap_or_default(),
        });
    }

    Ok(())
}

/// Every expected key must be present with an equal value; extra keys in
/// `actual` are ignored.
pub fn query_matches(expected: &QueryMap, actual: &QueryMap) -> bool {
    expected
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}

fn or_missing(value: &str, placeholder: &str) -> String {
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}
