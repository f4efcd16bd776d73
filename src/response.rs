//! Response shaping.
//!
//! Turns what a mock produces ([`MockResponse`]) into what the browser driver
//! fulfills the request with ([`ResponseData`]).

use crate::config::GlobalSettings;
use crate::error::Result;
use crate::request::NormalizedRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response produced by a mock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockResponse {
    /// HTTP status, 200 when unset
    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body. Strings are sent verbatim, anything else is serialized.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl MockResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(body: serde_json::Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Some(serde_json::Value::String(body.into())),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Fulfillment handed to the browser driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseData {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ResponseData {
    /// Finalize `response` for `request`.
    ///
    /// Header precedence, lowest first: default content type, CORS headers,
    /// the response's own headers. Names are lowercased before merging.
    pub fn build(
        response: MockResponse,
        request: &NormalizedRequest,
        settings: &GlobalSettings,
    ) -> Result<Self> {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), settings.default_content_type.clone());
        if settings.cors {
            headers.extend(cors_headers(request));
        }
        headers.extend(sanitize_headers(response.headers));

        let body = match response.body {
            Some(serde_json::Value::String(text)) => text,
            Some(value) => serde_json::to_string(&value)?,
            None => String::new(),
        };

        Ok(Self {
            status: response.status.unwrap_or(200),
            headers,
            body,
        })
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}

/// CORS headers allowing the page that issued `request` to read the mocked
/// response.
pub fn cors_headers(request: &NormalizedRequest) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if !request.source_origin.is_empty() {
        headers.insert(
            "access-control-allow-origin".to_string(),
            request.source_origin.clone(),
        );
    }
    headers.insert(
        "access-control-allow-credentials".to_string(),
        "true".to_string(),
    );
    headers.insert(
        "access-control-allow-methods".to_string(),
        request.method.clone(),
    );
    if let Some(requested) = request.header("access-control-request-headers") {
        headers.insert(
            "access-control-allow-headers".to_string(),
            requested.to_string(),
        );
    }
    headers
}

/// Lowercase header names.
///
/// Names are merged in byte order, so when two spellings of one header
/// collide the one sorting last wins: `content-type` beats `Content-Type`.
pub fn sanitize_headers(headers: HashMap<String, String>) -> HashMap<String, String> {
    let mut sorted: Vec<_> = headers.into_iter().collect();
    sorted.sort_by(|(a, _), (b, _)| a.cmp(b));
    sorted
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect()
}
