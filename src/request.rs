//! Canonical request representation.
//!
//! Browser drivers hand over their own request objects; [`normalize`] turns
//! anything implementing [`RawRequest`] into a [`NormalizedRequest`] that the
//! matching engine understands.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Parsed query string. Repeated keys collapse into [`QueryValue::Multiple`].
pub type QueryMap = HashMap<String, QueryValue>;

/// Value of a single query key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

impl QueryValue {
    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                let first = std::mem::take(first);
                *self = QueryValue::Multiple(vec![first, value]);
            }
            QueryValue::Multiple(values) => values.push(value),
        }
    }

    /// First value for the key.
    pub fn first(&self) -> Option<&str> {
        match self {
            QueryValue::Single(value) => Some(value),
            QueryValue::Multiple(values) => values.first().map(String::as_str),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Single(value.to_string())
    }
}

impl From<Vec<&str>> for QueryValue {
    fn from(values: Vec<&str>) -> Self {
        QueryValue::Multiple(values.into_iter().map(String::from).collect())
    }
}

/// Accessors a browser driver exposes for an intercepted request.
pub trait RawRequest {
    fn url(&self) -> &str;
    fn method(&self) -> &str;
    fn headers(&self) -> HashMap<String, String>;
    fn resource_type(&self) -> Option<&str>;
    fn post_data(&self) -> Option<&str>;
    /// URL of the frame that issued the request, if the driver knows it.
    fn frame_url(&self) -> Option<&str>;
}

/// Owned request data, for drivers that copy requests out of the browser
/// before handing them over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub frame_url: Option<String>,
}

impl PageRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_post_data(mut self, body: impl Into<String>) -> Self {
        self.post_data = Some(body.into());
        self
    }

    pub fn with_frame_url(mut self, frame_url: impl Into<String>) -> Self {
        self.frame_url = Some(frame_url.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }
}

impl RawRequest for PageRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn headers(&self) -> HashMap<String, String> {
        self.headers.clone()
    }

    fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    fn post_data(&self) -> Option<&str> {
        self.post_data.as_deref()
    }

    fn frame_url(&self) -> Option<&str> {
        self.frame_url.as_deref()
    }
}

/// Driver-independent view of an intercepted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRequest {
    pub method: String,
    pub url: String,
    /// `scheme://host[:port]` of the request target.
    pub hostname: String,
    pub path: String,
    pub query: QueryMap,
    pub headers: HashMap<String, String>,
    /// Post body parsed as JSON, when it is JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<String>,
    /// Origin of the page frame that issued the request.
    pub source_origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

impl NormalizedRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A request recorded by a mock, with the path parameters it captured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedRequest {
    #[serde(flatten)]
    pub request: NormalizedRequest,
    pub params: HashMap<String, String>,
}

impl std::ops::Deref for MatchedRequest {
    type Target = NormalizedRequest;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}

/// Convert a driver request into its canonical form. Never fails: unparsable
/// URLs leave hostname, path and query empty, non-JSON bodies only populate
/// `raw_body`.
pub fn normalize(raw: &dyn RawRequest) -> NormalizedRequest {
    let url = raw.url().to_string();
    let (hostname, path, query) = match Url::parse(&url) {
        Ok(parsed) => (
            origin_of(&parsed).unwrap_or_default(),
            parsed.path().to_string(),
            parsed.query().map(parse_query).unwrap_or_default(),
        ),
        Err(_) => (String::new(), String::new(), QueryMap::new()),
    };

    let raw_body = raw.post_data().map(String::from);
    let body = raw_body.as_deref().and_then(try_json_parse);

    NormalizedRequest {
        method: raw.method().to_string(),
        url,
        hostname,
        path,
        query,
        headers: raw.headers(),
        body,
        raw_body,
        source_origin: raw.frame_url().map(origin_from_str).unwrap_or_default(),
        resource_type: raw.resource_type().map(String::from),
    }
}

/// `scheme://host[:port]` of a parsed URL, `None` when it has no host.
pub fn origin_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Origin of a URL string, empty when it cannot be determined.
pub fn origin_from_str(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| origin_of(&u))
        .unwrap_or_default()
}

/// Parse a query string using form-urlencoded rules.
pub fn parse_query(query: &str) -> QueryMap {
    let mut params = QueryMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match params.get_mut(key.as_ref()) {
            Some(existing) => existing.push(value.into_owned()),
            None => {
                params.insert(key.into_owned(), QueryValue::Single(value.into_owned()));
            }
        }
    }
    params
}

/// Serialize a query map back into a query string with stable key order.
pub fn stringify_query(query: &QueryMap) -> String {
    let mut keys: Vec<_> = query.keys().collect();
    keys.sort();

    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for key in keys {
        match &query[key] {
            QueryValue::Single(value) => {
                out.append_pair(key, value);
            }
            QueryValue::Multiple(values) => {
                for value in values {
                    out.append_pair(key, value);
                }
            }
        }
    }
    out.finish()
}

fn try_json_parse(body: &str) -> Option<serde_json::Value> {
    serde_json::from_str(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_request() {
        let raw = PageRequest::new("GET", "http://example.com:8000/some/path?foo=bar#baz")
            .with_header("header", "header")
            .with_post_data(r#"{"foo": "bar"}"#)
            .with_resource_type("xhr")
            .with_frame_url("http://example.com:8000/index.html");

        let req = normalize(&raw);
        assert_eq!(req.method, "GET");
        assert_eq!(req.hostname, "http://example.com:8000");
        assert_eq!(req.path, "/some/path");
        assert_eq!(req.query.get("foo"), Some(&QueryValue::from("bar")));
        assert_eq!(req.headers.get("header").map(String::as_str), Some("header"));
        assert_eq!(req.body, Some(serde_json::json!({"foo": "bar"})));
        assert_eq!(req.raw_body.as_deref(), Some(r#"{"foo": "bar"}"#));
        assert_eq!(req.source_origin, "http://example.com:8000");
        assert_eq!(req.resource_type.as_deref(), Some("xhr"));
    }

    #[test]
    fn test_non_json_body_only_sets_raw_body() {
        let raw = PageRequest::new("POST", "http://localhost/x").with_post_data("somestring");
        let req = normalize(&raw);
        assert_eq!(req.body, None);
        assert_eq!(req.raw_body.as_deref(), Some("somestring"));
    }

    #[test]
    fn test_missing_body() {
        let req = normalize(&PageRequest::new("GET", "http://localhost/x"));
        assert_eq!(req.body, None);
        assert_eq!(req.raw_body, None);
    }

    #[test]
    fn test_path_and_url_with_port() {
        let req = normalize(&PageRequest::new("GET", "http://origin:8000/some/path"));
        assert_eq!(req.url, "http://origin:8000/some/path");
        assert_eq!(req.path, "/some/path");
        assert_eq!(req.hostname, "http://origin:8000");
    }

    #[test]
    fn test_repeated_query_keys_become_sequences() {
        let req = normalize(&PageRequest::new("GET", "http://localhost/x?a=1&a=2&b=hello+world"));
        assert_eq!(req.query.get("a"), Some(&QueryValue::from(vec!["1", "2"])));
        assert_eq!(req.query.get("b"), Some(&QueryValue::from("hello world")));
    }

    #[test]
    fn test_source_origin_missing_frame() {
        let req = normalize(&PageRequest::new("GET", "http://localhost/x"));
        assert_eq!(req.source_origin, "");

        let raw = PageRequest::new("GET", "http://localhost/x").with_frame_url("about:blank");
        assert_eq!(normalize(&raw).source_origin, "");
    }

    #[test]
    fn test_unparsable_url() {
        let req = normalize(&PageRequest::new("GET", "not a url"));
        assert_eq!(req.url, "not a url");
        assert_eq!(req.hostname, "");
        assert_eq!(req.path, "");
        assert!(req.query.is_empty());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = normalize(
            &PageRequest::new("GET", "http://localhost/x").with_header("Content-Type", "text/plain"),
        );
        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn test_stringify_query() {
        let query = parse_query("b=2&a=1&a=x%20y");
        assert_eq!(stringify_query(&query), "a=1&a=x+y&b=2");
    }
}
