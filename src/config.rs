//! Configuration for file-defined mocks.
//!
//! Mocks can be registered in code, or loaded from a YAML file that also
//! carries engine-wide settings.

use crate::filter::{CompiledFilter, RequestMatcherSpec};
use crate::response::MockResponse;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration: mock definitions plus global settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Mock definitions, registered in file order
    #[serde(default)]
    pub mocks: Vec<MockDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Every matcher is compiled so that bad
    /// path patterns surface here rather than on the first request.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, mock) in self.mocks.iter().enumerate() {
            mock.validate()
                .map_err(|e| anyhow::anyhow!("Mock {} ({}): {}", i, mock.label(), e))?;
        }
        Ok(())
    }
}

/// A single mock definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockDefinition {
    /// Optional identifier, used in logs
    #[serde(default)]
    pub id: Option<String>,

    /// Request matcher
    pub request: RequestMatcherSpec,

    /// Response to return
    #[serde(default)]
    pub response: ResponseDefinition,

    /// Priority (higher = matched first)
    #[serde(default)]
    pub priority: i32,

    /// Match at most one request
    #[serde(default)]
    pub once: bool,
}

impl MockDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        CompiledFilter::compile(&self.request)?;
        self.response.validate()?;
        Ok(())
    }

    /// Identifier for logs: the id, or method and url.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!(
                "{} {}",
                self.request.method.as_deref().unwrap_or("*"),
                self.request.url
            ),
        }
    }
}

/// Response definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code (200 when unset)
    #[serde(default)]
    pub status: Option<u16>,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Render strings in headers and body as Handlebars templates
    #[serde(default)]
    pub template: bool,
}

impl ResponseDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(status) = self.status {
            if !(100..=599).contains(&status) {
                anyhow::bail!("Invalid status code: {}", status);
            }
        }
        if let Some(ResponseBody::File { path }) = &self.body {
            if !Path::new(path).exists() {
                anyhow::bail!("Response body file not found: {}", path);
            }
        }
        Ok(())
    }

    /// Convert into the response a mock produces.
    pub fn to_mock_response(&self) -> anyhow::Result<MockResponse> {
        Ok(MockResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.as_ref().map(ResponseBody::to_value).transpose()?,
        })
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// JSON body, serialized on the way out
    Json { content: serde_json::Value },
    /// Plain text body, sent verbatim
    Text { content: String },
    /// Text loaded from a file at registration time
    File { path: String },
}

impl ResponseBody {
    fn to_value(&self) -> anyhow::Result<serde_json::Value> {
        match self {
            ResponseBody::Json { content } => Ok(content.clone()),
            ResponseBody::Text { content } => Ok(serde_json::Value::String(content.clone())),
            ResponseBody::File { path } => std::fs::read_to_string(path)
                .map(serde_json::Value::String)
                .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path, e)),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// How long `get_request` waits for a match (ms)
    #[serde(default = "default_get_request_timeout_ms")]
    pub get_request_timeout_ms: u64,

    /// Content type applied before response headers
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// Add CORS headers allowing the requesting page
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Log matched requests
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests passed through to the network
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl GlobalSettings {
    pub fn get_request_timeout(&self) -> Duration {
        Duration::from_millis(self.get_request_timeout_ms)
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            get_request_timeout_ms: default_get_request_timeout_ms(),
            default_content_type: default_content_type(),
            cors: true,
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_get_request_timeout_ms() -> u64 {
    100
}

fn default_content_type() -> String {
    "application/json;charset=UTF-8".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::QueryValue;
    use std::io::Write;

    #[test]
    fn test_parse_simple_mock() {
        let yaml = r#"
mocks:
  - id: hello
    request:
      method: GET
      url: /hello
    response:
      body:
        type: text
        content: "Hello, World!"
"#;
        let config = MockServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.mocks.len(), 1);
        assert_eq!(config.mocks[0].label(), "hello");
        assert_eq!(config.mocks[0].priority, 0);
        assert!(!config.mocks[0].once);

        let response = config.mocks[0].response.to_mock_response().unwrap();
        assert_eq!(response.status, None);
        assert_eq!(response.body, Some(serde_json::json!("Hello, World!")));
    }

    #[test]
    fn test_parse_query_and_options() {
        let yaml = r#"
mocks:
  - request:
      method: GET
      url: http://api.example.com/items/:id
      query:
        page: "1"
        tag: [a, b]
    response:
      status: 201
      headers:
        X-Test: yes
      body:
        type: json
        content:
          id: 1
    priority: 10
    once: true
"#;
        let config = MockServerConfig::from_yaml(yaml).unwrap();
        let mock = &config.mocks[0];
        assert_eq!(mock.priority, 10);
        assert!(mock.once);
        assert_eq!(mock.label(), "GET http://api.example.com/items/:id");

        let query = mock.request.query.as_ref().unwrap();
        assert_eq!(query.get("page"), Some(&QueryValue::from("1")));
        assert_eq!(query.get("tag"), Some(&QueryValue::from(vec!["a", "b"])));

        let response = mock.response.to_mock_response().unwrap();
        assert_eq!(response.status, Some(201));
        assert_eq!(response.body, Some(serde_json::json!({"id": 1})));
    }

    #[test]
    fn test_default_settings() {
        let config = MockServerConfig::from_yaml("mocks: []").unwrap();
        assert_eq!(config.settings.get_request_timeout(), Duration::from_millis(100));
        assert_eq!(config.settings.default_content_type, "application/json;charset=UTF-8");
        assert!(config.settings.cors);
    }

    #[test]
    fn test_invalid_path_pattern_fails_validation() {
        let yaml = r#"
mocks:
  - request:
      url: /users/:id(\d+
"#;
        let err = MockServerConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Mock 0"));
        assert!(err.to_string().contains("invalid path pattern"));
    }

    #[test]
    fn test_invalid_status_fails_validation() {
        let yaml = r#"
mocks:
  - request:
      url: /x
    response:
      status: 700
"#;
        assert!(MockServerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = r#"
mocks:
  - request:
      url: /x
      path: /y
"#;
        assert!(MockServerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file_with_body_file() {
        let mut body = tempfile::NamedTempFile::new().unwrap();
        write!(body, "<html></html>").unwrap();

        let mut config_file = tempfile::NamedTempFile::new().unwrap();
        write!(
            config_file,
            "mocks:\n  - request:\n      url: /page\n    response:\n      body:\n        type: file\n        path: {}\nsettings:\n  get_request_timeout_ms: 250\n  cors: false\n",
            body.path().display()
        )
        .unwrap();

        let config = MockServerConfig::from_file(config_file.path()).unwrap();
        assert_eq!(config.settings.get_request_timeout_ms, 250);
        assert!(!config.settings.cors);

        let response = config.mocks[0].response.to_mock_response().unwrap();
        assert_eq!(response.body, Some(serde_json::json!("<html></html>")));
    }
}
