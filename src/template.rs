//! Handlebars-rendered responses.
//!
//! Mocks loaded from files cannot carry a response function, so a response
//! marked as a template is rendered against the matched request instead.
//! Every string in the body (recursively) and every header value is treated
//! as a template.

use crate::request::{MatchedRequest, QueryMap};
use crate::response::MockResponse;
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared Handlebars registry with the response helpers installed.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Values a response template can reference.
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    /// Path parameters, e.g. `{{params.id}}`
    pub params: &'a HashMap<String, String>,
    pub query: &'a QueryMap,
    pub headers: &'a HashMap<String, String>,
    pub method: &'a str,
    pub path: &'a str,
    pub url: &'a str,
    /// Raw request body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
    /// Request body as JSON, when it parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<&'a serde_json::Value>,
}

impl<'a> From<&'a MatchedRequest> for TemplateContext<'a> {
    fn from(matched: &'a MatchedRequest) -> Self {
        Self {
            params: &matched.params,
            query: &matched.request.query,
            headers: &matched.request.headers,
            method: &matched.request.method,
            path: &matched.request.path,
            url: &matched.request.url,
            body: matched.request.raw_body.as_deref(),
            json: matched.request.body.as_ref(),
        }
    }
}

handlebars_helper!(upper_helper: |value: str| value.to_uppercase());
handlebars_helper!(lower_helper: |value: str| value.to_lowercase());
handlebars_helper!(json_helper: |value: Json| serde_json::to_string(value).unwrap_or_default());

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));

        // Bodies are JSON or plain text, never HTML.
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    pub fn render_str(
        &self,
        template: &str,
        ctx: &TemplateContext<'_>,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars.render_template(template, ctx)
    }

    /// Render every string inside `value`.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        ctx: &TemplateContext<'_>,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        use serde_json::Value;

        Ok(match value {
            Value::String(s) if s.contains("{{") => Value::String(self.render_str(s, ctx)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_value(item, ctx))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Object(fields) => {
                let mut rendered = serde_json::Map::with_capacity(fields.len());
                for (key, field) in fields {
                    rendered.insert(key.clone(), self.render_value(field, ctx)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }

    /// Render a templated response for a matched request.
    pub fn render_response(
        &self,
        template: &MockResponse,
        matched: &MatchedRequest,
    ) -> Result<MockResponse, handlebars::RenderError> {
        let ctx = TemplateContext::from(matched);

        let headers = template
            .headers
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.render_str(value, &ctx)?)))
            .collect::<Result<HashMap<_, _>, handlebars::RenderError>>()?;

        let body = template
            .body
            .as_ref()
            .map(|body| self.render_value(body, &ctx))
            .transpose()?;

        Ok(MockResponse {
            status: template.status,
            headers,
            body,
        })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A response template bound to the engine that renders it.
#[derive(Clone)]
pub struct ResponseTemplate {
    engine: Arc<TemplateEngine>,
    response: MockResponse,
}

impl ResponseTemplate {
    pub fn new(engine: Arc<TemplateEngine>, response: MockResponse) -> Self {
        Self { engine, response }
    }

    pub fn render(&self, matched: &MatchedRequest) -> Result<MockResponse, handlebars::RenderError> {
        self.engine.render_response(&self.response, matched)
    }
}

impl std::fmt::Debug for ResponseTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResponseTemplate").field(&self.response).finish()
    }
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    // Version 4, variant 1.
    let mut bytes: [u8; 16] = rand::thread_rng().gen();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    out.write(&format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let now = chrono::Utc::now();
    let rendered = match h.param(0).and_then(|v| v.value().as_str()) {
        Some(format) => now.format(format).to_string(),
        None => now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    };
    out.write(&rendered)?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let bound = |idx: usize, fallback: i64| {
        h.param(idx)
            .and_then(|v| v.value().as_i64())
            .unwrap_or(fallback)
    };
    let (low, high) = (bound(0, 0), bound(1, 100));
    let value = if high > low {
        rand::thread_rng().gen_range(low..=high)
    } else {
        low
    };
    out.write(&value.to_string())?;
    Ok(())
}

/// `{{default value "fallback"}}`: the value unless it is missing, null or
/// an empty string.
fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use serde_json::Value;

    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");
    let rendered = match h.param(0).map(|v| v.value()) {
        Some(Value::Null) | None => fallback.to_string(),
        Some(Value::String(s)) if s.is_empty() => fallback.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    out.write(&rendered)?;
    Ok(())
}
