//! Compilation of user-supplied request matchers.
//!
//! A [`RequestMatcherSpec`] is what a test author writes; [`CompiledFilter`]
//! is what the evaluator runs against every intercepted request. Compilation
//! happens once, when the mock is created, so a bad path pattern is reported
//! at registration time instead of on the first request.

use crate::error::{MockError, Result};
use crate::request::{origin_of, parse_query, QueryMap, QueryValue};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Request matcher as supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcherSpec {
    /// HTTP method to match (any when unset)
    #[serde(default)]
    pub method: Option<String>,

    /// URL or path, optionally with `:param` placeholders and a query string
    pub url: String,

    /// Query constraints, replacing any query string embedded in `url`
    #[serde(default)]
    pub query: Option<QueryMap>,
}

impl RequestMatcherSpec {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            url: url.into(),
            query: None,
        }
    }

    /// Matcher for any method.
    pub fn any(url: impl Into<String>) -> Self {
        Self {
            method: None,
            url: url.into(),
            query: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.query
            .get_or_insert_with(QueryMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Matching criteria derived from a [`RequestMatcherSpec`].
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub method: Option<String>,
    /// `None` means "the origin of the page that issued the request".
    pub hostname: Option<String>,
    pub path: Option<String>,
    pub path_pattern: Option<PathPattern>,
    pub query: QueryMap,
}

impl CompiledFilter {
    /// Compile a request matcher.
    pub fn compile(spec: &RequestMatcherSpec) -> Result<Self> {
        let parts = split_matcher_url(&spec.url)?;

        let path_pattern = parts.path.as_deref().map(PathPattern::compile).transpose()?;

        Ok(Self {
            method: spec.method.clone(),
            hostname: parts.hostname,
            path: parts.path,
            path_pattern,
            query: spec.query.clone().unwrap_or(parts.query),
        })
    }

    /// Path parameters captured from `path`; empty without a pattern.
    pub fn extract_params(&self, path: &str) -> HashMap<String, String> {
        match &self.path_pattern {
            Some(pattern) => pattern.captures(path).unwrap_or_default(),
            None => HashMap::new(),
        }
    }
}

struct MatcherUrlParts {
    hostname: Option<String>,
    path: Option<String>,
    query: QueryMap,
}

fn split_matcher_url(url: &str) -> Result<MatcherUrlParts> {
    let (before_query, rest) = url.split_at(path_end(url));
    let query = match rest.strip_prefix('?') {
        Some(query) => parse_query(query.split('#').next().unwrap_or_default()),
        None => QueryMap::new(),
    };

    let Some((scheme, rest)) = before_query.split_once("://") else {
        return Ok(MatcherUrlParts {
            hostname: None,
            path: (!before_query.is_empty()).then(|| before_query.to_string()),
            query,
        });
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };

    let hostname = if scheme.is_empty() || authority.is_empty() {
        None
    } else {
        let origin = format!("{}://{}", scheme, authority);
        let parsed = Url::parse(&origin).map_err(|e| MockError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Some(origin_of(&parsed).ok_or_else(|| MockError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?)
    };

    Ok(MatcherUrlParts {
        hostname,
        path: Some(path.to_string()),
        query,
    })
}

/// Byte offset where the path part of a matcher URL ends: the `?` opening
/// the query string or the `#` opening the fragment.
///
/// A `?` inside a `(...)` group belongs to the pattern, as does a `?` right
/// after a parameter that is followed by `/`, `.`, `#` or the end of the URL
/// (the optional-parameter modifier).
fn path_end(url: &str) -> usize {
    let mut chars = url.char_indices().peekable();
    let mut depth = 0usize;
    let mut in_name = false;
    let mut modifiable = false;

    while let Some((i, c)) = chars.next() {
        if depth > 0 {
            match c {
                '\\' => {
                    chars.next();
                }
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    modifiable = depth == 0;
                }
                _ => {}
            }
            continue;
        }

        match c {
            '?' if modifiable && matches!(chars.peek(), None | Some((_, '/' | '.' | '#'))) => {}
            '?' | '#' => return i,
            '(' => depth += 1,
            ':' => {
                in_name = true;
                modifiable = false;
                continue;
            }
            c if in_name && (c.is_ascii_alphanumeric() || c == '_') => {
                modifiable = true;
                continue;
            }
            '\\' => {
                chars.next();
            }
            _ => {}
        }
        in_name = false;
        modifiable = false;
    }

    url.len()
}

/// Percent-encode literal path text the way request paths are encoded.
fn encode_path_literal(literal: &str) -> String {
    let plain = literal
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"/-._~%!$&'()*+,;=:@".contains(&b));
    if plain {
        return literal.to_string();
    }

    // Prefix a segment so literals without a leading slash keep their shape.
    match Url::parse("http://localhost/") {
        Ok(mut base) => {
            base.set_path(&format!("/_{}", literal));
            base.path()
                .strip_prefix("/_")
                .unwrap_or(literal)
                .to_string()
        }
        Err(_) => literal.to_string(),
    }
}

/// Anchored path pattern with ordered parameter names.
///
/// Syntax: `:name` captures one segment, `:name(re)` uses a custom pattern,
/// a trailing `?` makes the parameter optional and `*`/`+` let it span zero
/// or more / one or more segments. Unnamed `(re)` groups and a bare `*` are
/// captured positionally as `0`, `1`, ... Literal text is percent-encoded
/// like request paths. Matching ignores case and tolerates a trailing slash.
#[derive(Debug, Clone)]
pub struct PathPattern {
    regex: Regex,
    param_names: Vec<String>,
}

const DEFAULT_SEGMENT: &str = "[^/]+?";

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let invalid = |reason: String| MockError::InvalidPathPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let mut body = String::new();
        let mut literal = String::new();
        let mut param_names = Vec::new();
        let mut positional = 0usize;
        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            let name = match ch {
                '\\' => {
                    match chars.next() {
                        Some(escaped) => literal.push(escaped),
                        None => return Err(invalid("dangling escape".to_string())),
                    }
                    continue;
                }
                ':' => {
                    let mut name = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            name.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(invalid("missing parameter name after ':'".to_string()));
                    }
                    name
                }
                '(' | '*' => {
                    let name = positional.to_string();
                    positional += 1;
                    name
                }
                _ => {
                    literal.push(ch);
                    continue;
                }
            };

            let segment = if ch == '*' {
                ".*".to_string()
            } else if ch == '(' || chars.peek() == Some(&'(') {
                if ch != '(' {
                    chars.next();
                }
                read_group(&mut chars).map_err(invalid)?
            } else {
                DEFAULT_SEGMENT.to_string()
            };

            let modifier = match chars.peek() {
                Some(&m) if ch != '*' && matches!(m, '?' | '*' | '+') => {
                    chars.next();
                    Some(m)
                }
                _ => None,
            };

            // A leading slash belongs to the parameter so optional
            // parameters can drop it.
            let prefix = if literal.ends_with('/') {
                literal.pop();
                "/"
            } else {
                ""
            };
            body.push_str(&regex::escape(&encode_path_literal(&literal)));
            literal.clear();

            let prefix = regex::escape(prefix);
            let token = match modifier {
                Some('?') => format!("(?:{prefix}({segment}))?"),
                Some('*') => format!("(?:{prefix}((?:{segment})(?:{prefix}(?:{segment}))*))?"),
                Some('+') => format!("{prefix}((?:{segment})(?:{prefix}(?:{segment}))*)"),
                _ => format!("{prefix}({segment})"),
            };
            body.push_str(&token);
            param_names.push(name);
        }

        if literal.ends_with('/') {
            literal.pop();
        }
        body.push_str(&regex::escape(&encode_path_literal(&literal)));

        let regex = Regex::new(&format!("(?i)^{}(?:/)?$", body))
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { regex, param_names })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Parameter values by name, `None` when `path` does not match.
    /// Optional parameters that did not participate are omitted.
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        Some(
            self.param_names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| caps.get(i + 1).map(|m| (name.clone(), m.as_str().to_string())))
                .collect(),
        )
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }
}

/// Read a custom group body up to its closing parenthesis (already past the
/// opening one). Nested groups must be non-capturing.
fn read_group(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> std::result::Result<String, String> {
    let mut group = String::new();
    let mut depth = 1;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                group.push(c);
                match chars.next() {
                    Some(escaped) => group.push(escaped),
                    None => return Err("dangling escape in group".to_string()),
                }
                continue;
            }
            '(' => {
                if chars.peek() != Some(&'?') {
                    return Err(format!("capturing group not allowed inside \"{}\"", group));
                }
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if group.is_empty() {
                        return Err("empty group".to_string());
                    }
                    return Ok(group);
                }
            }
            _ => {}
        }
        group.push(c);
    }

    Err("unterminated group".to_string())
}
