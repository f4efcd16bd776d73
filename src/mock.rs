//! Mocks: a compiled filter, a way to produce a response, and the requests
//! the mock has answered so far.

use crate::config::GlobalSettings;
use crate::error::{ordinal, MockError, Result};
use crate::filter::{CompiledFilter, RequestMatcherSpec};
use crate::matcher::evaluate;
use crate::request::{stringify_query, MatchedRequest, NormalizedRequest};
use crate::response::{MockResponse, ResponseData};
use crate::template::ResponseTemplate;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Function computing a response from the matched request.
pub type ResponseFn = dyn Fn(&MatchedRequest) -> anyhow::Result<MockResponse> + Send + Sync;

/// How a mock produces its response.
#[derive(Clone)]
pub enum ResponseSpec {
    /// Same response for every match
    Static(MockResponse),
    /// Response computed from each matched request
    Computed(Arc<ResponseFn>),
    /// Handlebars template rendered against each matched request
    Template(ResponseTemplate),
}

impl ResponseSpec {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&MatchedRequest) -> anyhow::Result<MockResponse> + Send + Sync + 'static,
    {
        ResponseSpec::Computed(Arc::new(f))
    }
}

impl From<MockResponse> for ResponseSpec {
    fn from(response: MockResponse) -> Self {
        ResponseSpec::Static(response)
    }
}

impl fmt::Debug for ResponseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSpec::Static(response) => f.debug_tuple("Static").field(response).finish(),
            ResponseSpec::Computed(_) => f.write_str("Computed(..)"),
            ResponseSpec::Template(template) => f.debug_tuple("Template").field(template).finish(),
        }
    }
}

/// Per-mock options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockOptions {
    /// Higher priorities are tried first
    pub priority: i32,
    /// Stop matching after the first recorded request
    pub once: bool,
}

impl MockOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

/// A registered mock.
pub struct Mock {
    id: u64,
    filter: CompiledFilter,
    response: ResponseSpec,
    options: MockOptions,
    settings: Arc<GlobalSettings>,
    requests: watch::Sender<Vec<MatchedRequest>>,
}

impl Mock {
    /// Create a mock. `id` is a diagnostic label, usually handed out by
    /// [`MockRegistry::next_id`](crate::registry::MockRegistry::next_id).
    pub fn new(
        id: u64,
        matcher: &RequestMatcherSpec,
        response: impl Into<ResponseSpec>,
        options: MockOptions,
        settings: Arc<GlobalSettings>,
    ) -> Result<Self> {
        let filter = CompiledFilter::compile(matcher)?;
        let (requests, _) = watch::channel(Vec::new());

        let mock = Self {
            id,
            filter,
            response: response.into(),
            options,
            settings,
            requests,
        };
        debug!(
            mock_id = id,
            method = ?matcher.method,
            url = %matcher.url,
            priority = options.priority,
            once = options.once,
            "created mock"
        );
        Ok(mock)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> MockOptions {
        self.options
    }

    pub fn priority(&self) -> i32 {
        self.options.priority
    }

    pub fn filter(&self) -> &CompiledFilter {
        &self.filter
    }

    /// Number of requests this mock has answered.
    pub fn match_count(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Snapshot of the requests answered so far.
    pub fn requests(&self) -> Vec<MatchedRequest> {
        self.requests.borrow().clone()
    }

    /// Answer `request` if this mock applies to it.
    ///
    /// Returns `Ok(None)` when the mock does not match (or is a spent `once`
    /// mock). A match is recorded before the response is produced, so a
    /// failing response function still counts as a match.
    pub fn response_for(&self, request: &NormalizedRequest) -> Result<Option<ResponseData>> {
        if self.options.once && !self.requests.borrow().is_empty() {
            debug!(mock_id = self.id, "once: request already matched");
            return Ok(None);
        }

        if let Err(miss) = evaluate(&self.filter, request) {
            debug!(mock_id = self.id, reason = miss.kind(), "{}", miss);
            return Ok(None);
        }

        let matched = MatchedRequest {
            params: self.filter.extract_params(&request.path),
            request: request.clone(),
        };

        // Re-check `once` under the channel lock so two concurrent callers
        // cannot both record.
        let once = self.options.once;
        let recorded = self.requests.send_if_modified(|requests| {
            if once && !requests.is_empty() {
                return false;
            }
            requests.push(matched.clone());
            true
        });
        if !recorded {
            debug!(mock_id = self.id, "once: request already matched");
            return Ok(None);
        }
        debug!(mock_id = self.id, "matched mock");

        let response = self.resolve(&matched)?;
        ResponseData::build(response, request, &self.settings).map(Some)
    }

    fn resolve(&self, matched: &MatchedRequest) -> Result<MockResponse> {
        match &self.response {
            ResponseSpec::Static(response) => Ok(response.clone()),
            ResponseSpec::Computed(f) => f(matched).map_err(|source| MockError::Responder {
                mock_id: self.id,
                source,
            }),
            ResponseSpec::Template(template) => {
                template.render(matched).map_err(|source| MockError::Template {
                    mock_id: self.id,
                    source,
                })
            }
        }
    }

    /// The `index`-th request this mock answered, waiting up to the
    /// configured timeout for it to arrive.
    pub async fn get_request(&self, index: usize) -> Result<MatchedRequest> {
        self.get_request_with_timeout(index, self.settings.get_request_timeout())
            .await
    }

    pub async fn get_request_with_timeout(
        &self,
        index: usize,
        timeout: Duration,
    ) -> Result<MatchedRequest> {
        let mut rx = self.requests.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|requests| requests.len() > index)
                .await
                .map(|requests| requests[index].clone())
        })
        .await;

        match waited {
            Ok(Ok(request)) => Ok(request),
            // The sender lives as long as `self`, so only the timeout can fail.
            Ok(Err(_)) | Err(_) => Err(self.not_found(index)),
        }
    }

    fn not_found(&self, index: usize) -> MockError {
        if index == 0 && self.match_count() == 0 {
            MockError::RequestNotFound {
                mock: self.to_string(),
            }
        } else {
            MockError::NthRequestNotFound {
                ordinal: ordinal(index.saturating_add(1)),
                mock: self.to_string(),
            }
        }
    }
}

impl fmt::Display for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let qs = stringify_query(&self.filter.query);
        write!(
            f,
            "({}) {} {}",
            self.id,
            self.filter.method.as_deref().unwrap_or("*"),
            self.filter.path.as_deref().unwrap_or(""),
        )?;
        if !qs.is_empty() {
            write!(f, "?{}", qs)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mock")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("response", &self.response)
            .field("options", &self.options)
            .field("matches", &self.match_count())
            .finish()
    }
}
