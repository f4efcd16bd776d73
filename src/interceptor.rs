//! Interceptor: ties a browser controller to the mock registry.

use crate::config::{GlobalSettings, MockServerConfig};
use crate::driver::{BrowserController, InterceptedRequest, RequestHandler};
use crate::error::Result;
use crate::filter::RequestMatcherSpec;
use crate::mock::{Mock, MockOptions, ResponseSpec};
use crate::registry::MockRegistry;
use crate::request::NormalizedRequest;
use crate::response::ResponseData;
use crate::template::{ResponseTemplate, TemplateEngine};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Mocks requests of a browser page.
///
/// Register mocks with [`mock`](Self::mock), turn interception on with
/// [`activate`](Self::activate), then assert on what each mock received with
/// [`Mock::get_request`].
pub struct Interceptor {
    engine: Arc<MockEngine>,
    controller: Arc<dyn BrowserController>,
}

/// State shared with the interception handler.
struct MockEngine {
    registry: RwLock<MockRegistry>,
    settings: Arc<GlobalSettings>,
    templates: Arc<TemplateEngine>,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Total requests answered by a mock.
    requests_matched: AtomicU64,
    /// Total requests passed through.
    requests_unmatched: AtomicU64,
}

impl MockEngine {
    /// Walk the registry in priority order and answer with the first mock
    /// that applies.
    fn handle(&self, request: &NormalizedRequest) -> Result<Option<ResponseData>> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        // Snapshot so response functions may register or remove mocks.
        let mocks = self.registry.read().snapshot();

        for mock in &mocks {
            if let Some(response) = mock.response_for(request)? {
                self.requests_matched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_matches {
                    info!(
                        mock_id = mock.id(),
                        method = %request.method,
                        url = %request.url,
                        status = response.status,
                        "Request matched mock"
                    );
                }
                return Ok(Some(response));
            }
        }

        self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_unmatched {
            info!(
                method = %request.method,
                url = %request.url,
                mocks = mocks.len(),
                "No matching mock, passing request through"
            );
        }
        Ok(None)
    }

    fn on_intercepted(&self, intercepted: InterceptedRequest) {
        match self.handle(&intercepted.request) {
            Ok(Some(response)) => intercepted.respond(response),
            Ok(None) => intercepted.skip(),
            Err(e) => {
                error!(url = %intercepted.request.url, error = %e, "Failed to answer intercepted request");
                intercepted.fail(e);
            }
        }
    }
}

impl Interceptor {
    pub fn new(controller: Arc<dyn BrowserController>) -> Self {
        Self::with_settings(controller, GlobalSettings::default())
    }

    pub fn with_settings(controller: Arc<dyn BrowserController>, settings: GlobalSettings) -> Self {
        Self {
            engine: Arc::new(MockEngine {
                registry: RwLock::new(MockRegistry::new()),
                settings: Arc::new(settings),
                templates: Arc::new(TemplateEngine::new()),
                requests_total: AtomicU64::new(0),
                requests_matched: AtomicU64::new(0),
                requests_unmatched: AtomicU64::new(0),
            }),
            controller,
        }
    }

    /// Create an interceptor with the file's settings and register its mocks.
    pub fn from_config(
        controller: Arc<dyn BrowserController>,
        config: &MockServerConfig,
    ) -> anyhow::Result<Self> {
        let interceptor = Self::with_settings(controller, config.settings.clone());
        interceptor.load_config(config)?;
        Ok(interceptor)
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.engine.settings
    }

    /// Start intercepting the page's requests.
    pub async fn activate(&self) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let handler: RequestHandler =
            Arc::new(move |intercepted: InterceptedRequest| engine.on_intercepted(intercepted));
        self.controller.start_interception(handler).await?;
        info!(mocks = self.engine.registry.read().len(), "Mock interception activated");
        Ok(())
    }

    /// Stop intercepting; requests go to the network again.
    pub async fn deactivate(&self) -> Result<()> {
        self.controller.stop_interception().await?;
        info!("Mock interception deactivated");
        Ok(())
    }

    /// Register a mock. Fails if the matcher's path pattern is invalid.
    pub fn mock(
        &self,
        matcher: RequestMatcherSpec,
        response: impl Into<ResponseSpec>,
        options: MockOptions,
    ) -> Result<Arc<Mock>> {
        let mut registry = self.engine.registry.write();
        let mock = Arc::new(Mock::new(
            registry.next_id(),
            &matcher,
            response,
            options,
            Arc::clone(&self.engine.settings),
        )?);
        let position = registry.add(Arc::clone(&mock));
        info!(
            mock_id = mock.id(),
            mock = %mock,
            priority = options.priority,
            once = options.once,
            position,
            "Registered mock"
        );
        Ok(mock)
    }

    /// Register every mock of a configuration file, in file order.
    pub fn load_config(&self, config: &MockServerConfig) -> anyhow::Result<Vec<Arc<Mock>>> {
        config
            .mocks
            .iter()
            .enumerate()
            .map(|(i, def)| {
                let response = def.response.to_mock_response()?;
                let response = if def.response.template {
                    ResponseSpec::Template(ResponseTemplate::new(
                        Arc::clone(&self.engine.templates),
                        response,
                    ))
                } else {
                    ResponseSpec::Static(response)
                };
                let options = MockOptions {
                    priority: def.priority,
                    once: def.once,
                };
                self.mock(def.request.clone(), response, options)
                    .map_err(|e| anyhow::anyhow!("Mock {} ({}): {}", i, def.label(), e))
            })
            .collect()
    }

    /// Unregister a mock. Returns whether it was registered.
    pub fn remove(&self, mock: &Arc<Mock>) -> bool {
        let removed = self.engine.registry.write().remove(mock);
        if removed {
            info!(mock_id = mock.id(), "Removed mock");
        }
        removed
    }

    /// Unregister every mock.
    pub fn clear(&self) {
        self.engine.registry.write().clear();
    }

    /// Registered mocks in match order.
    pub fn mocks(&self) -> Vec<Arc<Mock>> {
        self.engine.registry.read().snapshot()
    }

    /// Run the matching pipeline for a request without a browser.
    pub fn handle(&self, request: &NormalizedRequest) -> Result<Option<ResponseData>> {
        self.engine.handle(request)
    }

    pub fn total_requests(&self) -> u64 {
        self.engine.requests_total.load(Ordering::Relaxed)
    }

    pub fn total_matched(&self) -> u64 {
        self.engine.requests_matched.load(Ordering::Relaxed)
    }

    pub fn total_unmatched(&self) -> u64 {
        self.engine.requests_unmatched.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{CallbackController, Decision, RouteController};
    use crate::error::MockError;
    use crate::request::PageRequest;
    use crate::response::MockResponse;
    use std::time::Duration;

    const PAGE: &str = "http://localhost:3000/index.html";

    fn page_request(method: &str, url: &str) -> PageRequest {
        PageRequest::new(method, url).with_frame_url(PAGE)
    }

    async fn active(controller: Arc<CallbackController>) -> Interceptor {
        let interceptor = Interceptor::new(controller);
        interceptor.activate().await.unwrap();
        interceptor
    }

    #[tokio::test]
    async fn test_higher_priority_mock_wins() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;

        let high = interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::text("high"),
                MockOptions::default().with_priority(10),
            )
            .unwrap();
        let low = interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::text("low"),
                MockOptions::default(),
            )
            .unwrap();

        let decision = controller
            .on_request(&page_request("GET", "http://localhost:3000/api/x"))
            .decision()
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Fulfill(ref data) if data.body == "high"));

        assert!(high.get_request(0).await.is_ok());
        let err = low.get_request(0).await.unwrap_err();
        assert!(matches!(err, MockError::RequestNotFound { .. }));
    }

    #[tokio::test]
    async fn test_newest_equal_priority_mock_wins() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;

        for body in ["first", "second"] {
            interceptor
                .mock(
                    RequestMatcherSpec::new("GET", "/api/x"),
                    MockResponse::text(body),
                    MockOptions::default(),
                )
                .unwrap();
        }

        let decision = controller
            .on_request(&page_request("GET", "http://localhost:3000/api/x"))
            .decision()
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Fulfill(ref data) if data.body == "second"));
    }

    #[tokio::test]
    async fn test_computed_response_with_params() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;

        interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/items/:id"),
                ResponseSpec::computed(|req| {
                    Ok(MockResponse::json(serde_json::json!({"id": req.params["id"]})).with_status(201))
                }),
                MockOptions::default(),
            )
            .unwrap();

        let decision = controller
            .on_request(&page_request("GET", "http://localhost:3000/items/7"))
            .decision()
            .await
            .unwrap();
        match decision {
            Decision::Fulfill(data) => {
                assert_eq!(data.status, 201);
                assert_eq!(data.body, r#"{"id":"7"}"#);
                assert_eq!(data.content_type(), Some("application/json;charset=UTF-8"));
            }
            Decision::Continue => panic!("expected fulfillment"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_request_passes_through() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;
        let mock = interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::new(),
                MockOptions::default(),
            )
            .unwrap();

        let decision = controller
            .on_request(&page_request("GET", "http://localhost:3000/api/other"))
            .decision()
            .await
            .unwrap();
        assert_eq!(decision, Decision::Continue);
        assert_eq!(mock.match_count(), 0);
        assert_eq!(interceptor.total_requests(), 1);
        assert_eq!(interceptor.total_matched(), 0);
        assert_eq!(interceptor.total_unmatched(), 1);
    }

    #[tokio::test]
    async fn test_cross_origin_request_needs_hostname() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;
        interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::new(),
                MockOptions::default(),
            )
            .unwrap();

        let decision = controller
            .on_request(&page_request("GET", "http://api.example.com/api/x"))
            .decision()
            .await
            .unwrap();
        assert_eq!(decision, Decision::Continue);

        interceptor
            .mock(
                RequestMatcherSpec::new("GET", "http://api.example.com/api/x"),
                MockResponse::new(),
                MockOptions::default(),
            )
            .unwrap();
        let decision = controller
            .on_request(&page_request("GET", "http://api.example.com/api/x"))
            .decision()
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Fulfill(_)));
    }

    #[tokio::test]
    async fn test_once_mock_falls_back_to_next() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;

        interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::text("fallback"),
                MockOptions::default(),
            )
            .unwrap();
        interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::text("first"),
                MockOptions::default().with_priority(1).once(),
            )
            .unwrap();

        let mut bodies = Vec::new();
        for _ in 0..2 {
            let decision = controller
                .on_request(&page_request("GET", "http://localhost:3000/api/x"))
                .decision()
                .await
                .unwrap();
            if let Decision::Fulfill(data) = decision {
                bodies.push(data.body);
            }
        }
        assert_eq!(bodies, vec!["first", "fallback"]);
    }

    #[tokio::test]
    async fn test_response_function_error_fails_request() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;
        interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                ResponseSpec::computed(|_| Err(anyhow::anyhow!("cannot build response"))),
                MockOptions::default(),
            )
            .unwrap();

        let result = controller
            .on_request(&page_request("GET", "http://localhost:3000/api/x"))
            .decision()
            .await;
        assert!(matches!(result, Err(MockError::Responder { .. })));
    }

    #[tokio::test]
    async fn test_remove_mock() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;
        let mock = interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::new(),
                MockOptions::default(),
            )
            .unwrap();

        assert!(interceptor.remove(&mock));
        assert!(!interceptor.remove(&mock));
        assert!(interceptor.mocks().is_empty());

        let decision = controller
            .on_request(&page_request("GET", "http://localhost:3000/api/x"))
            .decision()
            .await
            .unwrap();
        assert_eq!(decision, Decision::Continue);
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_registration() {
        let interceptor = Interceptor::new(Arc::new(CallbackController::new()));
        let result = interceptor.mock(
            RequestMatcherSpec::new("GET", "/users/:id(\\d+"),
            MockResponse::new(),
            MockOptions::default(),
        );
        assert!(matches!(result, Err(MockError::InvalidPathPattern { .. })));
        assert!(interceptor.mocks().is_empty());
    }

    #[tokio::test]
    async fn test_deactivate_restores_network() {
        let controller = Arc::new(CallbackController::new());
        let interceptor = active(Arc::clone(&controller)).await;
        interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::new(),
                MockOptions::default(),
            )
            .unwrap();

        interceptor.deactivate().await.unwrap();
        let decision = controller
            .on_request(&page_request("GET", "http://localhost:3000/api/x"))
            .decision()
            .await
            .unwrap();
        assert_eq!(decision, Decision::Continue);
    }

    #[tokio::test]
    async fn test_route_controller_end_to_end() {
        let controller = Arc::new(RouteController::new());
        let sender = controller.sender();
        let interceptor = Interceptor::new(controller);
        let mock = interceptor
            .mock(
                RequestMatcherSpec::new("POST", "/api/users"),
                MockResponse::json(serde_json::json!({"created": true})).with_status(201),
                MockOptions::default(),
            )
            .unwrap();
        interceptor.activate().await.unwrap();

        let decision = sender
            .route(
                &page_request("POST", "http://localhost:3000/api/users")
                    .with_post_data(r#"{"name":"Ada"}"#),
            )
            .decision()
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Fulfill(ref data) if data.status == 201));

        let recorded = mock.get_request(0).await.unwrap();
        assert_eq!(recorded.body, Some(serde_json::json!({"name": "Ada"})));

        interceptor.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_request_does_not_block_interception() {
        let controller = Arc::new(CallbackController::new());
        let settings = GlobalSettings {
            get_request_timeout_ms: 2_000,
            ..GlobalSettings::default()
        };
        let interceptor = Interceptor::with_settings(Arc::clone(&controller) as Arc<dyn BrowserController>, settings);
        interceptor.activate().await.unwrap();
        let mock = interceptor
            .mock(
                RequestMatcherSpec::new("GET", "/api/x"),
                MockResponse::new(),
                MockOptions::default(),
            )
            .unwrap();

        let driver = Arc::clone(&controller);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = driver
                .on_request(&page_request("GET", "http://localhost:3000/api/x"))
                .decision()
                .await;
        });

        let recorded = mock.get_request(0).await.unwrap();
        assert_eq!(recorded.path, "/api/x");
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = MockServerConfig::from_yaml(
            r#"
mocks:
  - id: user
    request:
      method: GET
      url: /users/:id
    response:
      template: true
      body:
        type: json
        content:
          id: "{{params.id}}"
          name: "User {{params.id}}"
  - id: health
    request:
      url: /health
    response:
      body:
        type: text
        content: ok
settings:
  cors: false
"#,
        )
        .unwrap();

        let controller = Arc::new(CallbackController::new());
        let interceptor = Interceptor::from_config(Arc::clone(&controller) as Arc<dyn BrowserController>, &config).unwrap();
        assert_eq!(interceptor.mocks().len(), 2);
        interceptor.activate().await.unwrap();

        let decision = controller
            .on_request(&page_request("GET", "http://localhost:3000/users/12"))
            .decision()
            .await
            .unwrap();
        match decision {
            Decision::Fulfill(data) => {
                let body: serde_json::Value = serde_json::from_str(&data.body).unwrap();
                assert_eq!(body, serde_json::json!({"id": "12", "name": "User 12"}));
                assert!(!data.headers.contains_key("access-control-allow-origin"));
            }
            Decision::Continue => panic!("expected fulfillment"),
        }

        let decision = controller
            .on_request(&page_request("HEAD", "http://localhost:3000/health"))
            .decision()
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Fulfill(ref data) if data.body == "ok"));
    }
}
