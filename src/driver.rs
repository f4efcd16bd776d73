//! Browser controller boundary.
//!
//! The engine never talks to a browser directly. A [`BrowserController`]
//! enables interception and feeds every outgoing request to a handler as an
//! [`InterceptedRequest`]; the handler answers it exactly once by consuming
//! it with [`respond`](InterceptedRequest::respond),
//! [`skip`](InterceptedRequest::skip) or [`fail`](InterceptedRequest::fail).
//!
//! Two controller styles are provided. [`CallbackController`] suits drivers
//! that surface requests as page events and expect the listener to settle
//! them inline. [`RouteController`] suits drivers that hand out route
//! objects; routes are queued on a channel and drained by a background task
//! while interception is on.

use crate::error::{MockError, Result};
use crate::request::{normalize, NormalizedRequest, RawRequest};
use crate::response::ResponseData;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What the driver should do with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Fulfill with the given response
    Fulfill(ResponseData),
    /// Let the request through to the network unmodified
    Continue,
}

/// Handler installed by [`BrowserController::start_interception`].
pub type RequestHandler = Arc<dyn Fn(InterceptedRequest) + Send + Sync>;

/// An intercepted request waiting for its decision.
#[derive(Debug)]
pub struct InterceptedRequest {
    pub request: NormalizedRequest,
    reply: oneshot::Sender<Result<Decision>>,
}

impl InterceptedRequest {
    pub fn new(request: NormalizedRequest) -> (Self, PendingDecision) {
        let (reply, rx) = oneshot::channel();
        (Self { request, reply }, PendingDecision { rx })
    }

    /// Fulfill the request with a mocked response.
    pub fn respond(self, response: ResponseData) {
        self.settle(Ok(Decision::Fulfill(response)));
    }

    /// Pass the request through to the network.
    pub fn skip(self) {
        self.settle(Ok(Decision::Continue));
    }

    /// Report that producing the response failed.
    pub fn fail(self, error: MockError) {
        self.settle(Err(error));
    }

    fn settle(self, decision: Result<Decision>) {
        // The driver side may have given up on the request already.
        if self.reply.send(decision).is_err() {
            debug!(url = %self.request.url, "decision receiver dropped");
        }
    }
}

/// Driver-side half of an [`InterceptedRequest`].
#[derive(Debug)]
pub struct PendingDecision {
    rx: oneshot::Receiver<Result<Decision>>,
}

impl PendingDecision {
    fn ready(decision: Decision) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(decision));
        Self { rx }
    }

    /// Wait for the handler's decision. A request dropped without a decision
    /// continues to the network.
    pub async fn decision(self) -> Result<Decision> {
        self.rx.await.unwrap_or(Ok(Decision::Continue))
    }
}

/// Capability set of a browser automation driver.
#[async_trait]
pub trait BrowserController: Send + Sync {
    /// Enable interception, routing every request to `handler`.
    async fn start_interception(&self, handler: RequestHandler) -> Result<()>;

    /// Disable interception and drop the handler.
    async fn stop_interception(&self) -> Result<()>;
}

/// Controller for event-style drivers: the driver calls
/// [`on_request`](Self::on_request) from its request listener.
#[derive(Default)]
pub struct CallbackController {
    handler: RwLock<Option<RequestHandler>>,
}

impl CallbackController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_intercepting(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Dispatch a request observed by the driver.
    pub fn on_request(&self, raw: &dyn RawRequest) -> PendingDecision {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => {
                let (intercepted, pending) = InterceptedRequest::new(normalize(raw));
                handler(intercepted);
                pending
            }
            None => PendingDecision::ready(Decision::Continue),
        }
    }
}

#[async_trait]
impl BrowserController for CallbackController {
    async fn start_interception(&self, handler: RequestHandler) -> Result<()> {
        let mut slot = self.handler.write();
        if slot.is_some() {
            return Err(MockError::Interception(
                "interception already started".to_string(),
            ));
        }
        *slot = Some(handler);
        info!("Request interception started (callback)");
        Ok(())
    }

    async fn stop_interception(&self) -> Result<()> {
        self.handler.write().take();
        info!("Request interception stopped (callback)");
        Ok(())
    }
}

/// Controller for route-style drivers: the driver pushes routes through a
/// [`RouteSender`], a worker task hands them to the handler.
pub struct RouteController {
    /// Held for reading while a route is queued, so no route can slip in
    /// after `stop_interception` has switched it off.
    active: Arc<RwLock<bool>>,
    tx: mpsc::UnboundedSender<InterceptedRequest>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<InterceptedRequest>>>,
    worker: Mutex<Option<RouteWorker>>,
}

struct RouteWorker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<mpsc::UnboundedReceiver<InterceptedRequest>>,
}

impl RouteController {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            active: Arc::new(RwLock::new(false)),
            tx,
            rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        }
    }

    /// Handle the driver uses to route requests.
    pub fn sender(&self) -> RouteSender {
        RouteSender {
            active: Arc::clone(&self.active),
            tx: self.tx.clone(),
        }
    }

    pub fn is_intercepting(&self) -> bool {
        *self.active.read()
    }
}

impl Default for RouteController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserController for RouteController {
    async fn start_interception(&self, handler: RequestHandler) -> Result<()> {
        let mut rx = self.rx.lock().take().ok_or_else(|| {
            MockError::Interception("interception already started".to_string())
        })?;
        let (stop, mut stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    route = rx.recv() => match route {
                        Some(route) => handler(route),
                        None => break,
                    },
                }
            }
            rx
        });

        *self.worker.lock() = Some(RouteWorker { stop, handle });
        *self.active.write() = true;
        info!("Request interception started (routes)");
        Ok(())
    }

    async fn stop_interception(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        *self.active.write() = false;
        let _ = worker.stop.send(());

        let mut rx = worker
            .handle
            .await
            .map_err(|e| MockError::Interception(format!("route worker failed: {}", e)))?;

        // Routes queued before the switch still get an answer.
        let mut drained = 0usize;
        while let Ok(route) = rx.try_recv() {
            route.skip();
            drained += 1;
        }
        *self.rx.lock() = Some(rx);

        info!(drained, "Request interception stopped (routes)");
        Ok(())
    }
}

/// Driver-side route entry point, cheap to clone.
#[derive(Clone)]
pub struct RouteSender {
    active: Arc<RwLock<bool>>,
    tx: mpsc::UnboundedSender<InterceptedRequest>,
}

impl RouteSender {
    /// Route a request. Continues immediately when interception is off.
    pub fn route(&self, raw: &dyn RawRequest) -> PendingDecision {
        let active = self.active.read();
        if !*active {
            return PendingDecision::ready(Decision::Continue);
        }
        let (intercepted, pending) = InterceptedRequest::new(normalize(raw));
        if let Err(mpsc::error::SendError(route)) = self.tx.send(intercepted) {
            route.skip();
        }
        pending
    }
}
