//! Page Mock
//!
//! Request mocking for browser-driven tests. An [`Interceptor`] sits between
//! a browser automation driver and the network: every request the page makes
//! is normalized, checked against the registered mocks in priority order, and
//! either fulfilled with a synthesized response or passed through untouched.
//!
//! # Features
//!
//! - **Request Matching**: Match by method, hostname, path pattern (with
//!   `:param` captures) and query subset
//! - **Priorities**: Higher priority mocks are tried first
//! - **Computed Responses**: Build the response from the matched request
//! - **Dynamic Templates**: Use Handlebars templates for file-defined mocks
//! - **Request Assertions**: Await the n-th request a mock answered
//! - **CORS**: Allow the requesting page automatically
//!
//! # Example Configuration
//!
//! ```yaml
//! mocks:
//!   - id: user
//!     request:
//!       method: GET
//!       url: /api/users/:id
//!     response:
//!       status: 200
//!       template: true
//!       body:
//!         type: json
//!         content:
//!           id: "{{params.id}}"
//!     priority: 10
//! settings:
//!   get_request_timeout_ms: 100
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
pub mod interceptor;
pub mod matcher;
pub mod mock;
pub mod registry;
pub mod request;
pub mod response;
pub mod template;

pub use config::{GlobalSettings, MockServerConfig};
pub use driver::{BrowserController, CallbackController, Decision, RouteController};
pub use error::{MockError, Result};
pub use filter::RequestMatcherSpec;
pub use interceptor::Interceptor;
pub use mock::{Mock, MockOptions, ResponseSpec};
pub use request::{MatchedRequest, NormalizedRequest, PageRequest, RawRequest};
pub use response::{MockResponse, ResponseData};
