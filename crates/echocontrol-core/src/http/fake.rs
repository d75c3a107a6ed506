//! Scripted in-memory transport for exercising the pipeline and session
//! without a network.
//!
//! # Example
//!
//! ```ignore
//! let transport = Arc::new(FakeTransport::new());
//! transport.once(Method::GET, "https://alexa.amazon.com/api/bootstrap", json_response(200, body));
//! let pipeline = HttpPipeline::new(transport.clone(), Arc::new(TokioScheduler::new()));
//! // ... drive the pipeline ...
//! assert_eq!(transport.requests().len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;

use super::transport::{HttpTransport, TransportRequest, TransportResponse};
use crate::error::{Error, Result};

type Handler = Arc<dyn Fn(&TransportRequest) -> Result<TransportResponse> + Send + Sync>;

enum Responder {
    Queue(VecDeque<Result<TransportResponse>>),
    Handler(Handler),
}

struct Route {
    method: Option<Method>,
    url_prefix: String,
    responder: Responder,
}

impl Route {
    fn matches(&self, request: &TransportRequest) -> bool {
        let method_ok = self
            .method
            .as_ref()
            .map(|m| *m == request.method)
            .unwrap_or(true);
        let live = match &self.responder {
            Responder::Queue(queue) => !queue.is_empty(),
            Responder::Handler(_) => true,
        };
        method_ok && live && request.url.as_str().starts_with(&self.url_prefix)
    }
}

/// Fake [`HttpTransport`] that replays scripted responses by URL prefix and
/// records every request it receives.
///
/// Routes are tried in registration order; the first live route whose method
/// and prefix match answers. A request nothing answers fails with
/// [`Error::Transport`].
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next matching request once with `response`.
    pub fn once(&self, method: Method, url_prefix: &str, response: TransportResponse) {
        self.push_queued(Some(method), url_prefix, Ok(response));
    }

    /// Fail the next matching request once with a transport error.
    pub fn fail_once(&self, method: Method, url_prefix: &str, message: &str) {
        self.push_queued(
            Some(method),
            url_prefix,
            Err(Error::Transport(message.to_string())),
        );
    }

    /// Answer every matching request with a copy of `response`.
    pub fn always(&self, method: Method, url_prefix: &str, response: TransportResponse) {
        self.respond_with(Some(method), url_prefix, move |_| Ok(response.clone()));
    }

    /// Answer every matching request by calling `handler`. A `method` of
    /// `None` matches any method.
    pub fn respond_with<F>(&self, method: Option<Method>, url_prefix: &str, handler: F)
    where
        F: Fn(&TransportRequest) -> Result<TransportResponse> + Send + Sync + 'static,
    {
        self.routes.lock().push(Route {
            method,
            url_prefix: url_prefix.to_string(),
            responder: Responder::Handler(Arc::new(handler)),
        });
    }

    fn push_queued(&self, method: Option<Method>, url_prefix: &str, response: Result<TransportResponse>) {
        let mut routes = self.routes.lock();
        for route in routes.iter_mut() {
            if route.method == method && route.url_prefix == url_prefix {
                if let Responder::Queue(queue) = &mut route.responder {
                    queue.push_back(response);
                    return;
                }
            }
        }
        routes.push(Route {
            method,
            url_prefix: url_prefix.to_string(),
            responder: Responder::Queue(VecDeque::from([response])),
        });
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    /// Requests whose URL starts with `url_prefix`.
    pub fn requests_to(&self, url_prefix: &str) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.as_str().starts_with(url_prefix))
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.requests.lock().push(request.clone());

        let handler = {
            let mut routes = self.routes.lock();
            let Some(route) = routes.iter_mut().find(|r| r.matches(&request)) else {
                return Err(Error::Transport(format!(
                    "no fake response for {} {}",
                    request.method, request.url
                )));
            };
            match &mut route.responder {
                Responder::Queue(queue) => {
                    return queue.pop_front().unwrap_or_else(|| {
                        Err(Error::Transport("fake response queue drained".to_string()))
                    });
                }
                Responder::Handler(handler) => handler.clone(),
            }
        };
        handler(&request)
    }
}

/// A response with `status` and no headers or body.
pub fn status_response(status: u16) -> TransportResponse {
    TransportResponse {
        status,
        reason: reason_phrase(status).to_string(),
        headers: Vec::new(),
        body: Vec::new(),
    }
}

/// A JSON response with `status`.
pub fn json_response(status: u16, body: &serde_json::Value) -> TransportResponse {
    with_header(
        TransportResponse {
            body: body.to_string().into_bytes(),
            ..status_response(status)
        },
        "Content-Type",
        "application/json;charset=UTF-8",
    )
}

/// A plain text/HTML response with `status`.
pub fn text_response(status: u16, content_type: &str, body: &str) -> TransportResponse {
    with_header(
        TransportResponse {
            body: body.as_bytes().to_vec(),
            ..status_response(status)
        },
        "Content-Type",
        content_type,
    )
}

/// A 302 pointing at `location`.
pub fn redirect_response(location: &str) -> TransportResponse {
    with_header(status_response(302), "Location", location)
}

/// Append a header to `response`.
pub fn with_header(mut response: TransportResponse, name: &str, value: &str) -> TransportResponse {
    response.headers.push((name.to_string(), value.to_string()));
    response
}

fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}
