use crate::enrich::TraceContext;
use crate::enrich::correlation::TRACEPARENT_HEADER;
use crate::event::ExceptionInfo;
use crate::request::{RequestCompletionRecorder, RequestInfo};
use crate::sink::panic_message;
use futures_util::FutureExt;
use hyper::header::HOST;
use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::Poll;
use tower::Service;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

impl RequestInfo {
    /// Derives the request properties from the request head and the address of the connection
    /// it arrived on.
    pub fn from_request<B>(request: &Request<B>, remote_addr: Option<SocketAddr>) -> Self {
        let scheme = request
            .headers()
            .get(X_FORWARDED_PROTO)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .or_else(|| request.uri().scheme_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());

        let host = request
            .headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| request.uri().authority().map(|authority| authority.to_string()));

        RequestInfo {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            scheme,
            host,
            remote_ip: remote_addr.map(|addr| addr.ip()),
        }
    }
}

/// Wraps a service and records one completion event per request it handles.
///
/// The request's [`DiagnosticContext`](crate::request::DiagnosticContext),
/// [`ScopeStack`](crate::enrich::ScopeStack) and [`TraceContext`] are put into the request
/// extensions, where handlers can pick them up (see
/// [`with_diagnostic_context`](crate::web::warp::with_diagnostic_context)). A panicking handler
/// is answered with a 500 and recorded as failed.
#[derive(Clone)]
pub struct RequestLoggingMiddleware<S> {
    inner: S,
    recorder: RequestCompletionRecorder,
    remote_addr: Option<SocketAddr>,
}

impl<S> RequestLoggingMiddleware<S> {
    pub fn new(
        inner: S,
        recorder: RequestCompletionRecorder,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        RequestLoggingMiddleware {
            inner,
            recorder,
            remote_addr,
        }
    }
}

impl<S> Service<Request<Body>> for RequestLoggingMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let info = RequestInfo::from_request(&req, self.remote_addr);
        let trace = req
            .headers()
            .get(TRACEPARENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(TraceContext::from_traceparent);

        let tracker = self.recorder.begin(info, trace);
        req.extensions_mut().insert(tracker.diagnostic_context());
        req.extensions_mut().insert(tracker.scope().clone());
        req.extensions_mut().insert(tracker.trace().clone());

        let mut inner = self.inner.clone();

        let fut = async move {
            match AssertUnwindSafe(inner.call(req)).catch_unwind().await {
                Ok(Ok(response)) => {
                    tracker.complete(response.status().as_u16());
                    Ok(response)
                }
                Ok(Err(never)) => match never {},
                Err(panic) => {
                    let status = StatusCode::INTERNAL_SERVER_ERROR;
                    tracker.fail(
                        status.as_u16(),
                        ExceptionInfo::new("panic", panic_message(panic.as_ref())),
                    );

                    let mut response = Response::new(Body::empty());
                    *response.status_mut() = status;
                    Ok(response)
                }
            }
        };

        Box::pin(fut)
    }
}
