use crate::enrich::{ScopeStack, TraceContext};
use crate::logging::Logger;
use crate::pipeline::Pipeline;
use crate::request::{DiagnosticContext, RequestLoggingMiddleware};
use crate::tools::system::install_termination_listener;
use anyhow::Context;
use hyper::Server;
use hyper::server::conn::AddrStream;
use hyper::service::make_service_fn;
use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use warp::{Filter, Rejection, Reply};

pub fn with_cloneable<C: Clone + Send>(
    value: C,
) -> impl Filter<Extract = (C,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

/// Provides the pipeline's logger to a handler.
pub fn with_logger(logger: Logger) -> impl Filter<Extract = (Logger,), Error = Infallible> + Clone {
    with_cloneable(logger)
}

/// Provides the [`DiagnosticContext`] of the current request.
///
/// Outside of [`RequestLoggingMiddleware`] a detached context is handed out, so handlers still
/// work (e.g. in `warp::test`), their values just don't end up anywhere.
pub fn with_diagnostic_context()
-> impl Filter<Extract = (DiagnosticContext,), Error = Infallible> + Clone {
    warp::ext::optional::<DiagnosticContext>()
        .map(|context: Option<DiagnosticContext>| context.unwrap_or_default())
}

/// Provides the ambient scope of the current request, for use with
/// [`EventBuilder::scope`](crate::logging::EventBuilder::scope).
pub fn with_scope() -> impl Filter<Extract = (ScopeStack,), Error = Infallible> + Clone {
    warp::ext::optional::<ScopeStack>().map(|scope: Option<ScopeStack>| scope.unwrap_or_default())
}

/// Provides the trace the current request belongs to.
pub fn with_trace() -> impl Filter<Extract = (TraceContext,), Error = Infallible> + Clone {
    warp::ext::optional::<TraceContext>()
        .map(|trace: Option<TraceContext>| trace.unwrap_or_else(TraceContext::new_root))
}

/// Serves the given routes on `BIND_ADDRESS`, recording one completion event per request.
///
/// Runs until SIGINT, SIGTERM or SIGHUP is received. In-flight requests are finished, then the
/// pipeline is shut down so that buffered events are flushed into the index.
pub async fn run_webserver<F>(routes: F, pipeline: &Pipeline) -> anyhow::Result<()>
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply,
    F::Error: Into<Rejection> + 'static,
{
    let bind_address = env::var("BIND_ADDRESS")
        .context("Failed to read bind address. Please provide BIND_ADDRESS in the environment")?;
    let bind_address =
        SocketAddr::from_str(&bind_address).context("Failed to parse bind address.")?;

    tracing::info!("Starting server at {}", bind_address);

    let svc = warp::service(routes.boxed());
    let recorder = pipeline.recorder().clone();

    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let svc = RequestLoggingMiddleware::new(
            svc.clone(),
            recorder.clone(),
            Some(conn.remote_addr()),
        );
        async move { Ok::<_, Infallible>(svc) }
    });

    let server = Server::try_bind(&bind_address)
        .with_context(|| format!("Failed to bind HTTP server to {}", bind_address))?
        .serve(make_svc);

    tracing::info!(
        "Running HTTP server at effective address {}",
        server.local_addr()
    );

    let termination = install_termination_listener();
    let result = server
        .with_graceful_shutdown(termination.cancelled())
        .await
        .context("HTTP server failed");
    tracing::info!("HTTP Server has terminated...");

    pipeline.shutdown().await;
    result
}
