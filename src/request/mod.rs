//! Summarizes each completed HTTP request as exactly one event.
//!
//! [`RequestCompletionRecorder::begin`] is called when a request arrives and hands out a
//! [`RequestTracker`]. The tracker starts in the `Started` state and moves to `Completed` or
//! `Failed` exactly once, writing the summary event on that transition. A tracker which is
//! dropped while still `Started` (e.g. because the client went away and the handler future was
//! cancelled) records the request as failed with status 499.

use crate::enrich::{EnrichmentContext, ScopeStack, TraceContext};
use crate::event::{EventRecord, ExceptionInfo, Level, PropertyValue};
use crate::logging::Logger;
use crate::tools::watch::Watch;
use std::net::IpAddr;
use std::sync::Arc;

pub mod middleware;

pub use middleware::RequestLoggingMiddleware;

pub const DEFAULT_REQUEST_TEMPLATE: &str = "{RemoteIpAddress} {RequestScheme} {RequestHost} {RequestMethod} {RequestPath} responded {StatusCode} in {Elapsed:0.0000} ms";

pub const REMOTE_IP_ADDRESS: &str = "RemoteIpAddress";
pub const REQUEST_SCHEME: &str = "RequestScheme";
pub const REQUEST_HOST: &str = "RequestHost";
pub const REQUEST_METHOD: &str = "RequestMethod";
pub const REQUEST_PATH: &str = "RequestPath";
pub const STATUS_CODE: &str = "StatusCode";
pub const ELAPSED: &str = "Elapsed";

/// Status recorded for requests which were abandoned before a response was produced.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// What is known about a request when it arrives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub scheme: String,
    pub host: Option<String>,
    pub remote_ip: Option<IpAddr>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        RequestInfo {
            method: method.into(),
            path: path.into(),
            scheme: "http".to_string(),
            host: None,
            remote_ip: None,
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_remote_ip(mut self, remote_ip: IpAddr) -> Self {
        self.remote_ip = Some(remote_ip);
        self
    }
}

#[derive(Clone, Debug)]
pub struct RequestLoggingOptions {
    pub message_template: String,
    /// Level of every request event. Debug by default, so that request summaries stay out of an
    /// index which only receives Information and above.
    pub level: Level,
}

impl Default for RequestLoggingOptions {
    fn default() -> Self {
        RequestLoggingOptions {
            message_template: DEFAULT_REQUEST_TEMPLATE.to_string(),
            level: Level::Debug,
        }
    }
}

/// Lifecycle of a single request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Started,
    Completed,
    Failed,
}

/// Creates a [`RequestTracker`] per request. Cheap to clone.
#[derive(Clone)]
pub struct RequestCompletionRecorder {
    logger: Logger,
    options: Arc<RequestLoggingOptions>,
}

impl RequestCompletionRecorder {
    pub fn new(logger: Logger, options: RequestLoggingOptions) -> Self {
        RequestCompletionRecorder {
            logger,
            options: Arc::new(options),
        }
    }

    /// Starts tracking a request. Without an inbound trace, the request starts a new one.
    pub fn begin(&self, info: RequestInfo, trace: Option<TraceContext>) -> RequestTracker {
        RequestTracker {
            recorder: self.clone(),
            info,
            scope: ScopeStack::new(),
            trace: trace.unwrap_or_else(TraceContext::new_root),
            watch: Watch::start(),
            state: RequestState::Started,
        }
    }
}

/// Tracks one request from its arrival until its summary event has been written.
pub struct RequestTracker {
    recorder: RequestCompletionRecorder,
    info: RequestInfo,
    scope: ScopeStack,
    trace: TraceContext,
    watch: Watch,
    state: RequestState,
}

impl RequestTracker {
    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    /// The ambient scope of the request. Its values end up on every event written with it,
    /// including the summary event.
    pub fn scope(&self) -> &ScopeStack {
        &self.scope
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    pub fn diagnostic_context(&self) -> DiagnosticContext {
        DiagnosticContext {
            scope: self.scope.clone(),
        }
    }

    /// Records the request as completed with the given response status.
    pub fn complete(mut self, status: u16) {
        self.finish(RequestState::Completed, status, None);
    }

    /// Records the request as failed, e.g. because its handler panicked.
    pub fn fail(mut self, status: u16, exception: ExceptionInfo) {
        self.finish(RequestState::Failed, status, Some(exception));
    }

    fn finish(&mut self, state: RequestState, status: u16, exception: Option<ExceptionInfo>) {
        if self.state != RequestState::Started {
            return;
        }
        self.state = state;

        let options = &self.recorder.options;
        let mut record = EventRecord::new(options.level, options.message_template.as_str())
            .with_property(REMOTE_IP_ADDRESS, self.info.remote_ip)
            .with_property(REQUEST_SCHEME, self.info.scheme.as_str())
            .with_property(REQUEST_HOST, self.info.host.as_deref())
            .with_property(REQUEST_METHOD, self.info.method.as_str())
            .with_property(REQUEST_PATH, self.info.path.as_str())
            .with_property(STATUS_CODE, status)
            .with_property(ELAPSED, self.watch.elapsed_ms());
        record.exception = exception;

        let context = EnrichmentContext::default()
            .with_scope(self.scope.clone())
            .with_trace(self.trace.clone());
        self.recorder.logger.write_with(record, &context);
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        if self.state == RequestState::Started {
            self.finish(RequestState::Failed, CLIENT_CLOSED_REQUEST, None);
        }
    }
}

/// Lets request handlers attach additional properties to the summary event of their request.
///
/// Values set here are visible to every event written with the request's scope, but never
/// replace the computed request properties.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticContext {
    scope: ScopeStack,
}

impl DiagnosticContext {
    pub fn set(&self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.scope.set(name, value);
    }

    pub fn scope(&self) -> &ScopeStack {
        &self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{CorrelationEnricher, EnricherChain, ScopeEnricher};
    use crate::enrich::correlation::TRACE_ID;
    use crate::logging::LevelSwitch;
    use crate::sink::SinkRouter;
    use crate::sink::testing::MemorySink;
    use std::time::Duration;

    fn recorder(minimum: Level) -> (RequestCompletionRecorder, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::new(
            EnricherChain::new()
                .with(ScopeEnricher)
                .with(CorrelationEnricher),
            SinkRouter::new().with_sink(sink.clone()),
            LevelSwitch::new(minimum),
        );
        (
            RequestCompletionRecorder::new(logger, RequestLoggingOptions::default()),
            sink,
        )
    }

    fn home_index() -> RequestInfo {
        RequestInfo::new("GET", "/home/index")
            .with_scheme("https")
            .with_host("example.com")
            .with_remote_ip("10.0.0.7".parse().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn completed_request_produces_exactly_one_event() {
        let (recorder, sink) = recorder(Level::Verbose);

        let tracker = recorder.begin(home_index(), None);
        tokio::time::advance(Duration::from_micros(12_300)).await;
        tracker.complete(200);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, Level::Debug);
        assert_eq!(record.property(REQUEST_METHOD), Some(&PropertyValue::from("GET")));
        assert_eq!(record.property(REQUEST_PATH), Some(&PropertyValue::from("/home/index")));
        assert_eq!(record.property(STATUS_CODE), Some(&PropertyValue::Integer(200)));
        let elapsed = record.property(ELAPSED).and_then(PropertyValue::as_f64).unwrap();
        assert!((elapsed - 12.3).abs() < 0.001);
        assert_eq!(
            record.render_message(),
            "\"10.0.0.7\" \"https\" \"example.com\" \"GET\" \"/home/index\" responded 200 in 12.3000 ms"
        );
        assert!(record.property(TRACE_ID).is_some());
    }

    #[tokio::test]
    async fn dropped_tracker_records_a_single_failure() {
        let (recorder, sink) = recorder(Level::Verbose);

        let tracker = recorder.begin(home_index(), None);
        assert_eq!(tracker.state(), RequestState::Started);
        drop(tracker);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].property(STATUS_CODE),
            Some(&PropertyValue::Integer(i64::from(CLIENT_CLOSED_REQUEST)))
        );
    }

    #[tokio::test]
    async fn failures_carry_the_exception() {
        let (recorder, sink) = recorder(Level::Verbose);

        recorder
            .begin(home_index(), None)
            .fail(500, ExceptionInfo::new("panic", "handler exploded"));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].exception.as_ref().unwrap().message, "handler exploded");
    }

    #[tokio::test]
    async fn diagnostic_context_values_are_added_without_replacing_computed_ones() {
        let (recorder, sink) = recorder(Level::Verbose);

        let tracker = recorder.begin(home_index(), None);
        let context = tracker.diagnostic_context();
        context.set("UserName", "alice");
        context.set(REQUEST_PATH, "/spoofed");
        tracker.complete(204);

        let record = &sink.records()[0];
        assert_eq!(record.property("UserName"), Some(&PropertyValue::from("alice")));
        assert_eq!(record.property(REQUEST_PATH), Some(&PropertyValue::from("/home/index")));
    }

    #[tokio::test]
    async fn inbound_trace_is_continued() {
        let (recorder, sink) = recorder(Level::Verbose);
        let inbound =
            TraceContext::from_traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
                .unwrap();

        recorder.begin(home_index(), Some(inbound)).complete(200);

        assert_eq!(
            sink.records()[0].property(TRACE_ID),
            Some(&PropertyValue::from("4bf92f3577b34da6a3ce929d0e0e4736"))
        );
    }

    #[tokio::test]
    async fn request_events_respect_the_minimum_level() {
        let (recorder, sink) = recorder(Level::Information);

        recorder.begin(home_index(), None).complete(200);

        assert!(sink.records().is_empty());
    }
}
