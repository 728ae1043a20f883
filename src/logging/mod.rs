//! The entry point used by application code to write events into the pipeline.
//!
//! A [`Logger`] filters events by level, runs the [`EnricherChain`] and hands the result to the
//! [`SinkRouter`]. Writing never fails from the caller's point of view: sink failures are
//! isolated by the router.
//!
//! Events emitted through the `tracing` macros are routed into the same pipeline once
//! [`setup_tracing`] has been called.

use crate::enrich::{EnricherChain, EnrichmentContext, ScopeStack, TraceContext};
use crate::event::{EventRecord, ExceptionInfo, Level, PropertyValue, SOURCE_CONTEXT};
use crate::sink::SinkRouter;
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub mod bridge;
pub mod level;

pub use bridge::PipelineLayer;
pub use level::LevelSwitch;

struct LoggerInner {
    chain: EnricherChain,
    router: SinkRouter,
    levels: LevelSwitch,
}

/// A cheaply cloneable handle which writes events through the enricher chain into the sinks.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(chain: EnricherChain, router: SinkRouter, levels: LevelSwitch) -> Self {
        Logger {
            inner: Arc::new(LoggerInner {
                chain,
                router,
                levels,
            }),
        }
    }

    pub fn levels(&self) -> &LevelSwitch {
        &self.inner.levels
    }

    pub fn is_enabled(&self, level: Level, source: Option<&str>) -> bool {
        self.inner.levels.is_enabled(level, source)
    }

    /// Writes an event without any ambient context.
    ///
    /// Returns `false` if the event was filtered out by its level.
    pub fn write(&self, record: EventRecord) -> bool {
        self.write_with(record, &EnrichmentContext::default())
    }

    /// Enriches the event using the given context and routes it to all sinks.
    pub fn write_with(&self, mut record: EventRecord, context: &EnrichmentContext) -> bool {
        if !self.is_enabled(record.level, record.source_context()) {
            return false;
        }

        self.inner.chain.apply(&mut record, context);
        self.inner.router.route(&record);
        true
    }

    /// Starts building an event.
    ///
    /// ```
    /// # use wasabi_logship::enrich::EnricherChain;
    /// # use wasabi_logship::event::Level;
    /// # use wasabi_logship::logging::{LevelSwitch, Logger};
    /// # use wasabi_logship::sink::SinkRouter;
    /// # let logger = Logger::new(EnricherChain::new(), SinkRouter::new(), LevelSwitch::new(Level::Information));
    /// logger
    ///     .event(Level::Warning, "Disk usage of {Volume} at {Percent}%")
    ///     .property("Volume", "/var")
    ///     .property("Percent", 93)
    ///     .emit();
    /// ```
    pub fn event(&self, level: Level, message_template: impl Into<String>) -> EventBuilder<'_> {
        EventBuilder {
            logger: self,
            record: EventRecord::new(level, message_template),
            context: EnrichmentContext::default(),
        }
    }

    pub fn verbose(&self, message_template: impl Into<String>) -> EventBuilder<'_> {
        self.event(Level::Verbose, message_template)
    }

    pub fn debug(&self, message_template: impl Into<String>) -> EventBuilder<'_> {
        self.event(Level::Debug, message_template)
    }

    pub fn information(&self, message_template: impl Into<String>) -> EventBuilder<'_> {
        self.event(Level::Information, message_template)
    }

    pub fn warning(&self, message_template: impl Into<String>) -> EventBuilder<'_> {
        self.event(Level::Warning, message_template)
    }

    pub fn error(&self, message_template: impl Into<String>) -> EventBuilder<'_> {
        self.event(Level::Error, message_template)
    }

    pub fn fatal(&self, message_template: impl Into<String>) -> EventBuilder<'_> {
        self.event(Level::Fatal, message_template)
    }
}

/// Collects properties and context of a single event. Nothing is written until
/// [`emit`](EventBuilder::emit) is called.
#[must_use = "events are only written by calling emit()"]
pub struct EventBuilder<'a> {
    logger: &'a Logger,
    record: EventRecord,
    context: EnrichmentContext,
}

impl EventBuilder<'_> {
    pub fn property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.record.set_property(name, value);
        self
    }

    /// Marks the component which emitted the event. Used for per-source level overrides.
    pub fn source(self, source: impl Into<String>) -> Self {
        let source: String = source.into();
        self.property(SOURCE_CONTEXT, source)
    }

    pub fn exception(mut self, exception: ExceptionInfo) -> Self {
        self.record.exception = Some(exception);
        self
    }

    /// Attaches an error along with its whole chain of causes.
    pub fn error(self, err: &anyhow::Error) -> Self {
        self.exception(ExceptionInfo::from_anyhow(err))
    }

    pub fn scope(mut self, scope: &ScopeStack) -> Self {
        self.context.scope = Some(scope.clone());
        self
    }

    pub fn trace(mut self, trace: &TraceContext) -> Self {
        self.context.trace = Some(trace.clone());
        self
    }

    /// Writes the event. Returns `false` if it was filtered out by its level.
    pub fn emit(self) -> bool {
        self.logger.write_with(self.record, &self.context)
    }
}

/// Installs the global `tracing` subscriber.
///
/// Events of the application are routed into the given logger. Events of this crate and of the
/// HTTP / index client libraries it uses are printed to stderr instead, as routing them into the
/// pipeline could feed back into the delivery of events. `RUST_LOG` controls what is recorded at
/// all (defaulting to `info`).
pub fn setup_tracing(logger: &Logger) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let pipeline_layer = PipelineLayer::new(logger.clone());
    let self_log_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_filter(filter_fn(|metadata| bridge::is_internal_target(metadata.target())));

    Registry::default()
        .with(filter)
        .with(pipeline_layer)
        .with(self_log_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    tracing::info!("Tracing initialized successfully [reporting into the logging pipeline]");
    Ok(())
}
