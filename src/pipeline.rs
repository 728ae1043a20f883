//! Assembles enrichers, sinks and the remote delivery client into one explicit pipeline object.
//!
//! There is no global logger: the application creates a [`Pipeline`] at startup, hands out its
//! [`Logger`] and [`RequestCompletionRecorder`] to whoever needs them and shuts it down on exit
//! so that buffered events get a final chance to reach the index.

use crate::config::PipelineConfig;
use crate::enrich::machine::resolve_machine_name;
use crate::enrich::{
    CorrelationEnricher, EnricherChain, ExceptionDetailEnricher, MachineNameEnricher,
    PropertyEnricher, ScopeEnricher,
};
use crate::event::Level;
use crate::index::{DeliveryCounts, DeliveryOptions, IndexDeliveryClient, IndexTransport};
use crate::logging::{LevelSwitch, Logger};
use crate::request::{RequestCompletionRecorder, RequestLoggingOptions};
use crate::sink::{ConsoleSink, DebugSink, IndexSink, Sink, SinkRouter};
use std::sync::Arc;

pub struct Pipeline {
    logger: Logger,
    recorder: RequestCompletionRecorder,
    delivery: Option<IndexDeliveryClient>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Builds the pipeline described by the given configuration.
    ///
    /// If an index URI is configured, this spawns the delivery worker and therefore has to be
    /// called from within a tokio runtime.
    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let mut builder = PipelineBuilder::new()
            .environment(config.environment.as_str())
            .levels(config.level_switch())
            .request_options(config.request_options());

        if let Some(transport) = index_transport(config)? {
            builder = builder.index(transport, config.delivery_options());
        }

        Ok(builder.build())
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn recorder(&self) -> &RequestCompletionRecorder {
        &self.recorder
    }

    /// Counters of the remote delivery, if an index is configured.
    pub fn delivery_stats(&self) -> Option<DeliveryCounts> {
        self.delivery.as_ref().map(IndexDeliveryClient::stats)
    }

    /// Flushes what is still buffered for the index (bounded by the shutdown timeout) and stops
    /// the delivery worker. Local sinks keep working afterwards.
    pub async fn shutdown(&self) {
        if let Some(delivery) = &self.delivery {
            tracing::info!("Flushing {} buffered events into the index...", delivery.pending());
            delivery.shutdown().await;
            let stats = delivery.stats();
            tracing::info!(
                "Index delivery stopped (delivered: {}, retried: {}, dropped: {}, overflowed: {})",
                stats.delivered,
                stats.retried,
                stats.dropped,
                stats.overflowed
            );
        }
    }
}

#[cfg(feature = "open_search")]
fn index_transport(config: &PipelineConfig) -> anyhow::Result<Option<Arc<dyn IndexTransport>>> {
    use crate::index::opensearch::OpenSearchTransport;

    match &config.index_uri {
        Some(uri) => {
            tracing::info!("Shipping events to index '{}' at {}", config.index_name, uri);
            let transport = OpenSearchTransport::new(uri, config.credentials())?;
            Ok(Some(Arc::new(transport)))
        }
        None => {
            tracing::info!("No OPENSEARCH_URL given, events are only written locally");
            Ok(None)
        }
    }
}

#[cfg(not(feature = "open_search"))]
fn index_transport(config: &PipelineConfig) -> anyhow::Result<Option<Arc<dyn IndexTransport>>> {
    if config.index_uri.is_some() {
        tracing::warn!("Ignoring OPENSEARCH_URL as the 'open_search' feature is disabled");
    }
    Ok(None)
}

/// Step by step construction of a [`Pipeline`].
///
/// By default events are written to the debug and console sinks, tagged with the detected
/// machine name and the `development` environment.
pub struct PipelineBuilder {
    environment: String,
    machine_name: Option<String>,
    levels: LevelSwitch,
    request_options: RequestLoggingOptions,
    local_sinks: Vec<Arc<dyn Sink>>,
    index: Option<(Arc<dyn IndexTransport>, DeliveryOptions)>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        PipelineBuilder {
            environment: "development".to_string(),
            machine_name: resolve_machine_name(),
            levels: LevelSwitch::new(Level::Information),
            request_options: RequestLoggingOptions::default(),
            local_sinks: vec![
                Arc::new(DebugSink::new()) as Arc<dyn Sink>,
                Arc::new(ConsoleSink::stdout()) as Arc<dyn Sink>,
            ],
            index: None,
        }
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn machine_name(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = Some(machine_name.into());
        self
    }

    pub fn levels(mut self, levels: LevelSwitch) -> Self {
        self.levels = levels;
        self
    }

    pub fn request_options(mut self, options: RequestLoggingOptions) -> Self {
        self.request_options = options;
        self
    }

    /// Replaces the default local sinks (debug and console).
    pub fn local_sinks(mut self, sinks: Vec<Arc<dyn Sink>>) -> Self {
        self.local_sinks = sinks;
        self
    }

    /// Ships events to a remote index through the given transport.
    pub fn index(mut self, transport: Arc<dyn IndexTransport>, options: DeliveryOptions) -> Self {
        self.index = Some((transport, options));
        self
    }

    /// Wires everything up. Starts the delivery worker if an index was configured, which
    /// requires a running tokio runtime.
    pub fn build(self) -> Pipeline {
        let local = self
            .local_sinks
            .into_iter()
            .fold(SinkRouter::new(), SinkRouter::with_sink);

        let delivery = self.index.map(|(transport, options)| {
            IndexDeliveryClient::start(transport, options, local.clone())
        });

        let router = match &delivery {
            Some(client) => local.with_sink(Arc::new(IndexSink::new(client.clone()))),
            None => local,
        };

        let chain = EnricherChain::new()
            .with(ScopeEnricher)
            .with(MachineNameEnricher::new(self.machine_name))
            .with(PropertyEnricher::environment(self.environment))
            .with(CorrelationEnricher)
            .with(ExceptionDetailEnricher::default());

        let logger = Logger::new(chain, router, self.levels);
        let recorder = RequestCompletionRecorder::new(logger.clone(), self.request_options);

        Pipeline {
            logger,
            recorder,
            delivery,
        }
    }
}
