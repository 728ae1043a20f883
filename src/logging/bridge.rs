//! Routes `tracing` events into a [`Logger`].
//!
//! The message of an event becomes its message template, so holes have to be escaped in the
//! format string: `tracing::info!(count = 3, "Fetched {{count}} items")`. All other fields become
//! properties. Fields of the enclosing spans are added as well, unless the event or an inner
//! span already provides a value of the same name.

use crate::event::{EventRecord, ExceptionInfo, Level, PropertyValue, SOURCE_CONTEXT};
use crate::logging::Logger;
use std::fmt::Debug;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Targets whose events must not enter the pipeline, as they are emitted while delivering it.
const INTERNAL_TARGETS: &[&str] = &[
    "wasabi_logship",
    "opensearch",
    "reqwest",
    "hyper",
    "h2",
    "rustls",
    "tokio",
    "mio",
    "tower",
    "warp",
];

pub fn is_internal_target(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

#[derive(Default)]
struct SpanFields(Vec<(String, PropertyValue)>);

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    properties: Vec<(String, PropertyValue)>,
    exception: Option<ExceptionInfo>,
}

impl FieldCollector {
    fn store(&mut self, field: &Field, value: PropertyValue) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                PropertyValue::String(message) => message,
                other => other.to_string(),
            });
        } else if !name.starts_with("log.") {
            self.properties.retain(|(existing, _)| existing != name);
            self.properties.push((name.to_string(), value));
        }
    }
}

impl Visit for FieldCollector {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.store(field, PropertyValue::Float(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.store(field, PropertyValue::Integer(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.store(field, PropertyValue::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.store(field, PropertyValue::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, PropertyValue::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.exception = Some(ExceptionInfo::from_error(value));
        self.store(field, PropertyValue::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.store(field, PropertyValue::String(format!("{:?}", value)));
    }
}

/// A [`Layer`] which writes every (non internal) `tracing` event into a [`Logger`].
pub struct PipelineLayer {
    logger: Logger,
}

impl PipelineLayer {
    pub fn new(logger: Logger) -> Self {
        PipelineLayer { logger }
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut fields = FieldCollector::default();
        attrs.record(&mut fields);
        span.extensions_mut().insert(SpanFields(fields.properties));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut fields = FieldCollector::default();
        values.record(&mut fields);

        let mut extensions = span.extensions_mut();
        if let Some(SpanFields(existing)) = extensions.get_mut::<SpanFields>() {
            for (name, value) in fields.properties {
                existing.retain(|(other, _)| other != &name);
                existing.push((name, value));
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal_target(metadata.target()) {
            return;
        }

        let level = Level::from(*metadata.level());
        if !self.logger.is_enabled(level, Some(metadata.target())) {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let mut record = EventRecord::new(level, fields.message.unwrap_or_default());
        for (name, value) in fields.properties {
            record.set_property(name, value);
        }
        record.exception = fields.exception;
        record.add_property_if_absent(SOURCE_CONTEXT, metadata.target());

        // Innermost span first, so that inner values shadow outer ones.
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(SpanFields(properties)) = span.extensions().get::<SpanFields>() {
                    for (name, value) in properties {
                        record.add_property_if_absent(name.as_str(), value.clone());
                    }
                }
            }
        }

        self.logger.write(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::EnricherChain;
    use crate::logging::LevelSwitch;
    use crate::sink::SinkRouter;
    use crate::sink::testing::MemorySink;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn capture(minimum: Level, body: impl FnOnce()) -> Vec<EventRecord> {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::new(
            EnricherChain::new(),
            SinkRouter::new().with_sink(sink.clone()),
            LevelSwitch::new(minimum),
        );
        let subscriber = Registry::default().with(PipelineLayer::new(logger));
        tracing::subscriber::with_default(subscriber, body);
        sink.records()
    }

    #[test]
    fn fields_become_properties() {
        let records = capture(Level::Debug, || {
            tracing::info!(target: "shop::orders", count = 3, customer = "acme", "Fetched {{count}} items");
        });

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, Level::Information);
        assert_eq!(record.message_template, "Fetched {count} items");
        assert_eq!(record.render_message(), "Fetched 3 items");
        assert_eq!(record.property("customer"), Some(&PropertyValue::from("acme")));
        assert_eq!(record.source_context(), Some("shop::orders"));
    }

    #[test]
    fn span_fields_are_merged_innermost_first() {
        let records = capture(Level::Debug, || {
            let outer = tracing::info_span!(target: "shop", "request", tenant = "outer", request_id = 7);
            let _outer = outer.enter();
            let inner = tracing::info_span!(target: "shop", "handler", tenant = "inner");
            let _inner = inner.enter();

            tracing::warn!(target: "shop::cart", "Cart is empty");
            tracing::warn!(target: "shop::cart", tenant = "explicit", "Cart is full");
        });

        assert_eq!(records[0].property("tenant"), Some(&PropertyValue::from("inner")));
        assert_eq!(records[0].property("request_id"), Some(&PropertyValue::Integer(7)));
        assert_eq!(records[1].property("tenant"), Some(&PropertyValue::from("explicit")));
    }

    #[test]
    fn internal_and_disabled_events_are_skipped() {
        let records = capture(Level::Information, || {
            tracing::info!(target: "hyper::proto::h1", "parsed headers");
            tracing::info!(target: "wasabi_logship::index", "flushing");
            tracing::debug!(target: "shop", "too verbose");
            tracing::info!(target: "hyperlocal", "kept");
        });

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].render_message(), "kept");
    }

    #[test]
    fn errors_are_captured_as_exceptions() {
        let records = capture(Level::Debug, || {
            let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
            tracing::error!(target: "shop", error = &err as &(dyn std::error::Error + 'static), "Upstream failed");
        });

        let exception = records[0].exception.as_ref().unwrap();
        assert_eq!(exception.message, "reset by peer");
    }
}
