//! Delivery targets for enriched events.
//!
//! The [`SinkRouter`] hands every event to all of its sinks. Sinks are isolated from each other:
//! an error or panic in one sink is reported as a self-diagnostic event to the remaining sinks
//! and never reaches the code which emitted the event.

use crate::event::{EventRecord, Level, PropertyValue, template};
use std::fmt::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

pub mod console;
pub mod debug;
pub mod index;

pub use console::ConsoleSink;
pub use debug::DebugSink;
pub use index::IndexSink;

/// A delivery target for events.
///
/// `emit` is called on the thread which produced the event and must not block on remote I/O.
pub trait Sink: Send + Sync {
    /// A short name used in diagnostics.
    fn name(&self) -> &str;

    fn emit(&self, record: &EventRecord) -> anyhow::Result<()>;
}

/// Fans events out to a fixed set of sinks.
#[derive(Clone, Default)]
pub struct SinkRouter {
    sinks: Vec<Arc<dyn Sink>>,
}

impl SinkRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Delivers the event to every sink and returns the number of sinks which accepted it.
    pub fn route(&self, record: &EventRecord) -> usize {
        let mut failed = Vec::new();
        for (index, sink) in self.sinks.iter().enumerate() {
            if let Err(reason) = emit_isolated(sink.as_ref(), record) {
                failed.push((index, reason));
            }
        }

        if failed.is_empty() {
            return self.sinks.len();
        }

        // Diagnostics about diagnostics would only fail again, so they are dropped.
        if !record.is_diagnostic() {
            for (index, reason) in &failed {
                let diagnostic = EventRecord::diagnostic(
                    Level::Error,
                    "Sink {SinkName} failed to emit an event: {Reason}",
                )
                .with_property("SinkName", self.sinks[*index].name())
                .with_property("Reason", reason.as_str());

                for (other, sink) in self.sinks.iter().enumerate() {
                    if failed.iter().all(|(failed_index, _)| *failed_index != other) {
                        let _ = emit_isolated(sink.as_ref(), &diagnostic);
                    }
                }
            }
        }

        self.sinks.len() - failed.len()
    }
}

fn emit_isolated(sink: &dyn Sink, record: &EventRecord) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| sink.emit(record))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{:#}", err)),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Renders an event as a single human-readable line (plus exception lines).
///
/// Format: `[HH:MM:SS LVL] message {Extra=Value, ...}` where the trailing map lists the
/// properties which are not referenced by the message template.
pub fn render_text(record: &EventRecord) -> String {
    let mut line = format!(
        "[{} {}] ",
        record.timestamp.format("%H:%M:%S"),
        record.level.abbreviation()
    );
    render_body(&mut line, record);
    line
}

/// Renders message, extra properties and exception of an event (everything after the level).
pub(crate) fn render_body(out: &mut String, record: &EventRecord) {
    out.push_str(&record.render_message());

    let referenced = template::property_names(&record.message_template);
    let mut extra: Vec<(&String, &PropertyValue)> = record
        .properties
        .iter()
        .filter(|(name, _)| !referenced.contains(&name.as_str()))
        .collect();
    extra.sort_by(|(a, _), (b, _)| a.cmp(b));

    if !extra.is_empty() {
        out.push_str(" {");
        for (index, (name, value)) in extra.into_iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}={}", name, value);
        }
        out.push('}');
    }

    if let Some(exception) = &record.exception {
        for (depth, cause) in exception.chain().enumerate() {
            let prefix = if depth == 0 { "" } else { "---> " };
            let _ = write!(out, "\n{}{}", prefix, cause);
            for frame in &cause.stack_trace {
                let _ = write!(out, "\n   {}", frame);
            }
        }
    }
}
