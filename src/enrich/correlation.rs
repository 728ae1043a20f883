//! Correlation of events with distributed traces.
//!
//! A [`TraceContext`] is taken from an incoming W3C `traceparent` header or started fresh for
//! each request. The [`CorrelationEnricher`] copies its identifiers onto every event emitted
//! while the trace is active.

use crate::enrich::{EnrichmentContext, Enricher};
use crate::event::EventRecord;
use crate::tools::id_generator::generate_hex_id;

/// Property name of the trace identifier.
pub const TRACE_ID: &str = "TraceId";

/// Property name of the transaction (request level span) identifier.
pub const TRANSACTION_ID: &str = "TransactionId";

/// Name of the W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

const TRACE_ID_LENGTH: usize = 32;
const SPAN_ID_LENGTH: usize = 16;

/// Identifiers of the distributed trace an operation participates in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub transaction_id: String,
    pub parent_id: Option<String>,
    pub sampled: bool,
}

impl TraceContext {
    /// Starts a new trace with this operation as its root transaction.
    pub fn new_root() -> Self {
        TraceContext {
            trace_id: generate_hex_id(TRACE_ID_LENGTH),
            transaction_id: generate_hex_id(SPAN_ID_LENGTH),
            parent_id: None,
            sampled: true,
        }
    }

    /// Continues the trace announced by a `traceparent` header with a new transaction.
    ///
    /// Returns `None` for malformed headers as well as for the all-zero ids which the W3C
    /// specification declares invalid.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let parent_id = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || version == "ff" || !is_hex(version) {
            return None;
        }
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if !is_valid_id(trace_id, TRACE_ID_LENGTH)
            || !is_valid_id(parent_id, SPAN_ID_LENGTH)
            || flags.len() != 2
            || !is_hex(flags)
        {
            return None;
        }

        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(TraceContext {
            trace_id: trace_id.to_ascii_lowercase(),
            transaction_id: generate_hex_id(SPAN_ID_LENGTH),
            parent_id: Some(parent_id.to_ascii_lowercase()),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// Renders the header to propagate this transaction to downstream calls.
    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{}-{}-{}",
            self.trace_id,
            self.transaction_id,
            if self.sampled { "01" } else { "00" }
        )
    }
}

fn is_hex(value: &str) -> bool {
    value.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_valid_id(value: &str, length: usize) -> bool {
    value.len() == length && is_hex(value) && value.chars().any(|c| c != '0')
}

/// Adds `TraceId` and `TransactionId` when a trace is active.
pub struct CorrelationEnricher;

impl Enricher for CorrelationEnricher {
    fn enrich(&self, record: &mut EventRecord, context: &EnrichmentContext) {
        if let Some(trace) = &context.trace {
            record.set_property(TRACE_ID, trace.trace_id.as_str());
            record.set_property(TRANSACTION_ID, trace.transaction_id.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Level, PropertyValue};

    const HEADER: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn parses_a_valid_traceparent() {
        let trace = TraceContext::from_traceparent(HEADER).unwrap();

        assert_eq!(trace.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(trace.parent_id.as_deref(), Some("00f067aa0ba902b7"));
        assert_eq!(trace.transaction_id.len(), 16);
        assert_ne!(trace.transaction_id, "00f067aa0ba902b7");
        assert!(trace.sampled);
    }

    #[test]
    fn rejects_malformed_traceparents() {
        assert!(TraceContext::from_traceparent("").is_none());
        assert!(TraceContext::from_traceparent("00-abc-def-01").is_none());
        assert!(
            TraceContext::from_traceparent("00-00000000000000000000000000000000-00f067aa0ba902b7-01")
                .is_none()
        );
        assert!(
            TraceContext::from_traceparent("ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
                .is_none()
        );
    }

    #[test]
    fn propagates_the_trace_with_its_own_transaction() {
        let trace = TraceContext::from_traceparent(HEADER).unwrap();
        let header = trace.to_traceparent();

        assert!(header.starts_with("00-4bf92f3577b34da6a3ce929d0e0e4736-"));
        assert!(header.ends_with(&format!("{}-01", trace.transaction_id)));
    }

    #[test]
    fn enriches_only_with_an_active_trace() {
        let trace = TraceContext::new_root();
        let mut traced = EventRecord::new(Level::Information, "test");
        CorrelationEnricher.enrich(
            &mut traced,
            &EnrichmentContext::default().with_trace(trace.clone()),
        );
        let mut untraced = EventRecord::new(Level::Information, "test");
        CorrelationEnricher.enrich(&mut untraced, &EnrichmentContext::default());

        assert_eq!(
            traced.property(TRACE_ID),
            Some(&PropertyValue::from(trace.trace_id.as_str()))
        );
        assert_eq!(
            traced.property(TRANSACTION_ID),
            Some(&PropertyValue::from(trace.transaction_id.as_str()))
        );
        assert!(untraced.properties.is_empty());
    }
}
