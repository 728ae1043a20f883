//! Enrichers attach contextual metadata to events before they are routed to the sinks.
//!
//! An [`EnricherChain`] applies its enrichers strictly in the order they were added, so a later
//! enricher can overwrite a property set by an earlier one. Enrichers never perform I/O: any
//! value which requires a lookup (like the machine name) is resolved once when the enricher is
//! created.

use crate::event::EventRecord;
use std::panic::{AssertUnwindSafe, catch_unwind};

pub mod correlation;
pub mod exception;
pub mod machine;
pub mod property;
pub mod scope;

pub use correlation::{CorrelationEnricher, TraceContext};
pub use exception::ExceptionDetailEnricher;
pub use machine::MachineNameEnricher;
pub use property::PropertyEnricher;
pub use scope::{ScopeEnricher, ScopeGuard, ScopeStack};

/// Per-event context handed to every enricher of a chain.
#[derive(Clone, Debug, Default)]
pub struct EnrichmentContext {
    /// The ambient scope of the operation which emitted the event.
    pub scope: Option<ScopeStack>,
    /// The active distributed trace, if any.
    pub trace: Option<TraceContext>,
}

impl EnrichmentContext {
    pub fn with_scope(mut self, scope: ScopeStack) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// A transformation adding or overwriting properties of an event.
pub trait Enricher: Send + Sync {
    fn enrich(&self, record: &mut EventRecord, context: &EnrichmentContext);
}

impl<F> Enricher for F
where
    F: Fn(&mut EventRecord, &EnrichmentContext) + Send + Sync,
{
    fn enrich(&self, record: &mut EventRecord, context: &EnrichmentContext) {
        self(record, context)
    }
}

/// An ordered sequence of enrichers.
#[derive(Default)]
pub struct EnricherChain {
    enrichers: Vec<Box<dyn Enricher>>,
}

impl EnricherChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an enricher to the end of the chain.
    pub fn with(mut self, enricher: impl Enricher + 'static) -> Self {
        self.push(enricher);
        self
    }

    pub fn push(&mut self, enricher: impl Enricher + 'static) {
        self.enrichers.push(Box::new(enricher));
    }

    pub fn len(&self) -> usize {
        self.enrichers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrichers.is_empty()
    }

    /// Runs all enrichers in order. A panicking enricher is skipped, the remaining ones still
    /// run on the record as left behind by their predecessors.
    pub fn apply(&self, record: &mut EventRecord, context: &EnrichmentContext) {
        for enricher in &self.enrichers {
            let _ = catch_unwind(AssertUnwindSafe(|| enricher.enrich(record, context)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Level, PropertyValue};

    struct PanickingEnricher;

    impl Enricher for PanickingEnricher {
        fn enrich(&self, _: &mut EventRecord, _: &EnrichmentContext) {
            panic!("broken enricher");
        }
    }

    fn tag(value: &'static str) -> impl Enricher {
        move |record: &mut EventRecord, _: &EnrichmentContext| record.set_property("Tag", value)
    }

    #[test]
    fn later_enrichers_win() {
        let chain = EnricherChain::new().with(tag("first")).with(tag("second"));
        let mut record = EventRecord::new(Level::Information, "test");
        chain.apply(&mut record, &EnrichmentContext::default());

        assert_eq!(record.property("Tag"), Some(&PropertyValue::from("second")));
    }

    #[test]
    fn each_enricher_sees_its_predecessors_output() {
        let chain = EnricherChain::new().with(tag("seen")).with(
            |record: &mut EventRecord, _: &EnrichmentContext| {
                let seen = record.property("Tag").cloned().unwrap_or(PropertyValue::Null);
                record.set_property("Copy", seen);
            },
        );
        let mut record = EventRecord::new(Level::Information, "test");
        chain.apply(&mut record, &EnrichmentContext::default());

        assert_eq!(record.property("Copy"), Some(&PropertyValue::from("seen")));
    }

    #[test]
    fn panicking_enricher_does_not_stop_the_chain() {
        let chain = EnricherChain::new()
            .with(PanickingEnricher)
            .with(tag("after"));
        let mut record = EventRecord::new(Level::Information, "test");
        chain.apply(&mut record, &EnrichmentContext::default());

        assert_eq!(record.property("Tag"), Some(&PropertyValue::from("after")));
    }

    #[test]
    fn applying_twice_changes_nothing() {
        let scope = ScopeStack::new();
        let _guard = scope.push_property("RequestId", "abc");
        let context = EnrichmentContext::default().with_scope(scope);
        let chain = EnricherChain::new()
            .with(ScopeEnricher)
            .with(MachineNameEnricher::new(Some("host-1".to_string())))
            .with(PropertyEnricher::environment("staging"));

        let mut once = EventRecord::new(Level::Information, "test");
        chain.apply(&mut once, &context);
        let mut twice = once.clone();
        chain.apply(&mut twice, &context);

        assert_eq!(once, twice);
    }
}
