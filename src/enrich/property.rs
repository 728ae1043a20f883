use crate::enrich::{EnrichmentContext, Enricher};
use crate::event::{EventRecord, PropertyValue};

/// Property name of the deployment environment label.
pub const ENVIRONMENT: &str = "Environment";

/// Sets a fixed property on every event.
pub struct PropertyEnricher {
    name: String,
    value: PropertyValue,
}

impl PropertyEnricher {
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        PropertyEnricher {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Tags every event with the given deployment environment.
    pub fn environment(label: impl Into<String>) -> Self {
        Self::new(ENVIRONMENT, label.into())
    }
}

impl Enricher for PropertyEnricher {
    fn enrich(&self, record: &mut EventRecord, _context: &EnrichmentContext) {
        record.set_property(self.name.clone(), self.value.clone());
    }
}
