use crate::enrich::{EnrichmentContext, Enricher};
use crate::event::EventRecord;
use std::env;

/// Property name of the host identity.
pub const MACHINE_NAME: &str = "MachineName";

/// Tags every event with the name of the host it was produced on.
///
/// The name is resolved once on creation. If it cannot be determined, events are passed on
/// without the property.
pub struct MachineNameEnricher {
    machine_name: Option<String>,
}

impl MachineNameEnricher {
    pub fn new(machine_name: Option<String>) -> Self {
        MachineNameEnricher { machine_name }
    }

    pub fn detect() -> Self {
        Self::new(resolve_machine_name())
    }

    pub fn machine_name(&self) -> Option<&str> {
        self.machine_name.as_deref()
    }
}

impl Enricher for MachineNameEnricher {
    fn enrich(&self, record: &mut EventRecord, _context: &EnrichmentContext) {
        if let Some(name) = &self.machine_name {
            record.set_property(MACHINE_NAME, name.as_str());
        }
    }
}

/// Determines the host name from `HOSTNAME`, `COMPUTERNAME` or the operating system.
pub fn resolve_machine_name() -> Option<String> {
    for variable in ["HOSTNAME", "COMPUTERNAME"] {
        if let Ok(name) = env::var(variable)
            && !name.trim().is_empty()
        {
            return Some(name.trim().to_string());
        }
    }

    match nix::unistd::gethostname() {
        Ok(name) => name
            .into_string()
            .ok()
            .filter(|name| !name.is_empty()),
        Err(err) => {
            tracing::debug!("Failed to determine the host name: {}", err);
            None
        }
    }
}
