use crate::enrich::{EnrichmentContext, Enricher};
use crate::event::{EventRecord, ExceptionInfo, MAX_EXCEPTION_DEPTH, PropertyValue};
use std::collections::BTreeMap;

/// Property name holding the structured exception tree.
pub const EXCEPTION_DETAIL: &str = "ExceptionDetail";

/// Expands the exception of an event into a nested, serializable property.
///
/// Nested causes are followed up to `max_depth` levels, deeper causes are cut off and the
/// innermost emitted node is marked with `"Truncated": true`.
pub struct ExceptionDetailEnricher {
    max_depth: usize,
}

impl Default for ExceptionDetailEnricher {
    fn default() -> Self {
        ExceptionDetailEnricher {
            max_depth: MAX_EXCEPTION_DEPTH,
        }
    }
}

impl ExceptionDetailEnricher {
    pub fn with_max_depth(max_depth: usize) -> Self {
        ExceptionDetailEnricher {
            max_depth: max_depth.max(1),
        }
    }

    fn expand(&self, exception: &ExceptionInfo, depth: usize) -> PropertyValue {
        let mut node = BTreeMap::new();
        node.insert("Type".to_string(), exception.type_name.as_str().into());
        node.insert("Message".to_string(), exception.message.as_str().into());
        if !exception.stack_trace.is_empty() {
            node.insert(
                "StackTrace".to_string(),
                exception.stack_trace.clone().into(),
            );
        }

        if let Some(source) = &exception.source {
            if depth + 1 < self.max_depth {
                node.insert("InnerException".to_string(), self.expand(source, depth + 1));
            } else {
                node.insert("Truncated".to_string(), true.into());
            }
        }

        PropertyValue::Map(node)
    }
}

impl Enricher for ExceptionDetailEnricher {
    fn enrich(&self, record: &mut EventRecord, _context: &EnrichmentContext) {
        if let Some(exception) = &record.exception {
            let detail = self.expand(exception, 0);
            record.set_property(EXCEPTION_DETAIL, detail);
        }
    }
}
