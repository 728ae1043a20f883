//! Minimum level filtering with per-source overrides.

use crate::event::Level;
use arc_swap::ArcSwap;
use std::sync::Arc;

#[derive(Clone, Debug)]
struct LevelRules {
    minimum: Level,
    // Sorted by descending prefix length so that the most specific source matches first.
    overrides: Vec<(String, Level)>,
}

impl LevelRules {
    fn level_for(&self, source: Option<&str>) -> Level {
        source
            .and_then(|source| {
                self.overrides
                    .iter()
                    .find(|(prefix, _)| matches_source(source, prefix))
            })
            .map(|(_, level)| *level)
            .unwrap_or(self.minimum)
    }
}

fn matches_source(source: &str, prefix: &str) -> bool {
    source == prefix
        || source
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with("::") || rest.starts_with('.'))
}

/// Decides which events are let into the pipeline.
///
/// The switch is shared by all clones and may be adjusted while the pipeline is running.
#[derive(Clone, Debug)]
pub struct LevelSwitch {
    rules: Arc<ArcSwap<LevelRules>>,
}

impl LevelSwitch {
    pub fn new(minimum: Level) -> Self {
        LevelSwitch {
            rules: Arc::new(ArcSwap::from_pointee(LevelRules {
                minimum,
                overrides: Vec::new(),
            })),
        }
    }

    /// Adds or replaces the minimum level for a source and everything below it.
    ///
    /// Sources are matched on `::` or `.` boundaries, so an override for `hyper` applies to
    /// `hyper::proto` but not to `hyperlocal`.
    pub fn with_override(self, source: impl Into<String>, level: Level) -> Self {
        self.set_override(source, level);
        self
    }

    pub fn set_override(&self, source: impl Into<String>, level: Level) {
        let source = source.into();
        self.rules.rcu(|rules| {
            let mut rules = LevelRules::clone(rules);
            rules.overrides.retain(|(prefix, _)| prefix != &source);
            rules.overrides.push((source.clone(), level));
            rules
                .overrides
                .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
            rules
        });
    }

    pub fn set_minimum(&self, minimum: Level) {
        self.rules.rcu(|rules| LevelRules {
            minimum,
            overrides: rules.overrides.clone(),
        });
    }

    pub fn minimum(&self) -> Level {
        self.rules.load().minimum
    }

    /// Returns the effective minimum level for the given source.
    pub fn level_for(&self, source: Option<&str>) -> Level {
        self.rules.load().level_for(source)
    }

    pub fn is_enabled(&self, level: Level, source: Option<&str>) -> bool {
        level >= self.level_for(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_below_the_minimum() {
        let switch = LevelSwitch::new(Level::Information);

        assert!(!switch.is_enabled(Level::Debug, None));
        assert!(switch.is_enabled(Level::Information, None));
        assert!(switch.is_enabled(Level::Fatal, Some("app")));
    }

    #[test]
    fn most_specific_override_wins() {
        let switch = LevelSwitch::new(Level::Information)
            .with_override("hyper", Level::Warning)
            .with_override("hyper::proto", Level::Error);

        assert!(!switch.is_enabled(Level::Information, Some("hyper::client")));
        assert!(switch.is_enabled(Level::Warning, Some("hyper::client")));
        assert!(!switch.is_enabled(Level::Warning, Some("hyper::proto::h1")));
        assert!(switch.is_enabled(Level::Information, Some("hyperlocal")));
    }

    #[test]
    fn changes_are_visible_to_all_clones() {
        let switch = LevelSwitch::new(Level::Information);
        let clone = switch.clone();
        switch.set_minimum(Level::Debug);

        assert_eq!(clone.minimum(), Level::Debug);
        assert!(clone.is_enabled(Level::Debug, None));
    }
}
