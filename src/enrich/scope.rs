//! Ambient scopes: stacks of key/value pairs owned by a logical operation (usually a request).
//!
//! A [`ScopeStack`] is created by whoever owns the operation and handed to the code running
//! within it, e.g. through request extensions. Frames are pushed with [`ScopeStack::push`] and
//! removed again when the returned [`ScopeGuard`] is dropped, so a frame never outlives the
//! code which created it, no matter whether that code succeeded, failed or was cancelled.

use crate::enrich::{EnrichmentContext, Enricher};
use crate::event::{EventRecord, PropertyValue};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

struct Frame {
    id: u64,
    properties: Vec<(String, PropertyValue)>,
}

#[derive(Default)]
struct Frames {
    frames: Vec<Frame>,
    next_id: u64,
}

impl Frames {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A shareable handle on the scope stack of one logical operation.
#[derive(Clone, Default)]
pub struct ScopeStack {
    inner: Arc<Mutex<Frames>>,
}

impl Debug for ScopeStack {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeStack")
            .field("depth", &self.depth())
            .finish()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Frames> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pushes a new innermost frame holding the given properties.
    pub fn push<K, V>(&self, properties: impl IntoIterator<Item = (K, V)>) -> ScopeGuard
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let properties = properties
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();

        let mut frames = self.lock();
        let id = frames.allocate_id();
        frames.frames.push(Frame { id, properties });

        ScopeGuard {
            stack: self.clone(),
            id,
        }
    }

    /// Pushes a frame holding a single property.
    pub fn push_property(
        &self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> ScopeGuard {
        self.push([(name.into(), value.into())])
    }

    /// Removes the innermost frame. Popping an empty stack does nothing.
    pub fn pop(&self) {
        let _ = self.lock().frames.pop();
    }

    /// Sets a property on the innermost frame, creating a root frame if the stack is empty.
    ///
    /// A frame created this way lives until it is popped explicitly.
    pub fn set(&self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        let name = name.into();
        let value = value.into();

        let mut frames = self.lock();
        if frames.frames.is_empty() {
            let id = frames.allocate_id();
            frames.frames.push(Frame {
                id,
                properties: Vec::new(),
            });
        }

        if let Some(frame) = frames.frames.last_mut() {
            frame.properties.retain(|(existing, _)| existing != &name);
            frame.properties.push((name, value));
        }
    }

    /// Returns the number of active frames.
    pub fn depth(&self) -> usize {
        self.lock().frames.len()
    }

    /// Collapses all frames into a single map. Inner frames win over outer ones.
    pub fn snapshot(&self) -> HashMap<String, PropertyValue> {
        let frames = self.lock();
        let mut result = HashMap::new();
        for frame in &frames.frames {
            for (name, value) in &frame.properties {
                result.insert(name.clone(), value.clone());
            }
        }

        result
    }

    /// Runs the given future with an additional frame which is removed once the future
    /// completes or is dropped.
    pub async fn scoped<K, V, F>(
        &self,
        properties: impl IntoIterator<Item = (K, V)>,
        future: F,
    ) -> F::Output
    where
        K: Into<String>,
        V: Into<PropertyValue>,
        F: Future,
    {
        let _guard = self.push(properties);
        future.await
    }

    fn remove_from(&self, id: u64) {
        let mut frames = self.lock();
        if let Some(position) = frames.frames.iter().position(|frame| frame.id == id) {
            frames.frames.truncate(position);
        }
    }
}

/// Removes its frame (and anything pushed on top of it) when dropped.
#[must_use = "the scope is removed as soon as the guard is dropped"]
pub struct ScopeGuard {
    stack: ScopeStack,
    id: u64,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.stack.remove_from(self.id);
    }
}

/// Merges the ambient scope into the event.
///
/// Properties bound by the log statement itself are never replaced by scope values.
pub struct ScopeEnricher;

impl Enricher for ScopeEnricher {
    fn enrich(&self, record: &mut EventRecord, context: &EnrichmentContext) {
        if let Some(scope) = &context.scope {
            for (name, value) in scope.snapshot() {
                record.add_property_if_absent(name, value);
            }
        }
    }
}
