use std::collections::HashMap;
use std::sync::Arc;

use crate::container::descriptor::{TypeKey, TypeSet};
use crate::container::qualifier::QualifierSet;
use crate::errors::CoreError;
use crate::events::observer::{NotifyMode, ObserverDefinition};

/// Observer methods indexed by observed event type
#[derive(Debug)]
pub struct ObserverRegistry {
    observers: Vec<Arc<ObserverDefinition>>,
    by_event_type: HashMap<TypeKey, Vec<usize>>,
    default_priority: i32,
}

impl ObserverRegistry {
    pub fn new(default_priority: i32) -> Self {
        Self {
            observers: Vec::new(),
            by_event_type: HashMap::new(),
            default_priority,
        }
    }

    pub fn register(
        &mut self,
        observer: ObserverDefinition,
    ) -> Result<Arc<ObserverDefinition>, CoreError> {
        if self.observers.iter().any(|o| o.id() == observer.id()) {
            return Err(CoreError::DuplicateObserver {
                id: observer.id().to_string(),
            });
        }

        let observer = Arc::new(observer);
        self.by_event_type
            .entry(observer.event_type())
            .or_default()
            .push(self.observers.len());
        self.observers.push(observer.clone());
        Ok(observer)
    }

    pub fn all(&self) -> &[Arc<ObserverDefinition>] {
        &self.observers
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Priority used for observers without one
    pub fn effective_priority(&self, observer: &ObserverDefinition) -> i32 {
        observer.priority().unwrap_or(self.default_priority)
    }

    /// Observers of `mode` notified by an event whose runtime type set is
    /// `event_types` fired with `qualifiers` (normalized). Any number may match;
    /// the result is in ascending priority, ties in registration order.
    pub fn resolve(
        &self,
        event_types: &TypeSet,
        qualifiers: &QualifierSet,
        mode: NotifyMode,
    ) -> Vec<Arc<ObserverDefinition>> {
        let mut indices: Vec<usize> = event_types
            .keys()
            .filter_map(|key| self.by_event_type.get(key))
            .flatten()
            .copied()
            .filter(|&i| {
                let observer = &self.observers[i];
                observer.mode() == mode && observer.matches_qualifiers(qualifiers)
            })
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices.sort_by_key(|&i| (self.effective_priority(&self.observers[i]), i));

        indices.into_iter().map(|i| self.observers[i].clone()).collect()
    }
}
