use std::collections::HashMap;
use std::sync::Arc;

use crate::container::descriptor::{BeanDefinition, BeanId, TypeKey};
use crate::errors::CoreError;

/// Registry of bean definitions, indexed by identifier and by bean type.
///
/// Populated once while the container is assembled and read-only afterwards,
/// so lookups need no locking.
#[derive(Debug, Default)]
pub struct BeanRegistry {
    beans: Vec<Arc<BeanDefinition>>,
    by_id: HashMap<BeanId, usize>,
    by_type: HashMap<TypeKey, Vec<usize>>,
}

impl BeanRegistry {
    /// Create a new bean registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bean definition; identifiers must be unique
    pub fn register(
        &mut self,
        definition: BeanDefinition,
    ) -> Result<Arc<BeanDefinition>, CoreError> {
        if self.by_id.contains_key(definition.id()) {
            return Err(CoreError::DuplicateBean {
                id: definition.id().to_string(),
            });
        }

        let definition = Arc::new(definition);
        let index = self.beans.len();
        self.by_id.insert(definition.id().clone(), index);
        for key in definition.types().keys() {
            self.by_type.entry(*key).or_default().push(index);
        }
        self.beans.push(definition.clone());

        Ok(definition)
    }

    /// All beans in registration order
    pub fn all_beans(&self) -> &[Arc<BeanDefinition>] {
        &self.beans
    }

    /// Beans whose type set contains `required`, in registration order
    pub fn beans_assignable_to(&self, required: &TypeKey) -> Vec<&Arc<BeanDefinition>> {
        self.by_type
            .get(required)
            .map(|indices| indices.iter().map(|&i| &self.beans[i]).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &BeanId) -> Option<&Arc<BeanDefinition>> {
        self.by_id.get(id).map(|&i| &self.beans[i])
    }

    pub fn contains(&self, id: &BeanId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.beans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }
}
