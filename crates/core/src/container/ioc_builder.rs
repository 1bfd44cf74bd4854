use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ContainerConfig;
use crate::container::descriptor::{BeanDefinition, BeanId, TypeKey, TypeSet};
use crate::container::instance::InstanceManager;
use crate::container::ioc_container::Container;
use crate::container::provider::ResourceProvider;
use crate::container::registry::BeanRegistry;
use crate::container::validation::GraphValidator;
use crate::errors::{CoreError, ValidationError};
use crate::events::dispatcher::EventDispatcher;
use crate::events::observer::{
    ObserverDefinition, ObserverId, ObserverTransformation, ObserverTransformer,
};
use crate::events::registry::ObserverRegistry;

/// Collects bean and observer definitions, then validates the whole graph
/// once and produces a running [`Container`].
///
/// Registration only exists here; `build` consumes the builder.
pub struct ContainerBuilder {
    config: ContainerConfig,
    beans: Vec<BeanDefinition>,
    observers: Vec<ObserverDefinition>,
    transformers: Vec<Arc<dyn ObserverTransformer>>,
    providers: Vec<Arc<dyn ResourceProvider>>,
    event_types: HashMap<TypeKey, TypeSet>,
}

impl ContainerBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        Self {
            config,
            beans: Vec::new(),
            observers: Vec::new(),
            transformers: Vec::new(),
            providers: Vec::new(),
            event_types: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn register_bean(&mut self, bean: BeanDefinition) -> &mut Self {
        debug!(
            target: "beanstalk::container",
            bean = %bean.id(),
            scope = %bean.scope(),
            "Bean registered"
        );
        self.beans.push(bean);
        self
    }

    pub fn register_observer(&mut self, observer: ObserverDefinition) -> &mut Self {
        debug!(target: "beanstalk::container", observer = %observer.id(), "Observer registered");
        self.observers.push(observer);
        self
    }

    /// Add a transformer applied to every observer when the container is built
    pub fn register_annotation_transformer(
        &mut self,
        transformer: Arc<dyn ObserverTransformer>,
    ) -> &mut Self {
        self.transformers.push(transformer);
        self
    }

    /// Add a provider consulted before bean resolution for every injection point
    pub fn register_resource_provider(&mut self, provider: Arc<dyn ResourceProvider>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    /// Declare the supertypes of an event class so that firing it also
    /// notifies observers of those types
    pub fn event_types(&mut self, types: TypeSet) -> &mut Self {
        self.event_types.insert(types.implementation(), types);
        self
    }

    /// Drop every registered bean with this id
    pub fn remove_bean(&mut self, id: &BeanId) -> &mut Self {
        self.beans.retain(|b| b.id() != id);
        self
    }

    pub fn remove_observer(&mut self, id: &ObserverId) -> &mut Self {
        self.observers.retain(|o| o.id() != id);
        self
    }

    pub fn bean_count(&self) -> usize {
        self.beans.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Validate the registered definitions and start the container.
    ///
    /// Every structural problem is reported together in one
    /// [`CoreError::Deployment`].
    pub fn build(self) -> Result<Container, CoreError> {
        self.config.validate()?;

        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        let mut registry = BeanRegistry::new();
        for bean in self.beans {
            if !seen.insert(bean.id().clone()) {
                errors.push(ValidationError::DuplicateBeanId {
                    id: bean.id().to_string(),
                });
                continue;
            }
            registry.register(bean)?;
        }

        let mut observers = ObserverRegistry::new(self.config.default_observer_priority);
        let mut seen_observers = HashSet::new();
        for mut observer in self.observers {
            if !seen_observers.insert(observer.id().clone()) {
                errors.push(ValidationError::DuplicateObserverId {
                    id: observer.id().to_string(),
                });
                continue;
            }
            if !apply_transformers(&self.transformers, &mut observer) {
                debug!(
                    target: "beanstalk::container",
                    observer = %observer.id(),
                    "Observer vetoed"
                );
                continue;
            }
            observers.register(observer)?;
        }

        let report = match GraphValidator::new(&registry)
            .with_observers(observers.all())
            .with_providers(&self.providers)
            .validate()
        {
            Ok(report) if errors.is_empty() => report,
            Ok(_) => return Err(CoreError::Deployment { errors }),
            Err(CoreError::Deployment { errors: found }) => {
                errors.extend(found);
                return Err(CoreError::Deployment { errors });
            }
            Err(e) => return Err(e),
        };

        let id = Uuid::new_v4();
        let registry = Arc::new(registry);
        let observers = Arc::new(observers);
        let manager = InstanceManager::new(id, registry.clone(), Arc::new(report));
        let dispatcher = EventDispatcher::new(
            observers,
            self.event_types,
            manager.clone(),
            self.config.async_workers,
        );

        if self.config.eager_singletons {
            manager.instantiate_eagerly()?;
        }

        info!(
            target: "beanstalk::container",
            container = %id,
            environment = %self.config.environment,
            beans = registry.len(),
            observers = dispatcher.observers().len(),
            "Container started"
        );
        Ok(Container::new(id, self.config, manager, dispatcher))
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("beans", &self.beans.len())
            .field("observers", &self.observers.len())
            .field("transformers", &self.transformers.len())
            .field("providers", &self.providers.len())
            .finish()
    }
}

/// Returns false when a transformer vetoed the observer
fn apply_transformers(
    transformers: &[Arc<dyn ObserverTransformer>],
    observer: &mut ObserverDefinition,
) -> bool {
    for transformer in transformers {
        if !transformer.applies_to(observer) {
            continue;
        }
        let mut transformation = ObserverTransformation::new(observer);
        transformer.transform(&mut transformation);
        if transformation.is_vetoed() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::qualifier::Qualifier;
    use crate::container::scope::BeanScope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Greeter;
    struct Audit;

    fn greeter(id: &str) -> BeanDefinition {
        BeanDefinition::builder::<Greeter>(id)
            .singleton()
            .factory(|_| Ok(Greeter))
            .build()
            .unwrap()
    }

    struct Blue;

    impl ObserverTransformer for Blue {
        fn transform(&self, observer: &mut ObserverTransformation<'_>) {
            observer.set_qualifiers([Qualifier::new("Blue")]);
        }
    }

    struct VetoAudit;

    impl ObserverTransformer for VetoAudit {
        fn applies_to(&self, observer: &ObserverDefinition) -> bool {
            observer.id().as_str().starts_with("audit")
        }

        fn transform(&self, observer: &mut ObserverTransformation<'_>) {
            observer.veto();
        }
    }

    #[test]
    fn test_builder_chaining() {
        let mut builder = ContainerBuilder::with_config(ContainerConfig::testing());
        builder
            .register_bean(greeter("greeter"))
            .register_bean(
                BeanDefinition::builder::<Audit>("audit")
                    .factory(|_| Ok(Audit))
                    .build()
                    .unwrap(),
            )
            .remove_bean(&BeanId::new("audit"));

        assert_eq!(builder.bean_count(), 1);
        let container = builder.build().unwrap();
        assert!(container.registry().contains(&BeanId::new("greeter")));
    }

    #[test]
    fn test_duplicate_ids_are_aggregated_with_graph_errors() {
        let observer = || {
            ObserverDefinition::builder::<String>("greeting")
                .notify(|_, _| Ok(()))
                .build()
                .unwrap()
        };
        let mut builder = ContainerBuilder::new();
        builder
            .register_bean(greeter("greeter"))
            .register_bean(greeter("greeter"))
            .register_observer(observer())
            .register_observer(observer())
            .register_bean(
                BeanDefinition::builder::<Audit>("audit")
                    .scope(BeanScope::Dependent)
                    .inject::<String>([])
                    .factory(|_| Ok(Audit))
                    .build()
                    .unwrap(),
            );

        let error = builder.build().unwrap_err();
        let problems = error.validation_errors();
        assert_eq!(problems.len(), 3);
        assert!(matches!(problems[0], ValidationError::DuplicateBeanId { .. }));
        assert!(
            matches!(&problems[1], ValidationError::DuplicateObserverId { id } if id == "greeting")
        );
        assert!(problems[2].is_unsatisfied());
    }

    #[test]
    fn test_transformers_rewrite_and_veto() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut builder = ContainerBuilder::new();
        for id in ["listener", "audit-listener"] {
            let hits = hits.clone();
            builder.register_observer(
                ObserverDefinition::builder::<String>(id)
                    .notify(move |_, _| {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            );
        }
        builder
            .register_annotation_transformer(Arc::new(VetoAudit))
            .register_annotation_transformer(Arc::new(Blue));

        let container = builder.build().unwrap();
        assert_eq!(container.observers().len(), 1);

        container.fire("plain".to_string(), []).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        container.fire("blue".to_string(), [Qualifier::new("Blue")]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ContainerConfig {
            async_workers: 0,
            ..ContainerConfig::default()
        };
        let error = ContainerBuilder::with_config(config).build().unwrap_err();
        assert!(matches!(error, CoreError::Configuration(_)));
    }
}
