use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ContainerConfig;
use crate::container::descriptor::{BeanId, TypeKey};
use crate::container::instance::{Handle, InstanceManager};
use crate::container::qualifier::{Qualifier, QualifierSet};
use crate::container::registry::BeanRegistry;
use crate::container::resolver::Resolver;
use crate::container::scope::{ContextKey, ScopeKind};
use crate::container::validation::ValidationReport;
use crate::errors::CoreError;
use crate::events::dispatcher::{CompletionHandle, EventDispatcher};
use crate::events::registry::ObserverRegistry;

struct ContainerInner {
    id: Uuid,
    config: ContainerConfig,
    manager: Arc<InstanceManager>,
    dispatcher: EventDispatcher,
}

impl ContainerInner {
    fn shutdown(&self) -> Result<(), CoreError> {
        if self.manager.is_shut_down() {
            return Ok(());
        }
        self.manager.shutdown()?;
        info!(target: "beanstalk::container", container = %self.id, "Container shut down");
        Ok(())
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(
                target: "beanstalk::container",
                container = %self.id,
                error = %e,
                "Shutdown on drop failed"
            );
        }
    }
}

/// A validated, running container.
///
/// Cloning is cheap; every clone refers to the same beans and contexts.
/// The container shuts down when `shutdown` is called or the last clone
/// is dropped.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub(crate) fn new(
        id: Uuid,
        config: ContainerConfig,
        manager: Arc<InstanceManager>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                id,
                config,
                manager,
                dispatcher,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &BeanRegistry {
        self.inner.manager.registry()
    }

    pub fn report(&self) -> &ValidationReport {
        self.inner.manager.report()
    }

    pub fn observers(&self) -> &ObserverRegistry {
        self.inner.dispatcher.observers()
    }

    /// Validated dependency graph as pretty-printed JSON
    pub fn dependency_graph_json(&self) -> Result<String, CoreError> {
        self.report().to_json(self.registry())
    }

    /// Look up the unique bean of type `T` with `qualifiers`.
    ///
    /// No qualifiers means `@Default`. Ambiguous or unsatisfied lookups fail
    /// here rather than at startup, since programmatic lookups are not part of
    /// the validated graph.
    pub fn instance<T: ?Sized + Send + Sync + 'static>(
        &self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<Handle<T>, CoreError> {
        self.inner.manager.instance::<T>(qualifiers)
    }

    /// Shorthand for `instance(..)` followed by `get()`
    pub fn get<T: ?Sized + Send + Sync + 'static>(
        &self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<Arc<T>, CoreError> {
        self.instance::<T>(qualifiers)?.get()
    }

    /// Obtain a specific bean by id, viewed as `T`
    pub fn obtain<T: ?Sized + Send + Sync + 'static>(
        &self,
        bean: &BeanId,
    ) -> Result<Handle<T>, CoreError> {
        let definition = self
            .registry()
            .get(bean)
            .ok_or_else(|| CoreError::UnsatisfiedResolution {
                required_type: std::any::type_name::<T>().to_string(),
                qualifiers: format!("bean id '{}'", bean),
            })?;
        self.inner.manager.obtain::<T>(definition)
    }

    /// Fire an event to the synchronous observers; see [`EventDispatcher::fire`]
    pub fn fire<E: Send + Sync + 'static>(
        &self,
        event: E,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<(), CoreError> {
        self.inner.dispatcher.fire(event, qualifiers)
    }

    /// Fire an already shared event to the synchronous observers
    pub fn fire_shared<E: Send + Sync + 'static>(
        &self,
        event: Arc<E>,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<(), CoreError> {
        self.inner.dispatcher.fire_shared(event, qualifiers)
    }

    /// Schedule the asynchronous observers of `event`
    pub fn fire_async<E: Send + Sync + 'static>(
        &self,
        event: E,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> CompletionHandle<E> {
        self.inner.dispatcher.fire_async(event, qualifiers)
    }

    /// Activate a new context of `kind` on the current thread
    pub fn activate(&self, kind: ScopeKind) -> Result<ContextKey, CoreError> {
        self.ensure_running()?;
        self.inner.manager.contexts().activate(kind)
    }

    /// Re-enter an existing context on the current thread
    pub fn resume(&self, kind: ScopeKind, key: ContextKey) -> Result<(), CoreError> {
        self.ensure_running()?;
        self.inner.manager.contexts().resume(kind, key)
    }

    /// Leave the current context of `kind` without destroying it
    pub fn deactivate(&self, kind: ScopeKind) -> Result<ContextKey, CoreError> {
        self.inner.manager.contexts().deactivate(kind)
    }

    /// End the current context of `kind`, destroying its instances
    pub fn terminate(&self, kind: ScopeKind) -> Result<(), CoreError> {
        self.inner.manager.contexts().terminate(kind)
    }

    /// End a context by key from any thread
    pub fn terminate_key(&self, key: ContextKey) -> Result<(), CoreError> {
        self.inner.manager.contexts().terminate_key(key)
    }

    pub fn is_active(&self, kind: &ScopeKind) -> bool {
        self.inner.manager.contexts().is_active(kind)
    }

    /// Run `work` inside a fresh request context. The context ends when
    /// `work` returns or unwinds.
    pub fn with_request<R>(&self, work: impl FnOnce() -> R) -> Result<R, CoreError> {
        self.ensure_running()?;
        let request = self.inner.manager.contexts().activate_scoped(ScopeKind::Request)?;
        let result = work();
        request.end()?;
        Ok(result)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.manager.is_shut_down()
    }

    /// Terminate every context and destroy application beans; idempotent
    pub fn shutdown(&self) -> Result<(), CoreError> {
        self.inner.shutdown()
    }

    /// Check whether `T` with `qualifiers` resolves to exactly one bean
    pub fn is_resolvable<T: ?Sized + 'static>(
        &self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> bool {
        let qualifiers = QualifierSet::for_injection(qualifiers);
        Resolver::new(self.registry())
            .resolve(&TypeKey::of::<T>(), &qualifiers)
            .is_unique()
    }

    fn ensure_running(&self) -> Result<(), CoreError> {
        if self.is_shut_down() {
            return Err(CoreError::ContainerShutDown);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("beans", &self.registry().len())
            .field("observers", &self.observers().len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::descriptor::BeanDefinition;
    use crate::container::ioc_builder::ContainerBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Repository: Send + Sync {
        fn name(&self) -> &str;
    }

    struct SqlRepository;

    impl Repository for SqlRepository {
        fn name(&self) -> &str {
            "sql"
        }
    }

    struct RequestLog {
        id: usize,
    }

    fn container(destroyed: Arc<AtomicUsize>) -> Container {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut builder = ContainerBuilder::new();
        builder
            .register_bean(
                BeanDefinition::builder::<SqlRepository>("repository")
                    .provides::<dyn Repository>(|r| r as Arc<dyn Repository>)
                    .singleton()
                    .factory(|_| Ok(SqlRepository))
                    .build()
                    .unwrap(),
            )
            .register_bean(
                BeanDefinition::builder::<RequestLog>("request-log")
                    .request_scoped()
                    .factory(move |_| {
                        Ok(RequestLog {
                            id: counter.fetch_add(1, Ordering::SeqCst),
                        })
                    })
                    .on_destroy(move |_| {
                        destroyed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            );
        builder.build().unwrap()
    }

    #[test]
    fn test_lookup_by_interface() {
        let container = container(Arc::new(AtomicUsize::new(0)));
        let repository = container.get::<dyn Repository>([]).unwrap();
        assert_eq!(repository.name(), "sql");

        let by_id = container.obtain::<SqlRepository>(&BeanId::new("repository")).unwrap();
        assert!(!by_id.is_proxy());
        assert!(container.is_resolvable::<dyn Repository>([]));
        assert!(!container.is_resolvable::<String>([]));
        assert!(container.dependency_graph_json().unwrap().contains("\"request-log\""));
    }

    #[test]
    fn test_request_context_lifecycle() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let container = container(destroyed.clone());
        let log = container.instance::<RequestLog>([]).unwrap();
        assert!(log.is_proxy());
        assert!(matches!(log.get(), Err(CoreError::ContextNotActive { .. })));

        let first = container.with_request(|| log.get().unwrap().id).unwrap();
        let second = container.with_request(|| log.get().unwrap().id).unwrap();
        assert_ne!(first, second);
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_request_ends_when_work_panics() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let container = container(destroyed.clone());
        let log = container.instance::<RequestLog>([]).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            container.with_request(|| {
                log.get().unwrap();
                panic!("handler failed");
            })
        }));
        assert!(outcome.is_err());
        assert!(!container.is_active(&ScopeKind::Request));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        let first = container.with_request(|| log.get().unwrap().id).unwrap();
        assert_eq!(first, 1);
    }

    #[test]
    fn test_shutdown_rejects_lookups() {
        let container = container(Arc::new(AtomicUsize::new(0)));
        let repository = container.instance::<dyn Repository>([]).unwrap();
        container.shutdown().unwrap();
        container.shutdown().unwrap();

        assert!(container.is_shut_down());
        assert!(matches!(
            container.instance::<dyn Repository>([]),
            Err(CoreError::ContainerShutDown)
        ));
        assert!(
            matches!(container.activate(ScopeKind::Request), Err(CoreError::ContainerShutDown))
        );
        assert!(matches!(container.fire(1u32, []), Err(CoreError::ContainerShutDown)));
        // direct handles keep their value
        assert_eq!(repository.get().unwrap().name(), "sql");
    }
}
