use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::container::context::ContextManager;
use crate::container::descriptor::{AnyArc, BeanDefinition, BeanId, InjectionPoint, TypeKey};
use crate::container::lifecycle::{ConstructionGuard, ContextualInstance};
use crate::container::qualifier::{Qualifier, QualifierSet};
use crate::container::registry::BeanRegistry;
use crate::container::resolver::Resolver;
use crate::container::scope::{ContextKey, ScopeKind};
use crate::container::validation::{Consumer, InjectionPointId, ValidationReport, Wiring};
use crate::errors::CoreError;

fn type_mismatch<T: ?Sized>(bean: &BeanId) -> CoreError {
    CoreError::TypeMismatch {
        bean: bean.to_string(),
        required_type: std::any::type_name::<T>().to_string(),
    }
}

/// What callers hold for a bean: the instance itself, or a client proxy
/// that looks up the current contextual instance on every `get()`.
pub enum Handle<T: ?Sized> {
    Direct(DirectInstance<T>),
    Proxy(ClientProxy<T>),
}

impl<T: ?Sized + Send + Sync + 'static> Handle<T> {
    /// The instance to call into. For a proxy this resolves the contextual
    /// instance of the currently active context.
    pub fn get(&self) -> Result<Arc<T>, CoreError> {
        match self {
            Handle::Direct(direct) => Ok(direct.value.clone()),
            Handle::Proxy(proxy) => proxy.get(),
        }
    }

    /// Release the handle. Dependent instances obtained programmatically are
    /// destroyed; for a proxy the contextual instance in the active context is destroyed.
    pub fn destroy(self) -> Result<(), CoreError> {
        match self {
            Handle::Direct(mut direct) => match direct.owned.take() {
                Some(instance) => instance.destroy(),
                None => Ok(()),
            },
            Handle::Proxy(proxy) => proxy.destroy(),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Handle::Proxy(_))
    }

    /// Bean behind the handle; `None` for provided resources
    pub fn bean_id(&self) -> Option<&BeanId> {
        match self {
            Handle::Direct(direct) => direct.bean.as_ref().map(|b| b.id()),
            Handle::Proxy(proxy) => Some(proxy.bean.id()),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handle::Direct(direct) => f
                .debug_struct("Direct")
                .field("bean", &direct.bean.as_ref().map(|b| b.id()))
                .field("owned", &direct.owned.is_some())
                .finish(),
            Handle::Proxy(proxy) => f.debug_tuple("Proxy").field(proxy.bean.id()).finish(),
        }
    }
}

/// A direct reference to an instance
pub struct DirectInstance<T: ?Sized> {
    bean: Option<Arc<BeanDefinition>>,
    value: Arc<T>,
    // set for dependent instances the caller must release
    owned: Option<ContextualInstance>,
}

impl<T: ?Sized> DirectInstance<T> {
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }
}

impl<T: ?Sized> Drop for DirectInstance<T> {
    fn drop(&mut self) {
        if let Some(instance) = self.owned.take() {
            warn!(
                target: "beanstalk::container",
                bean = %instance.bean().id(),
                "Dependent instance dropped without destroy(); destruction callbacks will not run"
            );
        }
    }
}

/// Stand-in for a normal-scoped bean. Holds no instance; every `get()`
/// resolves the contextual instance of the active context.
pub struct ClientProxy<T: ?Sized> {
    manager: Weak<InstanceManager>,
    bean: Arc<BeanDefinition>,
    _type: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> Clone for ClientProxy<T> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            bean: self.bean.clone(),
            _type: PhantomData,
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> ClientProxy<T> {
    fn manager(&self) -> Result<Arc<InstanceManager>, CoreError> {
        self.manager.upgrade().ok_or(CoreError::ContainerShutDown)
    }

    pub fn bean(&self) -> &Arc<BeanDefinition> {
        &self.bean
    }

    pub fn get(&self) -> Result<Arc<T>, CoreError> {
        let value = self.manager()?.lookup_or_create(&self.bean)?;
        self.bean
            .types()
            .upcast::<T>(&value)
            .ok_or_else(|| type_mismatch::<T>(self.bean.id()))
    }

    fn destroy(&self) -> Result<(), CoreError> {
        self.manager()?.destroy_contextual(&self.bean).map(|_| ())
    }
}

/// Accessor handed to bean factories and observer callbacks.
///
/// Injection points are addressed by declaration index and resolve through
/// the wiring computed at validation time. Dependent instances created
/// here belong to the consumer and are destroyed with it.
pub struct Dependencies<'a> {
    manager: &'a InstanceManager,
    consumer: Consumer,
    injection_points: &'a [InjectionPoint],
    dependents: Vec<ContextualInstance>,
}

impl<'a> Dependencies<'a> {
    pub(crate) fn new(
        manager: &'a InstanceManager,
        consumer: Consumer,
        injection_points: &'a [InjectionPoint],
    ) -> Self {
        Self {
            manager,
            consumer,
            injection_points,
            dependents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.injection_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.injection_points.is_empty()
    }

    pub fn injection_point(&self, index: usize) -> Option<&InjectionPoint> {
        self.injection_points.get(index)
    }

    /// Handle for the injection point at `index`; a client proxy when the
    /// dependency is normal-scoped
    pub fn handle<T: ?Sized + Send + Sync + 'static>(
        &mut self,
        index: usize,
    ) -> Result<Handle<T>, CoreError> {
        let manager = self.manager;
        let id = InjectionPointId::new(self.consumer.clone(), index);
        let wiring = manager.report().wiring(&id).ok_or_else(|| CoreError::UnknownInjectionPoint {
            bean: self.consumer.to_string(),
            index,
        })?;

        match wiring {
            Wiring::Bean { bean, .. } => manager.obtain_into(bean, Some(&mut self.dependents)),
            Wiring::Resource(resource) => {
                let value = resource.get::<T>().ok_or_else(|| CoreError::TypeMismatch {
                    bean: resource.provider().to_string(),
                    required_type: std::any::type_name::<T>().to_string(),
                })?;
                Ok(Handle::Direct(DirectInstance {
                    bean: None,
                    value,
                    owned: None,
                }))
            }
        }
    }

    /// Instance for the injection point at `index`. For a normal-scoped
    /// dependency this resolves the contextual instance now; keep the
    /// [`handle`](Self::handle) instead when the beans form a cycle.
    pub fn get<T: ?Sized + Send + Sync + 'static>(
        &mut self,
        index: usize,
    ) -> Result<Arc<T>, CoreError> {
        self.handle::<T>(index)?.get()
    }

    /// Programmatic lookup from inside a factory or observer
    pub fn instance<T: ?Sized + Send + Sync + 'static>(
        &mut self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<Handle<T>, CoreError> {
        let manager = self.manager;
        let bean = manager.resolve_lookup::<T>(qualifiers)?;
        manager.obtain_into(&bean, Some(&mut self.dependents))
    }

    pub(crate) fn into_dependents(mut self) -> Vec<ContextualInstance> {
        std::mem::take(&mut self.dependents)
    }

    pub(crate) fn destroy_dependents(mut self) {
        self.release_dependents();
    }

    fn release_dependents(&mut self) {
        while let Some(dependent) = self.dependents.pop() {
            let bean = dependent.bean().id().clone();
            if let Err(e) = dependent.destroy() {
                warn!(
                    target: "beanstalk::container",
                    bean = %bean,
                    error = %e,
                    "Dependent destruction failed"
                );
            }
        }
    }
}

// Dependents not handed to an owner are destroyed, including on unwind.
impl Drop for Dependencies<'_> {
    fn drop(&mut self) {
        self.release_dependents();
    }
}

/// Creates, caches and destroys bean instances according to their scope
pub struct InstanceManager {
    registry: Arc<BeanRegistry>,
    report: Arc<ValidationReport>,
    contexts: ContextManager,
    shut_down: AtomicBool,
    this: Weak<InstanceManager>,
}

impl std::fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceManager")
            .field("beans", &self.registry.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl InstanceManager {
    pub fn new(
        container_id: Uuid,
        registry: Arc<BeanRegistry>,
        report: Arc<ValidationReport>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            report,
            contexts: ContextManager::new(container_id),
            shut_down: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn registry(&self) -> &BeanRegistry {
        &self.registry
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), CoreError> {
        if self.is_shut_down() {
            return Err(CoreError::ContainerShutDown);
        }
        Ok(())
    }

    /// Obtain `bean` as `T`. Normal-scoped beans come back as a client
    /// proxy, dependent beans as a new instance the caller must `destroy()`.
    pub fn obtain<T: ?Sized + Send + Sync + 'static>(
        &self,
        bean: &Arc<BeanDefinition>,
    ) -> Result<Handle<T>, CoreError> {
        self.obtain_into(bean, None)
    }

    /// Resolve `T` with `qualifiers` (uncached) and obtain the result
    pub fn instance<T: ?Sized + Send + Sync + 'static>(
        &self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<Handle<T>, CoreError> {
        let bean = self.resolve_lookup::<T>(qualifiers)?;
        self.obtain_into(&bean, None)
    }

    fn resolve_lookup<T: ?Sized + 'static>(
        &self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<Arc<BeanDefinition>, CoreError> {
        self.ensure_running()?;
        let required = TypeKey::of::<T>();
        let qualifiers = QualifierSet::for_injection(qualifiers);
        Resolver::new(&self.registry)
            .resolve(&required, &qualifiers)
            .into_unique(&required, &qualifiers)
    }

    /// Dependent instances go to `owner` when given, otherwise to the handle
    fn obtain_into<T: ?Sized + Send + Sync + 'static>(
        &self,
        bean: &Arc<BeanDefinition>,
        owner: Option<&mut Vec<ContextualInstance>>,
    ) -> Result<Handle<T>, CoreError> {
        self.ensure_running()?;
        if !bean.is_assignable_to(&TypeKey::of::<T>()) {
            return Err(type_mismatch::<T>(bean.id()));
        }

        if bean.scope().is_normal() {
            return Ok(Handle::Proxy(ClientProxy {
                manager: self.this.clone(),
                bean: bean.clone(),
                _type: PhantomData,
            }));
        }

        if bean.scope().is_dependent() {
            let instance = self.construct(bean, None)?;
            let value = bean
                .types()
                .upcast::<T>(instance.value())
                .ok_or_else(|| type_mismatch::<T>(bean.id()))?;
            let owned = match owner {
                Some(owner) => {
                    owner.push(instance);
                    None
                }
                None => Some(instance),
            };
            return Ok(Handle::Direct(DirectInstance {
                bean: Some(bean.clone()),
                value,
                owned,
            }));
        }

        // singleton or custom pseudo-scope: shared direct instance
        let instance = self.lookup_or_create(bean)?;
        let value = bean
            .types()
            .upcast::<T>(&instance)
            .ok_or_else(|| type_mismatch::<T>(bean.id()))?;
        Ok(Handle::Direct(DirectInstance {
            bean: Some(bean.clone()),
            value,
            owned: None,
        }))
    }

    /// Contextual instance of `bean` in its active context, created on first access
    pub(crate) fn lookup_or_create(&self, bean: &Arc<BeanDefinition>) -> Result<AnyArc, CoreError> {
        self.ensure_running()?;
        let kind = bean.scope().context_kind().ok_or_else(|| {
            CoreError::invalid_definition(format!(
                "bean '{}' is dependent and has no context",
                bean.id()
            ))
        })?;
        let store = self.contexts.current_store(&kind)?;
        let key = store.key();
        store.get_or_create(bean, || self.construct(bean, Some(key)))
    }

    /// Contextual instance of `bean` if one already exists; never creates
    pub(crate) fn existing(&self, bean: &BeanDefinition) -> Result<Option<AnyArc>, CoreError> {
        self.ensure_running()?;
        let Some(kind) = bean.scope().context_kind() else {
            return Ok(None);
        };
        match self.contexts.current_store(&kind) {
            Ok(store) => store.existing(bean.id()),
            Err(CoreError::ContextNotActive { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// New dependent instance owned by the caller
    pub(crate) fn create_dependent(
        &self,
        bean: &Arc<BeanDefinition>,
    ) -> Result<ContextualInstance, CoreError> {
        self.ensure_running()?;
        self.construct(bean, None)
    }

    pub(crate) fn destroy_contextual(&self, bean: &BeanDefinition) -> Result<bool, CoreError> {
        let Some(kind) = bean.scope().context_kind() else {
            return Ok(false);
        };
        self.contexts.current_store(&kind)?.destroy_instance(bean.id())
    }

    fn construct(
        &self,
        bean: &Arc<BeanDefinition>,
        context_key: Option<ContextKey>,
    ) -> Result<ContextualInstance, CoreError> {
        let _guard = ConstructionGuard::enter(bean.id(), context_key)?;
        let mut dependencies = Dependencies::new(
            self,
            Consumer::Bean(bean.id().clone()),
            bean.injection_points(),
        );

        match (bean.factory())(&mut dependencies) {
            Ok(value) => {
                debug!(
                    target: "beanstalk::container",
                    bean = %bean.id(),
                    scope = %bean.scope(),
                    "Created bean instance"
                );
                Ok(ContextualInstance::new(
                    bean.clone(),
                    context_key,
                    value,
                    dependencies.into_dependents(),
                ))
            }
            Err(e) => {
                dependencies.destroy_dependents();
                Err(e)
            }
        }
    }

    /// Create singleton and application-scoped beans in construction order
    pub fn instantiate_eagerly(&self) -> Result<usize, CoreError> {
        let mut created = 0;
        for id in self.report.construction_order() {
            let Some(bean) = self.registry.get(id) else {
                continue;
            };
            let kind = bean.scope().context_kind();
            if kind == Some(ScopeKind::Application) {
                self.lookup_or_create(bean)?;
                created += 1;
            }
        }
        info!(target: "beanstalk::container", created, "Eager beans instantiated");
        Ok(created)
    }

    /// Terminate every context; later lookups fail with `ContainerShutDown`
    pub fn shutdown(&self) -> Result<(), CoreError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.contexts.shutdown()
    }
}
