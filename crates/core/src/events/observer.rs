use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::container::descriptor::{
    AnyArc, BeanDefinition, BeanId, InjectionKind, InjectionPoint, InjectionSlot, TypeKey,
};
use crate::container::instance::{Dependencies, Handle};
use crate::container::qualifier::{Qualifier, QualifierSet};
use crate::errors::{CoreError, ObserverError};

type ErasedEvent = dyn Any + Send + Sync;

/// Erased observer callback: receives a boxed `Arc<E>` of the observed type
pub type ObserverMethod =
    Arc<dyn Fn(&ErasedEvent, &ObserverContext<'_>) -> Result<(), ObserverError> + Send + Sync>;

/// Which firing entry point notifies an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NotifyMode {
    #[default]
    Sync,
    Async,
}

impl std::fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyMode::Sync => write!(f, "sync"),
            NotifyMode::Async => write!(f, "async"),
        }
    }
}

/// Reception condition of an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reception {
    /// Obtain (and create if needed) the owning instance
    #[default]
    Always,
    /// Notify only when the owning contextual instance already exists
    IfExists,
}

/// Unique observer identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(Arc<str>);

impl ObserverId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObserverId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ObserverId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observer method registered for an event type
#[derive(Clone)]
pub struct ObserverDefinition {
    id: ObserverId,
    owner: Option<BeanId>,
    event_type: TypeKey,
    qualifiers: QualifierSet,
    mode: NotifyMode,
    priority: Option<i32>,
    reception: Reception,
    injection_points: Vec<InjectionPoint>,
    synthetic: bool,
    method: ObserverMethod,
}

impl std::fmt::Debug for ObserverDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverDefinition")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("event_type", &self.event_type.type_name())
            .field("qualifiers", &self.qualifiers.to_string())
            .field("mode", &self.mode)
            .field("priority", &self.priority)
            .field("reception", &self.reception)
            .field("synthetic", &self.synthetic)
            .finish()
    }
}

impl ObserverDefinition {
    /// Start describing an observer of events assignable to `E`
    pub fn builder<E: ?Sized + Send + Sync + 'static>(
        id: impl Into<ObserverId>,
    ) -> ObserverDefinitionBuilder<E> {
        ObserverDefinitionBuilder::new(id.into())
    }

    pub fn id(&self) -> &ObserverId {
        &self.id
    }

    pub fn owner(&self) -> Option<&BeanId> {
        self.owner.as_ref()
    }

    pub fn event_type(&self) -> TypeKey {
        self.event_type
    }

    /// Required event qualifiers as declared; empty observes every event of the type
    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }

    pub fn mode(&self) -> NotifyMode {
        self.mode
    }

    pub fn is_async(&self) -> bool {
        self.mode == NotifyMode::Async
    }

    /// Declared priority; lower runs first
    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn reception(&self) -> Reception {
        self.reception
    }

    pub fn injection_points(&self) -> &[InjectionPoint] {
        &self.injection_points
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Check whether fired qualifiers satisfy this observer
    pub fn matches_qualifiers(&self, fired: &QualifierSet) -> bool {
        fired.satisfies(&self.qualifiers)
    }

    pub(crate) fn method(&self) -> &ObserverMethod {
        &self.method
    }
}

/// Builder for observer definitions
pub struct ObserverDefinitionBuilder<E: ?Sized> {
    id: ObserverId,
    owner: Option<BeanId>,
    qualifiers: Vec<Qualifier>,
    mode: NotifyMode,
    priority: Option<i32>,
    reception: Reception,
    injection_points: Vec<InjectionPoint>,
    synthetic: bool,
    method: Option<ObserverMethod>,
    _event: std::marker::PhantomData<fn(&E)>,
}

impl<E: ?Sized + Send + Sync + 'static> ObserverDefinitionBuilder<E> {
    fn new(id: ObserverId) -> Self {
        Self {
            id,
            owner: None,
            qualifiers: Vec::new(),
            mode: NotifyMode::Sync,
            priority: None,
            reception: Reception::Always,
            injection_points: Vec::new(),
            synthetic: false,
            method: None,
            _event: std::marker::PhantomData,
        }
    }

    /// Bean declaring the observer method
    pub fn owner(mut self, bean: impl Into<BeanId>) -> Self {
        self.owner = Some(bean.into());
        self
    }

    pub fn qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn mode(mut self, mode: NotifyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn asynchronous(self) -> Self {
        self.mode(NotifyMode::Async)
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn reception(mut self, reception: Reception) -> Self {
        self.reception = reception;
        self
    }

    /// Declare an extra observer method parameter resolved like a bean injection point
    pub fn inject<U: ?Sized + 'static>(
        mut self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Self {
        let position = self.injection_points.len() + 1;
        self.injection_points.push(
            InjectionPoint::of::<U>(qualifiers)
                .with_slot(InjectionSlot::Parameter(position))
                .with_kind(InjectionKind::ObserverParameter),
        );
        self
    }

    pub fn injection_point(mut self, injection_point: InjectionPoint) -> Self {
        self.injection_points
            .push(injection_point.with_kind(InjectionKind::ObserverParameter));
        self
    }

    /// Mark as registered programmatically, without a declaring bean method
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    /// Set the callback
    pub fn notify<F>(mut self, callback: F) -> Self
    where
        F: Fn(&E, &ObserverContext<'_>) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.method = Some(Arc::new(
            move |event: &ErasedEvent, context: &ObserverContext<'_>| {
                match event.downcast_ref::<Arc<E>>() {
                    Some(event) => callback(event.as_ref(), context),
                    None => Err(format!("event is not a {}", std::any::type_name::<E>()).into()),
                }
            },
        ));
        self
    }

    pub fn build(self) -> Result<ObserverDefinition, CoreError> {
        let method = self.method.ok_or_else(|| {
            CoreError::invalid_definition(format!("observer '{}' has no callback", self.id))
        })?;

        Ok(ObserverDefinition {
            id: self.id,
            owner: self.owner,
            event_type: TypeKey::of::<E>(),
            qualifiers: QualifierSet::declared(self.qualifiers),
            mode: self.mode,
            priority: self.priority,
            reception: self.reception,
            injection_points: self.injection_points,
            synthetic: self.synthetic,
            method,
        })
    }
}

/// Registration-time view of an observer handed to an [`ObserverTransformer`]
pub struct ObserverTransformation<'a> {
    observer: &'a mut ObserverDefinition,
    vetoed: bool,
}

impl<'a> ObserverTransformation<'a> {
    pub(crate) fn new(observer: &'a mut ObserverDefinition) -> Self {
        Self {
            observer,
            vetoed: false,
        }
    }

    pub fn observer(&self) -> &ObserverDefinition {
        self.observer
    }

    pub fn add_qualifier(&mut self, qualifier: Qualifier) -> &mut Self {
        self.observer.qualifiers.insert(qualifier);
        self
    }

    pub fn remove_qualifier(&mut self, name: &str) -> &mut Self {
        self.observer.qualifiers.remove_named(name);
        self
    }

    pub fn set_qualifiers(&mut self, qualifiers: impl IntoIterator<Item = Qualifier>) -> &mut Self {
        self.observer.qualifiers = QualifierSet::declared(qualifiers);
        self
    }

    pub fn set_priority(&mut self, priority: i32) -> &mut Self {
        self.observer.priority = Some(priority);
        self
    }

    pub fn set_reception(&mut self, reception: Reception) -> &mut Self {
        self.observer.reception = reception;
        self
    }

    /// Drop the observer before it is indexed
    pub fn veto(&mut self) {
        self.vetoed = true;
    }

    pub fn is_vetoed(&self) -> bool {
        self.vetoed
    }
}

/// Rewrites observer declarations at registration time, before indexing
pub trait ObserverTransformer: Send + Sync {
    fn applies_to(&self, _observer: &ObserverDefinition) -> bool {
        true
    }

    fn transform(&self, transformation: &mut ObserverTransformation<'_>);
}

/// Metadata about one firing
#[derive(Debug, Clone)]
pub struct EventMetadata {
    qualifiers: QualifierSet,
    fired_type: TypeKey,
    mode: NotifyMode,
    fired_at: DateTime<Utc>,
}

impl EventMetadata {
    pub(crate) fn new(qualifiers: QualifierSet, fired_type: TypeKey, mode: NotifyMode) -> Self {
        Self {
            qualifiers,
            fired_type,
            mode,
            fired_at: Utc::now(),
        }
    }

    /// Qualifiers of the firing, including the implicit ones
    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }

    /// Runtime type of the fired event
    pub fn fired_type(&self) -> TypeKey {
        self.fired_type
    }

    pub fn mode(&self) -> NotifyMode {
        self.mode
    }

    pub fn fired_at(&self) -> DateTime<Utc> {
        self.fired_at
    }
}

/// What an observer callback sees besides the event
pub struct ObserverContext<'a> {
    metadata: &'a EventMetadata,
    owner: Option<(Arc<BeanDefinition>, AnyArc)>,
    dependencies: RefCell<Dependencies<'a>>,
}

impl<'a> ObserverContext<'a> {
    pub(crate) fn new(
        metadata: &'a EventMetadata,
        owner: Option<(Arc<BeanDefinition>, AnyArc)>,
        dependencies: Dependencies<'a>,
    ) -> Self {
        Self {
            metadata,
            owner,
            dependencies: RefCell::new(dependencies),
        }
    }

    pub fn metadata(&self) -> &EventMetadata {
        self.metadata
    }

    /// The instance of the bean declaring this observer, viewed as `B`
    pub fn owner<B: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<B>> {
        let (bean, instance) = self.owner.as_ref()?;
        bean.types().upcast::<B>(instance)
    }

    /// Value of the observer parameter at `index`
    pub fn injected<T: ?Sized + Send + Sync + 'static>(
        &self,
        index: usize,
    ) -> Result<Arc<T>, CoreError> {
        self.dependencies.borrow_mut().get::<T>(index)
    }

    /// Handle for the observer parameter at `index`
    pub fn injected_handle<T: ?Sized + Send + Sync + 'static>(
        &self,
        index: usize,
    ) -> Result<Handle<T>, CoreError> {
        self.dependencies.borrow_mut().handle::<T>(index)
    }

    pub(crate) fn into_dependencies(self) -> Dependencies<'a> {
        self.dependencies.into_inner()
    }
}
