use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::container::instance::Dependencies;
use crate::container::qualifier::{Qualifier, QualifierSet};
use crate::container::scope::BeanScope;
use crate::errors::CoreError;

/// Type-erased shared instance
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Erased conversion from an implementation instance to a boxed `Arc<U>`
type Upcast = Arc<dyn Fn(&AnyArc) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// Factory constructing a bean instance from its resolved dependencies
pub type BeanFactory =
    Arc<dyn Fn(&mut Dependencies<'_>) -> Result<AnyArc, CoreError> + Send + Sync>;

/// Callback run when a contextual instance is destroyed
pub type BeanDestroyer = Arc<dyn Fn(&AnyArc) -> Result<(), CoreError> + Send + Sync>;

/// Runtime identity of a (possibly unsized) Rust type
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name)
    }
}

#[derive(Clone)]
struct TypeEntry {
    key: TypeKey,
    upcast: Upcast,
}

/// Flat, precomputed set of types an instance can be viewed as.
///
/// Each entry knows how to turn the erased implementation into an `Arc`
/// of that type, so a bean registered for `dyn Trait` can be looked up as
/// `Arc<dyn Trait>` without any hierarchy walk at resolution time.
#[derive(Clone)]
pub struct TypeSet {
    implementation: TypeKey,
    entries: Vec<TypeEntry>,
}

impl TypeSet {
    /// Start a type set whose implementation type is `T`
    pub fn of<T: Send + Sync + 'static>() -> TypeSetBuilder<T> {
        TypeSetBuilder::new()
    }

    pub fn implementation(&self) -> TypeKey {
        self.implementation
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.entries.iter().any(|e| e.key == *key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TypeKey> {
        self.entries.iter().map(|e| &e.key)
    }

    /// View `value` as the type identified by `key`; the result boxes an `Arc<U>`
    pub fn upcast_erased(
        &self,
        key: &TypeKey,
        value: &AnyArc,
    ) -> Option<Box<dyn Any + Send + Sync>> {
        let entry = self.entries.iter().find(|e| e.key == *key)?;
        (entry.upcast)(value)
    }

    /// View `value` as `Arc<U>`
    pub fn upcast<U: ?Sized + Send + Sync + 'static>(&self, value: &AnyArc) -> Option<Arc<U>> {
        let boxed = self.upcast_erased(&TypeKey::of::<U>(), value)?;
        boxed.downcast::<Arc<U>>().ok().map(|arc| *arc)
    }
}

impl std::fmt::Debug for TypeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.key.type_name()))
            .finish()
    }
}

/// Builder for a [`TypeSet`] rooted at implementation type `T`
pub struct TypeSetBuilder<T> {
    set: TypeSet,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> TypeSetBuilder<T> {
    fn new() -> Self {
        let identity: Upcast = Arc::new(|value: &AnyArc| {
            value
                .clone()
                .downcast::<T>()
                .ok()
                .map(|arc| Box::new(arc) as Box<dyn Any + Send + Sync>)
        });
        Self {
            set: TypeSet {
                implementation: TypeKey::of::<T>(),
                entries: vec![TypeEntry {
                    key: TypeKey::of::<T>(),
                    upcast: identity,
                }],
            },
            _phantom: PhantomData,
        }
    }

    /// Add a supertype (usually a trait object) reachable through `cast`
    pub fn with<U: ?Sized + Send + Sync + 'static>(mut self, cast: fn(Arc<T>) -> Arc<U>) -> Self {
        let key = TypeKey::of::<U>();
        if self.set.contains(&key) {
            return self;
        }
        let upcast: Upcast = Arc::new(move |value: &AnyArc| {
            value
                .clone()
                .downcast::<T>()
                .ok()
                .map(|arc| Box::new(cast(arc)) as Box<dyn Any + Send + Sync>)
        });
        self.set.entries.push(TypeEntry { key, upcast });
        self
    }

    pub fn build(self) -> TypeSet {
        self.set
    }
}

/// Stable, unique bean identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeanId(Arc<str>);

impl BeanId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BeanId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for BeanId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for BeanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an injection point sits on its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionSlot {
    Field(String),
    Parameter(usize),
    Constructor(usize),
}

/// What an injection point is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionKind {
    #[default]
    Normal,
    /// Extra parameter of an observer method
    ObserverParameter,
}

/// A required type plus qualifiers, declared by a bean or an observer
#[derive(Debug, Clone)]
pub struct InjectionPoint {
    required_type: TypeKey,
    qualifiers: QualifierSet,
    slot: InjectionSlot,
    kind: InjectionKind,
    annotations: Vec<String>,
}

impl InjectionPoint {
    /// Constructor slot requiring `T` with the given qualifiers (empty means `@Default`)
    pub fn of<T: ?Sized + 'static>(qualifiers: impl IntoIterator<Item = Qualifier>) -> Self {
        Self {
            required_type: TypeKey::of::<T>(),
            qualifiers: QualifierSet::for_injection(qualifiers),
            slot: InjectionSlot::Constructor(0),
            kind: InjectionKind::Normal,
            annotations: Vec::new(),
        }
    }

    pub fn with_slot(mut self, slot: InjectionSlot) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_kind(mut self, kind: InjectionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach a marker consulted by resource providers
    pub fn annotated(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.push(annotation.into());
        self
    }

    pub fn required_type(&self) -> TypeKey {
        self.required_type
    }

    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }

    pub fn slot(&self) -> &InjectionSlot {
        &self.slot
    }

    pub fn kind(&self) -> InjectionKind {
        self.kind
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }
}

/// Immutable description of a bean
pub struct BeanDefinition {
    id: BeanId,
    types: TypeSet,
    qualifiers: QualifierSet,
    scope: BeanScope,
    alternative_priority: Option<i32>,
    injection_points: Vec<InjectionPoint>,
    factory: BeanFactory,
    destroyer: Option<BeanDestroyer>,
}

impl std::fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("id", &self.id)
            .field("types", &self.types)
            .field("qualifiers", &self.qualifiers.to_string())
            .field("scope", &self.scope)
            .field("alternative_priority", &self.alternative_priority)
            .field("injection_points", &self.injection_points.len())
            .field("has_destroyer", &self.destroyer.is_some())
            .finish()
    }
}

impl BeanDefinition {
    /// Start describing a bean implemented by `T`
    pub fn builder<T: Send + Sync + 'static>(id: impl Into<BeanId>) -> BeanDefinitionBuilder<T> {
        BeanDefinitionBuilder::new(id.into())
    }

    /// Describe a bean from its [`Injectable`] implementation.
    /// The identifier defaults to the implementation type name.
    pub fn injectable<T: Injectable>() -> BeanDefinitionBuilder<T> {
        let mut builder = BeanDefinitionBuilder::new(BeanId::new(std::any::type_name::<T>()))
            .scope(T::scope())
            .factory(T::create);
        builder.injection_points = T::injection_points();
        builder
    }

    pub fn id(&self) -> &BeanId {
        &self.id
    }

    pub fn types(&self) -> &TypeSet {
        &self.types
    }

    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }

    pub fn scope(&self) -> &BeanScope {
        &self.scope
    }

    pub fn alternative_priority(&self) -> Option<i32> {
        self.alternative_priority
    }

    pub fn is_alternative(&self) -> bool {
        self.alternative_priority.is_some()
    }

    pub fn injection_points(&self) -> &[InjectionPoint] {
        &self.injection_points
    }

    pub fn factory(&self) -> &BeanFactory {
        &self.factory
    }

    pub fn destroyer(&self) -> Option<&BeanDestroyer> {
        self.destroyer.as_ref()
    }

    /// Check whether this bean can satisfy `required`
    pub fn is_assignable_to(&self, required: &TypeKey) -> bool {
        self.types.contains(required)
    }
}

/// Builder for bean definitions
pub struct BeanDefinitionBuilder<T> {
    id: BeanId,
    types: TypeSetBuilder<T>,
    qualifiers: Vec<Qualifier>,
    scope: BeanScope,
    alternative_priority: Option<i32>,
    injection_points: Vec<InjectionPoint>,
    factory: Option<BeanFactory>,
    destroyer: Option<BeanDestroyer>,
}

impl<T: Send + Sync + 'static> BeanDefinitionBuilder<T> {
    fn new(id: BeanId) -> Self {
        Self {
            id,
            types: TypeSetBuilder::new(),
            qualifiers: Vec::new(),
            scope: BeanScope::default(),
            alternative_priority: None,
            injection_points: Vec::new(),
            factory: None,
            destroyer: None,
        }
    }

    /// Declare an additional bean type reachable through `cast`
    pub fn provides<U: ?Sized + Send + Sync + 'static>(
        mut self,
        cast: fn(Arc<T>) -> Arc<U>,
    ) -> Self {
        self.types = self.types.with(cast);
        self
    }

    pub fn qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        self.qualifier(Qualifier::named(name))
    }

    pub fn scope(mut self, scope: BeanScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn singleton(self) -> Self {
        self.scope(BeanScope::Singleton)
    }

    pub fn application_scoped(self) -> Self {
        self.scope(BeanScope::ApplicationScoped)
    }

    pub fn request_scoped(self) -> Self {
        self.scope(BeanScope::RequestScoped)
    }

    pub fn dependent(self) -> Self {
        self.scope(BeanScope::Dependent)
    }

    /// Mark the bean as an enabled alternative; higher priority wins
    pub fn alternative(mut self, priority: i32) -> Self {
        self.alternative_priority = Some(priority);
        self
    }

    /// Declare the next constructor dependency
    pub fn inject<U: ?Sized + 'static>(
        self,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Self {
        let position = self.injection_points.len();
        self.injection_point(
            InjectionPoint::of::<U>(qualifiers).with_slot(InjectionSlot::Constructor(position)),
        )
    }

    /// Declare a field dependency
    pub fn inject_field<U: ?Sized + 'static>(
        self,
        field: impl Into<String>,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Self {
        self.injection_point(
            InjectionPoint::of::<U>(qualifiers).with_slot(InjectionSlot::Field(field.into())),
        )
    }

    pub fn injection_point(mut self, injection_point: InjectionPoint) -> Self {
        self.injection_points.push(injection_point);
        self
    }

    /// Set the constructor. Dependencies are fetched by injection point index.
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&mut Dependencies<'_>) -> Result<T, CoreError> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(move |deps: &mut Dependencies<'_>| {
            factory(deps).map(|instance| Arc::new(instance) as AnyArc)
        }));
        self
    }

    /// Set a callback run when the instance is destroyed
    pub fn on_destroy<F>(mut self, destroy: F) -> Self
    where
        F: Fn(&T) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        self.destroyer = Some(Arc::new(move |instance: &AnyArc| {
            match instance.downcast_ref::<T>() {
                Some(typed) => destroy(typed),
                None => Ok(()),
            }
        }));
        self
    }

    pub fn build(self) -> Result<BeanDefinition, CoreError> {
        let factory = self.factory.ok_or_else(|| {
            CoreError::invalid_definition(format!("bean '{}' has no factory", self.id))
        })?;
        if self.id.as_str().is_empty() {
            return Err(CoreError::invalid_definition("bean identifier must not be empty"));
        }

        Ok(BeanDefinition {
            id: self.id,
            types: self.types.build(),
            qualifiers: QualifierSet::for_bean(self.qualifiers),
            scope: self.scope,
            alternative_priority: self.alternative_priority,
            injection_points: self.injection_points,
            factory,
            destroyer: self.destroyer,
        })
    }
}

/// Static registration interface: a type declares its own injection points
/// and constructor so it can be registered without a hand-written factory.
pub trait Injectable: Sized + Send + Sync + 'static {
    fn scope() -> BeanScope {
        BeanScope::Dependent
    }

    fn injection_points() -> Vec<InjectionPoint> {
        Vec::new()
    }

    fn create(deps: &mut Dependencies<'_>) -> Result<Self, CoreError>;
}
