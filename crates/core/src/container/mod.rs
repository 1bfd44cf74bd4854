pub mod context;
pub mod descriptor;
pub mod global;
pub mod instance;
pub mod ioc_builder;
pub mod ioc_container;
pub mod lifecycle;
pub mod provider;
pub mod qualifier;
pub mod registry;
pub mod resolver;
pub mod scope;
pub mod validation;

pub use context::{ActiveContext, ContextManager, ContextStore};
pub use descriptor::{
    AnyArc, BeanDefinition, BeanDefinitionBuilder, BeanId, Injectable, InjectionKind,
    InjectionPoint, InjectionSlot, TypeKey, TypeSet,
};
pub use global::{global, set_global, try_global};
pub use instance::{ClientProxy, Dependencies, DirectInstance, Handle, InstanceManager};
pub use ioc_builder::ContainerBuilder;
pub use ioc_container::Container;
pub use lifecycle::{ContextualInstance, InstanceState};
pub use provider::{AnnotatedResourceProvider, ProvidedResource, ResourceProvider};
pub use qualifier::{Qualifier, QualifierSet};
pub use registry::BeanRegistry;
pub use resolver::{DependencyGraph, ResolutionResult, Resolver};
pub use scope::{BeanScope, ContextKey, ScopeKind};
pub use validation::{Consumer, GraphValidator, InjectionPointId, ValidationReport, Wiring};
