pub mod config;
pub mod container;
pub mod errors;
pub mod events;
pub mod logging;

// Re-export key types for convenience
pub use config::{ConfigError, ContainerConfig, Environment};
pub use container::{
    global, set_global, BeanDefinition, BeanId, BeanScope, Container, ContainerBuilder, ContextKey,
    Dependencies, Handle, Injectable, InjectionPoint, Qualifier, ResourceProvider, ScopeKind,
    TypeKey, TypeSet,
};
pub use errors::{CoreError, ObserverDispatchError, ObserverError, ValidationError};
pub use events::{
    CompletionHandle, EventMetadata, NotifyMode, ObserverContext, ObserverDefinition, ObserverId,
    ObserverTransformer, Reception,
};
pub use logging::{init_logging, LoggingConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Framework information
pub const FRAMEWORK_NAME: &str = "beanstalk";

/// Get framework version
pub fn version() -> &'static str {
    VERSION
}

/// Get framework name
pub fn name() -> &'static str {
    FRAMEWORK_NAME
}
