//! Observer registration and event delivery.

pub mod dispatcher;
pub mod observer;
pub mod registry;

pub use dispatcher::{CompletionHandle, EventDispatcher};
pub use observer::{
    EventMetadata, NotifyMode, ObserverContext, ObserverDefinition, ObserverDefinitionBuilder,
    ObserverId, ObserverMethod, ObserverTransformation, ObserverTransformer, Reception,
};
pub use registry::ObserverRegistry;
