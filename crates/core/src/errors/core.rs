use thiserror::Error;

use crate::config::ConfigError;

/// Boxed error returned by observer callbacks and user factories
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Structural problem found while validating the bean graph at startup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unsatisfied dependency for {injection_point}: no bean matches type {required_type} with qualifiers {qualifiers}")]
    Unsatisfied {
        injection_point: String,
        required_type: String,
        qualifiers: String,
    },

    #[error("Ambiguous dependency for {injection_point}: type {required_type} with qualifiers {qualifiers} matches beans [{}]", .candidates.join(", "))]
    Ambiguous {
        injection_point: String,
        required_type: String,
        qualifiers: String,
        candidates: Vec<String>,
    },

    #[error("Illegal circular dependency involving a pseudo-scoped bean: {}", .cycle.join(" -> "))]
    IllegalCircularDependency { cycle: Vec<String> },

    #[error("Duplicate bean identifier: {id}")]
    DuplicateBeanId { id: String },

    #[error("Duplicate observer identifier: {id}")]
    DuplicateObserverId { id: String },

    #[error("Illegal observer '{observer}': {reason}")]
    IllegalObserver { observer: String, reason: String },
}

impl ValidationError {
    /// Check if the error is an unsatisfied dependency
    pub fn is_unsatisfied(&self) -> bool {
        matches!(self, Self::Unsatisfied { .. })
    }

    /// Check if the error is an ambiguous dependency
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }

    /// Check if the error is an illegal dependency cycle
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::IllegalCircularDependency { .. })
    }
}

fn list_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("  [{}] {}", i + 1, e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single failing observer inside an asynchronous notification
#[derive(Debug)]
pub struct ObserverFailure {
    pub observer: String,
    pub error: ObserverError,
}

impl std::fmt::Display for ObserverFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.observer, self.error)
    }
}

/// Failure raised while notifying observers of an event
#[derive(Debug, Error)]
pub enum ObserverDispatchError {
    /// First failing synchronous observer; remaining sync observers were skipped
    #[error("Observer '{observer}' failed: {source}")]
    Single {
        observer: String,
        source: ObserverError,
    },

    /// Every failing asynchronous observer of one firing
    #[error("{} asynchronous observer(s) failed: {}", .failures.len(), .failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; "))]
    Composite { failures: Vec<ObserverFailure> },
}

impl ObserverDispatchError {
    /// Names of the observers that failed
    pub fn failed_observers(&self) -> Vec<&str> {
        match self {
            Self::Single { observer, .. } => vec![observer.as_str()],
            Self::Composite { failures } => failures.iter().map(|f| f.observer.as_str()).collect(),
        }
    }
}

/// Core error type for the container
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Deployment validation failed with {} problem(s):\n{}", .errors.len(), list_validation_errors(.errors))]
    Deployment { errors: Vec<ValidationError> },

    #[error("Duplicate bean identifier: {id}")]
    DuplicateBean { id: String },

    #[error("Duplicate observer identifier: {id}")]
    DuplicateObserver { id: String },

    #[error("Unsatisfied resolution: no bean matches type {required_type} with qualifiers {qualifiers}")]
    UnsatisfiedResolution {
        required_type: String,
        qualifiers: String,
    },

    #[error("Ambiguous resolution for type {required_type}: candidates [{}]", .candidates.join(", "))]
    AmbiguousResolution {
        required_type: String,
        candidates: Vec<String>,
    },

    #[error("Re-entrant construction of bean '{bean}': {path}")]
    ReentrantConstruction { bean: String, path: String },

    #[error("No active context for scope '{scope}'")]
    ContextNotActive { scope: String },

    #[error("Context for scope '{scope}' is already active on this thread")]
    ContextAlreadyActive { scope: String },

    #[error("Container has been shut down")]
    ContainerShutDown,

    #[error("A global container has already been installed")]
    GlobalAlreadySet,

    #[error("Lock error on resource: {resource}")]
    LockError { resource: String },

    #[error("Bean '{bean}' cannot provide type {required_type}")]
    TypeMismatch { bean: String, required_type: String },

    #[error("Bean '{bean}' has no injection point at index {index}")]
    UnknownInjectionPoint { bean: String, index: usize },

    #[error("Invalid bean definition: {message}")]
    InvalidDefinition { message: String },

    #[error("Failed to create bean '{bean}': {source}")]
    Creation {
        bean: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to destroy bean '{bean}': {message}")]
    Destruction { bean: String, message: String },

    #[error(transparent)]
    ObserverDispatch(#[from] ObserverDispatchError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Create an invalid definition error
    pub fn invalid_definition(message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            message: message.into(),
        }
    }

    /// Wrap a user error raised while constructing a bean
    pub fn creation(
        bean: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Creation {
            bean: bean.into(),
            source: source.into(),
        }
    }

    /// Create a lock error for a named resource
    pub fn lock(resource: impl Into<String>) -> Self {
        Self::LockError {
            resource: resource.into(),
        }
    }

    /// Validation errors carried by a failed deployment
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            Self::Deployment { errors } => errors,
            _ => &[],
        }
    }

    /// Check if the error is a structural (startup) failure
    pub fn is_deployment(&self) -> bool {
        matches!(
            self,
            Self::Deployment { .. } | Self::DuplicateBean { .. } | Self::DuplicateObserver { .. }
        )
    }

    /// Check if the error came from observer notification
    pub fn is_dispatch(&self) -> bool {
        matches!(self, Self::ObserverDispatch(_))
    }

    /// Check if the error is an unsatisfied lookup
    pub fn is_unsatisfied(&self) -> bool {
        matches!(self, Self::UnsatisfiedResolution { .. })
    }

    /// Check if the error is an ambiguous lookup
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::AmbiguousResolution { .. })
    }
}
