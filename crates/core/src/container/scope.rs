use uuid::Uuid;

use crate::errors::CoreError;

/// Bean scope enumeration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum BeanScope {
    /// One instance for the container lifetime, injected directly (pseudo-scope)
    Singleton,
    /// One instance for the application context, injected through a client proxy
    ApplicationScoped,
    /// One instance per active request context, injected through a client proxy
    RequestScoped,
    /// New instance for every injection or lookup (pseudo-scope)
    #[default]
    Dependent,
    /// User-defined scope bound to a custom context
    Custom { name: String, normal: bool },
}

impl BeanScope {
    /// Create a custom normal scope
    pub fn custom_normal(name: impl Into<String>) -> Self {
        BeanScope::Custom {
            name: name.into(),
            normal: true,
        }
    }

    /// Create a custom pseudo-scope
    pub fn custom_pseudo(name: impl Into<String>) -> Self {
        BeanScope::Custom {
            name: name.into(),
            normal: false,
        }
    }

    /// Normal scopes are reached through client proxies
    pub fn is_normal(&self) -> bool {
        match self {
            BeanScope::ApplicationScoped | BeanScope::RequestScoped => true,
            BeanScope::Custom { normal, .. } => *normal,
            BeanScope::Singleton | BeanScope::Dependent => false,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        !self.is_normal()
    }

    pub fn is_dependent(&self) -> bool {
        matches!(self, BeanScope::Dependent)
    }

    /// The context holding instances of this scope; `None` for dependent beans
    pub fn context_kind(&self) -> Option<ScopeKind> {
        match self {
            BeanScope::Singleton | BeanScope::ApplicationScoped => Some(ScopeKind::Application),
            BeanScope::RequestScoped => Some(ScopeKind::Request),
            BeanScope::Custom { name, .. } => Some(ScopeKind::Custom(name.clone())),
            BeanScope::Dependent => None,
        }
    }

    /// Get the scope name as a string
    pub fn as_str(&self) -> &str {
        match self {
            BeanScope::Singleton => "singleton",
            BeanScope::ApplicationScoped => "application",
            BeanScope::RequestScoped => "request",
            BeanScope::Dependent => "dependent",
            BeanScope::Custom { name, .. } => name,
        }
    }
}

impl std::fmt::Display for BeanScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BeanScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "singleton" => Ok(BeanScope::Singleton),
            "application" | "application_scoped" => Ok(BeanScope::ApplicationScoped),
            "request" | "request_scoped" => Ok(BeanScope::RequestScoped),
            "dependent" => Ok(BeanScope::Dependent),
            _ => Err(CoreError::invalid_definition(format!("unknown scope '{}'", s))),
        }
    }
}

/// The kind of context a normal or contextual scope lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Always active while the container runs
    Application,
    /// Activated around a unit of work
    Request,
    Custom(String),
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKind::Application => write!(f, "application"),
            ScopeKind::Request => write!(f, "request"),
            ScopeKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Identity of one active context instance (e.g. one request)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(Uuid);

impl ContextKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContextKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
