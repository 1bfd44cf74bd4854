use std::any::Any;
use std::sync::Arc;

use crate::container::descriptor::TypeKey;

/// Value supplied by a [`ResourceProvider`] for an injection point whose type
/// is not a managed bean
#[derive(Clone)]
pub struct ProvidedResource {
    provider: String,
    type_key: TypeKey,
    // holds an `Arc<U>` where `U` is the provided type
    value: Arc<dyn Any + Send + Sync>,
}

impl ProvidedResource {
    pub fn new<U: ?Sized + Send + Sync + 'static>(
        provider: impl Into<String>,
        value: Arc<U>,
    ) -> Self {
        Self {
            provider: provider.into(),
            type_key: TypeKey::of::<U>(),
            value: Arc::new(value),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn get<U: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<U>> {
        self.value.downcast_ref::<Arc<U>>().cloned()
    }
}

impl std::fmt::Debug for ProvidedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidedResource")
            .field("provider", &self.provider)
            .field("type", &self.type_key.type_name())
            .finish()
    }
}

/// Plugin point for values that are not beans (persistence contexts,
/// external handles and the like).
///
/// Providers are consulted before bean resolution. A `Some` result is
/// authoritative; `None` falls back to normal resolution.
pub trait ResourceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn provide(&self, required: &TypeKey, annotations: &[String]) -> Option<ProvidedResource>;
}

/// Provider serving one shared value to injection points carrying a marker annotation
pub struct AnnotatedResourceProvider {
    name: String,
    annotation: String,
    resource: ProvidedResource,
}

impl AnnotatedResourceProvider {
    pub fn new<U: ?Sized + Send + Sync + 'static>(
        name: impl Into<String>,
        annotation: impl Into<String>,
        value: Arc<U>,
    ) -> Self {
        let name = name.into();
        Self {
            resource: ProvidedResource::new(name.clone(), value),
            name,
            annotation: annotation.into(),
        }
    }
}

impl ResourceProvider for AnnotatedResourceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provide(&self, required: &TypeKey, annotations: &[String]) -> Option<ProvidedResource> {
        let marked = annotations.iter().any(|a| *a == self.annotation);
        (marked && *required == self.resource.type_key()).then(|| self.resource.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Session: Send + Sync {
        fn url(&self) -> &str;
    }

    struct PgSession;

    impl Session for PgSession {
        fn url(&self) -> &str {
            "postgres://localhost"
        }
    }

    #[test]
    fn test_provided_resource_typed_access() {
        let session: Arc<dyn Session> = Arc::new(PgSession);
        let resource = ProvidedResource::new("pg", session);

        assert_eq!(resource.type_key(), TypeKey::of::<dyn Session>());
        assert_eq!(resource.get::<dyn Session>().unwrap().url(), "postgres://localhost");
        assert!(resource.get::<PgSession>().is_none());
    }

    #[test]
    fn test_annotated_provider_requires_marker_and_type() {
        let session: Arc<dyn Session> = Arc::new(PgSession);
        let provider = AnnotatedResourceProvider::new("pg", "PersistenceContext", session);
        let marker = vec!["PersistenceContext".to_string()];

        assert!(provider.provide(&TypeKey::of::<dyn Session>(), &marker).is_some());
        assert!(provider.provide(&TypeKey::of::<dyn Session>(), &[]).is_none());
        assert!(provider.provide(&TypeKey::of::<String>(), &marker).is_none());
    }
}
