use std::cell::RefCell;
use std::sync::Arc;

use crate::container::descriptor::{AnyArc, BeanDefinition, BeanId};
use crate::container::scope::ContextKey;
use crate::errors::CoreError;

/// Contextual instance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// No instance exists yet in the context
    Uninitialized,
    /// The factory is running
    Constructing,
    /// Instance is created and ready for use
    Ready,
    /// Destruction callbacks have run
    Destroyed,
}

/// A live bean instance together with the dependent instances created for it
pub struct ContextualInstance {
    bean: Arc<BeanDefinition>,
    context_key: Option<ContextKey>,
    value: AnyArc,
    dependents: Vec<ContextualInstance>,
    state: InstanceState,
}

impl std::fmt::Debug for ContextualInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextualInstance")
            .field("bean", self.bean.id())
            .field("context_key", &self.context_key)
            .field("dependents", &self.dependents.len())
            .field("state", &self.state)
            .finish()
    }
}

impl ContextualInstance {
    pub(crate) fn new(
        bean: Arc<BeanDefinition>,
        context_key: Option<ContextKey>,
        value: AnyArc,
        dependents: Vec<ContextualInstance>,
    ) -> Self {
        Self {
            bean,
            context_key,
            value,
            dependents,
            state: InstanceState::Ready,
        }
    }

    pub fn bean(&self) -> &Arc<BeanDefinition> {
        &self.bean
    }

    pub fn context_key(&self) -> Option<ContextKey> {
        self.context_key
    }

    pub fn value(&self) -> &AnyArc {
        &self.value
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn dependents(&self) -> &[ContextualInstance] {
        &self.dependents
    }

    /// Run the bean's destruction callback, then destroy its dependents in
    /// reverse creation order. Dependents are destroyed even when the
    /// callback fails; the callback's error is returned.
    pub fn destroy(mut self) -> Result<(), CoreError> {
        if self.state == InstanceState::Destroyed {
            return Ok(());
        }

        let result = match self.bean.destroyer() {
            Some(destroyer) => destroyer(&self.value).map_err(|e| CoreError::Destruction {
                bean: self.bean.id().to_string(),
                message: e.to_string(),
            }),
            None => Ok(()),
        };

        while let Some(dependent) = self.dependents.pop() {
            if let Err(e) = dependent.destroy() {
                tracing::warn!(
                    target: "beanstalk::container",
                    bean = %self.bean.id(),
                    error = %e,
                    "Dependent destruction failed"
                );
            }
        }

        self.state = InstanceState::Destroyed;
        tracing::debug!(
            target: "beanstalk::container",
            bean = %self.bean.id(),
            "Destroyed bean instance"
        );
        result
    }
}

thread_local! {
    static CONSTRUCTION_STACK: RefCell<Vec<(BeanId, Option<ContextKey>)>> =
        const { RefCell::new(Vec::new()) };
}

/// Marks a (bean, context) pair as under construction on the current thread.
///
/// Entering a pair that is already on the stack means a factory re-entered
/// its own construction; the guard fails instead of recursing.
#[derive(Debug)]
pub struct ConstructionGuard {
    _private: (),
}

impl ConstructionGuard {
    pub fn enter(bean: &BeanId, context_key: Option<ContextKey>) -> Result<Self, CoreError> {
        CONSTRUCTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|(id, key)| id == bean && *key == context_key) {
                let path = stack
                    .iter()
                    .map(|(id, _)| id.as_str())
                    .chain(std::iter::once(bean.as_str()))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(CoreError::ReentrantConstruction {
                    bean: bean.to_string(),
                    path,
                });
            }
            stack.push((bean.clone(), context_key));
            Ok(Self { _private: () })
        })
    }

    /// Beans currently under construction on this thread, outermost first
    pub fn current_path() -> Vec<BeanId> {
        CONSTRUCTION_STACK.with(|stack| stack.borrow().iter().map(|(id, _)| id.clone()).collect())
    }
}

impl Drop for ConstructionGuard {
    fn drop(&mut self) {
        CONSTRUCTION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Connection;

    fn bean(id: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<BeanDefinition> {
        let name = id.to_string();
        Arc::new(
            BeanDefinition::builder::<Connection>(id)
                .factory(|_| Ok(Connection))
                .on_destroy(move |_| {
                    log.lock().unwrap().push(name.clone());
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    }

    fn instance(
        bean: Arc<BeanDefinition>,
        dependents: Vec<ContextualInstance>,
    ) -> ContextualInstance {
        ContextualInstance::new(bean, None, Arc::new(Connection), dependents)
    }

    #[test]
    fn test_destroy_runs_callback_then_dependents_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = instance(bean("first", log.clone()), vec![]);
        let second = instance(bean("second", log.clone()), vec![]);
        let owner = instance(bean("owner", log.clone()), vec![first, second]);

        assert_eq!(owner.state(), InstanceState::Ready);
        owner.destroy().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["owner", "second", "first"]);
    }

    #[test]
    fn test_failing_callback_still_destroys_dependents() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let dependent = Arc::new(
            BeanDefinition::builder::<Connection>("dependent")
                .factory(|_| Ok(Connection))
                .on_destroy(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        );
        let failing = Arc::new(
            BeanDefinition::builder::<Connection>("failing")
                .factory(|_| Ok(Connection))
                .on_destroy(|_| Err(CoreError::invalid_definition("socket already closed")))
                .build()
                .unwrap(),
        );

        let owner = instance(failing, vec![instance(dependent, vec![])]);
        let result = owner.destroy();

        assert!(matches!(result, Err(CoreError::Destruction { bean, .. }) if bean == "failing"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_construction_guard_detects_reentry() {
        let a = BeanId::new("a");
        let b = BeanId::new("b");

        let _outer = ConstructionGuard::enter(&a, None).unwrap();
        let _inner = ConstructionGuard::enter(&b, None).unwrap();
        let error = ConstructionGuard::enter(&a, None).unwrap_err();

        match error {
            CoreError::ReentrantConstruction { bean, path } => {
                assert_eq!(bean, "a");
                assert_eq!(path, "a -> b -> a");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_same_bean_in_different_contexts_is_allowed() {
        let a = BeanId::new("a");
        let _first = ConstructionGuard::enter(&a, Some(ContextKey::new())).unwrap();
        assert!(ConstructionGuard::enter(&a, Some(ContextKey::new())).is_ok());
    }

    #[test]
    fn test_guard_pops_on_drop() {
        let a = BeanId::new("a");
        {
            let _guard = ConstructionGuard::enter(&a, None).unwrap();
            assert_eq!(ConstructionGuard::current_path(), vec![a.clone()]);
        }
        assert!(ConstructionGuard::current_path().is_empty());
        assert!(ConstructionGuard::enter(&a, None).is_ok());
    }
}
