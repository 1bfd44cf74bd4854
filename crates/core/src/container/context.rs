//! Contexts hold the contextual instances of scoped beans.
//!
//! Every context instance has its own store guarded by its own lock, so
//! unrelated contexts (two requests, say) never contend. The application
//! context lives as long as the container; the others are bound to threads
//! through `activate`/`resume` and end with `terminate`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, ThreadId};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::container::descriptor::{AnyArc, BeanDefinition, BeanId};
use crate::container::lifecycle::{ConstructionGuard, ContextualInstance, InstanceState};
use crate::container::scope::{ContextKey, ScopeKind};
use crate::errors::CoreError;

enum Slot {
    Constructing(ThreadId),
    Ready(ContextualInstance),
}

#[derive(Default)]
struct StoreState {
    slots: HashMap<BeanId, Slot>,
    creation_order: Vec<BeanId>,
    terminated: bool,
}

/// Instances of one context instance, e.g. one request
pub struct ContextStore {
    kind: ScopeKind,
    key: ContextKey,
    state: Mutex<StoreState>,
    constructed: Condvar,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .finish()
    }
}

impl ContextStore {
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            key: ContextKey::new(),
            state: Mutex::new(StoreState::default()),
            constructed: Condvar::new(),
        }
    }

    pub fn kind(&self) -> &ScopeKind {
        &self.kind
    }

    pub fn key(&self) -> ContextKey {
        self.key
    }

    fn lock_error(&self) -> CoreError {
        CoreError::lock(format!("context_store:{}", self.kind))
    }

    /// Return the instance of `bean`, running `create` if none exists yet.
    ///
    /// The store lock is released while `create` runs. Other threads asking
    /// for the same bean wait for that construction instead of starting their own.
    pub fn get_or_create<F>(
        &self,
        bean: &Arc<BeanDefinition>,
        create: F,
    ) -> Result<AnyArc, CoreError>
    where
        F: FnOnce() -> Result<ContextualInstance, CoreError>,
    {
        let current = thread::current().id();
        let mut state = self.state.lock().map_err(|_| self.lock_error())?;
        loop {
            if state.terminated {
                return Err(CoreError::ContextNotActive {
                    scope: self.kind.to_string(),
                });
            }
            let constructing = match state.slots.get(bean.id()) {
                Some(Slot::Ready(instance)) => return Ok(instance.value().clone()),
                Some(Slot::Constructing(owner)) => *owner,
                None => break,
            };
            if constructing == current {
                let path = ConstructionGuard::current_path()
                    .iter()
                    .map(|id| id.as_str())
                    .chain(std::iter::once(bean.id().as_str()))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(CoreError::ReentrantConstruction {
                    bean: bean.id().to_string(),
                    path,
                });
            }
            state = self.constructed.wait(state).map_err(|_| self.lock_error())?;
        }
        state
            .slots
            .insert(bean.id().clone(), Slot::Constructing(current));
        drop(state);

        let mut pending = PendingSlot {
            store: self,
            bean: bean.id(),
            armed: true,
        };
        let created = create();
        pending.armed = false;

        let mut state = self.state.lock().map_err(|_| self.lock_error())?;
        let result = match created {
            Ok(instance) if state.terminated => {
                state.slots.remove(bean.id());
                drop(state);
                if let Err(e) = instance.destroy() {
                    warn!(
                        target: "beanstalk::context",
                        bean = %bean.id(),
                        error = %e,
                        "Destruction failed"
                    );
                }
                self.constructed.notify_all();
                return Err(CoreError::ContextNotActive {
                    scope: self.kind.to_string(),
                });
            }
            Ok(instance) => {
                let value = instance.value().clone();
                state.slots.insert(bean.id().clone(), Slot::Ready(instance));
                state.creation_order.push(bean.id().clone());
                Ok(value)
            }
            Err(e) => {
                state.slots.remove(bean.id());
                Err(e)
            }
        };
        drop(state);
        self.constructed.notify_all();
        result
    }

    /// The existing instance of `bean`, never creating one
    pub fn existing(&self, bean: &BeanId) -> Result<Option<AnyArc>, CoreError> {
        let state = self.state.lock().map_err(|_| self.lock_error())?;
        Ok(match state.slots.get(bean) {
            Some(Slot::Ready(instance)) => Some(instance.value().clone()),
            _ => None,
        })
    }

    pub fn state_of(&self, bean: &BeanId) -> Result<InstanceState, CoreError> {
        let state = self.state.lock().map_err(|_| self.lock_error())?;
        if state.terminated {
            return Ok(InstanceState::Destroyed);
        }
        Ok(match state.slots.get(bean) {
            Some(Slot::Ready(_)) => InstanceState::Ready,
            Some(Slot::Constructing(_)) => InstanceState::Constructing,
            None => InstanceState::Uninitialized,
        })
    }

    /// Destroy a single instance; the next lookup creates a fresh one
    pub fn destroy_instance(&self, bean: &BeanId) -> Result<bool, CoreError> {
        let instance = {
            let mut state = self.state.lock().map_err(|_| self.lock_error())?;
            match state.slots.remove(bean) {
                Some(Slot::Ready(instance)) => {
                    state.creation_order.retain(|id| id != bean);
                    instance
                }
                Some(constructing) => {
                    state.slots.insert(bean.clone(), constructing);
                    return Ok(false);
                }
                None => return Ok(false),
            }
        };
        instance.destroy()?;
        Ok(true)
    }

    /// Number of ready instances
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.slots.values().filter(|slot| matches!(slot, Slot::Ready(_))).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End the context: destroy every instance in reverse creation order
    pub fn terminate(&self) -> Result<(), CoreError> {
        let instances = {
            let mut state = self.state.lock().map_err(|_| self.lock_error())?;
            if state.terminated {
                return Ok(());
            }
            state.terminated = true;
            let order = std::mem::take(&mut state.creation_order);
            let mut instances = Vec::with_capacity(order.len());
            for id in order.iter().rev() {
                if let Some(Slot::Ready(instance)) = state.slots.remove(id) {
                    instances.push(instance);
                }
            }
            instances
        };
        self.constructed.notify_all();

        let count = instances.len();
        for instance in instances {
            let bean = instance.bean().id().clone();
            if let Err(e) = instance.destroy() {
                warn!(target: "beanstalk::context", bean = %bean, error = %e, "Destruction failed");
            }
        }
        debug!(
            target: "beanstalk::context",
            scope = %self.kind,
            key = %self.key,
            destroyed = count,
            "Context terminated"
        );
        Ok(())
    }
}

/// Clears a `Constructing` slot if the factory unwinds, so waiters retry
struct PendingSlot<'s> {
    store: &'s ContextStore,
    bean: &'s BeanId,
    armed: bool,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.store.state.lock() {
            state.slots.remove(self.bean);
        }
        self.store.constructed.notify_all();
    }
}

/// A context activated on the current thread that ends when dropped.
///
/// Termination also runs while unwinding, so a panic inside the scoped
/// work never leaves the context bound to the thread.
#[must_use = "the context ends as soon as the guard is dropped"]
pub struct ActiveContext<'m> {
    manager: &'m ContextManager,
    kind: ScopeKind,
    key: ContextKey,
    ended: bool,
}

impl ActiveContext<'_> {
    pub fn key(&self) -> ContextKey {
        self.key
    }

    /// Terminate now and report the outcome
    pub fn end(mut self) -> Result<(), CoreError> {
        self.ended = true;
        self.release()
    }

    fn release(&self) -> Result<(), CoreError> {
        if self.manager.thread_key(&self.kind) == Some(self.key) {
            self.manager.take_thread_key(&self.kind);
        }
        self.manager.terminate_key(self.key)
    }
}

impl Drop for ActiveContext<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(e) = self.release() {
            warn!(
                target: "beanstalk::context",
                scope = %self.kind,
                key = %self.key,
                error = %e,
                "Failed to end context"
            );
        }
    }
}

thread_local! {
    static ACTIVE_CONTEXTS: RefCell<HashMap<(Uuid, ScopeKind), ContextKey>> =
        RefCell::new(HashMap::new());
}

/// Tracks the active contexts of one container
#[derive(Debug)]
pub struct ContextManager {
    container_id: Uuid,
    application: Arc<ContextStore>,
    contexts: RwLock<HashMap<ContextKey, Arc<ContextStore>>>,
}

impl ContextManager {
    pub fn new(container_id: Uuid) -> Self {
        Self {
            container_id,
            application: Arc::new(ContextStore::new(ScopeKind::Application)),
            contexts: RwLock::new(HashMap::new()),
        }
    }

    pub fn application(&self) -> &Arc<ContextStore> {
        &self.application
    }

    fn thread_key(&self, kind: &ScopeKind) -> Option<ContextKey> {
        let slot = (self.container_id, kind.clone());
        ACTIVE_CONTEXTS.with(|active| active.borrow().get(&slot).copied())
    }

    fn set_thread_key(&self, kind: &ScopeKind, key: ContextKey) {
        ACTIVE_CONTEXTS.with(|active| {
            active.borrow_mut().insert((self.container_id, kind.clone()), key);
        });
    }

    fn take_thread_key(&self, kind: &ScopeKind) -> Option<ContextKey> {
        let slot = (self.container_id, kind.clone());
        ACTIVE_CONTEXTS.with(|active| active.borrow_mut().remove(&slot))
    }

    fn not_active(kind: &ScopeKind) -> CoreError {
        CoreError::ContextNotActive {
            scope: kind.to_string(),
        }
    }

    /// Start a new context of `kind` on the current thread
    pub fn activate(&self, kind: ScopeKind) -> Result<ContextKey, CoreError> {
        if kind == ScopeKind::Application || self.thread_key(&kind).is_some() {
            return Err(CoreError::ContextAlreadyActive {
                scope: kind.to_string(),
            });
        }

        let store = Arc::new(ContextStore::new(kind.clone()));
        let key = store.key();
        self.contexts
            .write()
            .map_err(|_| CoreError::lock("contexts"))?
            .insert(key, store);
        self.set_thread_key(&kind, key);

        debug!(target: "beanstalk::context", scope = %kind, key = %key, "Context activated");
        Ok(key)
    }

    /// Start a new context of `kind` that ends when the returned guard drops
    pub fn activate_scoped(&self, kind: ScopeKind) -> Result<ActiveContext<'_>, CoreError> {
        let key = self.activate(kind.clone())?;
        Ok(ActiveContext {
            manager: self,
            kind,
            key,
            ended: false,
        })
    }

    /// Re-enter an active context (started elsewhere) on the current thread
    pub fn resume(&self, kind: ScopeKind, key: ContextKey) -> Result<(), CoreError> {
        if self.thread_key(&kind).is_some() {
            return Err(CoreError::ContextAlreadyActive {
                scope: kind.to_string(),
            });
        }
        let known = self
            .contexts
            .read()
            .map_err(|_| CoreError::lock("contexts"))?
            .get(&key)
            .is_some_and(|store| *store.kind() == kind);
        if !known {
            return Err(Self::not_active(&kind));
        }

        self.set_thread_key(&kind, key);
        debug!(target: "beanstalk::context", scope = %kind, key = %key, "Context resumed");
        Ok(())
    }

    /// Leave the context on this thread without ending it
    pub fn deactivate(&self, kind: ScopeKind) -> Result<ContextKey, CoreError> {
        let key = self.take_thread_key(&kind).ok_or_else(|| Self::not_active(&kind))?;
        debug!(target: "beanstalk::context", scope = %kind, key = %key, "Context deactivated");
        Ok(key)
    }

    /// End the context active on this thread, destroying its instances
    pub fn terminate(&self, kind: ScopeKind) -> Result<(), CoreError> {
        let key = self.take_thread_key(&kind).ok_or_else(|| Self::not_active(&kind))?;
        self.terminate_key(key)
    }

    /// End a context by key, whichever thread it is active on
    pub fn terminate_key(&self, key: ContextKey) -> Result<(), CoreError> {
        let store = self
            .contexts
            .write()
            .map_err(|_| CoreError::lock("contexts"))?
            .remove(&key);
        match store {
            Some(store) => store.terminate(),
            None => Ok(()),
        }
    }

    pub fn is_active(&self, kind: &ScopeKind) -> bool {
        match kind {
            ScopeKind::Application => true,
            _ => self.current_store(kind).is_ok(),
        }
    }

    pub fn current_key(&self, kind: &ScopeKind) -> Option<ContextKey> {
        match kind {
            ScopeKind::Application => Some(self.application.key()),
            _ => self.thread_key(kind),
        }
    }

    /// Store of the context of `kind` active on this thread
    pub fn current_store(&self, kind: &ScopeKind) -> Result<Arc<ContextStore>, CoreError> {
        if *kind == ScopeKind::Application {
            return Ok(self.application.clone());
        }
        let key = self.thread_key(kind).ok_or_else(|| Self::not_active(kind))?;
        let store = self
            .contexts
            .read()
            .map_err(|_| CoreError::lock("contexts"))?
            .get(&key)
            .cloned();
        match store {
            Some(store) => Ok(store),
            None => {
                // terminated from another thread
                self.take_thread_key(kind);
                Err(Self::not_active(kind))
            }
        }
    }

    /// Terminate every context, the application context last
    pub fn shutdown(&self) -> Result<(), CoreError> {
        let stores: Vec<Arc<ContextStore>> = self
            .contexts
            .write()
            .map_err(|_| CoreError::lock("contexts"))?
            .drain()
            .map(|(_, store)| store)
            .collect();
        let count = stores.len();
        for store in stores {
            store.terminate()?;
        }
        self.application.terminate()?;

        let container_id = self.container_id;
        ACTIVE_CONTEXTS.with(|active| active.borrow_mut().retain(|(id, _), _| *id != container_id));
        info!(target: "beanstalk::context", contexts = count + 1, "All contexts terminated");
        Ok(())
    }
}
