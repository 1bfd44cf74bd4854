//! Event firing.
//!
//! `fire` notifies the synchronous observers on the calling thread and stops
//! at the first failure. `fire_async` schedules the asynchronous observers on
//! the blocking pool of a tokio runtime and hands back a [`CompletionHandle`]
//! that resolves once all of them have finished, with every failure collected.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::runtime::{Builder, Handle as RuntimeHandle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::config::ConfigError;
use crate::container::descriptor::{AnyArc, TypeKey, TypeSet};
use crate::container::instance::{Dependencies, InstanceManager};
use crate::container::lifecycle::ContextualInstance;
use crate::container::qualifier::{Qualifier, QualifierSet};
use crate::container::scope::{BeanScope, ScopeKind};
use crate::container::validation::Consumer;
use crate::errors::{CoreError, ObserverDispatchError, ObserverError, ObserverFailure};
use crate::events::observer::{
    EventMetadata, NotifyMode, ObserverContext, ObserverDefinition, Reception,
};
use crate::events::registry::ObserverRegistry;

type DispatchOutcome = Result<(), ObserverDispatchError>;

enum CompletionState {
    Ready(Option<CoreError>),
    Pending(oneshot::Receiver<DispatchOutcome>),
}

/// Completion of an asynchronous firing. Resolves to the fired event once
/// every scheduled observer has finished.
pub struct CompletionHandle<E> {
    event: Arc<E>,
    state: CompletionState,
}

impl<E> CompletionHandle<E> {
    fn completed(event: Arc<E>) -> Self {
        Self {
            event,
            state: CompletionState::Ready(None),
        }
    }

    fn failed(event: Arc<E>, error: CoreError) -> Self {
        Self {
            event,
            state: CompletionState::Ready(Some(error)),
        }
    }

    fn pending(event: Arc<E>, receiver: oneshot::Receiver<DispatchOutcome>) -> Self {
        Self {
            event,
            state: CompletionState::Pending(receiver),
        }
    }

    /// The fired event, available before completion
    pub fn event(&self) -> &Arc<E> {
        &self.event
    }

    /// Block the current thread until completion.
    ///
    /// Must not be called from inside an async context; await the handle there.
    pub fn blocking_wait(self) -> Result<Arc<E>, CoreError> {
        match self.state {
            CompletionState::Ready(None) => Ok(self.event),
            CompletionState::Ready(Some(error)) => Err(error),
            CompletionState::Pending(receiver) => match receiver.blocking_recv() {
                Ok(Ok(())) => Ok(self.event),
                Ok(Err(error)) => Err(error.into()),
                Err(_) => Err(CoreError::ContainerShutDown),
            },
        }
    }
}

impl<E> Future for CompletionHandle<E> {
    type Output = Result<Arc<E>, CoreError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            CompletionState::Ready(error) => Poll::Ready(match error.take() {
                Some(error) => Err(error),
                None => Ok(this.event.clone()),
            }),
            CompletionState::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(outcome) => {
                    let result = match outcome {
                        Ok(Ok(())) => Ok(this.event.clone()),
                        Ok(Err(error)) => Err(error.into()),
                        Err(_) => Err(CoreError::ContainerShutDown),
                    };
                    this.state = CompletionState::Ready(None);
                    Poll::Ready(result)
                }
            },
        }
    }
}

/// Runtime used when `fire_async` is called outside of any tokio runtime
struct DispatchRuntime {
    workers: usize,
    owned: Mutex<Option<Runtime>>,
}

impl DispatchRuntime {
    fn new(workers: usize) -> Self {
        Self {
            workers,
            owned: Mutex::new(None),
        }
    }

    fn handle(&self) -> Result<RuntimeHandle, CoreError> {
        if let Ok(handle) = RuntimeHandle::try_current() {
            return Ok(handle);
        }

        let mut owned = self.owned.lock().map_err(|_| CoreError::lock("dispatch_runtime"))?;
        if let Some(runtime) = owned.as_ref() {
            return Ok(runtime.handle().clone());
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(self.workers)
            .max_blocking_threads(self.workers)
            .thread_name("beanstalk-observer")
            .enable_all()
            .build()
            .map_err(ConfigError::from)?;
        let handle = runtime.handle().clone();
        *owned = Some(runtime);
        debug!(target: "beanstalk::events", workers = self.workers, "Started observer runtime");
        Ok(handle)
    }
}

impl Drop for DispatchRuntime {
    fn drop(&mut self) {
        if let Ok(mut owned) = self.owned.lock() {
            if let Some(runtime) = owned.take() {
                runtime.shutdown_background();
            }
        }
    }
}

/// Delivers fired events to matching observers
pub struct EventDispatcher {
    observers: Arc<ObserverRegistry>,
    event_types: HashMap<TypeKey, TypeSet>,
    manager: Arc<InstanceManager>,
    runtime: DispatchRuntime,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.observers.len())
            .field("event_types", &self.event_types.len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new(
        observers: Arc<ObserverRegistry>,
        event_types: HashMap<TypeKey, TypeSet>,
        manager: Arc<InstanceManager>,
        async_workers: usize,
    ) -> Self {
        Self {
            observers,
            event_types,
            manager,
            runtime: DispatchRuntime::new(async_workers.max(1)),
        }
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Type set of an event class: registered supertypes, or the type alone
    fn types_of<E: Send + Sync + 'static>(&self) -> TypeSet {
        self.event_types
            .get(&TypeKey::of::<E>())
            .cloned()
            .unwrap_or_else(|| TypeSet::of::<E>().build())
    }

    /// Notify the synchronous observers in ascending priority on this thread.
    /// The first failure stops the firing and is returned; observers already
    /// notified keep their effects.
    pub fn fire<E: Send + Sync + 'static>(
        &self,
        event: E,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<(), CoreError> {
        self.fire_shared(Arc::new(event), qualifiers)
    }

    pub fn fire_shared<E: Send + Sync + 'static>(
        &self,
        event: Arc<E>,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> Result<(), CoreError> {
        if self.manager.is_shut_down() {
            return Err(CoreError::ContainerShutDown);
        }
        let types = self.types_of::<E>();
        let qualifiers = QualifierSet::for_event(qualifiers);
        let observers = self.observers.resolve(&types, &qualifiers, NotifyMode::Sync);
        let metadata = EventMetadata::new(qualifiers, TypeKey::of::<E>(), NotifyMode::Sync);
        let value: AnyArc = event;

        debug!(
            target: "beanstalk::events",
            event = %metadata.fired_type(),
            qualifiers = %metadata.qualifiers(),
            observers = observers.len(),
            "Firing event"
        );

        for observer in observers {
            if let Err(source) = notify(&self.manager, &observer, &types, &value, &metadata) {
                warn!(
                    target: "beanstalk::events",
                    observer = %observer.id(),
                    error = %source,
                    "Observer failed; remaining observers skipped"
                );
                return Err(ObserverDispatchError::Single {
                    observer: observer.id().to_string(),
                    source,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Schedule the asynchronous observers and return immediately
    pub fn fire_async<E: Send + Sync + 'static>(
        &self,
        event: E,
        qualifiers: impl IntoIterator<Item = Qualifier>,
    ) -> CompletionHandle<E> {
        let event = Arc::new(event);
        if self.manager.is_shut_down() {
            return CompletionHandle::failed(event, CoreError::ContainerShutDown);
        }

        let types = self.types_of::<E>();
        let qualifiers = QualifierSet::for_event(qualifiers);
        let observers = self.observers.resolve(&types, &qualifiers, NotifyMode::Async);
        if observers.is_empty() {
            return CompletionHandle::completed(event);
        }

        let runtime = match self.runtime.handle() {
            Ok(runtime) => runtime,
            Err(e) => return CompletionHandle::failed(event, e),
        };

        let metadata = Arc::new(EventMetadata::new(
            qualifiers,
            TypeKey::of::<E>(),
            NotifyMode::Async,
        ));
        let types = Arc::new(types);
        let value: AnyArc = event.clone();

        debug!(
            target: "beanstalk::events",
            event = %metadata.fired_type(),
            observers = observers.len(),
            "Scheduling asynchronous observers"
        );

        let tasks: Vec<_> = observers
            .into_iter()
            .map(|observer| {
                let name = observer.id().to_string();
                let manager = self.manager.clone();
                let types = types.clone();
                let value = value.clone();
                let metadata = metadata.clone();
                let task = runtime.spawn_blocking(move || {
                    notify_async(&manager, &observer, &types, &value, &metadata)
                });
                (name, task)
            })
            .collect();

        let (sender, receiver) = oneshot::channel();
        runtime.spawn(async move {
            let mut failures = Vec::new();
            for (observer, task) in tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => failures.push(ObserverFailure { observer, error }),
                    Err(join_error) => failures.push(ObserverFailure {
                        observer,
                        error: format!("observer panicked: {}", join_error).into(),
                    }),
                }
            }

            let outcome = if failures.is_empty() {
                Ok(())
            } else {
                for failure in &failures {
                    error!(
                        target: "beanstalk::events",
                        observer = %failure.observer,
                        error = %failure.error,
                        "Asynchronous observer failed"
                    );
                }
                Err(ObserverDispatchError::Composite { failures })
            };
            // the caller may have dropped the handle
            let _ = sender.send(outcome);
        });

        CompletionHandle::pending(event, receiver)
    }
}

/// Runs one asynchronous observer, giving a request-scoped owner a request
/// context of its own for the duration of the call
fn notify_async(
    manager: &InstanceManager,
    observer: &ObserverDefinition,
    types: &TypeSet,
    event: &AnyArc,
    metadata: &EventMetadata,
) -> Result<(), ObserverError> {
    let needs_request = observer.reception() == Reception::Always
        && observer
            .owner()
            .and_then(|id| manager.registry().get(id))
            .is_some_and(|bean| *bean.scope() == BeanScope::RequestScoped)
        && !manager.contexts().is_active(&ScopeKind::Request);

    if !needs_request {
        return notify(manager, observer, types, event, metadata);
    }

    let request = manager.contexts().activate_scoped(ScopeKind::Request)?;
    let result = notify(manager, observer, types, event, metadata);
    if let Err(e) = request.end() {
        warn!(
            target: "beanstalk::events",
            observer = %observer.id(),
            error = %e,
            "Failed to end observer request context"
        );
    }
    result
}

/// Dependent owner created for a single notification
struct TransientOwner<'o> {
    observer: &'o ObserverDefinition,
    instance: Option<ContextualInstance>,
}

impl Drop for TransientOwner<'_> {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        if let Err(e) = instance.destroy() {
            warn!(
                target: "beanstalk::events",
                observer = %self.observer.id(),
                error = %e,
                "Failed to destroy dependent observer owner"
            );
        }
    }
}

fn notify(
    manager: &InstanceManager,
    observer: &ObserverDefinition,
    types: &TypeSet,
    event: &AnyArc,
    metadata: &EventMetadata,
) -> Result<(), ObserverError> {
    let view = types
        .upcast_erased(&observer.event_type(), event)
        .ok_or("event is not assignable to the observed type")?;

    let mut dependent_owner = TransientOwner {
        observer,
        instance: None,
    };
    let owner = match observer.owner().and_then(|id| manager.registry().get(id)) {
        None => None,
        Some(bean) if observer.reception() == Reception::IfExists => match manager.existing(bean)? {
            Some(instance) => Some((bean.clone(), instance)),
            None => {
                debug!(
                    target: "beanstalk::events",
                    observer = %observer.id(),
                    "Owner does not exist; observer skipped"
                );
                return Ok(());
            }
        },
        Some(bean) if bean.scope().is_dependent() => {
            let instance = manager.create_dependent(bean)?;
            let value = instance.value().clone();
            dependent_owner.instance = Some(instance);
            Some((bean.clone(), value))
        }
        Some(bean) => Some((bean.clone(), manager.lookup_or_create(bean)?)),
    };

    let dependencies = Dependencies::new(
        manager,
        Consumer::Observer(observer.id().clone()),
        observer.injection_points(),
    );
    let context = ObserverContext::new(metadata, owner, dependencies);
    let result = (observer.method())(&*view, &context);

    // injected dependents first, then a dependent owner
    context.into_dependencies().destroy_dependents();
    drop(dependent_owner);

    debug!(
        target: "beanstalk::events",
        observer = %observer.id(),
        mode = %metadata.mode(),
        ok = result.is_ok(),
        "Observer notified"
    );
    result
}
