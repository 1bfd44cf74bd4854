//! Integration tests for synchronous and asynchronous event delivery
//!
//! Covers observer ordering, failure propagation, covariant event types,
//! conditional reception and observer parameter injection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beanstalk_core::container::ContainerBuilder;
use beanstalk_core::{
    BeanDefinition, Container, ContainerConfig, CoreError, NotifyMode, ObserverDefinition,
    ObserverDispatchError, ObserverId, Qualifier, Reception, ScopeKind, TypeSet,
};

type Log = Arc<Mutex<Vec<String>>>;

fn recording(id: &str, log: &Log, priority: i32) -> ObserverDefinition {
    let log = log.clone();
    let name = id.to_string();
    ObserverDefinition::builder::<String>(id)
        .priority(priority)
        .notify(move |event, _| {
            log.lock().unwrap().push(format!("{}:{}", name, event));
            Ok(())
        })
        .build()
        .unwrap()
}

fn failing(id: &str, priority: i32, asynchronous: bool) -> ObserverDefinition {
    let message = format!("{} rejected the event", id);
    let builder = ObserverDefinition::builder::<String>(id).priority(priority);
    let builder = if asynchronous { builder.asynchronous() } else { builder };
    builder
        .notify(move |_, _| Err(message.clone().into()))
        .build()
        .unwrap()
}

fn build(configure: impl FnOnce(&mut ContainerBuilder)) -> Container {
    let mut builder = ContainerBuilder::new();
    configure(&mut builder);
    builder.build().unwrap()
}

#[test]
fn test_sync_observers_run_in_priority_order() {
    let log = Log::default();
    let container = build(|b| {
        b.register_observer(recording("late", &log, 3000))
            .register_observer(recording("early", &log, 100))
            .register_observer(recording("middle", &log, 2000));
    });

    container.fire("ping".to_string(), []).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["early:ping", "middle:ping", "late:ping"]);
}

#[test]
fn test_sync_failure_aborts_remaining_observers() {
    let log = Log::default();
    let container = build(|b| {
        b.register_observer(recording("first", &log, 10))
            .register_observer(failing("broken", 20, false))
            .register_observer(recording("never", &log, 30));
    });

    let error = container.fire("ping".to_string(), []).unwrap_err();
    assert!(error.is_dispatch());
    match error {
        CoreError::ObserverDispatch(ObserverDispatchError::Single { observer, source }) => {
            assert_eq!(observer, "broken");
            assert_eq!(source.to_string(), "broken rejected the event");
        }
        other => panic!("unexpected error: {other}"),
    }
    // already notified observers keep their effects
    assert_eq!(*log.lock().unwrap(), vec!["first:ping"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_and_async_observers_are_separate() {
    let sync_calls = Arc::new(AtomicUsize::new(0));
    let async_calls = Arc::new(AtomicUsize::new(0));
    let (sync_counter, async_counter) = (sync_calls.clone(), async_calls.clone());

    let container = build(|b| {
        b.register_observer(
            ObserverDefinition::builder::<String>("sync")
                .notify(move |event, ctx| {
                    assert_eq!(event, "ping");
                    assert_eq!(ctx.metadata().mode(), NotifyMode::Sync);
                    sync_counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        )
        .register_observer(
            ObserverDefinition::builder::<String>("async")
                .asynchronous()
                .notify(move |event, ctx| {
                    assert_eq!(event, "ping");
                    assert_eq!(ctx.metadata().mode(), NotifyMode::Async);
                    std::thread::sleep(Duration::from_millis(20));
                    async_counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        );
    });

    container.fire("ping".to_string(), []).unwrap();
    assert_eq!(sync_calls.load(Ordering::SeqCst), 1);
    assert_eq!(async_calls.load(Ordering::SeqCst), 0);

    let event = container.fire_async("ping".to_string(), []).await.unwrap();
    assert_eq!(event.as_str(), "ping");
    assert_eq!(sync_calls.load(Ordering::SeqCst), 1);
    assert_eq!(async_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_failures_are_aggregated() {
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();

    let container = build(|b| {
        b.register_observer(failing("first", 10, true))
            .register_observer(failing("second", 20, true))
            .register_observer(
                ObserverDefinition::builder::<String>("healthy")
                    .asynchronous()
                    .notify(move |_, _| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            );
    });

    let error = container.fire_async("ping".to_string(), []).await.unwrap_err();
    match error {
        CoreError::ObserverDispatch(dispatch @ ObserverDispatchError::Composite { .. }) => {
            let mut failed = dispatch.failed_observers();
            failed.sort_unstable();
            assert_eq!(failed, vec!["first", "second"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    // a failing observer does not cancel the others
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_panic_is_reported() {
    let container = build(|b| {
        b.register_observer(
            ObserverDefinition::builder::<u64>("panicking")
                .asynchronous()
                .notify(|_, _| panic!("observer blew up"))
                .build()
                .unwrap(),
        );
    });

    let error = container.fire_async(1u64, []).await.unwrap_err();
    assert!(error.to_string().contains("panicking"));
    assert!(error.to_string().contains("panicked"));
}

#[tokio::test]
async fn test_async_without_observers_completes_with_event() {
    let container = build(|b| {
        b.register_observer(recording("sync-only", &Log::default(), 10));
    });

    let event = container.fire_async("lonely".to_string(), []).await.unwrap();
    assert_eq!(*event, "lonely");
}

#[test]
fn test_blocking_wait_outside_runtime() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let container = build(|b| {
        b.register_observer(
            ObserverDefinition::builder::<String>("async")
                .asynchronous()
                .notify(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        );
    });

    for _ in 0..3 {
        container.fire_async("tick".to_string(), []).blocking_wait().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// --- covariance and qualifiers ---------------------------------------------

trait DomainEvent: Send + Sync {
    fn name(&self) -> &str;
}

struct OrderPlaced {
    order: u32,
}

impl DomainEvent for OrderPlaced {
    fn name(&self) -> &str {
        "order-placed"
    }
}

#[test]
fn test_supertype_observers_receive_subtype_events() {
    let log = Log::default();
    let (general, specific) = (log.clone(), log.clone());

    let container = build(|b| {
        b.event_types(
            TypeSet::of::<OrderPlaced>()
                .with::<dyn DomainEvent>(|e| e as Arc<dyn DomainEvent>)
                .build(),
        )
        .register_observer(
            ObserverDefinition::builder::<dyn DomainEvent>("all-events")
                .priority(1)
                .notify(move |event, _| {
                    general.lock().unwrap().push(event.name().to_string());
                    Ok(())
                })
                .build()
                .unwrap(),
        )
        .register_observer(
            ObserverDefinition::builder::<OrderPlaced>("orders")
                .priority(2)
                .notify(move |event, ctx| {
                    assert!(ctx.metadata().fired_type().type_name().ends_with("OrderPlaced"));
                    specific.lock().unwrap().push(format!("order {}", event.order));
                    Ok(())
                })
                .build()
                .unwrap(),
        );
    });

    container.fire(OrderPlaced { order: 7 }, []).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["order-placed", "order 7"]);
}

#[test]
fn test_observer_qualifiers_filter_events() {
    let log = Log::default();
    let (any, blue) = (log.clone(), log.clone());

    let container = build(|b| {
        b.register_observer(
            ObserverDefinition::builder::<String>("any")
                .priority(1)
                .notify(move |event, _| {
                    any.lock().unwrap().push(format!("any:{}", event));
                    Ok(())
                })
                .build()
                .unwrap(),
        )
        .register_observer(
            ObserverDefinition::builder::<String>("blue")
                .priority(2)
                .qualifier(Qualifier::new("Blue"))
                .notify(move |event, ctx| {
                    assert!(ctx.metadata().qualifiers().contains(&Qualifier::new("Blue")));
                    blue.lock().unwrap().push(format!("blue:{}", event));
                    Ok(())
                })
                .build()
                .unwrap(),
        );
    });

    container.fire("plain".to_string(), []).unwrap();
    container.fire("sky".to_string(), [Qualifier::new("Blue")]).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["any:plain", "any:sky", "blue:sky"]);
}

// --- owners, reception and parameters --------------------------------------

struct Inventory {
    reserved: AtomicUsize,
}

struct Mailer {
    sent: Mutex<Vec<String>>,
}

fn inventory_bean() -> BeanDefinition {
    BeanDefinition::builder::<Inventory>("inventory")
        .request_scoped()
        .factory(|_| {
            Ok(Inventory {
                reserved: AtomicUsize::new(0),
            })
        })
        .build()
        .unwrap()
}

fn mailer_bean() -> BeanDefinition {
    BeanDefinition::builder::<Mailer>("mailer")
        .singleton()
        .factory(|_| {
            Ok(Mailer {
                sent: Mutex::new(Vec::new()),
            })
        })
        .build()
        .unwrap()
}

fn reserve(reception: Reception) -> ObserverDefinition {
    ObserverDefinition::builder::<u32>("reserve")
        .owner("inventory")
        .reception(reception)
        .notify(|quantity, ctx| {
            let inventory = ctx.owner::<Inventory>().ok_or("owner missing")?;
            inventory.reserved.fetch_add(*quantity as usize, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap()
}

#[test]
fn test_if_exists_observer_never_creates_owner() {
    let container = build(|b| {
        b.register_bean(inventory_bean())
            .register_observer(reserve(Reception::IfExists));
    });

    container
        .with_request(|| {
            container.fire(3u32, []).unwrap();
            let inventory = container.get::<Inventory>([]).unwrap();
            assert_eq!(inventory.reserved.load(Ordering::SeqCst), 0);

            container.fire(5u32, []).unwrap();
            assert_eq!(inventory.reserved.load(Ordering::SeqCst), 5);
        })
        .unwrap();

    // no active request: conditional observers are skipped, not failed
    container.fire(1u32, []).unwrap();
}

#[test]
fn test_always_observer_creates_owner_in_active_context() {
    let container = build(|b| {
        b.register_bean(inventory_bean())
            .register_observer(reserve(Reception::Always));
    });

    let error = container.fire(2u32, []).unwrap_err();
    assert!(error.to_string().contains("No active context"));

    container
        .with_request(|| {
            container.fire(2u32, []).unwrap();
            assert_eq!(container.get::<Inventory>([]).unwrap().reserved.load(Ordering::SeqCst), 2);
        })
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_observer_gets_its_own_request_context() {
    let container = build(|b| {
        b.register_bean(inventory_bean()).register_observer(
            ObserverDefinition::builder::<u32>("reserve-async")
                .owner("inventory")
                .asynchronous()
                .notify(|quantity, ctx| {
                    let inventory = ctx.owner::<Inventory>().ok_or("owner missing")?;
                    inventory.reserved.fetch_add(*quantity as usize, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        );
    });

    container.fire_async(4u32, []).await.unwrap();
    assert!(!container.is_active(&ScopeKind::Request));
}

struct Cart;

#[test]
fn test_panicking_async_observer_does_not_leak_request_context() {
    let created = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let (on_create, on_destroy) = (created.clone(), destroyed.clone());

    // one blocking thread, so both firings run on the same worker
    let mut builder = ContainerBuilder::with_config(ContainerConfig {
        async_workers: 1,
        ..ContainerConfig::default()
    });
    builder
        .register_bean(
            BeanDefinition::builder::<Cart>("cart")
                .request_scoped()
                .factory(move |_| {
                    on_create.fetch_add(1, Ordering::SeqCst);
                    Ok(Cart)
                })
                .on_destroy(move |_| {
                    on_destroy.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        )
        .register_observer(
            ObserverDefinition::builder::<u32>("checkout")
                .owner("cart")
                .asynchronous()
                .notify(|step, _| {
                    if *step == 1 {
                        panic!("checkout crashed");
                    }
                    Ok(())
                })
                .build()
                .unwrap(),
        );
    let container = builder.build().unwrap();

    let error = container.fire_async(1u32, []).blocking_wait().unwrap_err();
    assert!(error.to_string().contains("panicked"));
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);

    container.fire_async(2u32, []).blocking_wait().unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_observer_parameters_are_injected() {
    let container = build(|b| {
        b.register_bean(mailer_bean()).register_observer(
            ObserverDefinition::builder::<String>("welcome")
                .inject::<Mailer>([])
                .synthetic()
                .notify(|user, ctx| {
                    let mailer = ctx.injected::<Mailer>(0)?;
                    mailer.sent.lock().unwrap().push(format!("welcome {}", user));
                    Ok(())
                })
                .build()
                .unwrap(),
        );
    });

    container.fire("ada".to_string(), []).unwrap();
    let mailer = container.get::<Mailer>([]).unwrap();
    assert_eq!(*mailer.sent.lock().unwrap(), vec!["welcome ada"]);
    assert!(container.observers().all()[0].is_synthetic());
}

#[test]
fn test_unsatisfied_observer_parameter_fails_startup() {
    let mut builder = ContainerBuilder::new();
    builder.register_observer(
        ObserverDefinition::builder::<String>("welcome")
            .inject::<Mailer>([])
            .notify(|_, _| Ok(()))
            .build()
            .unwrap(),
    );

    let error = builder.build().unwrap_err();
    assert!(error.validation_errors()[0].is_unsatisfied());
    assert!(error.to_string().contains("observer welcome#0"));
}

#[test]
fn test_removed_observer_is_not_notified() {
    let log = Log::default();
    let container = build(|b| {
        b.register_observer(recording("kept", &log, 1))
            .register_observer(recording("removed", &log, 2))
            .remove_observer(&ObserverId::new("removed"));
    });

    container.fire("ping".to_string(), []).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["kept:ping"]);
}

#[test]
fn test_illegal_observer_declarations() {
    let mut builder = ContainerBuilder::new();
    builder
        .register_bean(
            BeanDefinition::builder::<Mailer>("dependent-mailer")
                .dependent()
                .factory(|_| {
                    Ok(Mailer {
                        sent: Mutex::new(Vec::new()),
                    })
                })
                .build()
                .unwrap(),
        )
        .register_observer(
            ObserverDefinition::builder::<String>("orphan")
                .owner("missing")
                .notify(|_, _| Ok(()))
                .build()
                .unwrap(),
        )
        .register_observer(
            ObserverDefinition::builder::<String>("conditional")
                .owner("dependent-mailer")
                .reception(Reception::IfExists)
                .notify(|_, _| Ok(()))
                .build()
                .unwrap(),
        );

    let error = builder.build().unwrap_err();
    assert_eq!(error.validation_errors().len(), 2);
}
