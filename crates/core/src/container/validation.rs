use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info};

use crate::container::descriptor::{BeanDefinition, BeanId, InjectionPoint};
use crate::container::provider::{ProvidedResource, ResourceProvider};
use crate::container::registry::BeanRegistry;
use crate::container::resolver::{DependencyGraph, ResolutionResult, Resolver};
use crate::container::scope::BeanScope;
use crate::errors::{CoreError, ValidationError};
use crate::events::observer::{ObserverDefinition, ObserverId, Reception};

/// Owner of an injection point
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Consumer {
    Bean(BeanId),
    Observer(ObserverId),
}

impl std::fmt::Display for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Consumer::Bean(id) => write!(f, "{}", id),
            Consumer::Observer(id) => write!(f, "observer {}", id),
        }
    }
}

/// Injection point addressed by its consumer and declaration index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectionPointId {
    pub consumer: Consumer,
    pub index: usize,
}

impl InjectionPointId {
    pub fn new(consumer: Consumer, index: usize) -> Self {
        Self { consumer, index }
    }
}

impl std::fmt::Display for InjectionPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.consumer, self.index)
    }
}

/// What an injection point was resolved to
#[derive(Debug, Clone)]
pub enum Wiring {
    Bean {
        bean: Arc<BeanDefinition>,
        /// The target is normal-scoped and is consumed through a client proxy
        via_proxy: bool,
    },
    Resource(ProvidedResource),
}

impl Wiring {
    pub fn bean(&self) -> Option<&Arc<BeanDefinition>> {
        match self {
            Wiring::Bean { bean, .. } => Some(bean),
            Wiring::Resource(_) => None,
        }
    }

    pub fn is_proxied(&self) -> bool {
        matches!(self, Wiring::Bean { via_proxy: true, .. })
    }
}

/// Result of a successful deployment validation
#[derive(Debug, Default)]
pub struct ValidationReport {
    wiring: HashMap<InjectionPointId, Wiring>,
    supported_cycles: Vec<Vec<BeanId>>,
    construction_order: Vec<BeanId>,
}

impl ValidationReport {
    /// Cached resolution of an injection point
    pub fn wiring(&self, id: &InjectionPointId) -> Option<&Wiring> {
        self.wiring.get(id)
    }

    pub fn wiring_count(&self) -> usize {
        self.wiring.len()
    }

    /// Cycles made only of normal-scoped beans, each as a chain `a -> .. -> a`
    pub fn supported_cycles(&self) -> &[Vec<BeanId>] {
        &self.supported_cycles
    }

    /// Beans ordered so that direct (non-proxied) dependencies come first
    pub fn construction_order(&self) -> &[BeanId] {
        &self.construction_order
    }

    /// Resolved graph as JSON: beans, injection edges, supported cycles and
    /// construction order
    pub fn to_json(&self, registry: &BeanRegistry) -> Result<String, CoreError> {
        let beans: Vec<_> = registry
            .all_beans()
            .iter()
            .map(|bean| {
                json!({
                    "id": bean.id().as_str(),
                    "scope": bean.scope().as_str(),
                    "types": bean.types().keys().map(|k| k.type_name()).collect::<Vec<_>>(),
                    "qualifiers": bean.qualifiers().to_string(),
                    "alternative_priority": bean.alternative_priority(),
                })
            })
            .collect();

        let mut wiring: Vec<_> = self.wiring.iter().collect();
        wiring.sort_by_key(|(id, _)| id.to_string());
        let edges: Vec<_> = wiring
            .into_iter()
            .map(|(id, wiring)| match wiring {
                Wiring::Bean { bean, via_proxy } => json!({
                    "injection_point": id.to_string(),
                    "bean": bean.id().as_str(),
                    "via_proxy": via_proxy,
                }),
                Wiring::Resource(resource) => json!({
                    "injection_point": id.to_string(),
                    "provider": resource.provider(),
                }),
            })
            .collect();

        let ids = |chain: &[BeanId]| {
            chain
                .iter()
                .map(|id| id.as_str().to_string())
                .collect::<Vec<_>>()
        };
        let cycles: Vec<_> = self.supported_cycles.iter().map(|c| ids(c.as_slice())).collect();
        let graph = json!({
            "beans": beans,
            "edges": edges,
            "supported_cycles": cycles,
            "construction_order": ids(self.construction_order.as_slice()),
        });
        Ok(serde_json::to_string_pretty(&graph)?)
    }
}

/// Validates the whole bean graph once, before the container starts.
///
/// Every problem found is collected; the deployment fails with all of them
/// together rather than with the first one.
pub struct GraphValidator<'a> {
    registry: &'a BeanRegistry,
    observers: &'a [Arc<ObserverDefinition>],
    providers: &'a [Arc<dyn ResourceProvider>],
}

impl<'a> GraphValidator<'a> {
    pub fn new(registry: &'a BeanRegistry) -> Self {
        Self {
            registry,
            observers: &[],
            providers: &[],
        }
    }

    pub fn with_observers(mut self, observers: &'a [Arc<ObserverDefinition>]) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_providers(mut self, providers: &'a [Arc<dyn ResourceProvider>]) -> Self {
        self.providers = providers;
        self
    }

    pub fn validate(&self) -> Result<ValidationReport, CoreError> {
        let mut errors = Vec::new();
        let mut report = ValidationReport::default();
        let mut graph = DependencyGraph::new();

        for bean in self.registry.all_beans() {
            graph.add_bean(bean.id());
            let consumer = Consumer::Bean(bean.id().clone());
            for (index, point) in bean.injection_points().iter().enumerate() {
                let id = InjectionPointId::new(consumer.clone(), index);
                match self.wire(&id, point) {
                    Ok(wiring) => {
                        if let Wiring::Bean { bean: target, via_proxy } = &wiring {
                            graph.add_dependency(bean.id(), target.id(), *via_proxy);
                        }
                        report.wiring.insert(id, wiring);
                    }
                    Err(e) => errors.push(e),
                }
            }
        }

        for observer in self.observers {
            errors.extend(self.check_observer(observer));
            let consumer = Consumer::Observer(observer.id().clone());
            for (index, point) in observer.injection_points().iter().enumerate() {
                let id = InjectionPointId::new(consumer.clone(), index);
                match self.wire(&id, point) {
                    Ok(wiring) => {
                        report.wiring.insert(id, wiring);
                    }
                    Err(e) => errors.push(e),
                }
            }
        }

        for component in graph.cyclic_components() {
            let pseudo = component
                .iter()
                .find(|id| self.registry.get(id).is_some_and(|b| b.scope().is_pseudo()));
            match pseudo {
                Some(start) => {
                    let cycle = graph.cycle_through(start, &component);
                    errors.push(ValidationError::IllegalCircularDependency {
                        cycle: cycle.iter().map(|id| id.to_string()).collect(),
                    });
                }
                None => {
                    let cycle = graph.cycle_through(&component[0], &component);
                    debug!(
                        target: "beanstalk::validation",
                        cycle = %join(&cycle),
                        "Normal-scoped cycle broken by client proxies"
                    );
                    report.supported_cycles.push(cycle);
                }
            }
        }

        if !errors.is_empty() {
            error!(
                target: "beanstalk::validation",
                problems = errors.len(),
                "Deployment validation failed"
            );
            for problem in &errors {
                error!(target: "beanstalk::validation", "{}", problem);
            }
            return Err(CoreError::Deployment { errors });
        }

        report.construction_order = graph.construction_order();
        info!(
            target: "beanstalk::validation",
            beans = self.registry.len(),
            observers = self.observers.len(),
            injection_points = report.wiring.len(),
            supported_cycles = report.supported_cycles.len(),
            "Deployment validated"
        );
        Ok(report)
    }

    fn wire(
        &self,
        id: &InjectionPointId,
        point: &InjectionPoint,
    ) -> Result<Wiring, ValidationError> {
        let required = point.required_type();
        if let Some(resource) = self
            .providers
            .iter()
            .find_map(|p| p.provide(&required, point.annotations()))
        {
            return Ok(Wiring::Resource(resource));
        }

        match Resolver::new(self.registry).resolve(&required, point.qualifiers()) {
            ResolutionResult::Unique(bean) => {
                let via_proxy = bean.scope().is_normal();
                Ok(Wiring::Bean { bean, via_proxy })
            }
            ambiguous @ ResolutionResult::Ambiguous(_) => Err(ValidationError::Ambiguous {
                injection_point: id.to_string(),
                required_type: required.to_string(),
                qualifiers: point.qualifiers().to_string(),
                candidates: ambiguous.candidate_ids(),
            }),
            ResolutionResult::Unsatisfied => Err(ValidationError::Unsatisfied {
                injection_point: id.to_string(),
                required_type: required.to_string(),
                qualifiers: point.qualifiers().to_string(),
            }),
        }
    }

    fn check_observer(&self, observer: &ObserverDefinition) -> Option<ValidationError> {
        let illegal = |reason: String| ValidationError::IllegalObserver {
            observer: observer.id().to_string(),
            reason,
        };

        let owner = match observer.owner() {
            Some(id) => match self.registry.get(id) {
                Some(bean) => Some(bean),
                None => return Some(illegal(format!("owning bean '{}' is not registered", id))),
            },
            None => None,
        };

        if observer.reception() == Reception::IfExists {
            match owner.map(|b| b.scope()) {
                None => {
                    let reason = "conditional reception requires an owning bean";
                    return Some(illegal(reason.to_string()));
                }
                Some(BeanScope::Dependent) => {
                    return Some(illegal("conditional reception on a dependent bean".to_string()))
                }
                Some(_) => {}
            }
        }

        None
    }
}

fn join(cycle: &[BeanId]) -> String {
    cycle.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(" -> ")
}
