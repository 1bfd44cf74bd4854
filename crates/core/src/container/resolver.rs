use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::container::descriptor::{BeanDefinition, BeanId, TypeKey};
use crate::container::qualifier::QualifierSet;
use crate::container::registry::BeanRegistry;
use crate::errors::CoreError;

/// Outcome of resolving a required type plus qualifiers
#[derive(Debug, Clone)]
pub enum ResolutionResult {
    Unique(Arc<BeanDefinition>),
    /// Candidates left after the alternative tie-break, in registration order
    Ambiguous(Vec<Arc<BeanDefinition>>),
    Unsatisfied,
}

impl ResolutionResult {
    pub fn is_unique(&self) -> bool {
        matches!(self, ResolutionResult::Unique(_))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ResolutionResult::Ambiguous(_))
    }

    pub fn is_unsatisfied(&self) -> bool {
        matches!(self, ResolutionResult::Unsatisfied)
    }

    /// Identifiers of the competing beans (empty unless ambiguous)
    pub fn candidate_ids(&self) -> Vec<String> {
        match self {
            ResolutionResult::Ambiguous(candidates) => {
                candidates.iter().map(|b| b.id().to_string()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Turn the result into the unique bean or a runtime lookup error
    pub fn into_unique(
        self,
        required: &TypeKey,
        qualifiers: &QualifierSet,
    ) -> Result<Arc<BeanDefinition>, CoreError> {
        match self {
            ResolutionResult::Unique(bean) => Ok(bean),
            ResolutionResult::Ambiguous(_) => Err(CoreError::AmbiguousResolution {
                required_type: required.to_string(),
                candidates: self.candidate_ids(),
            }),
            ResolutionResult::Unsatisfied => Err(CoreError::UnsatisfiedResolution {
                required_type: required.to_string(),
                qualifiers: qualifiers.to_string(),
            }),
        }
    }
}

/// Typesafe resolution of a required type and qualifier set against the registry
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    registry: &'a BeanRegistry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a BeanRegistry) -> Self {
        Self { registry }
    }

    /// Resolve `required` with `qualifiers` (already normalized, see
    /// [`QualifierSet::for_injection`]).
    pub fn resolve(&self, required: &TypeKey, qualifiers: &QualifierSet) -> ResolutionResult {
        let candidates: Vec<Arc<BeanDefinition>> = self
            .registry
            .beans_assignable_to(required)
            .into_iter()
            .filter(|bean| bean.qualifiers().satisfies(qualifiers))
            .cloned()
            .collect();

        match candidates.len() {
            0 => ResolutionResult::Unsatisfied,
            1 => candidates
                .into_iter()
                .next()
                .map_or(ResolutionResult::Unsatisfied, ResolutionResult::Unique),
            _ => Self::apply_alternatives(candidates),
        }
    }

    /// Keep only the alternatives with the highest priority
    fn apply_alternatives(candidates: Vec<Arc<BeanDefinition>>) -> ResolutionResult {
        let Some(max) = candidates.iter().filter_map(|b| b.alternative_priority()).max() else {
            return ResolutionResult::Ambiguous(candidates);
        };

        let mut winners: Vec<_> = candidates
            .into_iter()
            .filter(|b| b.alternative_priority() == Some(max))
            .collect();

        if winners.len() == 1 {
            ResolutionResult::Unique(winners.remove(0))
        } else {
            ResolutionResult::Ambiguous(winners)
        }
    }
}

/// Edge of the bean dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub target: BeanId,
    /// The consumer holds a client proxy, so construction is not ordered by this edge
    pub via_proxy: bool,
}

#[derive(Debug)]
struct DependencyNode {
    bean_id: BeanId,
    dependencies: Vec<DependencyEdge>,
}

/// Directed bean-to-bean dependency graph
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    index: HashMap<BeanId, usize>,
}

impl DependencyGraph {
    /// Create a new dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bean node; adding the same bean twice is a no-op
    pub fn add_bean(&mut self, bean_id: &BeanId) {
        if self.index.contains_key(bean_id) {
            return;
        }
        self.index.insert(bean_id.clone(), self.nodes.len());
        self.nodes.push(DependencyNode {
            bean_id: bean_id.clone(),
            dependencies: Vec::new(),
        });
    }

    /// Add an edge from `consumer` to `dependency`
    pub fn add_dependency(&mut self, consumer: &BeanId, dependency: &BeanId, via_proxy: bool) {
        self.add_bean(consumer);
        self.add_bean(dependency);
        if let Some(&i) = self.index.get(consumer) {
            self.nodes[i].dependencies.push(DependencyEdge {
                target: dependency.clone(),
                via_proxy,
            });
        }
    }

    pub fn dependencies_of(&self, bean_id: &BeanId) -> &[DependencyEdge] {
        self.index
            .get(bean_id)
            .map(|&i| self.nodes[i].dependencies.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Strongly connected components that contain at least one cycle,
    /// found with an iterative depth-first traversal, so chain length is not
    /// bounded by the thread's stack.
    /// Members of each component are in registration order.
    pub fn cyclic_components(&self) -> Vec<Vec<BeanId>> {
        let mut tarjan = Tarjan::new(self.nodes.len());
        for start in 0..self.nodes.len() {
            if tarjan.order[start].is_none() {
                tarjan.visit(self, start);
            }
        }

        let mut components: Vec<Vec<usize>> = tarjan
            .components
            .into_iter()
            .filter(|c| c.len() > 1 || self.has_self_edge(c[0]))
            .collect();
        for component in &mut components {
            component.sort_unstable();
        }
        components.sort_by_key(|c| c[0]);

        components
            .into_iter()
            .map(|c| c.into_iter().map(|i| self.nodes[i].bean_id.clone()).collect())
            .collect()
    }

    /// Shortest cycle through `start` staying inside `component`, as a chain
    /// that begins and ends with `start`
    pub fn cycle_through(&self, start: &BeanId, component: &[BeanId]) -> Vec<BeanId> {
        let mut previous: HashMap<&BeanId, &BeanId> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for edge in self.dependencies_of(current) {
                if !component.contains(&edge.target) {
                    continue;
                }
                if edge.target == *start {
                    let mut inner = Vec::new();
                    let mut cursor = current;
                    while cursor != start {
                        inner.push(cursor.clone());
                        cursor = previous.get(cursor).copied().unwrap_or(start);
                    }
                    inner.reverse();

                    let mut chain = vec![start.clone()];
                    chain.extend(inner);
                    chain.push(start.clone());
                    return chain;
                }
                if !previous.contains_key(&edge.target) {
                    previous.insert(&edge.target, current);
                    queue.push_back(&edge.target);
                }
            }
        }

        vec![start.clone()]
    }

    /// Construction order over direct (non-proxy) edges: dependencies first.
    /// Beans caught in a direct cycle are left out.
    pub fn construction_order(&self) -> Vec<BeanId> {
        let mut in_degree: Vec<usize> = vec![0; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];

        for (i, node) in self.nodes.iter().enumerate() {
            for edge in node.dependencies.iter().filter(|e| !e.via_proxy) {
                if let Some(&target) = self.index.get(&edge.target) {
                    in_degree[i] += 1;
                    dependents[target].push(i);
                }
            }
        }

        let mut queue: VecDeque<usize> =
            (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(i) = queue.pop_front() {
            result.push(self.nodes[i].bean_id.clone());
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        result
    }

    fn has_self_edge(&self, i: usize) -> bool {
        let node = &self.nodes[i];
        node.dependencies.iter().any(|e| e.target == node.bean_id)
    }
}

struct Tarjan {
    next: usize,
    order: Vec<Option<usize>>,
    low: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl Tarjan {
    fn new(size: usize) -> Self {
        Self {
            next: 0,
            order: vec![None; size],
            low: vec![0; size],
            on_stack: vec![false; size],
            stack: Vec::new(),
            components: Vec::new(),
        }
    }

    fn enter(&mut self, v: usize) {
        self.order[v] = Some(self.next);
        self.low[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;
    }

    /// Depth-first from `start`; each frame is a node and its next edge
    fn visit(&mut self, graph: &DependencyGraph, start: usize) {
        self.enter(start);
        let mut frames = vec![(start, 0usize)];

        while let Some(frame) = frames.last_mut() {
            let (v, edge) = *frame;
            if let Some(dependency) = graph.nodes[v].dependencies.get(edge) {
                frame.1 += 1;
                let Some(&w) = graph.index.get(&dependency.target) else {
                    continue;
                };
                match self.order[w] {
                    None => {
                        self.enter(w);
                        frames.push((w, 0));
                    }
                    Some(order) if self.on_stack[w] => {
                        self.low[v] = self.low[v].min(order);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                self.low[parent] = self.low[parent].min(self.low[v]);
            }
            if Some(self.low[v]) == self.order[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::qualifier::Qualifier;

    trait Payment: Send + Sync {}

    struct Card;
    impl Payment for Card {}

    fn payment(id: &str, qualifiers: Vec<Qualifier>, alternative: Option<i32>) -> BeanDefinition {
        let mut builder = BeanDefinition::builder::<Card>(id)
            .provides::<dyn Payment>(|c| c as Arc<dyn Payment>)
            .factory(|_| Ok(Card));
        for qualifier in qualifiers {
            builder = builder.qualifier(qualifier);
        }
        if let Some(priority) = alternative {
            builder = builder.alternative(priority);
        }
        builder.build().unwrap()
    }

    fn resolve(registry: &BeanRegistry, qualifiers: Vec<Qualifier>) -> ResolutionResult {
        Resolver::new(registry).resolve(
            &TypeKey::of::<dyn Payment>(),
            &QualifierSet::for_injection(qualifiers),
        )
    }

    #[test]
    fn test_unique_and_unsatisfied() {
        let mut registry = BeanRegistry::new();
        registry.register(payment("card", vec![], None)).unwrap();

        assert!(resolve(&registry, vec![]).is_unique());
        assert!(resolve(&registry, vec![Qualifier::new("Express")]).is_unsatisfied());
        assert!(Resolver::new(&registry)
            .resolve(&TypeKey::of::<String>(), &QualifierSet::for_injection([]))
            .is_unsatisfied());
    }

    #[test]
    fn test_qualifiers_narrow_candidates() {
        let mut registry = BeanRegistry::new();
        registry.register(payment("card", vec![], None)).unwrap();
        registry
            .register(payment("express", vec![Qualifier::new("Express")], None))
            .unwrap();

        match resolve(&registry, vec![Qualifier::new("Express")]) {
            ResolutionResult::Unique(bean) => assert_eq!(bean.id().as_str(), "express"),
            other => panic!("expected unique, got {:?}", other),
        }
        // only "card" carries @Default
        assert!(resolve(&registry, vec![]).is_unique());
        // @Any matches both
        assert_eq!(
            resolve(&registry, vec![Qualifier::any()]).candidate_ids(),
            vec!["card", "express"]
        );
    }

    #[test]
    fn test_highest_alternative_wins() {
        let mut registry = BeanRegistry::new();
        registry.register(payment("card", vec![], None)).unwrap();
        registry.register(payment("mock", vec![], Some(10))).unwrap();
        registry.register(payment("stub", vec![], Some(5))).unwrap();

        match resolve(&registry, vec![]) {
            ResolutionResult::Unique(bean) => assert_eq!(bean.id().as_str(), "mock"),
            other => panic!("expected unique, got {:?}", other),
        }
    }

    #[test]
    fn test_tied_alternatives_are_ambiguous() {
        let mut registry = BeanRegistry::new();
        registry.register(payment("card", vec![], None)).unwrap();
        registry.register(payment("mock", vec![], Some(10))).unwrap();
        registry.register(payment("stub", vec![], Some(10))).unwrap();

        let result = resolve(&registry, vec![]);
        assert_eq!(result.candidate_ids(), vec!["mock", "stub"]);

        let error = result
            .into_unique(&TypeKey::of::<dyn Payment>(), &QualifierSet::for_injection([]))
            .unwrap_err();
        assert!(error.is_ambiguous());
    }

    #[test]
    fn test_cyclic_components() {
        let (a, b, c, d) = (BeanId::new("a"), BeanId::new("b"), BeanId::new("c"), BeanId::new("d"));
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&a, &b, true);
        graph.add_dependency(&b, &a, true);
        graph.add_dependency(&a, &c, false);
        graph.add_dependency(&d, &d, true);

        let components = graph.cyclic_components();
        assert_eq!(components, vec![vec![a.clone(), b.clone()], vec![d.clone()]]);
        assert_eq!(graph.cycle_through(&a, &components[0]), vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(graph.cycle_through(&d, &components[1]), vec![d.clone(), d.clone()]);
    }

    #[test]
    fn test_cycle_through_longer_chain() {
        let ids: Vec<BeanId> = ["a", "b", "c"].iter().map(|s| BeanId::new(*s)).collect();
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&ids[0], &ids[1], false);
        graph.add_dependency(&ids[1], &ids[2], false);
        graph.add_dependency(&ids[2], &ids[0], false);

        let components = graph.cyclic_components();
        assert_eq!(components.len(), 1);
        let chain: Vec<_> = graph
            .cycle_through(&ids[0], &components[0])
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(chain, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_long_chain_does_not_exhaust_stack() {
        let ids: Vec<BeanId> = (0..200_000).map(|i| BeanId::new(format!("bean-{i}"))).collect();
        let mut graph = DependencyGraph::new();
        for pair in ids.windows(2) {
            graph.add_dependency(&pair[0], &pair[1], true);
        }
        assert!(graph.cyclic_components().is_empty());

        graph.add_dependency(&ids[ids.len() - 1], &ids[0], true);
        let components = graph.cyclic_components();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), ids.len());
        assert_eq!(components[0][0], ids[0]);
    }

    #[test]
    fn test_construction_order_ignores_proxy_edges() {
        let (a, b, c) = (BeanId::new("a"), BeanId::new("b"), BeanId::new("c"));
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&a, &b, false);
        graph.add_dependency(&b, &c, false);
        graph.add_dependency(&c, &a, true);

        assert_eq!(graph.construction_order(), vec![c, b, a]);
    }
}
