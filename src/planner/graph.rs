use crate::logic::RuleSource;
use crate::pattern::{ConjunctionId, Resolvable, ResolvableId, Var};
use crate::planner::{PlanError, PlanResult};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

static NO_DEPENDENCIES: BTreeSet<ConjunctionId> = BTreeSet::new();

/// Per-conjunction split of triggered conjunctions into cyclic and acyclic.
#[derive(Debug, Clone, PartialEq)]
pub struct ConjunctionSummary {
    conjunction: ConjunctionId,
    resolvables: Vec<ResolvableId>,
    estimateable_variables: BTreeSet<Var>,
    cyclic_dependencies: BTreeMap<ResolvableId, BTreeSet<ConjunctionId>>,
    acyclic_dependencies: BTreeMap<ResolvableId, BTreeSet<ConjunctionId>>,
    negations: BTreeMap<ResolvableId, Vec<ConjunctionId>>,
}

impl ConjunctionSummary {
    pub fn conjunction(&self) -> ConjunctionId {
        self.conjunction
    }

    pub fn resolvables(&self) -> &[ResolvableId] {
        &self.resolvables
    }

    pub fn estimateable_variables(&self) -> &BTreeSet<Var> {
        &self.estimateable_variables
    }

    /// Whether the concludable triggers a conjunction that leads back here.
    pub fn is_cyclic(&self, concludable: ResolvableId) -> bool {
        self.cyclic_dependencies
            .get(&concludable)
            .is_some_and(|deps| !deps.is_empty())
    }

    pub fn cyclic_concludables(&self) -> impl Iterator<Item = ResolvableId> + '_ {
        self.cyclic_dependencies
            .iter()
            .filter(|(_, deps)| !deps.is_empty())
            .map(|(id, _)| *id)
    }

    pub fn acyclic_concludables(&self) -> impl Iterator<Item = ResolvableId> + '_ {
        self.acyclic_dependencies
            .keys()
            .copied()
            .filter(|id| !self.is_cyclic(*id))
    }

    pub fn cyclic_dependencies(&self, concludable: ResolvableId) -> &BTreeSet<ConjunctionId> {
        self.cyclic_dependencies
            .get(&concludable)
            .unwrap_or(&NO_DEPENDENCIES)
    }

    pub fn acyclic_dependencies(&self, concludable: ResolvableId) -> &BTreeSet<ConjunctionId> {
        self.acyclic_dependencies
            .get(&concludable)
            .unwrap_or(&NO_DEPENDENCIES)
    }

    pub fn negated_conjunctions(&self) -> impl Iterator<Item = ConjunctionId> + '_ {
        self.negations.values().flatten().copied()
    }
}

/// Memoized cycle analysis over the rule graph.
#[derive(Debug, Default)]
pub struct ConjunctionGraph {
    summaries: HashMap<ConjunctionId, Arc<ConjunctionSummary>>,
}

impl ConjunctionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summary of `conjunction`, analysing everything it reaches on first use.
    pub fn summary(
        &mut self,
        logic: &dyn RuleSource,
        conjunction: ConjunctionId,
    ) -> PlanResult<Arc<ConjunctionSummary>> {
        if let Some(summary) = self.summaries.get(&conjunction) {
            return Ok(summary.clone());
        }
        let mut traversal = Traversal::default();
        traversal.visit(self, logic, conjunction)?;

        // Negations sit in their own strata and get their own traversal.
        for negated in traversal.negations {
            if !self.summaries.contains_key(&negated) {
                self.summary(logic, negated)?;
            }
        }

        self.summaries
            .get(&conjunction)
            .cloned()
            .ok_or_else(|| PlanError::illegal_state(format!("{conjunction} was not summarised")))
    }

    pub fn get(&self, conjunction: ConjunctionId) -> Option<Arc<ConjunctionSummary>> {
        self.summaries.get(&conjunction).cloned()
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// Conjunctions triggered by rules applicable to a concludable.
pub(crate) fn triggered_conjunctions(
    logic: &dyn RuleSource,
    conjunction: ConjunctionId,
    concludable: ResolvableId,
) -> PlanResult<BTreeSet<ConjunctionId>> {
    logic
        .applicable_rules(conjunction, concludable)
        .iter()
        .map(|application| {
            logic
                .rule(application.rule)
                .map(|rule| rule.condition)
                .ok_or(PlanError::UnknownRule(application.rule))
        })
        .collect()
}

/// Tarjan-style depth-first traversal; an SCC is summarised when its root unwinds.
#[derive(Default)]
struct Traversal {
    next_index: usize,
    index: HashMap<ConjunctionId, usize>,
    lowlink: HashMap<ConjunctionId, usize>,
    stack: Vec<ConjunctionId>,
    on_stack: HashSet<ConjunctionId>,
    edges: HashMap<ConjunctionId, Vec<(ResolvableId, ConjunctionId)>>,
    negations: Vec<ConjunctionId>,
}

impl Traversal {
    fn visit(
        &mut self,
        graph: &mut ConjunctionGraph,
        logic: &dyn RuleSource,
        id: ConjunctionId,
    ) -> PlanResult<()> {
        let conjunction = logic
            .conjunction(id)
            .ok_or(PlanError::UnknownConjunction(id))?;
        self.index.insert(id, self.next_index);
        self.lowlink.insert(id, self.next_index);
        self.next_index += 1;
        self.stack.push(id);
        self.on_stack.insert(id);

        let mut edges = Vec::new();
        for (concludable, _) in conjunction.concludables() {
            for triggered in triggered_conjunctions(logic, id, concludable)? {
                edges.push((concludable, triggered));
                if graph.summaries.contains_key(&triggered) {
                    continue;
                }
                match self.index.get(&triggered).copied() {
                    None => {
                        self.visit(graph, logic, triggered)?;
                        let low = self.lowlink(triggered).min(self.lowlink(id));
                        self.lowlink.insert(id, low);
                    }
                    Some(index) if self.on_stack.contains(&triggered) => {
                        let low = index.min(self.lowlink(id));
                        self.lowlink.insert(id, low);
                    }
                    Some(_) => {}
                }
            }
        }
        self.edges.insert(id, edges);
        for resolvable in conjunction.resolvables() {
            if let Resolvable::Negated(negated) = resolvable {
                self.negations.extend(negated.conjunctions.iter().copied());
            }
        }

        if self.lowlink(id) == self.index.get(&id).copied().unwrap_or_default() {
            let mut component = BTreeSet::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(&member);
                component.insert(member);
                if member == id {
                    break;
                }
            }
            log::trace!("Summarising component {component:?}");
            for member in &component {
                let summary = self.summarise(logic, *member, &component)?;
                graph.summaries.insert(*member, Arc::new(summary));
            }
        }
        Ok(())
    }

    fn lowlink(&self, id: ConjunctionId) -> usize {
        self.lowlink.get(&id).copied().unwrap_or(usize::MAX)
    }

    fn summarise(
        &self,
        logic: &dyn RuleSource,
        id: ConjunctionId,
        component: &BTreeSet<ConjunctionId>,
    ) -> PlanResult<ConjunctionSummary> {
        let conjunction = logic
            .conjunction(id)
            .ok_or(PlanError::UnknownConjunction(id))?;
        let mut cyclic_dependencies: BTreeMap<ResolvableId, BTreeSet<ConjunctionId>> =
            BTreeMap::new();
        let mut acyclic_dependencies: BTreeMap<ResolvableId, BTreeSet<ConjunctionId>> =
            BTreeMap::new();
        for (concludable, _) in conjunction.concludables() {
            cyclic_dependencies.entry(concludable).or_default();
            acyclic_dependencies.entry(concludable).or_default();
        }
        for (concludable, triggered) in self.edges.get(&id).into_iter().flatten() {
            let target = if component.contains(triggered) {
                &mut cyclic_dependencies
            } else {
                &mut acyclic_dependencies
            };
            target.entry(*concludable).or_default().insert(*triggered);
        }
        let negations = conjunction
            .resolvables()
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match r {
                Resolvable::Negated(negated) => {
                    Some((ResolvableId(i), negated.conjunctions.clone()))
                }
                _ => None,
            })
            .collect();
        Ok(ConjunctionSummary {
            conjunction: id,
            resolvables: conjunction.resolvable_ids().collect(),
            estimateable_variables: conjunction.estimateable_variables(),
            cyclic_dependencies,
            acyclic_dependencies,
            negations,
        })
    }
}
