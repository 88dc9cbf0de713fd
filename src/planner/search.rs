//! Candidate ordering enumeration.
//!
//! Three interchangeable strategies: exhaustive partial order reduction, a
//! greedy single pass, and a hybrid A*/beam search for large conjunctions.

pub mod beam;
pub mod greedy;
pub mod por;

pub use beam::HybridSearch;
pub use greedy::GreedySearch;
pub use por::PartialOrderReduction;

use crate::pattern::{Conjunction, Mode, Resolvable, ResolvableId, Var};
use crate::planner::PlanResult;
use crate::planner::coster::OrderingCosting;
use std::collections::{BTreeMap, BTreeSet};

/// Costs ordering prefixes for the heuristic strategies.
pub trait CostModel {
    fn initial(&mut self) -> PlanResult<OrderingCosting>;

    fn extend(&mut self, costing: &OrderingCosting, next: ResolvableId)
    -> PlanResult<OrderingCosting>;

    /// Additive estimate of what placing `resolvable` will cost.
    fn heuristic(&mut self, resolvable: ResolvableId) -> PlanResult<f64>;
}

/// Variables each resolvable must find bound before it may be placed.
///
/// A resolvable depends on every variable it uses that another concludable
/// generates. A negation also depends on the variables it shares with the
/// non-negated resolvables.
pub fn dependencies(conjunction: &Conjunction) -> BTreeMap<ResolvableId, BTreeSet<Var>> {
    let generated: BTreeSet<&Var> = conjunction
        .resolvables()
        .iter()
        .filter_map(Resolvable::generating)
        .collect();
    let positive: BTreeSet<Var> = conjunction
        .resolvables()
        .iter()
        .filter(|r| !r.is_negated())
        .flat_map(Resolvable::variables)
        .collect();

    conjunction
        .resolvables()
        .iter()
        .enumerate()
        .map(|(index, resolvable)| {
            let variables = resolvable.variables();
            let mut depends: BTreeSet<Var> = variables
                .iter()
                .filter(|v| generated.contains(v) && resolvable.generating() != Some(*v))
                .cloned()
                .collect();
            if resolvable.is_negated() {
                depends.extend(variables.intersection(&positive).cloned());
            }
            (ResolvableId(index), depends)
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Shape {
    variables: BTreeSet<Var>,
    negated: bool,
}

/// The structure every strategy searches over.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    shapes: BTreeMap<ResolvableId, Shape>,
    dependencies: BTreeMap<ResolvableId, BTreeSet<Var>>,
    input_bounds: BTreeSet<Var>,
}

impl SearchSpace {
    pub fn new(conjunction: &Conjunction, mode: &Mode) -> Self {
        Self::with_dependencies(conjunction, mode, dependencies(conjunction))
    }

    pub fn with_dependencies(
        conjunction: &Conjunction,
        mode: &Mode,
        dependencies: BTreeMap<ResolvableId, BTreeSet<Var>>,
    ) -> Self {
        let shapes = conjunction
            .resolvables()
            .iter()
            .enumerate()
            .map(|(index, resolvable)| {
                let shape = Shape {
                    variables: resolvable.variables(),
                    negated: resolvable.is_negated(),
                };
                (ResolvableId(index), shape)
            })
            .collect();
        let mut input_bounds = mode.clone();
        input_bounds.extend(conjunction.constant_variables());
        Self {
            shapes,
            dependencies,
            input_bounds,
        }
    }

    pub fn resolvables(&self) -> BTreeSet<ResolvableId> {
        self.shapes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Mode and constants: bound before anything is placed.
    pub fn input_bounds(&self) -> &BTreeSet<Var> {
        &self.input_bounds
    }

    pub fn dependencies_of(&self, id: ResolvableId) -> Option<&BTreeSet<Var>> {
        self.dependencies.get(&id)
    }

    fn variables(&self, id: ResolvableId) -> Option<&BTreeSet<Var>> {
        self.shapes.get(&id).map(|s| &s.variables)
    }

    fn is_negated(&self, id: ResolvableId) -> bool {
        self.shapes.get(&id).is_some_and(|s| s.negated)
    }

    pub fn satisfied(&self, id: ResolvableId, bound: &BTreeSet<Var>) -> bool {
        self.dependencies
            .get(&id)
            .is_none_or(|deps| deps.is_subset(bound))
    }

    /// Resolvables that may be placed next, ignoring sleep sets.
    ///
    /// When no remaining resolvable is satisfied by `bound`, any non-negated
    /// one is allowed so that a complete ordering still exists.
    pub fn enabled(
        &self,
        remaining: &BTreeSet<ResolvableId>,
        bound: &BTreeSet<Var>,
    ) -> Vec<ResolvableId> {
        let satisfied: Vec<ResolvableId> = remaining
            .iter()
            .copied()
            .filter(|id| self.satisfied(*id, bound))
            .collect();
        if !satisfied.is_empty() {
            return satisfied;
        }
        remaining
            .iter()
            .copied()
            .filter(|id| !self.is_negated(*id))
            .collect()
    }

    /// Whether `id` shares a variable with `bound`.
    pub fn connected(&self, id: ResolvableId, bound: &BTreeSet<Var>) -> bool {
        self.variables(id)
            .is_some_and(|vars| vars.iter().any(|v| bound.contains(v)))
    }

    pub fn shares_variables(&self, a: ResolvableId, b: ResolvableId) -> bool {
        match (self.variables(a), self.variables(b)) {
            (Some(a), Some(b)) => a.iter().any(|v| b.contains(v)),
            _ => false,
        }
    }

    /// Variables bound once `id` is placed; negations bind nothing.
    pub fn bind(&self, id: ResolvableId, bound: &mut BTreeSet<Var>) {
        if !self.is_negated(id) {
            if let Some(vars) = self.variables(id) {
                bound.extend(vars.iter().cloned());
            }
        }
    }

    /// Restrict `candidates` to those connected to `bound`, if any are.
    pub fn prefer_connected(
        &self,
        candidates: Vec<ResolvableId>,
        bound: &BTreeSet<Var>,
    ) -> Vec<ResolvableId> {
        let connected: Vec<ResolvableId> = candidates
            .iter()
            .copied()
            .filter(|id| self.connected(*id, bound))
            .collect();
        if connected.is_empty() {
            candidates
        } else {
            connected
        }
    }
}
