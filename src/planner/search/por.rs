use crate::pattern::{Conjunction, Mode, ResolvableId, Var};
use crate::planner::search::SearchSpace;
use std::collections::{BTreeMap, BTreeSet};

/// Exhaustive ordering enumeration with partial order reduction.
///
/// Orderings that only differ by swapping independent resolvables are
/// explored once, using sleep sets. With the connectedness restriction on,
/// a branch only moves to resolvables sharing a variable with what is bound
/// whenever such resolvables exist.
#[derive(Debug, Clone)]
pub struct PartialOrderReduction {
    space: SearchSpace,
    connectedness_restriction: bool,
}

impl PartialOrderReduction {
    pub fn new(conjunction: &Conjunction, mode: &Mode) -> Self {
        Self {
            space: SearchSpace::new(conjunction, mode),
            connectedness_restriction: true,
        }
    }

    pub fn with_dependencies(
        conjunction: &Conjunction,
        mode: &Mode,
        dependencies: BTreeMap<ResolvableId, BTreeSet<Var>>,
        connectedness_restriction: bool,
    ) -> Self {
        Self {
            space: SearchSpace::with_dependencies(conjunction, mode, dependencies),
            connectedness_restriction,
        }
    }

    pub fn orderings(&self) -> Vec<Vec<ResolvableId>> {
        let mut orderings = Vec::new();
        let mut path = Vec::with_capacity(self.space.len());
        let mut remaining = self.space.resolvables();
        let bound = self.space.input_bounds().clone();
        self.explore(&mut path, &mut remaining, &bound, &BTreeSet::new(), &mut orderings);
        log::trace!("Partial order reduction produced {} ordering(s)", orderings.len());
        orderings
    }

    fn explore(
        &self,
        path: &mut Vec<ResolvableId>,
        remaining: &mut BTreeSet<ResolvableId>,
        bound: &BTreeSet<Var>,
        sleeping: &BTreeSet<ResolvableId>,
        orderings: &mut Vec<Vec<ResolvableId>>,
    ) {
        if remaining.is_empty() {
            orderings.push(path.clone());
            return;
        }

        let mut enabled: Vec<ResolvableId> = self
            .space
            .enabled(remaining, bound)
            .into_iter()
            .filter(|id| !sleeping.contains(id))
            .collect();
        if enabled.is_empty() {
            return;
        }
        if self.connectedness_restriction {
            let connected: Vec<ResolvableId> = enabled
                .iter()
                .copied()
                .filter(|id| self.space.connected(*id, bound))
                .collect();
            if !connected.is_empty() {
                enabled = connected;
            } else if !sleeping.is_empty() {
                // Explored from an earlier sibling already.
                return;
            }
        }

        let mut sleeping = sleeping.clone();
        for next in enabled {
            let still_sleeping: BTreeSet<ResolvableId> = sleeping
                .iter()
                .copied()
                .filter(|s| !self.space.shares_variables(*s, next))
                .collect();
            let mut next_bound = bound.clone();
            self.space.bind(next, &mut next_bound);

            path.push(next);
            remaining.remove(&next);
            self.explore(path, remaining, &next_bound, &still_sleeping, orderings);
            remaining.insert(next);
            path.pop();

            sleeping.insert(next);
        }
    }
}
