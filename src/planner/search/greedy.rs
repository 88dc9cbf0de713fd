use crate::pattern::{Conjunction, Mode, ResolvableId};
use crate::planner::PlanResult;
use crate::planner::coster::OrderingCosting;
use crate::planner::search::{CostModel, SearchSpace};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Single-pass search: always place the cheapest placeable resolvable next.
///
/// One pass is started from every possible first resolvable so that orderings
/// with different cyclic signatures can surface. A pass stops early once it
/// reaches a partial state another pass has already gone through; passes that
/// complete with the same signature keep the cheaper ordering.
#[derive(Debug, Clone)]
pub struct GreedySearch {
    space: SearchSpace,
}

impl GreedySearch {
    pub fn new(conjunction: &Conjunction, mode: &Mode) -> Self {
        Self {
            space: SearchSpace::new(conjunction, mode),
        }
    }

    pub fn from_space(space: SearchSpace) -> Self {
        Self { space }
    }

    pub fn orderings(&self, model: &mut dyn CostModel) -> PlanResult<Vec<Vec<ResolvableId>>> {
        if self.space.is_empty() {
            return Ok(vec![Vec::new()]);
        }
        let initial = model.initial()?;
        let all = self.space.resolvables();
        let starts = self.space.prefer_connected(
            self.space.enabled(&all, self.space.input_bounds()),
            self.space.input_bounds(),
        );

        let mut seen = HashSet::new();
        let mut completed: HashMap<_, usize> = HashMap::new();
        let mut orderings: Vec<OrderingCosting> = Vec::new();
        for start in starts {
            let mut costing = model.extend(&initial, start)?;
            let mut bound = self.space.input_bounds().clone();
            self.space.bind(start, &mut bound);
            let mut remaining: BTreeSet<ResolvableId> = all.clone();
            remaining.remove(&start);

            let mut finished = true;
            while !remaining.is_empty() {
                if !seen.insert(costing.signature()) {
                    finished = false;
                    break;
                }
                let candidates = self
                    .space
                    .prefer_connected(self.space.enabled(&remaining, &bound), &bound);
                let Some((next, extended)) = cheapest(model, &costing, candidates)? else {
                    finished = false;
                    break;
                };
                self.space.bind(next, &mut bound);
                remaining.remove(&next);
                costing = extended;
            }
            if !finished {
                continue;
            }
            match completed.get(&costing.signature()) {
                Some(&index) if orderings[index].cost() <= costing.cost() => {}
                Some(&index) => orderings[index] = costing,
                None => {
                    completed.insert(costing.signature(), orderings.len());
                    orderings.push(costing);
                }
            }
        }
        log::trace!("Greedy search produced {} ordering(s)", orderings.len());
        Ok(orderings
            .into_iter()
            .map(|costing| costing.ordering().to_vec())
            .collect())
    }
}

fn cheapest(
    model: &mut dyn CostModel,
    costing: &OrderingCosting,
    candidates: Vec<ResolvableId>,
) -> PlanResult<Option<(ResolvableId, OrderingCosting)>> {
    let mut best: Option<(ResolvableId, OrderingCosting)> = None;
    for candidate in candidates {
        let extended = model.extend(costing, candidate)?;
        let better = best
            .as_ref()
            .is_none_or(|(_, current)| extended.cost() < current.cost());
        if better {
            best = Some((candidate, extended));
        }
    }
    Ok(best)
}
