use crate::planner::plan::{CallKey, OrderingSummary, Plan};
use crate::planner::{PlanError, PlanResult, Planner};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One choice of ordering per member of a recursive cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPlan {
    choices: BTreeMap<CallKey, OrderingSummary>,
    /// Scaling factors each member receives from its cyclic callers, capped at 1
    cyclic_scaling_sums: BTreeMap<CallKey, f64>,
}

impl ClusterPlan {
    pub fn new(choices: BTreeMap<CallKey, OrderingSummary>) -> Self {
        let mut cyclic_scaling_sums: BTreeMap<CallKey, f64> =
            choices.keys().map(|call| (call.clone(), 0.0)).collect();
        for summary in choices.values() {
            for (resolvable, calls) in &summary.cyclic_calls {
                let scaling = summary
                    .cyclic_scaling_factors
                    .get(resolvable)
                    .copied()
                    .unwrap_or(0.0);
                for call in calls {
                    let sum = cyclic_scaling_sums.entry(call.clone()).or_insert(0.0);
                    *sum = (*sum + scaling).min(1.0);
                }
            }
        }
        Self {
            choices,
            cyclic_scaling_sums,
        }
    }

    pub fn choices(&self) -> &BTreeMap<CallKey, OrderingSummary> {
        &self.choices
    }

    pub fn cyclic_scaling_sum(&self, call: &CallKey) -> f64 {
        self.cyclic_scaling_sums.get(call).copied().unwrap_or(0.0)
    }

    /// Cost of the cluster when entered through `root`.
    ///
    /// The root pays its connected cost in full, other members only the share
    /// their cyclic callers request. Disconnected costs are always paid.
    pub fn cost(&self, root: &CallKey) -> f64 {
        self.choices
            .iter()
            .map(|(call, summary)| {
                let own = if call == root { 1.0 } else { 0.0 };
                let scaling = (self.cyclic_scaling_sum(call) + own).min(1.0);
                summary.connected_cost * scaling + summary.disconnected_cost
            })
            .sum()
    }

    /// A plan per member, each costed as if it were the cluster's entry.
    pub fn into_plans(self) -> Vec<Plan> {
        self.choices
            .iter()
            .map(|(call, summary)| Plan {
                call: call.clone(),
                ordering: summary.ordering.clone(),
                cost: self.cost(call),
                cyclic_scaling_factor: self.cyclic_scaling_sum(call),
            })
            .collect()
    }
}

/// Branch and bound over one candidate per pending call.
struct ClusterSearch<'c> {
    candidates: &'c HashMap<CallKey, Vec<OrderingSummary>>,
    root: &'c CallKey,
    best: Option<(f64, ClusterPlan)>,
    assignments: usize,
}

impl ClusterSearch<'_> {
    fn choose(
        &mut self,
        chosen: &mut BTreeMap<CallKey, OrderingSummary>,
        pending: &BTreeSet<CallKey>,
    ) -> PlanResult<()> {
        let Some(next) = pending.iter().next().cloned() else {
            self.assignments += 1;
            let cluster = ClusterPlan::new(chosen.clone());
            let cost = cluster.cost(self.root);
            if self.best.as_ref().is_none_or(|(best, _)| cost < *best) {
                self.best = Some((cost, cluster));
            }
            return Ok(());
        };

        let options = self
            .candidates
            .get(&next)
            .filter(|options| !options.is_empty())
            .ok_or_else(|| {
                PlanError::illegal_state(format!("no candidate orderings for cluster member {next}"))
            })?;
        for option in options {
            chosen.insert(next.clone(), option.clone());
            // Costs only grow as members are added, so a partial cluster bounds its completions.
            let bound = ClusterPlan::new(chosen.clone()).cost(self.root);
            if self.best.as_ref().is_none_or(|(best, _)| bound < *best) {
                let mut remaining = pending.clone();
                remaining.remove(&next);
                for call in option.cyclic_calls.values().flatten() {
                    if !chosen.contains_key(call) {
                        remaining.insert(call.clone());
                    }
                }
                self.choose(chosen, &remaining)?;
            }
            chosen.remove(&next);
        }
        Ok(())
    }
}

impl Planner<'_> {
    /// Choose orderings for every call in `root`'s recursive cluster together
    /// and commit them as one unit.
    pub(crate) fn plan_cluster(&mut self, root: &CallKey) -> PlanResult<()> {
        log::debug!("Resolving cluster rooted at {root}");
        let mut search = ClusterSearch {
            candidates: &self.candidates,
            root,
            best: None,
            assignments: 0,
        };
        search.choose(&mut BTreeMap::new(), &BTreeSet::from([root.clone()]))?;
        let assignments = search.assignments;
        let (cost, cluster) = search.best.ok_or_else(|| {
            PlanError::illegal_state(format!("no complete cluster assignment for {root}"))
        })?;

        let plans = cluster.into_plans();
        log::debug!(
            "Committing {} plan(s) for cluster rooted at {root}, cost {cost:.2} after {assignments} assignment(s)",
            plans.len()
        );
        self.cache.commit_cluster(plans);
        Ok(())
    }
}
