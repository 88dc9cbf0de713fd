use crate::pattern::{ConjunctionId, Resolvable, ResolvableId, Var};
use crate::planner::graph::ConjunctionSummary;
use crate::planner::plan::{CallKey, CyclicSignature, OrderingSummary};
use crate::planner::search::CostModel;
use crate::planner::{PlanError, PlanResult, Planner, triggered_calls};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Cost of combining one answer with the prefix, relative to retrieving it.
pub const ANSWER_COMBINATION_COST: f64 = 1.0;

/// Costing state of an ordering prefix, extended one resolvable at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingCosting {
    call: CallKey,
    ordering: Vec<ResolvableId>,
    placed: BTreeSet<ResolvableId>,
    /// Caller mode plus variables produced by placed resolvables
    bound: BTreeSet<Var>,
    /// Variables constrained by placed resolvables
    restricted: BTreeSet<Var>,
    /// Variables reachable from the caller mode
    input_connected: BTreeSet<Var>,
    /// Variables of every placed resolvable, negations included
    answer_variables: BTreeSet<Var>,
    connected_cost: f64,
    disconnected_cost: f64,
    cyclic_modes: CyclicSignature,
    cyclic_scaling_factors: BTreeMap<ResolvableId, f64>,
    cyclic_calls: BTreeMap<ResolvableId, BTreeSet<CallKey>>,
}

impl OrderingCosting {
    pub fn new(call: CallKey) -> Self {
        let mode = call.mode.clone();
        Self {
            call,
            ordering: Vec::new(),
            placed: BTreeSet::new(),
            bound: mode.clone(),
            restricted: BTreeSet::new(),
            input_connected: mode,
            answer_variables: BTreeSet::new(),
            connected_cost: 0.0,
            disconnected_cost: 0.0,
            cyclic_modes: BTreeSet::new(),
            cyclic_scaling_factors: BTreeMap::new(),
            cyclic_calls: BTreeMap::new(),
        }
    }

    pub fn call(&self) -> &CallKey {
        &self.call
    }

    pub fn ordering(&self) -> &[ResolvableId] {
        &self.ordering
    }

    pub fn placed(&self) -> &BTreeSet<ResolvableId> {
        &self.placed
    }

    pub fn bound(&self) -> &BTreeSet<Var> {
        &self.bound
    }

    pub fn cyclic_modes(&self) -> &CyclicSignature {
        &self.cyclic_modes
    }

    pub fn cost(&self) -> f64 {
        self.connected_cost + self.disconnected_cost
    }

    /// Search states that agree on this can be merged.
    pub fn signature(&self) -> (BTreeSet<ResolvableId>, CyclicSignature) {
        (self.placed.clone(), self.cyclic_modes.clone())
    }

    pub fn into_summary(self) -> OrderingSummary {
        OrderingSummary {
            call: self.call,
            ordering: self.ordering,
            connected_cost: self.connected_cost,
            disconnected_cost: self.disconnected_cost,
            cyclic_modes: self.cyclic_modes,
            cyclic_scaling_factors: self.cyclic_scaling_factors,
            cyclic_calls: self.cyclic_calls,
        }
    }
}

impl Planner<'_> {
    /// Cost a complete ordering of `call`'s conjunction.
    pub fn cost_ordering(
        &mut self,
        call: &CallKey,
        ordering: &[ResolvableId],
    ) -> PlanResult<OrderingSummary> {
        let summary = self.summary(call.conjunction)?;
        let mut costing = OrderingCosting::new(call.clone());
        for resolvable in ordering {
            self.extend_costing(&summary, &mut costing, *resolvable)?;
        }
        if costing.placed.len() != summary.resolvables().len() {
            return Err(PlanError::illegal_state(format!(
                "ordering {ordering:?} is not a permutation of the resolvables of {}",
                call.conjunction
            )));
        }
        Ok(costing.into_summary())
    }

    /// Place `id` at the end of the costed prefix.
    pub(crate) fn extend_costing(
        &mut self,
        summary: &ConjunctionSummary,
        costing: &mut OrderingCosting,
        id: ResolvableId,
    ) -> PlanResult<()> {
        let logic = self.context().logic;
        let conjunction_id = costing.call.conjunction;
        let conjunction = logic
            .conjunction(conjunction_id)
            .ok_or(PlanError::UnknownConjunction(conjunction_id))?;
        let resolvable = conjunction
            .resolvable(id)
            .ok_or(PlanError::UnknownResolvable {
                conjunction: conjunction_id,
                resolvable: id,
            })?;
        if costing.placed.contains(&id) {
            return Err(PlanError::illegal_state(format!(
                "{id} placed twice in an ordering of {conjunction_id}"
            )));
        }

        let variables = conjunction.estimateable(&resolvable.variables());
        let mode: BTreeSet<Var> = variables.intersection(&costing.bound).cloned().collect();
        let restricted: BTreeSet<Var> = variables
            .intersection(&costing.restricted)
            .cloned()
            .collect();

        let cost = match resolvable {
            Resolvable::Negated(negated) => {
                let mut cost = 0.0;
                for sub in &negated.conjunctions {
                    let sub_conjunction = logic
                        .conjunction(*sub)
                        .ok_or(PlanError::UnknownConjunction(*sub))?;
                    let sub_variables = sub_conjunction.estimateable_variables();
                    let common: BTreeSet<Var> =
                        sub_variables.intersection(&restricted).cloned().collect();
                    let from_prefix = self.prefix_estimate(conjunction_id, &common, &costing.placed)?;
                    let all_sub = sub_conjunction.resolvable_ids().collect();
                    let unrestricted = self.estimate_answers(*sub, &common, &all_sub)?;
                    let scaling = scaling_factor(from_prefix, unrestricted);
                    let sub_mode = sub_variables.intersection(&mode).cloned().collect();
                    cost += self.scaled_call_cost(scaling, &CallKey::new(*sub, sub_mode))?;
                }
                cost
            }
            Resolvable::Retrievable(_) | Resolvable::Concludable(_) => {
                let from_prefix =
                    self.prefix_estimate(conjunction_id, &restricted, &costing.placed)?;
                let unrestricted = self.local_estimate(conjunction_id, id, &restricted)?;
                let scaling = scaling_factor(from_prefix, unrestricted);
                let mut cost = scaling * self.local_estimate(conjunction_id, id, &variables)?;
                if resolvable.is_concludable() {
                    let acyclic = triggered_calls(
                        logic,
                        conjunction_id,
                        id,
                        &mode,
                        Some(summary.acyclic_dependencies(id)),
                    )?;
                    for call in acyclic {
                        cost += self.scaled_call_cost(scaling, &call)?;
                    }
                }
                cost
            }
        };

        if resolvable.is_concludable() && summary.is_cyclic(id) {
            let cyclic = triggered_calls(
                logic,
                conjunction_id,
                id,
                &mode,
                Some(summary.cyclic_dependencies(id)),
            )?;
            for call in &cyclic {
                self.generate_candidates(call)?;
            }
            let projection: BTreeSet<Var> = restricted
                .iter()
                .filter(|v| !costing.call.mode.contains(*v))
                .cloned()
                .collect();
            let unrestricted = self.local_estimate(conjunction_id, id, &mode)?;
            let cyclic_scaling = if projection.is_empty() || unrestricted <= 0.0 {
                0.0
            } else {
                let from_prefix =
                    self.prefix_estimate(conjunction_id, &projection, &costing.placed)?;
                // The prefix ratio alone grossly overestimates recursive demand.
                (from_prefix / unrestricted)
                    .min(1.0)
                    .min(unrestricted.sqrt() / unrestricted)
            };
            costing.cyclic_modes.insert((id, mode.clone()));
            costing.cyclic_scaling_factors.insert(id, cyclic_scaling);
            costing.cyclic_calls.insert(id, cyclic);
        }

        let connected = costing.call.mode.is_empty()
            || mode.iter().any(|v| costing.input_connected.contains(v));
        if connected {
            costing.connected_cost += cost;
        } else {
            costing.disconnected_cost += cost;
        }
        costing.placed.insert(id);
        costing.ordering.push(id);
        costing.answer_variables.extend(variables.iter().cloned());
        // Every answer of the extended prefix is combined once, bound or not.
        let answers =
            self.prefix_estimate(conjunction_id, &costing.answer_variables, &costing.placed)?;
        costing.connected_cost += answers * ANSWER_COMBINATION_COST;

        if !resolvable.is_negated() {
            costing.bound.extend(variables.iter().cloned());
            costing.restricted.extend(variables.iter().cloned());
            if connected {
                costing.input_connected.extend(variables);
            }
        }
        Ok(())
    }

    /// Additive lower-bound style cost of a resolvable for heuristic search.
    pub(crate) fn resolvable_heuristic(
        &mut self,
        call: &CallKey,
        summary: &ConjunctionSummary,
        id: ResolvableId,
    ) -> PlanResult<f64> {
        let logic = self.context().logic;
        let conjunction = logic
            .conjunction(call.conjunction)
            .ok_or(PlanError::UnknownConjunction(call.conjunction))?;
        let resolvable = conjunction
            .resolvable(id)
            .ok_or(PlanError::UnknownResolvable {
                conjunction: call.conjunction,
                resolvable: id,
            })?;
        let all: BTreeSet<ResolvableId> = summary.resolvables().iter().copied().collect();
        // Caller-bound variables contribute a single value each.
        let unbound = |vars: &BTreeSet<Var>| -> BTreeSet<Var> {
            vars.difference(&call.mode).cloned().collect()
        };
        let variables = conjunction.estimateable(&resolvable.variables());

        match resolvable {
            Resolvable::Retrievable(_) => {
                self.estimate_answers(call.conjunction, &unbound(&variables), &all)
            }
            Resolvable::Concludable(_) => {
                let scaled = self.estimate_answers(call.conjunction, &unbound(&variables), &all)?;
                let local = self.local_estimate(call.conjunction, id, &variables)?;
                let scaling = scaling_factor(scaled, local);
                let mut estimate = scaled;
                let acyclic = triggered_calls(
                    logic,
                    call.conjunction,
                    id,
                    &variables,
                    Some(summary.acyclic_dependencies(id)),
                )?;
                for triggered in acyclic {
                    estimate += scaling * self.estimate_all_answers(triggered.conjunction)?;
                }
                Ok(estimate)
            }
            Resolvable::Negated(negated) => {
                let mut estimate = 0.0;
                for sub in &negated.conjunctions {
                    let sub_conjunction = logic
                        .conjunction(*sub)
                        .ok_or(PlanError::UnknownConjunction(*sub))?;
                    let sub_variables = sub_conjunction.estimateable_variables();
                    let common: BTreeSet<Var> = sub_variables
                        .iter()
                        .filter(|v| conjunction.is_estimateable(v))
                        .cloned()
                        .collect();
                    let all_sub = sub_conjunction.resolvable_ids().collect();
                    let scaled = self.estimate_answers(call.conjunction, &unbound(&common), &all)?;
                    let unrestricted = self.estimate_answers(*sub, &common, &all_sub)?;
                    estimate += scaling_factor(scaled, unrestricted)
                        * self.estimate_all_answers(*sub)?;
                }
                Ok(estimate)
            }
        }
    }

    /// Answers for `variables` given the resolvables placed so far.
    fn prefix_estimate(
        &mut self,
        conjunction: ConjunctionId,
        variables: &BTreeSet<Var>,
        placed: &BTreeSet<ResolvableId>,
    ) -> PlanResult<f64> {
        self.estimate_answers(conjunction, variables, placed)
    }

    fn scaled_call_cost(&mut self, scaling: f64, call: &CallKey) -> PlanResult<f64> {
        let plan = self.ensure_planned(call)?;
        Ok(plan.cost * (scaling + plan.cyclic_scaling_factor).min(1.0))
    }
}

fn scaling_factor(from_prefix: f64, unrestricted: f64) -> f64 {
    if unrestricted > 0.0 {
        (from_prefix / unrestricted).min(1.0)
    } else {
        0.0
    }
}

/// [`CostModel`] over one call, backed by the planner session.
pub(crate) struct CallCostModel<'p, 'a> {
    planner: &'p mut Planner<'a>,
    call: CallKey,
    summary: Arc<ConjunctionSummary>,
}

impl<'p, 'a> CallCostModel<'p, 'a> {
    pub(crate) fn new(
        planner: &'p mut Planner<'a>,
        call: CallKey,
        summary: Arc<ConjunctionSummary>,
    ) -> Self {
        Self {
            planner,
            call,
            summary,
        }
    }
}

impl CostModel for CallCostModel<'_, '_> {
    fn initial(&mut self) -> PlanResult<OrderingCosting> {
        Ok(OrderingCosting::new(self.call.clone()))
    }

    fn extend(&mut self, costing: &OrderingCosting, next: ResolvableId) -> PlanResult<OrderingCosting> {
        let mut extended = costing.clone();
        self.planner
            .extend_costing(&self.summary, &mut extended, next)?;
        Ok(extended)
    }

    fn heuristic(&mut self, resolvable: ResolvableId) -> PlanResult<f64> {
        self.planner
            .resolvable_heuristic(&self.call, &self.summary, resolvable)
    }
}
