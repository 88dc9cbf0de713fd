//! Cost-based ordering of conjunctions.
//!
//! A [`Planner`] is one planning session. It lazily summarises conjunctions,
//! builds answer-count models, enumerates and costs candidate orderings per
//! [`CallKey`], and resolves mutually recursive calls together as a cluster
//! before committing their plans to a [`PlanCache`] that sessions may share.

pub mod cache;
pub mod cluster;
pub mod coster;
pub mod error;
pub mod estimator;
pub mod explain;
pub mod graph;
pub mod plan;
pub mod search;


pub use cache::PlanCache;
pub use cluster::ClusterPlan;
pub use coster::OrderingCosting;
pub use error::{PlanError, PlanResult};
pub use estimator::{AnswerCountEstimator, ConjunctionModel, InitState, LocalEstimate};
pub use explain::{ExplanationNode, PlanExplanation};
pub use graph::{ConjunctionGraph, ConjunctionSummary};
pub use plan::{CallKey, CyclicSignature, OrderingSummary, Plan};
pub use search::{GreedySearch, HybridSearch, PartialOrderReduction};

use crate::logic::{Rule, RuleSource, Statistics};
use crate::pattern::{Conjunction, ConjunctionId, Mode, ResolvableId, Var};
use coster::CallCostModel;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The collaborators every planning component reads from.
#[derive(Clone, Copy)]
pub struct PlanningContext<'a> {
    pub logic: &'a dyn RuleSource,
    pub statistics: &'a dyn Statistics,
}

/// How candidate orderings are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    /// Exhaustive up to `exhaustive_limit` resolvables, hybrid beyond
    #[default]
    Auto,
    Exhaustive,
    Greedy,
    Hybrid,
}

impl SearchStrategy {
    /// The concrete strategy for a conjunction of `resolvables` resolvables.
    pub fn resolve(self, resolvables: usize, exhaustive_limit: usize) -> Self {
        match self {
            Self::Auto if resolvables <= exhaustive_limit => Self::Exhaustive,
            Self::Auto => Self::Hybrid,
            other => other,
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Exhaustive => write!(f, "exhaustive"),
            Self::Greedy => write!(f, "greedy"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for SearchStrategy {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "exhaustive" | "por" => Ok(Self::Exhaustive),
            "greedy" => Ok(Self::Greedy),
            "hybrid" | "beam" => Ok(Self::Hybrid),
            other => Err(PlanError::InvalidPattern(format!(
                "unknown search strategy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    pub strategy: SearchStrategy,
    /// Largest conjunction `Auto` enumerates exhaustively
    pub exhaustive_limit: usize,
    /// Partial orderings kept per level once the hybrid search turns to beam
    pub beam_width: usize,
    /// Frontier size at which the hybrid search turns to beam
    pub frontier_limit: usize,
    /// Most complete orderings a heuristic search returns
    pub max_candidates: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Auto,
            exhaustive_limit: 8,
            beam_width: 4,
            frontier_limit: 64,
            max_candidates: 8,
        }
    }
}

/// A planning session.
///
/// Summaries, estimator models and candidate orderings live as long as the
/// session; committed plans live in the (possibly shared) cache.
pub struct Planner<'a> {
    logic: &'a dyn RuleSource,
    statistics: &'a dyn Statistics,
    config: PlannerConfig,
    graph: ConjunctionGraph,
    estimator: AnswerCountEstimator,
    candidates: HashMap<CallKey, Vec<OrderingSummary>>,
    generating: HashSet<CallKey>,
    cache: Arc<PlanCache>,
}

impl<'a> Planner<'a> {
    pub fn new(
        logic: &'a dyn RuleSource,
        statistics: &'a dyn Statistics,
        config: PlannerConfig,
    ) -> Self {
        Self::with_cache(logic, statistics, config, Arc::new(PlanCache::new()))
    }

    pub fn with_cache(
        logic: &'a dyn RuleSource,
        statistics: &'a dyn Statistics,
        config: PlannerConfig,
        cache: Arc<PlanCache>,
    ) -> Self {
        Self {
            logic,
            statistics,
            config,
            graph: ConjunctionGraph::new(),
            estimator: AnswerCountEstimator::new(),
            candidates: HashMap::new(),
            generating: HashSet::new(),
            cache,
        }
    }

    pub fn context(&self) -> PlanningContext<'a> {
        PlanningContext {
            logic: self.logic,
            statistics: self.statistics,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PlanCache> {
        &self.cache
    }

    /// Plan `conjunction` entered with the `mode` variables bound.
    ///
    /// Variables of `mode` that are not estimateable in the conjunction are
    /// ignored. Any failure is reported once, tagged with the call.
    pub fn plan(&mut self, conjunction: ConjunctionId, mode: &Mode) -> PlanResult<Arc<Plan>> {
        let call = match self.conjunction(conjunction) {
            Ok(conj) => CallKey::new(
                conjunction,
                mode.iter()
                    .filter(|v| conj.is_estimateable(v))
                    .cloned()
                    .collect(),
            ),
            Err(e) => return Err(e.for_call(&CallKey::new(conjunction, mode.clone()))),
        };
        self.plan_call(&call)
    }

    pub fn plan_call(&mut self, call: &CallKey) -> PlanResult<Arc<Plan>> {
        self.ensure_planned(call).map_err(|e| e.for_call(call))
    }

    /// The committed plan for `call`, planning its cluster first if needed.
    pub(crate) fn ensure_planned(&mut self, call: &CallKey) -> PlanResult<Arc<Plan>> {
        if let Some(plan) = self.cache.get(call) {
            return Ok(plan);
        }
        self.generate_candidates(call)?;
        if let Some(plan) = self.cache.get(call) {
            // Committed by another session meanwhile.
            return Ok(plan);
        }
        self.plan_cluster(call)?;
        self.cache.get(call).ok_or_else(|| {
            PlanError::illegal_state(format!("cluster of {call} committed without it"))
        })
    }

    pub fn get_plan(&self, call: &CallKey) -> Option<Arc<Plan>> {
        self.cache.get(call)
    }

    /// Deduplicated candidate orderings generated so far for `call`.
    pub fn candidate_orderings(&self, call: &CallKey) -> Option<&[OrderingSummary]> {
        self.candidates.get(call).map(Vec::as_slice)
    }

    pub fn summary(&mut self, conjunction: ConjunctionId) -> PlanResult<Arc<ConjunctionSummary>> {
        self.graph.summary(self.logic, conjunction)
    }

    pub fn estimate_all_answers(&mut self, conjunction: ConjunctionId) -> PlanResult<f64> {
        let ctx = self.context();
        self.estimator.estimate_all_answers(ctx, conjunction)
    }

    /// Full answers of the conjunction's negated sub-conjunctions, unscaled.
    pub fn estimate_negated_answers(&mut self, conjunction: ConjunctionId) -> PlanResult<f64> {
        let ctx = self.context();
        self.estimator.negated_answers(ctx, conjunction)
    }

    pub fn estimate_answers(
        &mut self,
        conjunction: ConjunctionId,
        variables: &BTreeSet<Var>,
        resolvables: &BTreeSet<ResolvableId>,
    ) -> PlanResult<f64> {
        let ctx = self.context();
        self.estimator
            .estimate_answers(ctx, conjunction, variables, resolvables)
    }

    pub fn local_estimate(
        &mut self,
        conjunction: ConjunctionId,
        resolvable: ResolvableId,
        variables: &BTreeSet<Var>,
    ) -> PlanResult<f64> {
        let ctx = self.context();
        self.estimator
            .local_estimate(ctx, conjunction, resolvable, variables)
    }

    pub fn estimator(&self) -> &AnswerCountEstimator {
        &self.estimator
    }

    fn conjunction(&self, id: ConjunctionId) -> PlanResult<&'a Conjunction> {
        self.logic
            .conjunction(id)
            .ok_or(PlanError::UnknownConjunction(id))
    }

    /// Enumerate and cost the orderings of `call`, once per session.
    ///
    /// Re-entry while the call is being generated returns immediately; the
    /// cluster search reads the candidates once the outermost call is done.
    pub(crate) fn generate_candidates(&mut self, call: &CallKey) -> PlanResult<()> {
        if self.candidates.contains_key(call) || !self.generating.insert(call.clone()) {
            return Ok(());
        }
        let result = self.compute_candidates(call);
        self.generating.remove(call);
        let candidates = result?;
        log::debug!("{} candidate ordering(s) for {call}", candidates.len());
        for candidate in &candidates {
            log::trace!(
                "  {:?} cost {:.2} cyclic {:?}",
                candidate.ordering,
                candidate.acyclic_cost(),
                candidate.cyclic_modes
            );
        }
        self.candidates.insert(call.clone(), candidates);
        Ok(())
    }

    fn compute_candidates(&mut self, call: &CallKey) -> PlanResult<Vec<OrderingSummary>> {
        let summary = self.summary(call.conjunction)?;
        let conjunction = self.conjunction(call.conjunction)?;
        let strategy = self
            .config
            .strategy
            .resolve(conjunction.resolvables().len(), self.config.exhaustive_limit);
        let (frontier_limit, beam_width, max_candidates) = (
            self.config.frontier_limit,
            self.config.beam_width,
            self.config.max_candidates,
        );

        let orderings = match strategy {
            SearchStrategy::Greedy => {
                let search = GreedySearch::new(conjunction, &call.mode);
                let mut model = CallCostModel::new(self, call.clone(), summary);
                search.orderings(&mut model)?
            }
            SearchStrategy::Hybrid => {
                let search = HybridSearch::new(
                    conjunction,
                    &call.mode,
                    frontier_limit,
                    beam_width,
                    max_candidates,
                );
                let mut model = CallCostModel::new(self, call.clone(), summary);
                search.orderings(&mut model)?
            }
            SearchStrategy::Exhaustive | SearchStrategy::Auto => {
                PartialOrderReduction::new(conjunction, &call.mode).orderings()
            }
        };

        let mut best: BTreeMap<CyclicSignature, OrderingSummary> = BTreeMap::new();
        for ordering in orderings {
            let costed = self.cost_ordering(call, &ordering)?;
            match best.entry(costed.cyclic_modes.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(costed);
                }
                Entry::Occupied(mut entry) => {
                    if costed.acyclic_cost() < entry.get().acyclic_cost() {
                        entry.insert(costed);
                    }
                }
            }
        }
        if best.is_empty() {
            return Err(PlanError::illegal_state(format!(
                "{strategy} search produced no ordering for {call}"
            )));
        }
        Ok(best.into_values().collect())
    }
}

/// Calls a concludable triggers through each applicable rule and unifier.
///
/// The caller's `mode` is carried across the unifier and restricted to the
/// estimateable variables of the rule condition.
pub(crate) fn rule_calls<'l>(
    logic: &'l dyn RuleSource,
    conjunction: ConjunctionId,
    concludable: ResolvableId,
    mode: &BTreeSet<Var>,
) -> PlanResult<Vec<(&'l Rule, CallKey)>> {
    let mut calls = Vec::new();
    for application in logic.applicable_rules(conjunction, concludable) {
        let rule = logic
            .rule(application.rule)
            .ok_or(PlanError::UnknownRule(application.rule))?;
        let condition = logic
            .conjunction(rule.condition)
            .ok_or(PlanError::UnknownConjunction(rule.condition))?;
        for unifier in &application.unifiers {
            let mapped = unifier.map_all(mode);
            let condition_mode = mapped
                .into_iter()
                .filter(|v| condition.is_estimateable(v))
                .collect();
            calls.push((rule, CallKey::new(rule.condition, condition_mode)));
        }
    }
    Ok(calls)
}

/// Distinct calls a concludable triggers, optionally only into `filter`.
pub(crate) fn triggered_calls(
    logic: &dyn RuleSource,
    conjunction: ConjunctionId,
    concludable: ResolvableId,
    mode: &BTreeSet<Var>,
    filter: Option<&BTreeSet<ConjunctionId>>,
) -> PlanResult<BTreeSet<CallKey>> {
    Ok(rule_calls(logic, conjunction, concludable, mode)?
        .into_iter()
        .map(|(_, call)| call)
        .filter(|call| filter.is_none_or(|f| f.contains(&call.conjunction)))
        .collect())
}
