//! Approximate answer counts for conjunctions.
//!
//! Every conjunction gets a [`ConjunctionModel`]: one unary estimate per
//! estimateable variable plus a list of [`LocalEstimate`]s per resolvable.
//! Queries over a variable subset are answered by a greedy weighted set cover
//! of those variables, multiplying the covering estimates as if independent.
//!
//! Rule conditions are modelled before the concludables they feed. When the
//! recursion re-enters a conjunction that is still being modelled, the cycle
//! is recorded and the re-entrant read sees the conjunction's partial model.
//! Once the outermost conjunction of the cycle finishes, the members are
//! reset and the outermost one is modelled exactly once more.

use crate::logic::ConclusionKind;
use crate::pattern::{
    Concludable, Conjunction, ConjunctionId, Constraint, Label, RelationConstraint, Resolvable,
    ResolvableId, Var,
};
use crate::planner::{PlanError, PlanResult, PlanningContext};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Estimates never drop below this once exposed to costing.
pub const MIN_ESTIMATE: f64 = 1.0;

/// Initialization state of a conjunction's model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitState {
    #[default]
    NotStarted,
    InProgress,
    Complete,
    /// Complete once, scheduled for one more pass after a cycle was found
    Reset,
}

/// A constant count over a fixed set of variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleEstimate {
    variables: BTreeSet<Var>,
    answers: f64,
}

/// Relation cardinality combined with per-role player counts.
#[derive(Debug, Clone, PartialEq)]
pub struct CoPlayerEstimate {
    variables: BTreeSet<Var>,
    players: Vec<(Var, Option<Label>)>,
    role_player_estimates: BTreeMap<Option<Label>, f64>,
    relation_type_estimate: f64,
    inferred_estimate: f64,
}

impl CoPlayerEstimate {
    pub fn new(
        relation: Var,
        players: Vec<(Var, Option<Label>)>,
        role_player_estimates: BTreeMap<Option<Label>, f64>,
        relation_type_estimate: f64,
        inferred_estimate: f64,
    ) -> Self {
        let mut variables: BTreeSet<Var> = players.iter().map(|(v, _)| v.clone()).collect();
        variables.insert(relation);
        Self {
            variables,
            players,
            role_player_estimates,
            relation_type_estimate,
            inferred_estimate,
        }
    }

    /// `ceil(R * prod nPk(ceil(players(role) / R), k(role))) + inferred`,
    /// counting only the players in `filter`.
    pub fn estimate(&self, filter: &BTreeSet<Var>) -> f64 {
        let mut occurrences: BTreeMap<&Option<Label>, u64> = BTreeMap::new();
        for (player, role) in &self.players {
            if filter.contains(player) {
                *occurrences.entry(role).or_default() += 1;
            }
        }
        let mut factor = 1.0;
        if self.relation_type_estimate > 0.0 {
            for (role, k) in occurrences {
                let players = self.role_player_estimates.get(role).copied().unwrap_or(0.0);
                let average = (players / self.relation_type_estimate).ceil();
                factor *= n_permute_k(average, k);
            }
        }
        (self.relation_type_estimate * factor).ceil() + self.inferred_estimate
    }
}

/// Falling factorial `n (n-1) ... (n-k+1)`; zero once `k > n`.
pub fn n_permute_k(n: f64, k: u64) -> f64 {
    (0..k).map(|i| (n - i as f64).max(0.0)).product()
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalEstimate {
    Simple(SimpleEstimate),
    CoPlayer(CoPlayerEstimate),
}

impl LocalEstimate {
    pub fn simple(variables: impl IntoIterator<Item = Var>, answers: f64) -> Self {
        Self::Simple(SimpleEstimate {
            variables: variables.into_iter().collect(),
            answers,
        })
    }

    pub fn variables(&self) -> &BTreeSet<Var> {
        match self {
            Self::Simple(simple) => &simple.variables,
            Self::CoPlayer(co_player) => &co_player.variables,
        }
    }

    pub fn estimate(&self, filter: &BTreeSet<Var>) -> f64 {
        match self {
            Self::Simple(simple) => simple.answers,
            Self::CoPlayer(co_player) => co_player.estimate(filter),
        }
    }
}

/// Greedy weighted set cover of `variables`.
///
/// Starts from the unary cover and lets every estimate, cheapest first, take
/// over the variables it touches when it is cheaper than their current cover.
pub fn greedy_cover(
    variables: &BTreeSet<Var>,
    unary: &BTreeMap<Var, LocalEstimate>,
    estimates: &[&LocalEstimate],
) -> f64 {
    let mut covering: Vec<&LocalEstimate> = Vec::new();
    let mut cover: BTreeMap<Var, usize> = BTreeMap::new();
    for var in variables {
        if let Some(estimate) = unary.get(var) {
            cover.insert(var.clone(), covering.len());
            covering.push(estimate);
        }
    }

    let mut ranked: Vec<&LocalEstimate> = estimates.to_vec();
    ranked.sort_by(|a, b| a.estimate(variables).total_cmp(&b.estimate(variables)));
    for estimate in ranked {
        let touched: BTreeSet<Var> = estimate
            .variables()
            .intersection(variables)
            .cloned()
            .collect();
        if touched.is_empty() {
            continue;
        }
        let current = cover_cost(&touched, &cover, &covering);
        if estimate.estimate(&touched) < current {
            let index = covering.len();
            covering.push(estimate);
            for var in touched {
                cover.insert(var, index);
            }
        }
    }
    cover_cost(variables, &cover, &covering)
}

fn cover_cost(
    variables: &BTreeSet<Var>,
    cover: &BTreeMap<Var, usize>,
    covering: &[&LocalEstimate],
) -> f64 {
    let used: BTreeSet<usize> = variables
        .iter()
        .filter_map(|v| cover.get(v).copied())
        .collect();
    used.into_iter()
        .map(|i| covering[i].estimate(variables))
        .product()
}

/// Estimates for one conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct ConjunctionModel {
    conjunction: ConjunctionId,
    estimateable: BTreeSet<Var>,
    unary: BTreeMap<Var, LocalEstimate>,
    resolvable_estimates: BTreeMap<ResolvableId, Vec<LocalEstimate>>,
    negated_answers: f64,
    full_answer_count: f64,
}

impl ConjunctionModel {
    fn new(
        conjunction: ConjunctionId,
        estimateable: BTreeSet<Var>,
        unary: BTreeMap<Var, LocalEstimate>,
        resolvable_estimates: BTreeMap<ResolvableId, Vec<LocalEstimate>>,
        negated_answers: f64,
    ) -> Self {
        let mut model = Self {
            conjunction,
            estimateable,
            unary,
            resolvable_estimates,
            negated_answers,
            full_answer_count: 0.0,
        };
        let all: BTreeSet<ResolvableId> = model.resolvable_estimates.keys().copied().collect();
        let full_answer_count = model.estimate(&model.estimateable, &all);
        model.full_answer_count = full_answer_count;
        model
    }

    pub fn conjunction(&self) -> ConjunctionId {
        self.conjunction
    }

    /// Unfloored answers for `variables` with only `resolvables` applied.
    pub fn estimate(&self, variables: &BTreeSet<Var>, resolvables: &BTreeSet<ResolvableId>) -> f64 {
        let variables: BTreeSet<Var> = variables
            .intersection(&self.estimateable)
            .cloned()
            .collect();
        let estimates: Vec<&LocalEstimate> = resolvables
            .iter()
            .filter_map(|r| self.resolvable_estimates.get(r))
            .flatten()
            .collect();
        greedy_cover(&variables, &self.unary, &estimates)
    }

    pub fn full_answer_count(&self) -> f64 {
        self.full_answer_count
    }

    /// Summed full estimates of negated sub-conjunctions
    pub fn negated_answers(&self) -> f64 {
        self.negated_answers
    }

    pub fn unary_estimate(&self, var: &Var) -> Option<f64> {
        self.unary
            .get(var)
            .map(|e| e.estimate(&BTreeSet::from([var.clone()])))
    }

    pub fn local_estimates(&self, resolvable: ResolvableId) -> &[LocalEstimate] {
        self.resolvable_estimates
            .get(&resolvable)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct EstimatorEntry {
    state: InitState,
    model: Option<Arc<ConjunctionModel>>,
    partial: Option<Arc<ConjunctionModel>>,
    reset_used: bool,
    passes: usize,
}

/// Lazily models conjunctions and answers count queries over them.
#[derive(Debug, Default)]
pub struct AnswerCountEstimator {
    entries: HashMap<ConjunctionId, EstimatorEntry>,
    stack: Vec<ConjunctionId>,
    cycles: HashMap<ConjunctionId, BTreeSet<ConjunctionId>>,
}

impl AnswerCountEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, conjunction: ConjunctionId) -> InitState {
        self.entries
            .get(&conjunction)
            .map_or(InitState::NotStarted, |e| e.state)
    }

    pub fn is_ready(&self, conjunction: ConjunctionId) -> bool {
        self.state(conjunction) == InitState::Complete
    }

    /// Whether the conjunction already spent its one cycle reset.
    pub fn was_reset(&self, conjunction: ConjunctionId) -> bool {
        self.entries
            .get(&conjunction)
            .is_some_and(|e| e.reset_used)
    }

    /// Number of times the conjunction's model has been built.
    pub fn passes(&self, conjunction: ConjunctionId) -> usize {
        self.entries.get(&conjunction).map_or(0, |e| e.passes)
    }

    pub fn initialize(&mut self, ctx: PlanningContext<'_>, conjunction: ConjunctionId) -> PlanResult<()> {
        self.model(ctx, conjunction).map(|_| ())
    }

    /// Estimated answers over all estimateable variables of the conjunction.
    pub fn estimate_all_answers(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: ConjunctionId,
    ) -> PlanResult<f64> {
        let raw = self.model(ctx, conjunction)?.full_answer_count();
        Ok(floor_estimate(conjunction, raw))
    }

    /// Estimated answers for `variables` when only `resolvables` are applied.
    pub fn estimate_answers(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: ConjunctionId,
        variables: &BTreeSet<Var>,
        resolvables: &BTreeSet<ResolvableId>,
    ) -> PlanResult<f64> {
        let raw = self.estimate_answers_unfloored(ctx, conjunction, variables, resolvables)?;
        Ok(floor_estimate(conjunction, raw))
    }

    pub fn estimate_answers_unfloored(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: ConjunctionId,
        variables: &BTreeSet<Var>,
        resolvables: &BTreeSet<ResolvableId>,
    ) -> PlanResult<f64> {
        Ok(self.model(ctx, conjunction)?.estimate(variables, resolvables))
    }

    /// Answers for `variables` from a single resolvable and the unary cover.
    pub fn local_estimate(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: ConjunctionId,
        resolvable: ResolvableId,
        variables: &BTreeSet<Var>,
    ) -> PlanResult<f64> {
        self.estimate_answers(ctx, conjunction, variables, &BTreeSet::from([resolvable]))
    }

    pub fn negated_answers(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: ConjunctionId,
    ) -> PlanResult<f64> {
        Ok(self.model(ctx, conjunction)?.negated_answers())
    }

    /// The model of a conjunction, building it on first use.
    pub fn model(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: ConjunctionId,
    ) -> PlanResult<Arc<ConjunctionModel>> {
        match self.state(conjunction) {
            InitState::Complete => self
                .entries
                .get(&conjunction)
                .and_then(|e| e.model.clone())
                .ok_or_else(|| {
                    PlanError::illegal_state(format!("{conjunction} complete without a model"))
                }),
            InitState::InProgress => {
                self.register_cycle(conjunction);
                self.entries
                    .get(&conjunction)
                    .and_then(|e| e.model.clone().or_else(|| e.partial.clone()))
                    .ok_or_else(|| {
                        PlanError::illegal_state(format!(
                            "{conjunction} re-entered before its partial model was published"
                        ))
                    })
            }
            InitState::NotStarted | InitState::Reset => self.initialise(ctx, conjunction),
        }
    }

    fn register_cycle(&mut self, head: ConjunctionId) {
        if let Some(position) = self.stack.iter().position(|c| *c == head) {
            log::trace!("Cycle through {head} re-entered");
            self.cycles
                .entry(head)
                .or_default()
                .extend(self.stack[position..].iter().copied());
        }
    }

    fn initialise(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: ConjunctionId,
    ) -> PlanResult<Arc<ConjunctionModel>> {
        loop {
            let entry = self.entries.entry(conjunction).or_default();
            entry.state = InitState::InProgress;
            entry.passes += 1;
            self.stack.push(conjunction);
            let built = self.build_model(ctx, conjunction);
            self.stack.pop();

            let entry = self.entries.entry(conjunction).or_default();
            entry.partial = None;
            let model = match built {
                Ok(model) => Arc::new(model),
                Err(err) => {
                    entry.state = if entry.model.is_some() {
                        InitState::Reset
                    } else {
                        InitState::NotStarted
                    };
                    self.cycles.remove(&conjunction);
                    return Err(err);
                }
            };
            entry.model = Some(model.clone());
            entry.state = InitState::Complete;
            let head_reset_used = entry.reset_used;

            let Some(members) = self.cycles.remove(&conjunction) else {
                return Ok(model);
            };
            if head_reset_used {
                return Ok(model);
            }
            log::debug!(
                "Cycle through {conjunction} detected, re-estimating {} conjunction(s) once",
                members.len()
            );
            for member in members {
                let entry = self.entries.entry(member).or_default();
                if entry.state == InitState::Complete && !entry.reset_used {
                    entry.state = InitState::Reset;
                    entry.reset_used = true;
                }
            }
        }
    }

    fn publish_partial(&mut self, model: ConjunctionModel) {
        let id = model.conjunction;
        self.entries.entry(id).or_default().partial = Some(Arc::new(model));
    }

    fn build_model(
        &mut self,
        ctx: PlanningContext<'_>,
        id: ConjunctionId,
    ) -> PlanResult<ConjunctionModel> {
        let conjunction = ctx
            .logic
            .conjunction(id)
            .ok_or(PlanError::UnknownConjunction(id))?;
        let estimateable = conjunction.estimateable_variables();

        let mut unary: BTreeMap<Var, LocalEstimate> = estimateable
            .iter()
            .map(|v| {
                let count = persisted_count(ctx, conjunction, v);
                (v.clone(), LocalEstimate::simple([v.clone()], count))
            })
            .collect();

        let mut estimates: BTreeMap<ResolvableId, Vec<LocalEstimate>> = BTreeMap::new();
        for (index, resolvable) in conjunction.resolvables().iter().enumerate() {
            let local = match resolvable {
                Resolvable::Retrievable(retrievable) => retrievable
                    .constraints
                    .iter()
                    .filter_map(|c| constraint_estimate(ctx, conjunction, c))
                    .collect(),
                Resolvable::Concludable(_) | Resolvable::Negated(_) => Vec::new(),
            };
            estimates.insert(ResolvableId(index), local);
        }
        self.publish_partial(ConjunctionModel::new(
            id,
            estimateable.clone(),
            unary.clone(),
            estimates.clone(),
            0.0,
        ));

        // Conditions of triggered rules are modelled first; cycles surface here.
        for (concludable, _) in conjunction.concludables() {
            for application in ctx.logic.applicable_rules(id, concludable) {
                let rule = ctx
                    .logic
                    .rule(application.rule)
                    .ok_or(PlanError::UnknownRule(application.rule))?;
                self.model(ctx, rule.condition)?;
            }
        }

        let mut inferred_edges = Vec::new();
        for (concludable_id, concludable) in conjunction.concludables() {
            let mut local = Vec::new();
            match concludable {
                Concludable::Has { owner, attribute } => {
                    let variables = conjunction.estimateable([owner, attribute]);
                    if !variables.is_empty() {
                        let persisted = has_edge_count(ctx, conjunction, owner, attribute);
                        let inferred = self.inferred_answers(
                            ctx,
                            conjunction,
                            concludable_id,
                            concludable,
                            &variables,
                        )?;
                        if variables.contains(owner) {
                            inferred_edges.push((owner, attribute, persisted + inferred));
                        }
                        local.push(LocalEstimate::simple(variables, persisted + inferred));
                    }
                }
                Concludable::Relation(relation) => {
                    let variables = conjunction.estimateable(&relation.variables());
                    let inferred = self.inferred_answers(
                        ctx,
                        conjunction,
                        concludable_id,
                        concludable,
                        &variables,
                    )?;
                    if let Some(estimate) =
                        co_player_estimate(ctx, conjunction, relation, inferred)
                    {
                        local.push(estimate);
                    }
                }
                Concludable::Attribute { .. } => {}
            }

            if let Some(generated) = concludable
                .generating()
                .filter(|v| conjunction.is_estimateable(v))
            {
                let inferred =
                    self.generated_answers(ctx, conjunction, concludable_id, concludable, generated)?;
                let total = persisted_count(ctx, conjunction, generated) + inferred;
                local.push(LocalEstimate::simple([generated.clone()], total));

                // Inference only adds instances, so the larger estimate is the population.
                let constant = conjunction
                    .variable(generated)
                    .is_some_and(|info| info.constant);
                let single = BTreeSet::from([generated.clone()]);
                let current = unary.get(generated).map_or(0.0, |e| e.estimate(&single));
                if !constant && total > current {
                    unary.insert(generated.clone(), LocalEstimate::simple(single, total));
                }
            }
            estimates.insert(concludable_id, local);
        }

        // Owners that only exist through inference get their share of the edges.
        for (owner, attribute, edges) in inferred_edges {
            let owners = unary
                .get(owner)
                .map_or(0.0, |e| e.estimate(&BTreeSet::from([owner.clone()])));
            if owners > 0.0 {
                continue;
            }
            let attributes = unary
                .get(attribute)
                .map_or(0.0, |e| e.estimate(&BTreeSet::from([attribute.clone()])))
                .max(1.0);
            unary.insert(
                owner.clone(),
                LocalEstimate::simple([owner.clone()], (edges / attributes).floor()),
            );
        }

        let mut negated_answers = 0.0;
        for resolvable in conjunction.resolvables() {
            if let Resolvable::Negated(negated) = resolvable {
                for sub in &negated.conjunctions {
                    negated_answers += self.estimate_all_answers(ctx, *sub)?;
                }
            }
        }

        Ok(ConjunctionModel::new(
            id,
            estimateable,
            unary,
            estimates,
            negated_answers,
        ))
    }

    /// Answers rules contribute to `concludable`, projected onto `filter`.
    fn inferred_answers(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: &Conjunction,
        concludable_id: ResolvableId,
        concludable: &Concludable,
        filter: &BTreeSet<Var>,
    ) -> PlanResult<f64> {
        let expands_generated = matches!(
            concludable,
            Concludable::Relation(_) | Concludable::Attribute { .. }
        );
        let mut total = 0.0;
        for application in ctx.logic.applicable_rules(conjunction.id(), concludable_id) {
            let rule = ctx
                .logic
                .rule(application.rule)
                .ok_or(PlanError::UnknownRule(application.rule))?;
            let condition = ctx
                .logic
                .conjunction(rule.condition)
                .ok_or(PlanError::UnknownConjunction(rule.condition))?;
            let all: BTreeSet<ResolvableId> = condition.resolvable_ids().collect();
            for unifier in &application.unifiers {
                let mut rule_side = unifier.map_all(filter);
                // One generated concept per combination of conclusion variables.
                if expands_generated
                    && rule
                        .conclusion
                        .generating
                        .as_ref()
                        .is_some_and(|g| rule_side.contains(g))
                {
                    rule_side = rule.conclusion.variables.clone();
                }
                let rule_side = condition.estimateable(&rule_side);
                total += self.estimate_answers(ctx, rule.condition, &rule_side, &all)?;
            }
        }
        Ok(total)
    }

    /// New concepts rules create for the generated variable of `concludable`.
    fn generated_answers(
        &mut self,
        ctx: PlanningContext<'_>,
        conjunction: &Conjunction,
        concludable_id: ResolvableId,
        concludable: &Concludable,
        generated: &Var,
    ) -> PlanResult<f64> {
        match concludable {
            Concludable::Has { .. } | Concludable::Attribute { .. } => {
                let mut values = BTreeSet::new();
                for application in ctx.logic.applicable_rules(conjunction.id(), concludable_id) {
                    let rule = ctx
                        .logic
                        .rule(application.rule)
                        .ok_or(PlanError::UnknownRule(application.rule))?;
                    if let ConclusionKind::ExplicitHas { value } = &rule.conclusion.kind {
                        values.insert(value.as_str());
                    }
                }
                Ok(values.len() as f64)
            }
            Concludable::Relation(_) => self.inferred_answers(
                ctx,
                conjunction,
                concludable_id,
                concludable,
                &BTreeSet::from([generated.clone()]),
            ),
        }
    }
}

fn floor_estimate(conjunction: ConjunctionId, raw: f64) -> f64 {
    if raw < MIN_ESTIMATE {
        log::debug!("Degenerate estimate {raw} in {conjunction} floored to {MIN_ESTIMATE}");
        MIN_ESTIMATE
    } else {
        raw
    }
}

fn persisted_count(ctx: PlanningContext<'_>, conjunction: &Conjunction, var: &Var) -> f64 {
    match conjunction.variable(var) {
        Some(info) if info.constant => 1.0,
        Some(info) => ctx.statistics.thing_count(&info.types) as f64,
        None => 0.0,
    }
}

fn has_edge_count(
    ctx: PlanningContext<'_>,
    conjunction: &Conjunction,
    owner: &Var,
    attribute: &Var,
) -> f64 {
    let (Some(owner), Some(attribute)) = (conjunction.variable(owner), conjunction.variable(attribute))
    else {
        return 0.0;
    };
    let mut count = 0;
    for owner_type in &owner.types {
        for attribute_type in &attribute.types {
            count += ctx.statistics.has_edge_count(owner_type, attribute_type);
        }
    }
    count as f64
}

fn co_player_estimate(
    ctx: PlanningContext<'_>,
    conjunction: &Conjunction,
    relation: &RelationConstraint,
    inferred: f64,
) -> Option<LocalEstimate> {
    if !conjunction.is_estimateable(&relation.relation) {
        return None;
    }
    let mut role_player_estimates = BTreeMap::new();
    let mut players = Vec::new();
    for role_player in &relation.players {
        if !conjunction.is_estimateable(&role_player.player) {
            continue;
        }
        role_player_estimates
            .entry(role_player.role.clone())
            .or_insert_with(|| {
                ctx.statistics
                    .role_player_count(&role_player.counted_role_types()) as f64
            });
        players.push((role_player.player.clone(), role_player.role.clone()));
    }
    Some(LocalEstimate::CoPlayer(CoPlayerEstimate::new(
        relation.relation.clone(),
        players,
        role_player_estimates,
        persisted_count(ctx, conjunction, &relation.relation),
        inferred,
    )))
}

fn constraint_estimate(
    ctx: PlanningContext<'_>,
    conjunction: &Conjunction,
    constraint: &Constraint,
) -> Option<LocalEstimate> {
    match constraint {
        Constraint::Isa { owner } => conjunction
            .is_estimateable(owner)
            .then(|| LocalEstimate::simple([owner.clone()], persisted_count(ctx, conjunction, owner))),
        Constraint::Has { owner, attribute } => {
            let variables = conjunction.estimateable([owner, attribute]);
            (!variables.is_empty()).then(|| {
                LocalEstimate::simple(variables, has_edge_count(ctx, conjunction, owner, attribute))
            })
        }
        Constraint::Relation(relation) => co_player_estimate(ctx, conjunction, relation, 0.0),
        Constraint::Value { owner } => conjunction
            .is_estimateable(owner)
            .then(|| LocalEstimate::simple([owner.clone()], 1.0)),
    }
}
