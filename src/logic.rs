use crate::pattern::{
    Conjunction, ConjunctionBuilder, ConjunctionId, Label, Negated, PendingResolvable,
    Resolvable, ResolvableId, Var,
};
use crate::planner::{PlanError, PlanResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(pub(crate) u32);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConclusionKind {
    /// Creates a relation between condition variables
    Relation,
    /// Attaches an attribute with a fixed value
    ExplicitHas { value: String },
    /// Attaches an attribute bound by the condition
    VariableHas,
}

/// The `then` side of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conclusion {
    #[serde(flatten)]
    pub kind: ConclusionKind,
    pub variables: BTreeSet<Var>,
    #[serde(default)]
    pub generating: Option<Var>,
}

impl Conclusion {
    pub fn relation(relation: &str, players: &[&str]) -> Self {
        let mut variables: BTreeSet<Var> = players.iter().map(|p| Var::new(p)).collect();
        variables.insert(Var::new(relation));
        Self {
            kind: ConclusionKind::Relation,
            variables,
            generating: Some(Var::new(relation)),
        }
    }

    pub fn explicit_has(owner: &str, attribute: &str, value: &str) -> Self {
        Self {
            kind: ConclusionKind::ExplicitHas {
                value: value.to_string(),
            },
            variables: BTreeSet::from([Var::new(owner), Var::new(attribute)]),
            generating: Some(Var::new(attribute)),
        }
    }

    pub fn variable_has(owner: &str, attribute: &str) -> Self {
        Self {
            kind: ConclusionKind::VariableHas,
            variables: BTreeSet::from([Var::new(owner), Var::new(attribute)]),
            generating: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub label: String,
    pub condition: ConjunctionId,
    pub conclusion: Conclusion,
}

/// Maps caller variables onto the rule-side variables they unify with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unifier {
    mapping: BTreeMap<Var, BTreeSet<Var>>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(mut self, from: &str, to: &str) -> Self {
        self.mapping
            .entry(Var::new(from))
            .or_default()
            .insert(Var::new(to));
        self
    }

    pub fn mapped(&self, var: &Var) -> impl Iterator<Item = &Var> + '_ {
        self.mapping.get(var).into_iter().flatten()
    }

    /// Rule-side variables reached from any of `vars`.
    pub fn map_all<'v>(&self, vars: impl IntoIterator<Item = &'v Var>) -> BTreeSet<Var> {
        vars.into_iter()
            .flat_map(|v| self.mapped(v))
            .cloned()
            .collect()
    }
}

/// A rule able to conclude a concludable, with every way of unifying them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleApplication {
    pub rule: RuleId,
    pub unifiers: Vec<Unifier>,
}

/// Rule lookup and resolvable compilation.
pub trait RuleSource: Send + Sync {
    fn conjunction(&self, id: ConjunctionId) -> Option<&Conjunction>;

    fn rule(&self, id: RuleId) -> Option<&Rule>;

    /// Rules whose conclusion can produce answers for `concludable`.
    fn applicable_rules(
        &self,
        conjunction: ConjunctionId,
        concludable: ResolvableId,
    ) -> &[RuleApplication];
}

/// Persisted instance statistics.
pub trait Statistics: Send + Sync {
    /// Total instances over all of `types`
    fn thing_count(&self, types: &[Label]) -> u64;

    fn has_edge_count(&self, owner_type: &Label, attribute_type: &Label) -> u64;

    /// Total role players over all of `role_types`
    fn role_player_count(&self, role_types: &[Label]) -> u64;
}

/// In-memory rule base.
#[derive(Debug, Default)]
pub struct Logic {
    conjunctions: Vec<Conjunction>,
    labels: HashMap<String, ConjunctionId>,
    rules: Vec<Rule>,
    rule_labels: HashMap<String, RuleId>,
    applications: HashMap<(ConjunctionId, ResolvableId), Vec<RuleApplication>>,
}

impl Logic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conjunction; it receives a fresh identity.
    pub fn add_conjunction(&mut self, builder: ConjunctionBuilder) -> PlanResult<ConjunctionId> {
        if self.labels.contains_key(&builder.label) {
            return Err(PlanError::InvalidPattern(format!(
                "duplicate conjunction label '{}'",
                builder.label
            )));
        }
        let id = ConjunctionId(self.conjunctions.len() as u32);
        let mut resolvables = Vec::with_capacity(builder.resolvables.len());
        for pending in builder.resolvables {
            let resolvable = match pending {
                PendingResolvable::Retrievable(retrievable) => {
                    Resolvable::Retrievable(retrievable)
                }
                PendingResolvable::Concludable(concludable) => {
                    Resolvable::Concludable(concludable)
                }
                PendingResolvable::Negated(conjunctions) => {
                    let mut variables = BTreeSet::new();
                    for sub in &conjunctions {
                        let negated = self
                            .conjunction(*sub)
                            .ok_or(PlanError::UnknownConjunction(*sub))?;
                        variables.extend(
                            negated
                                .variables()
                                .keys()
                                .filter(|v| builder.variables.contains_key(*v))
                                .cloned(),
                        );
                    }
                    Resolvable::Negated(Negated {
                        conjunctions,
                        variables,
                    })
                }
            };
            if let Some(undeclared) = resolvable
                .variables()
                .into_iter()
                .find(|v| !builder.variables.contains_key(v))
            {
                return Err(PlanError::InvalidPattern(format!(
                    "variable {undeclared} is not declared in '{}'",
                    builder.label
                )));
            }
            resolvables.push(resolvable);
        }
        self.labels.insert(builder.label.clone(), id);
        self.conjunctions.push(Conjunction::new(
            id,
            builder.label,
            builder.variables,
            resolvables,
        ));
        Ok(id)
    }

    pub fn add_rule(
        &mut self,
        label: &str,
        condition: ConjunctionId,
        conclusion: Conclusion,
    ) -> PlanResult<RuleId> {
        if self.conjunction(condition).is_none() {
            return Err(PlanError::UnknownConjunction(condition));
        }
        if self.rule_labels.contains_key(label) {
            return Err(PlanError::InvalidPattern(format!(
                "duplicate rule label '{label}'"
            )));
        }
        if let Some(generating) = &conclusion.generating {
            if !conclusion.variables.contains(generating) {
                return Err(PlanError::InvalidPattern(format!(
                    "rule '{label}' generates {generating} outside its conclusion"
                )));
            }
        }
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(Rule {
            id,
            label: label.to_string(),
            condition,
            conclusion,
        });
        self.rule_labels.insert(label.to_string(), id);
        Ok(id)
    }

    /// Declare that `rule` can conclude the given concludable.
    pub fn add_application(
        &mut self,
        conjunction: ConjunctionId,
        concludable: ResolvableId,
        rule: RuleId,
        unifiers: Vec<Unifier>,
    ) -> PlanResult<()> {
        let target = self
            .conjunction(conjunction)
            .ok_or(PlanError::UnknownConjunction(conjunction))?
            .resolvable(concludable)
            .ok_or(PlanError::UnknownResolvable {
                conjunction,
                resolvable: concludable,
            })?;
        if !target.is_concludable() {
            return Err(PlanError::InvalidPattern(format!(
                "{concludable} of {conjunction} is not concludable"
            )));
        }
        if self.rule(rule).is_none() {
            return Err(PlanError::UnknownRule(rule));
        }
        if unifiers.is_empty() {
            return Err(PlanError::InvalidPattern(format!(
                "{rule} applied to {conjunction}{concludable} without a unifier"
            )));
        }
        self.applications
            .entry((conjunction, concludable))
            .or_default()
            .push(RuleApplication { rule, unifiers });
        Ok(())
    }

    pub fn conjunction_by_label(&self, label: &str) -> Option<ConjunctionId> {
        self.labels.get(label).copied()
    }

    pub fn rule_by_label(&self, label: &str) -> Option<RuleId> {
        self.rule_labels.get(label).copied()
    }

    pub fn conjunction_ids(&self) -> impl Iterator<Item = ConjunctionId> + '_ {
        self.conjunctions.iter().map(Conjunction::id)
    }
}

impl RuleSource for Logic {
    fn conjunction(&self, id: ConjunctionId) -> Option<&Conjunction> {
        self.conjunctions.get(id.index())
    }

    fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.0 as usize)
    }

    fn applicable_rules(
        &self,
        conjunction: ConjunctionId,
        concludable: ResolvableId,
    ) -> &[RuleApplication] {
        self.applications
            .get(&(conjunction, concludable))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Statistics held in maps, for fixtures and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatistics {
    things: HashMap<Label, u64>,
    has_edges: HashMap<(Label, Label), u64>,
    role_players: HashMap<Label, u64>,
}

impl InMemoryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances whose most specific type is `label`
    pub fn with_things(mut self, label: &str, count: u64) -> Self {
        self.things.insert(Label::new(label), count);
        self
    }

    pub fn with_has_edges(mut self, owner: &str, attribute: &str, count: u64) -> Self {
        self.has_edges
            .insert((Label::new(owner), Label::new(attribute)), count);
        self
    }

    pub fn with_role_players(mut self, role: &str, count: u64) -> Self {
        self.role_players.insert(Label::new(role), count);
        self
    }
}

impl Statistics for InMemoryStatistics {
    fn thing_count(&self, types: &[Label]) -> u64 {
        types
            .iter()
            .filter_map(|t| self.things.get(t))
            .sum()
    }

    fn has_edge_count(&self, owner_type: &Label, attribute_type: &Label) -> u64 {
        self.has_edges
            .get(&(owner_type.clone(), attribute_type.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn role_player_count(&self, role_types: &[Label]) -> u64 {
        role_types
            .iter()
            .filter_map(|t| self.role_players.get(t))
            .sum()
    }
}
