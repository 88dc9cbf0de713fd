use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// A pattern variable, named within the conjunction that declares it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Var(Arc<str>);

impl Var {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Var {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Var {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<Var> for String {
    fn from(var: Var) -> Self {
        var.0.to_string()
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Variables already bound by the caller when a conjunction starts.
pub type Mode = BTreeSet<Var>;

/// Build a [`Mode`] from variable names.
pub fn mode<'a>(names: impl IntoIterator<Item = &'a str>) -> Mode {
    names.into_iter().map(Var::new).collect()
}

/// A schema label: a type, role type or attribute type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Label(Arc<str>);

impl Label {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Label {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0.to_string()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// Data-level variable, bound to concepts
    Thing,
    /// Schema-level variable, bound to types
    Type,
}

/// What the planner knows about a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub kind: VariableKind,
    /// Concrete types the variable may take, subtypes included
    #[serde(default)]
    pub types: Vec<Label>,
    /// Pinned to a single concept or value
    #[serde(default)]
    pub constant: bool,
}

impl VariableInfo {
    pub fn thing(types: &[&str]) -> Self {
        Self {
            kind: VariableKind::Thing,
            types: types.iter().map(|t| Label::new(t)).collect(),
            constant: false,
        }
    }

    pub fn constant_thing(types: &[&str]) -> Self {
        Self {
            constant: true,
            ..Self::thing(types)
        }
    }

    pub fn type_variable() -> Self {
        Self {
            kind: VariableKind::Type,
            types: Vec::new(),
            constant: false,
        }
    }

    pub fn is_thing(&self) -> bool {
        self.kind == VariableKind::Thing
    }
}

/// One role player of a relation pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePlayer {
    /// Explicit role in the pattern; players without one share a key
    #[serde(default)]
    pub role: Option<Label>,
    /// Role types the player may fill, used for statistics lookups
    #[serde(default)]
    pub role_types: Vec<Label>,
    pub player: Var,
}

impl RolePlayer {
    pub fn new(role: Option<&str>, role_types: &[&str], player: &str) -> Self {
        Self {
            role: role.map(Label::new),
            role_types: role_types.iter().map(|t| Label::new(t)).collect(),
            player: Var::new(player),
        }
    }

    /// Role types to count players of; falls back to the explicit role.
    pub fn counted_role_types(&self) -> Vec<Label> {
        if self.role_types.is_empty() {
            self.role.iter().cloned().collect()
        } else {
            self.role_types.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationConstraint {
    pub relation: Var,
    #[serde(default)]
    pub players: Vec<RolePlayer>,
}

impl RelationConstraint {
    pub fn new(relation: &str, players: Vec<RolePlayer>) -> Self {
        Self {
            relation: Var::new(relation),
            players,
        }
    }

    pub fn variables(&self) -> BTreeSet<Var> {
        let mut vars: BTreeSet<Var> = self.players.iter().map(|rp| rp.player.clone()).collect();
        vars.insert(self.relation.clone());
        vars
    }
}

/// A constraint answered straight from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Isa { owner: Var },
    Has { owner: Var, attribute: Var },
    Relation(RelationConstraint),
    /// Value identity, e.g. `$n "Alice"`
    Value { owner: Var },
}

impl Constraint {
    pub fn isa(owner: &str) -> Self {
        Self::Isa {
            owner: Var::new(owner),
        }
    }

    pub fn has(owner: &str, attribute: &str) -> Self {
        Self::Has {
            owner: Var::new(owner),
            attribute: Var::new(attribute),
        }
    }

    pub fn value(owner: &str) -> Self {
        Self::Value {
            owner: Var::new(owner),
        }
    }

    pub fn variables(&self) -> BTreeSet<Var> {
        match self {
            Self::Isa { owner } | Self::Value { owner } => BTreeSet::from([owner.clone()]),
            Self::Has { owner, attribute } => BTreeSet::from([owner.clone(), attribute.clone()]),
            Self::Relation(relation) => relation.variables(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retrievable {
    pub constraints: Vec<Constraint>,
}

impl Retrievable {
    pub fn variables(&self) -> BTreeSet<Var> {
        self.constraints.iter().flat_map(Constraint::variables).collect()
    }
}

/// A pattern that rules may conclude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Concludable {
    Has { owner: Var, attribute: Var },
    Relation(RelationConstraint),
    Attribute { attribute: Var },
}

impl Concludable {
    pub fn has(owner: &str, attribute: &str) -> Self {
        Self::Has {
            owner: Var::new(owner),
            attribute: Var::new(attribute),
        }
    }

    pub fn attribute(attribute: &str) -> Self {
        Self::Attribute {
            attribute: Var::new(attribute),
        }
    }

    pub fn variables(&self) -> BTreeSet<Var> {
        match self {
            Self::Has { owner, attribute } => BTreeSet::from([owner.clone(), attribute.clone()]),
            Self::Relation(relation) => relation.variables(),
            Self::Attribute { attribute } => BTreeSet::from([attribute.clone()]),
        }
    }

    /// The variable a rule conclusion creates new concepts for.
    pub fn generating(&self) -> Option<&Var> {
        match self {
            Self::Has { attribute, .. } | Self::Attribute { attribute } => Some(attribute),
            Self::Relation(relation) => Some(&relation.relation),
        }
    }
}

/// A negated disjunction of sub-conjunctions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negated {
    pub conjunctions: Vec<ConjunctionId>,
    /// Variables shared with the enclosing conjunction
    pub variables: BTreeSet<Var>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolvable {
    Retrievable(Retrievable),
    Concludable(Concludable),
    Negated(Negated),
}

impl Resolvable {
    pub fn variables(&self) -> BTreeSet<Var> {
        match self {
            Self::Retrievable(retrievable) => retrievable.variables(),
            Self::Concludable(concludable) => concludable.variables(),
            Self::Negated(negated) => negated.variables.clone(),
        }
    }

    pub fn generating(&self) -> Option<&Var> {
        match self {
            Self::Concludable(concludable) => concludable.generating(),
            _ => None,
        }
    }

    pub fn as_concludable(&self) -> Option<&Concludable> {
        match self {
            Self::Concludable(concludable) => Some(concludable),
            _ => None,
        }
    }

    pub fn is_negated(&self) -> bool {
        matches!(self, Self::Negated(_))
    }

    pub fn is_concludable(&self) -> bool {
        matches!(self, Self::Concludable(_))
    }

    /// Short human-readable form, used by plan explanations.
    pub fn describe(&self) -> String {
        let vars = |set: BTreeSet<Var>| {
            set.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Self::Retrievable(retrievable) => {
                format!("Retrievable [{}]", vars(retrievable.variables()))
            }
            Self::Concludable(Concludable::Has { owner, attribute }) => {
                format!("Concludable {owner} has {attribute}")
            }
            Self::Concludable(Concludable::Relation(relation)) => {
                let players = relation
                    .players
                    .iter()
                    .map(|rp| match &rp.role {
                        Some(role) => format!("{role}: {}", rp.player),
                        None => rp.player.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Concludable {} ({players})", relation.relation)
            }
            Self::Concludable(Concludable::Attribute { attribute }) => {
                format!("Concludable attribute {attribute}")
            }
            Self::Negated(negated) => format!("Negated [{}]", vars(negated.variables.clone())),
        }
    }
}

/// Opaque handle of a registered conjunction.
///
/// Conjunctions are planned by identity: two structurally equal conjunctions
/// registered separately get different ids and are planned independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConjunctionId(pub(crate) u32);

impl ConjunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConjunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conjunction#{}", self.0)
    }
}

/// Position of a resolvable within its conjunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolvableId(pub usize);

impl fmt::Display for ResolvableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compiled conjunction: variables plus the resolvables over them.
#[derive(Debug, Clone)]
pub struct Conjunction {
    id: ConjunctionId,
    label: String,
    variables: BTreeMap<Var, VariableInfo>,
    resolvables: Vec<Resolvable>,
}

impl Conjunction {
    pub(crate) fn new(
        id: ConjunctionId,
        label: String,
        variables: BTreeMap<Var, VariableInfo>,
        resolvables: Vec<Resolvable>,
    ) -> Self {
        Self {
            id,
            label,
            variables,
            resolvables,
        }
    }

    pub fn id(&self) -> ConjunctionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn variables(&self) -> &BTreeMap<Var, VariableInfo> {
        &self.variables
    }

    pub fn variable(&self, var: &Var) -> Option<&VariableInfo> {
        self.variables.get(var)
    }

    pub fn resolvables(&self) -> &[Resolvable] {
        &self.resolvables
    }

    pub fn resolvable(&self, id: ResolvableId) -> Option<&Resolvable> {
        self.resolvables.get(id.0)
    }

    pub fn resolvable_ids(&self) -> impl Iterator<Item = ResolvableId> + '_ {
        (0..self.resolvables.len()).map(ResolvableId)
    }

    pub fn concludables(&self) -> impl Iterator<Item = (ResolvableId, &Concludable)> + '_ {
        self.resolvables
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_concludable().map(|c| (ResolvableId(i), c)))
    }

    pub fn is_estimateable(&self, var: &Var) -> bool {
        self.variables.get(var).is_some_and(VariableInfo::is_thing)
    }

    pub fn estimateable_variables(&self) -> BTreeSet<Var> {
        self.variables
            .iter()
            .filter(|(_, info)| info.is_thing())
            .map(|(var, _)| var.clone())
            .collect()
    }

    /// Restrict `vars` to the estimateable variables of this conjunction.
    pub fn estimateable<'v>(&self, vars: impl IntoIterator<Item = &'v Var>) -> BTreeSet<Var> {
        vars.into_iter()
            .filter(|v| self.is_estimateable(v))
            .cloned()
            .collect()
    }

    pub fn constant_variables(&self) -> BTreeSet<Var> {
        self.variables
            .iter()
            .filter(|(_, info)| info.constant)
            .map(|(var, _)| var.clone())
            .collect()
    }
}

/// Resolvable description awaiting registration.
#[derive(Debug, Clone)]
pub(crate) enum PendingResolvable {
    Retrievable(Retrievable),
    Concludable(Concludable),
    Negated(Vec<ConjunctionId>),
}

/// Assembles a conjunction before it is registered with a `Logic`.
#[derive(Debug, Clone)]
pub struct ConjunctionBuilder {
    pub(crate) label: String,
    pub(crate) variables: BTreeMap<Var, VariableInfo>,
    pub(crate) resolvables: Vec<PendingResolvable>,
}

impl ConjunctionBuilder {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            variables: BTreeMap::new(),
            resolvables: Vec::new(),
        }
    }

    pub fn variable(mut self, name: &str, info: VariableInfo) -> Self {
        self.variables.insert(Var::new(name), info);
        self
    }

    pub fn thing(self, name: &str, types: &[&str]) -> Self {
        self.variable(name, VariableInfo::thing(types))
    }

    pub fn constant(self, name: &str, types: &[&str]) -> Self {
        self.variable(name, VariableInfo::constant_thing(types))
    }

    pub fn retrievable(mut self, constraints: Vec<Constraint>) -> Self {
        self.resolvables
            .push(PendingResolvable::Retrievable(Retrievable { constraints }));
        self
    }

    pub fn concludable(mut self, concludable: Concludable) -> Self {
        self.resolvables
            .push(PendingResolvable::Concludable(concludable));
        self
    }

    pub fn negated(mut self, conjunctions: Vec<ConjunctionId>) -> Self {
        self.resolvables
            .push(PendingResolvable::Negated(conjunctions));
        self
    }
}
