//! JSON description of a schema, its rules and its statistics.

use crate::logic::{Conclusion, InMemoryStatistics, Logic, Unifier};
use crate::pattern::{
    Concludable, ConjunctionBuilder, ConjunctionId, Constraint, ResolvableId, Var, VariableInfo,
};
use crate::planner::PlanError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug)]
pub enum FixtureError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for FixtureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Cannot read fixture: {e}"),
            Self::Parse(e) => write!(f, "Malformed fixture: {e}"),
            Self::Invalid(msg) => write!(f, "Invalid fixture: {msg}"),
        }
    }
}

impl std::error::Error for FixtureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for FixtureError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for FixtureError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<PlanError> for FixtureError {
    fn from(e: PlanError) -> Self {
        Self::Invalid(e.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsFixture {
    /// Instances per most specific type
    #[serde(default)]
    pub things: BTreeMap<String, u64>,
    #[serde(default)]
    pub has_edges: Vec<HasEdgeFixture>,
    /// Players per role type
    #[serde(default)]
    pub role_players: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasEdgeFixture {
    pub owner: String,
    pub attribute: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvableFixture {
    Retrievable(Vec<Constraint>),
    Concludable(Concludable),
    /// Labels of earlier conjunctions
    Negated(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConjunctionFixture {
    pub label: String,
    pub variables: BTreeMap<Var, VariableInfo>,
    pub resolvables: Vec<ResolvableFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFixture {
    pub label: String,
    /// Label of the condition conjunction
    pub condition: String,
    pub conclusion: Conclusion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationFixture {
    pub conjunction: String,
    /// Position of the concludable among the conjunction's resolvables
    pub concludable: usize,
    pub rule: String,
    pub unifiers: Vec<Unifier>,
}

/// A whole planning problem; conjunctions are registered in order, so a
/// negation may only name conjunctions listed before it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub statistics: StatisticsFixture,
    #[serde(default)]
    pub conjunctions: Vec<ConjunctionFixture>,
    #[serde(default)]
    pub rules: Vec<RuleFixture>,
    #[serde(default)]
    pub applications: Vec<ApplicationFixture>,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, FixtureError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn build(&self) -> Result<(Logic, InMemoryStatistics), FixtureError> {
        let mut logic = Logic::new();
        for conjunction in &self.conjunctions {
            let mut builder = ConjunctionBuilder::new(&conjunction.label);
            for (var, info) in &conjunction.variables {
                builder = builder.variable(var.name(), info.clone());
            }
            for resolvable in &conjunction.resolvables {
                builder = match resolvable {
                    ResolvableFixture::Retrievable(constraints) => {
                        builder.retrievable(constraints.clone())
                    }
                    ResolvableFixture::Concludable(concludable) => {
                        builder.concludable(concludable.clone())
                    }
                    ResolvableFixture::Negated(labels) => {
                        let ids = labels
                            .iter()
                            .map(|label| conjunction_id(&logic, label))
                            .collect::<Result<Vec<_>, _>>()?;
                        builder.negated(ids)
                    }
                };
            }
            logic.add_conjunction(builder)?;
        }

        for rule in &self.rules {
            let condition = conjunction_id(&logic, &rule.condition)?;
            logic.add_rule(&rule.label, condition, rule.conclusion.clone())?;
        }

        for application in &self.applications {
            let conjunction = conjunction_id(&logic, &application.conjunction)?;
            let rule = logic.rule_by_label(&application.rule).ok_or_else(|| {
                FixtureError::Invalid(format!("unknown rule '{}'", application.rule))
            })?;
            logic.add_application(
                conjunction,
                ResolvableId(application.concludable),
                rule,
                application.unifiers.clone(),
            )?;
        }

        let mut statistics = InMemoryStatistics::new();
        for (label, count) in &self.statistics.things {
            statistics = statistics.with_things(label, *count);
        }
        for edge in &self.statistics.has_edges {
            statistics = statistics.with_has_edges(&edge.owner, &edge.attribute, edge.count);
        }
        for (role, count) in &self.statistics.role_players {
            statistics = statistics.with_role_players(role, *count);
        }
        Ok((logic, statistics))
    }
}

fn conjunction_id(logic: &Logic, label: &str) -> Result<ConjunctionId, FixtureError> {
    logic
        .conjunction_by_label(label)
        .ok_or_else(|| FixtureError::Invalid(format!("unknown conjunction '{label}'")))
}
