pub mod fixture;
pub mod logic;
pub mod pattern;
pub mod planner;

// Re-export commonly used types
pub use fixture::{Fixture, FixtureError};
pub use logic::{
    Conclusion, ConclusionKind, InMemoryStatistics, Logic, Rule, RuleApplication, RuleId,
    RuleSource, Statistics, Unifier,
};
pub use pattern::{
    Concludable, Conjunction, ConjunctionBuilder, ConjunctionId, Constraint, Label, Mode,
    RelationConstraint, Resolvable, ResolvableId, RolePlayer, Var, VariableInfo, mode,
};
pub use planner::{
    CallKey, OrderingSummary, Plan, PlanCache, PlanError, PlanExplanation, PlanResult, Planner,
    PlannerConfig, PlanningContext, SearchStrategy,
};
