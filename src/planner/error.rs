use crate::logic::RuleId;
use crate::pattern::{ConjunctionId, ResolvableId};
use crate::planner::CallKey;
use std::fmt;

/// Errors that can occur during reasoner planning
#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    /// An internal invariant was violated; this is a planner defect
    IllegalState(String),
    /// Conjunction is not known to the rule source
    UnknownConjunction(ConjunctionId),
    /// Rule is not known to the rule source
    UnknownRule(RuleId),
    /// Resolvable does not exist in its conjunction
    UnknownResolvable {
        conjunction: ConjunctionId,
        resolvable: ResolvableId,
    },
    /// Pattern, rule or fixture input was rejected
    InvalidPattern(String),
    /// Planning a call failed
    Planning {
        call: CallKey,
        source: Box<PlanError>,
    },
}

impl PlanError {
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Attach the call being planned, unless one is attached already.
    pub fn for_call(self, call: &CallKey) -> Self {
        match self {
            Self::Planning { .. } => self,
            other => Self::Planning {
                call: call.clone(),
                source: Box::new(other),
            },
        }
    }

    /// The call that failed to plan, if known.
    pub fn call(&self) -> Option<&CallKey> {
        match self {
            Self::Planning { call, .. } => Some(call),
            _ => None,
        }
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::IllegalState(msg) => write!(f, "Illegal planner state: {msg}"),
            PlanError::UnknownConjunction(id) => write!(f, "Unknown conjunction: {id}"),
            PlanError::UnknownRule(id) => write!(f, "Unknown rule: {id}"),
            PlanError::UnknownResolvable {
                conjunction,
                resolvable,
            } => write!(f, "Unknown resolvable {resolvable} in {conjunction}"),
            PlanError::InvalidPattern(msg) => write!(f, "Invalid pattern: {msg}"),
            PlanError::Planning { call, source } => write!(f, "Failed to plan {call}: {source}"),
        }
    }
}

impl std::error::Error for PlanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlanError::Planning { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type for planning operations
pub type PlanResult<T> = Result<T, PlanError>;
