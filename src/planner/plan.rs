use crate::pattern::{ConjunctionId, Mode, ResolvableId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A planning problem: a conjunction entered with some variables bound.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallKey {
    pub conjunction: ConjunctionId,
    pub mode: Mode,
}

impl CallKey {
    pub fn new(conjunction: ConjunctionId, mode: Mode) -> Self {
        Self { conjunction, mode }
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = self
            .mode
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} {{{mode}}}", self.conjunction)
    }
}

/// The chosen ordering for a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub call: CallKey,
    pub ordering: Vec<ResolvableId>,
    pub cost: f64,
    /// Share of the call's answers requested by its cyclic callers, in `[0, 1]`
    pub cyclic_scaling_factor: f64,
}

/// `(cyclic concludable, mode)` pairs an ordering depends on.
pub type CyclicSignature = BTreeSet<(ResolvableId, Mode)>;

/// A costed candidate ordering for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingSummary {
    pub call: CallKey,
    pub ordering: Vec<ResolvableId>,
    /// Cost that scales with how many answers callers request
    pub connected_cost: f64,
    /// Cost paid regardless of caller bindings
    pub disconnected_cost: f64,
    pub cyclic_modes: CyclicSignature,
    pub cyclic_scaling_factors: BTreeMap<ResolvableId, f64>,
    /// Calls each cyclic concludable triggers inside its cluster
    pub cyclic_calls: BTreeMap<ResolvableId, BTreeSet<CallKey>>,
}

impl OrderingSummary {
    pub fn acyclic_cost(&self) -> f64 {
        self.connected_cost + self.disconnected_cost
    }
}
