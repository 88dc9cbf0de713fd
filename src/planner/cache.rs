use crate::planner::{CallKey, Plan};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Finished plans, shared between planning sessions.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: RwLock<HashMap<CallKey, Arc<Plan>>>,
}

impl PlanCache {
    /// Create a new cache instance
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
        }
    }

    /// Get the committed plan for a call
    pub fn get(&self, call: &CallKey) -> Option<Arc<Plan>> {
        self.plans.read().get(call).cloned()
    }

    pub fn contains(&self, call: &CallKey) -> bool {
        self.plans.read().contains_key(call)
    }

    /// Commit every plan of a cluster in one step.
    ///
    /// Readers see either none or all of the cluster's plans. Members that
    /// were already committed are replaced, since the cluster was re-solved
    /// as a whole.
    pub fn commit_cluster(&self, plans: Vec<Plan>) {
        let mut guard = self.plans.write();
        for plan in plans {
            if let Some(previous) = guard.get(&plan.call) {
                log::debug!(
                    "Re-solved {} (cost {:.2} -> {:.2})",
                    plan.call,
                    previous.cost,
                    plan.cost
                );
            }
            guard.insert(plan.call.clone(), Arc::new(plan));
        }
    }

    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.read().is_empty()
    }

    /// Snapshot of all committed calls
    pub fn calls(&self) -> Vec<CallKey> {
        let mut calls: Vec<CallKey> = self.plans.read().keys().cloned().collect();
        calls.sort();
        calls
    }
}
