use crate::pattern::{ConjunctionId, Resolvable, ResolvableId, Var};
use crate::planner::plan::{CallKey, Plan};
use crate::planner::{PlanError, PlanResult, Planner, rule_calls};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// Represents a complete explanation of a plan and the plans it triggers
#[derive(Debug)]
pub struct PlanExplanation {
    pub nodes: Vec<ExplanationNode>,
    pub total_cost: f64,
}

/// Represents a single line of the explanation
#[derive(Debug)]
pub struct ExplanationNode {
    pub operation: String,
    pub properties: Vec<(String, String)>,
    pub cost: Option<f64>,
    pub depth: usize,
}

impl fmt::Display for PlanExplanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reasoner Plan:")?;
        writeln!(f, "Total Cost: {:.2}", self.total_cost)?;
        writeln!(f, "{}", "-".repeat(80))?;

        for node in &self.nodes {
            let indent = "  ".repeat(node.depth);
            match node.cost {
                Some(cost) => writeln!(f, "{indent}{} (cost={cost:.2})", node.operation)?,
                None => writeln!(f, "{indent}{}", node.operation)?,
            }
            for (key, value) in &node.properties {
                writeln!(f, "{indent}  {key}: {value}")?;
            }
        }

        Ok(())
    }
}

impl Planner<'_> {
    /// Plan `call` if needed and explain it with everything it triggers.
    pub fn explain(&mut self, call: &CallKey) -> PlanResult<PlanExplanation> {
        let plan = self.plan_call(call)?;
        let mut nodes = Vec::new();
        let mut explainer = Explainer {
            planner: self,
            shown: HashSet::new(),
        };
        explainer
            .explain_call(&plan, 0, &mut nodes)
            .map_err(|e| e.for_call(call))?;
        Ok(PlanExplanation {
            nodes,
            total_cost: plan.cost,
        })
    }
}

/// Helper struct for building plan explanations
struct Explainer<'p, 'a> {
    planner: &'p mut Planner<'a>,
    shown: HashSet<CallKey>,
}

impl Explainer<'_, '_> {
    fn explain_call(
        &mut self,
        plan: &Plan,
        depth: usize,
        nodes: &mut Vec<ExplanationNode>,
    ) -> PlanResult<()> {
        let logic = self.planner.context().logic;
        let conjunction = logic
            .conjunction(plan.call.conjunction)
            .ok_or(PlanError::UnknownConjunction(plan.call.conjunction))?;
        self.shown.insert(plan.call.clone());

        let mut properties = vec![
            ("Conjunction".to_string(), conjunction.label().to_string()),
            ("Mode".to_string(), describe_mode(&plan.call.mode)),
        ];
        if plan.cyclic_scaling_factor > 0.0 {
            properties.push((
                "CyclicScaling".to_string(),
                format!("{:.2}", plan.cyclic_scaling_factor),
            ));
        }
        nodes.push(ExplanationNode {
            operation: "Call".to_string(),
            properties,
            cost: Some(plan.cost),
            depth,
        });

        let mut bound = plan.call.mode.clone();
        for id in &plan.ordering {
            let resolvable = conjunction
                .resolvable(*id)
                .ok_or(PlanError::UnknownResolvable {
                    conjunction: plan.call.conjunction,
                    resolvable: *id,
                })?;
            let variables = conjunction.estimateable(&resolvable.variables());
            let mode: BTreeSet<Var> = variables.intersection(&bound).cloned().collect();
            nodes.push(ExplanationNode {
                operation: format!("{id} {}", resolvable.describe()),
                properties: vec![("Mode".to_string(), describe_mode(&mode))],
                cost: None,
                depth: depth + 1,
            });

            match resolvable {
                Resolvable::Concludable(_) => {
                    self.explain_rules(plan.call.conjunction, *id, &mode, depth + 2, nodes)?;
                }
                Resolvable::Negated(negated) => {
                    for sub in &negated.conjunctions {
                        self.explain_negation(*sub, &mode, depth + 2, nodes)?;
                    }
                }
                Resolvable::Retrievable(_) => {}
            }
            if !resolvable.is_negated() {
                bound.extend(variables);
            }
        }
        Ok(())
    }

    fn explain_rules(
        &mut self,
        conjunction: ConjunctionId,
        concludable: ResolvableId,
        mode: &BTreeSet<Var>,
        depth: usize,
        nodes: &mut Vec<ExplanationNode>,
    ) -> PlanResult<()> {
        let logic = self.planner.context().logic;
        for (rule, call) in rule_calls(logic, conjunction, concludable, mode)? {
            nodes.push(ExplanationNode {
                operation: format!("Rule {}", rule.label),
                properties: vec![("Mode".to_string(), describe_mode(&call.mode))],
                cost: None,
                depth,
            });
            self.explain_triggered(&call, depth + 1, nodes)?;
        }
        Ok(())
    }

    fn explain_negation(
        &mut self,
        sub: ConjunctionId,
        mode: &BTreeSet<Var>,
        depth: usize,
        nodes: &mut Vec<ExplanationNode>,
    ) -> PlanResult<()> {
        let logic = self.planner.context().logic;
        let conjunction = logic
            .conjunction(sub)
            .ok_or(PlanError::UnknownConjunction(sub))?;
        let sub_mode = conjunction
            .estimateable_variables()
            .intersection(mode)
            .cloned()
            .collect();
        nodes.push(ExplanationNode {
            operation: "Not".to_string(),
            properties: Vec::new(),
            cost: None,
            depth,
        });
        self.explain_triggered(&CallKey::new(sub, sub_mode), depth + 1, nodes)
    }

    fn explain_triggered(
        &mut self,
        call: &CallKey,
        depth: usize,
        nodes: &mut Vec<ExplanationNode>,
    ) -> PlanResult<()> {
        if self.shown.contains(call) {
            nodes.push(ExplanationNode {
                operation: format!("See {call}"),
                properties: Vec::new(),
                cost: None,
                depth,
            });
            return Ok(());
        }
        let plan: Arc<Plan> = self.planner.ensure_planned(call)?;
        self.explain_call(&plan, depth, nodes)
    }
}

fn describe_mode(mode: &BTreeSet<Var>) -> String {
    let vars: Vec<String> = mode.iter().map(ToString::to_string).collect();
    format!("{{{}}}", vars.join(", "))
}
