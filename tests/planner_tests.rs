mod common;

use common::*;
use reasoner_planner::{
    CallKey, ConjunctionBuilder, Constraint, Logic, Mode, PlanCache, PlanError, Planner,
    PlannerConfig, ResolvableId, RuleSource, SearchStrategy, mode,
};
use std::sync::Arc;
use std::thread;

fn assert_cost(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected cost {expected}, got {actual}"
    );
}

#[test]
fn test_plan_single_retrievable() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let id = person_condition(&mut logic, "people", "p");
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let plan = planner.plan(id, &Mode::new()).expect("Failed to plan");

    // 5 people retrieved, then each of them combined once
    assert_eq!(plan.ordering, vec![ResolvableId(0)]);
    assert_cost(plan.cost, 10.0);
    assert_eq!(plan.cyclic_scaling_factor, 0.0);
    println!("✓ single retrievable planned at cost {:.2}", plan.cost);
}

#[test]
fn test_plan_includes_rule_condition_cost() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (named, condition) = dave_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let plan = planner.plan(named, &Mode::new()).expect("Failed to plan");

    // 10 answers for the concludable, 10 for the rule condition plan and
    // 10 answers combined
    assert_cost(plan.cost, 30.0);
    let condition_plan = planner
        .get_plan(&CallKey::new(condition, Mode::new()))
        .expect("condition should be planned alongside its caller");
    assert_cost(condition_plan.cost, 10.0);
    assert_eq!(planner.cache().len(), 2);
}

#[test]
fn test_plan_bound_mode_reaches_rule_condition() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (named, condition) = dave_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let plan = planner.plan(named, &mode(["p"])).expect("Failed to plan");

    assert_eq!(plan.call.mode, mode(["p"]));
    assert!(
        planner
            .get_plan(&CallKey::new(condition, mode(["x"])))
            .is_some(),
        "binding $p binds $x in the condition"
    );
}

#[test]
fn test_plan_ignores_unknown_mode_variables() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let id = person_condition(&mut logic, "people", "p");
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let plan = planner
        .plan(id, &mode(["p", "nowhere"]))
        .expect("Failed to plan");

    assert_eq!(plan.call, CallKey::new(id, mode(["p"])));
}

#[test]
fn test_plan_negation_after_its_shared_variables() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let named = logic
        .add_conjunction(
            ConjunctionBuilder::new("has-name")
                .thing("p", PERSON)
                .thing("n", NAME)
                .retrievable(vec![Constraint::has("p", "n")]),
        )
        .expect("Failed to register negated conjunction");
    let id = logic
        .add_conjunction(
            ConjunctionBuilder::new("nameless")
                .thing("p", PERSON)
                .retrievable(vec![Constraint::isa("p")])
                .negated(vec![named]),
        )
        .expect("Failed to register conjunction");
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let plan = planner.plan(id, &Mode::new()).expect("Failed to plan");

    assert_eq!(plan.ordering, vec![ResolvableId(0), ResolvableId(1)]);
    assert_cost(plan.cost, 25.0);
    let negated = planner
        .get_plan(&CallKey::new(named, mode(["p"])))
        .expect("negated conjunction should be planned with its shared variables bound");
    assert_cost(negated.cost, 10.0);

    let summary = planner.summary(id).expect("Failed to summarise");
    assert_eq!(summary.negated_conjunctions().collect::<Vec<_>>(), vec![named]);
    assert_cost(
        planner
            .estimate_negated_answers(id)
            .expect("estimation failed"),
        5.0,
    );
}

#[test]
fn test_plan_recursive_cluster() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (query, condition) = transitive_friendship_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let plan = planner.plan(query, &Mode::new()).expect("Failed to plan");
    assert!(is_permutation(&plan.ordering, 2));
    assert!(plan.cost > 0.0);

    let cache = planner.cache().clone();
    let calls = cache.calls();
    assert!(
        calls.iter().any(|call| call.conjunction == condition),
        "{calls:?}"
    );
    for call in &calls {
        let committed = cache.get(call).expect("listed call has a plan");
        let len = logic
            .conjunction(call.conjunction)
            .expect("registered conjunction")
            .resolvables()
            .len();
        assert!(is_permutation(&committed.ordering, len), "{call}");
        assert!((0.0..=1.0).contains(&committed.cyclic_scaling_factor), "{call}");
        assert!(committed.cost > 0.0, "{call}");
    }
    assert!(planner.estimator().is_ready(condition));
    println!("✓ recursive cluster committed {} plan(s)", calls.len());
}

#[test]
fn test_plan_is_cached() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (named, _) = dave_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let first = planner.plan(named, &Mode::new()).expect("Failed to plan");
    let second = planner.plan(named, &Mode::new()).expect("Failed to plan");

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_identical_conjunctions_plan_separately() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let first = person_condition(&mut logic, "people", "p");
    let second = person_condition(&mut logic, "more-people", "p");
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let a = planner.plan(first, &Mode::new()).expect("Failed to plan");
    let b = planner.plan(second, &Mode::new()).expect("Failed to plan");

    assert_ne!(a.call, b.call);
    assert_eq!(a.cost, b.cost);
    assert_eq!(planner.cache().len(), 2);
}

#[test]
fn test_shared_cache_across_threads() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (named, condition) = dave_schema(&mut logic);
    let (query, _) = transitive_friendship_schema(&mut logic);
    let cache = Arc::new(PlanCache::new());

    let costs: Vec<(f64, f64)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (logic, statistics, cache) = (&logic, &statistics, cache.clone());
                scope.spawn(move || {
                    let mut planner =
                        Planner::with_cache(logic, statistics, PlannerConfig::default(), cache);
                    let named = planner.plan(named, &Mode::new()).expect("Failed to plan");
                    let friends = planner.plan(query, &Mode::new()).expect("Failed to plan");
                    (named.cost, friends.cost)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("planning thread panicked"))
            .collect()
    });

    for (named_cost, friends_cost) in &costs {
        assert_cost(*named_cost, 30.0);
        assert_cost(*friends_cost, costs[0].1);
    }
    assert!(cache.contains(&CallKey::new(condition, Mode::new())));
    println!("✓ {} sessions shared {} plan(s)", costs.len(), cache.len());
}

#[test]
fn test_unknown_conjunction_reports_call() {
    let statistics = social_statistics();
    let mut other = Logic::new();
    person_condition(&mut other, "first", "p");
    let foreign = person_condition(&mut other, "second", "p");
    let mut logic = Logic::new();
    person_condition(&mut logic, "only", "p");
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let err = planner
        .plan(foreign, &Mode::new())
        .expect_err("planning an unregistered conjunction should fail");

    assert!(matches!(err, PlanError::Planning { .. }), "{err}");
    assert_eq!(err.call(), Some(&CallKey::new(foreign, Mode::new())));
    assert!(std::error::Error::source(&err).is_some());
    println!("✓ unknown conjunction rejected: {err}");
}

#[test]
fn test_explain_shows_rules_and_triggered_calls() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (named, _) = dave_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let explanation = planner
        .explain(&CallKey::new(named, Mode::new()))
        .expect("Failed to explain");
    let output = explanation.to_string();

    assert!(output.contains("Reasoner Plan:"));
    assert!(output.contains("Total Cost: 30.00"));
    assert!(output.contains("everyone-is-dave"), "{output}");
    assert!(output.contains("dave-condition"), "{output}");
    assert!(explanation.nodes.iter().any(|node| node.depth > 0));
    println!("{output}");
}

#[test]
fn test_explain_recursive_cluster_terminates() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (query, _) = transitive_friendship_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, config(SearchStrategy::Greedy));

    let explanation = planner
        .explain(&CallKey::new(query, Mode::new()))
        .expect("Failed to explain");

    assert!(explanation.to_string().contains("transitive-friendship"));
}

#[test]
fn test_candidate_orderings_are_exposed() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (named, _) = dave_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());
    let call = CallKey::new(named, Mode::new());

    assert!(planner.candidate_orderings(&call).is_none());
    planner.plan_call(&call).expect("Failed to plan");
    let candidates = planner
        .candidate_orderings(&call)
        .expect("candidates kept for the session");

    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].cyclic_modes.is_empty());
}

#[test]
fn test_answer_combination_is_paid_per_step() {
    let statistics = social_statistics();
    let (logic, id) = shaped("strangers", &[&["a"], &["b"]]);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());
    let call = CallKey::new(id, Mode::new());

    let summary = planner
        .cost_ordering(&call, &[ResolvableId(0), ResolvableId(1)])
        .expect("Failed to cost ordering");

    // 5 + 5 retrieved, then 5 and 5 x 5 answers combined
    assert_cost(summary.connected_cost, 40.0);
    assert_cost(summary.disconnected_cost, 0.0);
    assert!(summary.cyclic_modes.is_empty());
}

#[test]
fn test_cyclic_scaling_is_capped_by_square_root() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (query, condition) = transitive_friendship_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());
    planner.plan(query, &Mode::new()).expect("Failed to plan");

    let calls = planner.cache().calls();
    let mut checked = 0;
    for call in calls {
        if call.conjunction != condition {
            continue;
        }
        let candidates = planner
            .candidate_orderings(&call)
            .expect("cluster member has candidates")
            .to_vec();
        for candidate in candidates {
            for (concludable, cyclic_mode) in &candidate.cyclic_modes {
                let answers = planner
                    .local_estimate(condition, *concludable, cyclic_mode)
                    .expect("estimation failed");
                let factor = candidate.cyclic_scaling_factors[concludable];
                assert!(
                    factor <= answers.sqrt() / answers + 1e-12,
                    "{call}: factor {factor} over {answers} answers"
                );
                checked += 1;
            }
        }
    }
    assert!(checked > 0, "no cyclic concludable was costed");
    println!("✓ {checked} cyclic scaling factor(s) within the square-root cap");
}

#[test]
fn test_summary_splits_cyclic_and_acyclic_concludables() {
    let statistics = social_statistics();
    let mut logic = Logic::new();
    let (query, condition) = transitive_friendship_schema(&mut logic);
    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());

    let recursive = planner.summary(condition).expect("Failed to summarise");
    assert_eq!(
        recursive.cyclic_concludables().collect::<Vec<_>>(),
        vec![ResolvableId(0), ResolvableId(1)]
    );
    assert_eq!(recursive.acyclic_concludables().count(), 0);

    let top = planner.summary(query).expect("Failed to summarise");
    assert_eq!(top.cyclic_concludables().count(), 0);
    assert_eq!(top.acyclic_concludables().collect::<Vec<_>>(), vec![ResolvableId(1)]);
    assert!(top.acyclic_dependencies(ResolvableId(1)).contains(&condition));
    assert_eq!(top.negated_conjunctions().count(), 0);
}
