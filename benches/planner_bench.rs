use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use reasoner_planner::planner::{PartialOrderReduction, SearchStrategy};
use reasoner_planner::{
    Concludable, Conclusion, ConjunctionBuilder, ConjunctionId, Constraint, InMemoryStatistics,
    Logic, Mode, Planner, PlannerConfig, ResolvableId, RuleSource, Unifier,
};
use std::hint::black_box;

const PERSON: &[&str] = &["person", "man"];

fn create_statistics() -> InMemoryStatistics {
    InMemoryStatistics::new()
        .with_things("person", 300)
        .with_things("man", 200)
        .with_things("name", 450)
        .with_has_edges("person", "name", 350)
        .with_has_edges("man", "name", 250)
}

/// A chain `$v0 has $v1, $v1 has $v2, ...` of `links` retrievables
fn create_chain(links: usize) -> (Logic, ConjunctionId) {
    let mut builder = ConjunctionBuilder::new("chain");
    for i in 0..=links {
        builder = builder.thing(&format!("v{i}"), PERSON);
    }
    for i in 0..links {
        builder = builder.retrievable(vec![Constraint::has(&format!("v{i}"), &format!("v{}", i + 1))]);
    }
    let mut logic = Logic::new();
    let id = logic.add_conjunction(builder).unwrap();
    (logic, id)
}

/// `$a has name $n` concluded by a rule, followed by `links` plain retrievables
fn create_rule_query(links: usize) -> (Logic, ConjunctionId) {
    let mut logic = Logic::new();
    let condition = logic
        .add_conjunction(
            ConjunctionBuilder::new("condition")
                .thing("x", PERSON)
                .retrievable(vec![Constraint::isa("x")]),
        )
        .unwrap();
    let rule = logic
        .add_rule("named", condition, Conclusion::explicit_has("x", "name", "Dave"))
        .unwrap();

    let mut builder = ConjunctionBuilder::new("query")
        .thing("n", &["name"])
        .thing("v0", PERSON)
        .concludable(Concludable::has("v0", "n"));
    for i in 0..links {
        builder = builder
            .thing(&format!("v{}", i + 1), PERSON)
            .retrievable(vec![Constraint::has(&format!("v{i}"), &format!("v{}", i + 1))]);
    }
    let query = logic.add_conjunction(builder).unwrap();
    logic
        .add_application(
            query,
            ResolvableId(0),
            rule,
            vec![Unifier::new().map("v0", "x").map("n", "name")],
        )
        .unwrap();
    (logic, query)
}

fn bench_partial_order_reduction(c: &mut Criterion) {
    let mut group = c.benchmark_group("partial_order_reduction");

    for links in [2, 4, 6, 8].iter() {
        let (logic, id) = create_chain(*links);
        let conjunction = logic.conjunction(id).unwrap();
        group.throughput(Throughput::Elements(*links as u64));
        group.bench_with_input(BenchmarkId::new("chain", links), links, |b, _| {
            b.iter(|| {
                let orderings = PartialOrderReduction::new(black_box(conjunction), &Mode::new())
                    .orderings();
                black_box(orderings);
            });
        });
    }
    group.finish();
}

fn bench_plan_strategies(c: &mut Criterion) {
    let statistics = create_statistics();
    let (logic, id) = create_chain(7);
    let mut group = c.benchmark_group("plan_chain_of_seven");

    for strategy in [
        SearchStrategy::Exhaustive,
        SearchStrategy::Greedy,
        SearchStrategy::Hybrid,
    ] {
        let config = PlannerConfig {
            strategy,
            ..PlannerConfig::default()
        };
        group.bench_function(strategy.to_string(), |b| {
            b.iter(|| {
                let mut planner = Planner::new(&logic, &statistics, config.clone());
                black_box(planner.plan(black_box(id), &Mode::new())).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_plan_with_rules(c: &mut Criterion) {
    let statistics = create_statistics();
    let mut group = c.benchmark_group("plan_with_rules");

    for links in [1, 3, 5].iter() {
        let (logic, id) = create_rule_query(*links);
        group.bench_with_input(BenchmarkId::new("links", links), links, |b, _| {
            b.iter(|| {
                let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());
                black_box(planner.plan(black_box(id), &Mode::new())).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_estimates(c: &mut Criterion) {
    let statistics = create_statistics();
    let (logic, id) = create_rule_query(5);

    c.bench_function("estimate_all_answers", |b| {
        b.iter(|| {
            let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());
            black_box(planner.estimate_all_answers(black_box(id))).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_partial_order_reduction,
    bench_plan_strategies,
    bench_plan_with_rules,
    bench_estimates
);
criterion_main!(benches);
