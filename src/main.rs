#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![warn(clippy::nursery)]
#![allow(clippy::multiple_crate_versions)]
mod cli;

use crate::cli::{Cli, Commands, EstimateCommand, PlanCommand};
use anyhow::{Context, anyhow};
use clap::Parser;
use reasoner_planner::{
    Fixture, InMemoryStatistics, Logic, Mode, PlanCache, PlanExplanation, Planner, PlannerConfig,
    RuleSource, Var,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan(cmd) => plan(&cmd)?,
        Commands::Estimate(cmd) => estimate(&cmd)?,
    }

    Ok(())
}

fn load(path: &std::path::Path) -> anyhow::Result<(Logic, InMemoryStatistics)> {
    let fixture = Fixture::from_path(path)
        .with_context(|| format!("loading fixture {}", path.display()))?;
    Ok(fixture.build()?)
}

fn plan(cmd: &PlanCommand) -> anyhow::Result<()> {
    let (logic, statistics) = load(&cmd.fixture)?;
    let config = PlannerConfig::from(&cmd.planner);
    let mode: Mode = cmd.mode.iter().map(|name| Var::new(name)).collect();
    let cache = Arc::new(PlanCache::new());
    let threads = cmd.threads.clamp(1, cmd.conjunction.len().max(1));
    log::info!(
        "Planning {} conjunction(s) on {threads} thread(s) with {} search",
        cmd.conjunction.len(),
        config.strategy
    );

    let labels: Vec<&String> = cmd.conjunction.iter().collect();
    let results: Vec<anyhow::Result<(String, PlanExplanation)>> = thread::scope(|scope| {
        let handles: Vec<_> = labels
            .chunks(labels.len().div_ceil(threads).max(1))
            .map(|chunk| {
                let (logic, statistics, config, cache, mode) =
                    (&logic, &statistics, &config, &cache, &mode);
                scope.spawn(move || {
                    let mut planner =
                        Planner::with_cache(logic, statistics, config.clone(), cache.clone());
                    chunk
                        .iter()
                        .map(|label| -> anyhow::Result<(String, PlanExplanation)> {
                            let id = logic
                                .conjunction_by_label(label)
                                .ok_or_else(|| anyhow!("unknown conjunction '{label}'"))?;
                            let plan = planner.plan(id, mode)?;
                            let explanation = planner.explain(&plan.call)?;
                            Ok(((*label).clone(), explanation))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| vec![Err(anyhow!("planning thread panicked"))])
            })
            .collect()
    });

    for result in results {
        let (label, explanation) = result?;
        println!("== {label}");
        print!("{explanation}");
    }
    log::info!("{} plan(s) committed", cache.len());
    Ok(())
}

fn estimate(cmd: &EstimateCommand) -> anyhow::Result<()> {
    let (logic, statistics) = load(&cmd.fixture)?;
    let id = logic
        .conjunction_by_label(&cmd.conjunction)
        .ok_or_else(|| anyhow!("unknown conjunction '{}'", cmd.conjunction))?;
    let conjunction = logic
        .conjunction(id)
        .ok_or_else(|| anyhow!("conjunction '{}' not registered", cmd.conjunction))?;
    let variables: BTreeSet<Var> = if cmd.variable.is_empty() {
        conjunction.estimateable_variables()
    } else {
        cmd.variable.iter().map(|name| Var::new(name)).collect()
    };

    let mut planner = Planner::new(&logic, &statistics, PlannerConfig::default());
    let all = conjunction.resolvable_ids().collect();
    println!("{}", conjunction.label());
    println!("  all answers: {:.2}", planner.estimate_all_answers(id)?);
    if conjunction.resolvables().iter().any(|r| r.is_negated()) {
        println!("  negated answers: {:.2}", planner.estimate_negated_answers(id)?);
    }
    for var in &variables {
        let answers = planner.estimate_answers(id, &BTreeSet::from([var.clone()]), &all)?;
        println!("  {var}: {answers:.2}");
    }
    println!(
        "  {}: {:.2}",
        variables
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" "),
        planner.estimate_answers(id, &variables, &all)?
    );
    Ok(())
}
