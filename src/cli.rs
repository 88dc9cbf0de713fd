use clap::{Args, Parser, Subcommand, ValueEnum};
use reasoner_planner::{PlannerConfig, SearchStrategy};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    version,
    name = "reasoner-planner",
    about = r#"
Cost-based planner for rule-augmented conjunctive queries.

Loads a schema with its rules and statistics from a JSON fixture, orders the
resolvables of the requested conjunctions and prints the chosen plans
together with the rule calls they trigger."#
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Plan conjunctions and print their explanations
    Plan(PlanCommand),
    /// Print answer count estimates for a conjunction
    Estimate(EstimateCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Auto,
    Exhaustive,
    Greedy,
    Hybrid,
}

impl From<StrategyArg> for SearchStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Auto => Self::Auto,
            StrategyArg::Exhaustive => Self::Exhaustive,
            StrategyArg::Greedy => Self::Greedy,
            StrategyArg::Hybrid => Self::Hybrid,
        }
    }
}

/// Search settings shared by every planning session.
#[derive(Debug, Clone, Args)]
pub struct PlannerArgs {
    /// How candidate orderings are enumerated.
    #[arg(long, env = "PLANNER_STRATEGY", value_enum, default_value_t = StrategyArg::Auto)]
    pub strategy: StrategyArg,
    /// Largest conjunction the auto strategy enumerates exhaustively.
    #[arg(long, env = "PLANNER_EXHAUSTIVE_LIMIT", default_value_t = 8)]
    pub exhaustive_limit: usize,
    /// Partial orderings kept per level once the hybrid search turns to beam.
    #[arg(long, env = "PLANNER_BEAM_WIDTH", default_value_t = 4)]
    pub beam_width: usize,
    /// Frontier size at which the hybrid search turns to beam.
    #[arg(long, env = "PLANNER_FRONTIER_LIMIT", default_value_t = 64)]
    pub frontier_limit: usize,
    /// Most complete orderings a heuristic search returns.
    #[arg(long, env = "PLANNER_MAX_CANDIDATES", default_value_t = 8)]
    pub max_candidates: usize,
}

impl From<&PlannerArgs> for PlannerConfig {
    fn from(args: &PlannerArgs) -> Self {
        Self {
            strategy: args.strategy.into(),
            exhaustive_limit: args.exhaustive_limit,
            beam_width: args.beam_width,
            frontier_limit: args.frontier_limit,
            max_candidates: args.max_candidates,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct PlanCommand {
    /// Path to the JSON fixture.
    #[arg(long, short)]
    pub fixture: PathBuf,
    /// Labels of the conjunctions to plan.
    #[arg(long, short, required = true)]
    pub conjunction: Vec<String>,
    /// Variables bound by the caller, without the `$`.
    #[arg(long, short)]
    pub mode: Vec<String>,
    /// Number of planning threads.
    #[arg(long, env = "PLANNER_THREADS", default_value_t = num_cpus::get())]
    pub threads: usize,

    #[command(flatten)]
    pub planner: PlannerArgs,
}

#[derive(Debug, Clone, Args)]
pub struct EstimateCommand {
    /// Path to the JSON fixture.
    #[arg(long, short)]
    pub fixture: PathBuf,
    /// Label of the conjunction to estimate.
    #[arg(long, short)]
    pub conjunction: String,
    /// Variables to estimate answers for; all estimateable ones when omitted.
    #[arg(long, short)]
    pub variable: Vec<String>,
}
