use std::path::PathBuf;

use anyhow::Result;
use burn::backend::{Autodiff, Candle, candle::CandleDevice};
use clap::{ArgAction, Parser};
use ddqn::training::{agent::AgentConfig, trainer::TrainingConfig};
use log::info;

mod config;

/// Train a dueling double DQN agent
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Environment id, e.g. `Catch-v0`
    #[arg(short, long)]
    env: String,

    /// Environment steps to train for, summed over all environments
    #[arg(long, default_value_t = 1_000_000)]
    steps: usize,

    /// Environments stepped in parallel
    #[arg(long, default_value_t = 32)]
    n_envs: usize,

    /// Resume from the latest checkpoint; pass `false` to start fresh
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    continue_training: bool,

    /// Directory holding checkpoints
    #[arg(long, default_value = "weights")]
    artifact_dir: String,

    /// TOML file with agent hyper-parameters
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 0x12C0FFEE)]
    seed: u64,
}

type AutodiffBackend = Autodiff<Candle>;

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let agent = match &args.config {
        Some(path) => config::load(path)?,
        None => AgentConfig::new(),
    };

    let config = TrainingConfig::new(args.env, args.artifact_dir)
        .with_agent(agent)
        .with_total_steps(args.steps)
        .with_n_envs(args.n_envs)
        .with_continue_training(args.continue_training)
        .with_seed(args.seed);

    let device = CandleDevice::default();
    let trainer = config.init::<AutodiffBackend>(device)?;
    let summary = trainer.run()?;

    info!(
        "finished: {} episodes, {} learning steps, best average score {}",
        summary.episodes,
        summary.learn_steps,
        summary
            .best_score
            .map_or(String::from("-"), |score| format!("{score:.2}"))
    );

    Ok(())
}
