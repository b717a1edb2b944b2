//! Train-demo: drives a synthetic random-walk environment.
//!
//! - `single`   -- one loop: interact, log, evaluate, checkpoint
//! - `parallel` -- actor thread feeding a learner thread through the queue

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use train_driver::{
    training_metrics, CallbackError, DriverConfig, DriverError, EvalMetrics, ParallelDriver,
    StepError, TrainingDriver, TrainingMetrics,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "train-demo", version, about)]
struct Cli {
    /// Path to a JSON driver configuration (defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the total number of environment steps.
    #[arg(long, global = true)]
    steps: Option<u64>,

    /// Write metrics.jsonl and scores.jsonl to this directory.
    #[arg(long, global = true)]
    logdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Single-process driver.
    Single,

    /// Actor and learner on separate threads.
    Parallel {
        /// Learner updates per agent step (0 trains as fast as data arrives).
        #[arg(long)]
        train_ratio: Option<f64>,
    },
}

// ---------------------------------------------------------------------------
// Synthetic environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Transition {
    position: f64,
    reward: f64,
}

/// Random walk with episodes of random length.
struct RandomWalk {
    rng: fastrand::Rng,
    position: f64,
    score: f64,
    length: u64,
    horizon: u64,
}

impl RandomWalk {
    fn new(seed: u64) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let horizon = rng.u64(50..200);
        Self {
            rng,
            position: 0.0,
            score: 0.0,
            length: 0,
            horizon,
        }
    }

    /// Step once, reporting finished episodes to `metrics`.
    fn step(&mut self, metrics: &mut TrainingMetrics) -> Transition {
        self.position += self.rng.f64() - 0.5;
        let reward = -self.position.abs();
        self.score += reward;
        self.length += 1;
        if self.length >= self.horizon {
            metrics.scalar("episode", "score", self.score);
            metrics.scalar("episode", "length", self.length as f64);
            self.position = 0.0;
            self.score = 0.0;
            self.length = 0;
            self.horizon = self.rng.u64(50..200);
        }
        Transition {
            position: self.position,
            reward,
        }
    }
}

fn evaluator(seed: u64) -> impl FnMut(u64) -> Result<EvalMetrics, CallbackError> + Send {
    let mut env = RandomWalk::new(seed);
    move |_step| {
        let mut scratch = TrainingMetrics::default();
        while scratch.is_empty() {
            env.step(&mut scratch);
        }
        let mut results = BTreeMap::new();
        for record in scratch.result(0, true) {
            results.insert(record.key, record.value);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

fn main() -> Result<(), DriverError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DriverConfig::from_json_file(path)?,
        None => DriverConfig::new().with_log_every(1_000).with_eval_every(5_000),
    };
    let total_steps = cli.steps.unwrap_or(if config.total_steps > 0 {
        config.total_steps
    } else {
        20_000
    });
    config = config.with_total_steps(total_steps);
    if let Some(logdir) = cli.logdir {
        config = config.with_logdir(logdir);
    }

    match cli.command {
        Commands::Single => run_single(config),
        Commands::Parallel { train_ratio } => {
            if let Some(ratio) = train_ratio {
                config = config.with_train_ratio(ratio);
            }
            run_parallel(config)
        }
    }
}

fn run_single(config: DriverConfig) -> Result<(), DriverError> {
    let metrics = training_metrics();
    let agent_metrics = Arc::clone(&metrics);
    let mut env = RandomWalk::new(1);
    let step_fn = move |n: u64| -> Result<u64, StepError> {
        let mut metrics = agent_metrics.lock();
        for _ in 0..n {
            env.step(&mut metrics);
        }
        Ok(n)
    };

    let driver = TrainingDriver::new(config, step_fn)?
        .with_metrics(metrics)
        .with_evaluator(evaluator(2));
    let incidents = Arc::clone(driver.incidents());
    let summary = driver.run()?;

    println!(
        "{:?}: {} agent steps in {} chunks, {} callback firings ({} failed), {} incidents",
        summary.status,
        summary.executed(),
        summary.chunks,
        summary.firings.len(),
        summary.failed_firings(),
        incidents.total()
    );
    Ok(())
}

fn run_parallel(config: DriverConfig) -> Result<(), DriverError> {
    let mut env = RandomWalk::new(1);
    let actor = move |n: u64, out: &mut Vec<Transition>, metrics: &mut TrainingMetrics| -> Result<u64, StepError> {
        for _ in 0..n {
            out.push(env.step(metrics));
        }
        Ok(n)
    };
    let learner = |batch: Vec<Transition>, metrics: &mut TrainingMetrics| -> Result<(), StepError> {
        let n = batch.len() as f64;
        let mean_reward = batch.iter().map(|t| t.reward).sum::<f64>() / n;
        let spread = batch.iter().map(|t| t.position * t.position).sum::<f64>() / n;
        metrics.scalar("train", "mean_reward", mean_reward);
        metrics.scalar("train", "loss", spread);
        Ok(())
    };

    let driver = ParallelDriver::new(config, actor, learner)?.with_evaluator(evaluator(2));
    let status = Arc::clone(driver.status());
    let summary = driver.run()?;

    println!(
        "{:?}: {} agent steps, {} train steps, {} pushed, {} dropped, {} incidents (final state: {})",
        summary.status(),
        summary.actor.executed(),
        summary.learner.executed(),
        summary.pushed,
        summary.dropped,
        summary.incidents,
        status
    );
    Ok(())
}
