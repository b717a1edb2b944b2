//! # train_driver: step-exact training loops
//!
//! Drives a reinforcement-learning agent through environment interaction,
//! periodic logging, evaluation and checkpointing, either in one loop or
//! as an actor thread feeding a learner thread.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           RunLoop                                   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │   ┌──────────┐  step(n)   ┌──────────┐  add(executed)  ┌─────────┐  │
//! │   │ next     │──────────▶│  StepFn  │───────────────▶│ Counter │  │
//! │   │ chunk    │            └──────────┘                 └────┬────┘  │
//! │   └────▲─────┘                                              │       │
//! │        │           ┌──────────────────────────────┐         │       │
//! │        └───────────│ Scheduled triggers (by Phase) │◀────────┘       │
//! │                    │  Log ─▶ Eval ─▶ Save          │                 │
//! │                    └──────────────┬────────────────┘                 │
//! │                                   ▼                                  │
//! │                    ┌──────────────────────────────┐                 │
//! │                    │ Logger ─regex─▶ Sinks         │                 │
//! │                    │ (jsonl, terminal, channel)    │                 │
//! │                    └──────────────────────────────┘                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunks are sized by the tightest step-trigger interval and cut at every
//! trigger boundary, so a step trigger fires at each of its multiples no
//! matter how unevenly the step function progresses.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use train_driver::{DriverConfig, TrainingDriver};
//!
//! let config = DriverConfig::new()
//!     .with_log_every(1_000)
//!     .with_eval_every(10_000)
//!     .with_action_repeat(4)
//!     .with_total_steps(1_000_000)
//!     .with_logdir("runs/pong");
//!
//! let summary = TrainingDriver::new(config, |n| agent.interact(n))?
//!     .with_metrics(metrics)
//!     .with_evaluator(evaluate)
//!     .run()?;
//! ```

pub mod actors;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod error;
pub mod incident;
pub mod learner;
pub mod metrics;
pub mod runners;
pub mod trigger;

// Re-export commonly used types
pub use crate::core::cancel::CancelToken;
pub use crate::core::counter::{counter, Counter, SharedCounter};
pub use crate::core::transition_queue::{Overflow, TransitionQueue};
pub use actors::{Actor, ActorStep};
pub use checkpoint::{Checkpoint, CheckpointerConfig, DirectoryCheckpointer};
pub use config::DriverConfig;
pub use error::{BoxError, CallbackError, ConfigError, DriverError, Result, StepError};
pub use incident::{incidents, Incident, IncidentKind, Incidents};
pub use learner::{Learner, LearnerStep};
pub use metrics::{
    training_metrics, Logger, MetricRecord, MetricValue, SharedLogger, SharedTrainingMetrics,
    Sink, SinkError, TrainingMetrics,
};
pub use runners::{
    EvalMetrics, Evaluator, ParallelDriver, ParallelSummary, Phase, RunLoop, RunStatus,
    RunSummary, StepFn, TrainingDriver,
};
pub use trigger::{Ratio, Trigger};
