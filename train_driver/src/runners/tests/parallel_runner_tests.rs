//! Actor/learner driver tests.
//!
//! # Intent
//!
//! The parallel driver runs two loops on two threads joined by a bounded
//! queue. Whichever side finishes first must let the other one finish:
//! a completed actor closes the queue so the learner drains it, a
//! completed learner closes it so a blocked actor wakes up, and any
//! failure cancels both.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::DriverConfig;
use crate::core::counter::counter;
use crate::core::transition_queue::Overflow;
use crate::error::{CallbackError, DriverError, StepError};
use crate::incident::IncidentKind;
use crate::metrics::{MetricValue, TrainingMetrics};
use crate::runners::parallel_runner::ParallelDriver;
use crate::runners::run_loop::RunStatus;
use crate::runners::training_runner::EvalMetrics;

use super::{buffered_logger, channel_logger, flushed_steps, received};

// ============================================================================
// Test Helpers
// ============================================================================

type Batches = Arc<Mutex<Vec<Vec<u64>>>>;

/// Actor emitting consecutive integers, one per agent step.
fn counting_actor() -> impl FnMut(u64, &mut Vec<u64>, &mut TrainingMetrics) -> Result<u64, StepError> + Send {
    let mut next = 0u64;
    move |n, out, metrics| {
        for _ in 0..n {
            out.push(next);
            next += 1;
        }
        metrics.scalar("episode", "length", n as f64);
        Ok(n)
    }
}

/// Learner recording each batch.
fn recording_learner(batches: Batches) -> impl FnMut(Vec<u64>, &mut TrainingMetrics) -> Result<(), StepError> + Send {
    move |batch, metrics| {
        metrics.scalar("train", "loss", 0.5);
        batches.lock().push(batch);
        Ok(())
    }
}

fn small_config() -> DriverConfig {
    DriverConfig::new()
        .with_queue_capacity(16)
        .with_batch_size(4)
        .with_save_every(0.0)
}

// ============================================================================
// Completion
// ============================================================================

/// INTENT: the actor's budget ends the run; the learner drains every full
/// batch in production order.
#[test]
fn test_actor_budget_completes_both_units_in_fifo_order() {
    let (logger, _rx, _incidents) = channel_logger();
    let batches = Batches::default();
    let driver = ParallelDriver::new(
        small_config().with_total_steps(200),
        counting_actor(),
        recording_learner(Arc::clone(&batches)),
    )
    .unwrap()
    .with_logger(logger);

    let summary = driver.run().unwrap();

    assert_eq!(summary.status(), RunStatus::Completed);
    assert_eq!(summary.actor.steps, 200);
    assert_eq!(summary.learner.steps, 50);
    assert_eq!(summary.pushed, 200);
    assert_eq!(summary.dropped, 0);
    let consumed: Vec<u64> = batches.lock().iter().flatten().copied().collect();
    assert_eq!(consumed, (0..200).collect::<Vec<_>>());
    assert!(batches.lock().iter().all(|batch| batch.len() == 4));
}

/// INTENT: the learner's budget ends the run even while the actor is
/// blocked on a full queue.
#[test]
fn test_learner_budget_releases_blocked_actor() {
    let (logger, _rx, _incidents) = channel_logger();
    let batches = Batches::default();
    let driver = ParallelDriver::new(
        small_config().with_max_train_steps(5),
        counting_actor(),
        recording_learner(Arc::clone(&batches)),
    )
    .unwrap()
    .with_logger(logger);

    let summary = driver.run().unwrap();

    assert_eq!(summary.status(), RunStatus::Completed);
    assert_eq!(summary.learner.steps, 5);
    assert_eq!(batches.lock().len(), 5);
    assert!(summary.actor.steps >= 20);
}

// ============================================================================
// Failure Propagation
// ============================================================================

/// INTENT: a learner failure cancels the actor and is returned.
#[test]
fn test_learner_error_cancels_actor() {
    let (logger, _rx, _incidents) = channel_logger();
    let mut updates = 0;
    let learner = move |_batch: Vec<u64>, _metrics: &mut TrainingMetrics| -> Result<(), StepError> {
        updates += 1;
        if updates == 3 {
            return Err(StepError::msg("nan loss"));
        }
        Ok(())
    };
    let driver = ParallelDriver::new(small_config(), counting_actor(), learner)
        .unwrap()
        .with_logger(logger);
    let cancel = driver.cancel_token().clone();

    let err = driver.run().unwrap_err();

    match err {
        DriverError::Step { step, source } => {
            assert_eq!(step, 2);
            assert_eq!(source.to_string(), "nan loss");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(cancel.is_cancelled());
}

/// INTENT: a failing learner still leaves every sink flushed.
#[test]
fn test_learner_error_flushes_sinks() {
    let (logger, buffer) = buffered_logger();
    let mut updates = 0;
    let learner = move |_batch: Vec<u64>, _metrics: &mut TrainingMetrics| -> Result<(), StepError> {
        updates += 1;
        if updates == 3 {
            return Err(StepError::msg("nan loss"));
        }
        Ok(())
    };
    let driver = ParallelDriver::new(small_config().with_log_every(4), counting_actor(), learner)
        .unwrap()
        .with_logger(Arc::clone(&logger));

    assert!(driver.run().is_err());

    let flushed = flushed_steps(&buffer, "queue/len");
    assert!(!flushed.is_empty());
    assert!(flushed.iter().all(|step| step % 4 == 0));
    assert!(buffer.lock().pending.is_empty());
}

/// INTENT: a panicking actor is reported by role and stops the learner.
#[test]
fn test_actor_panic_is_reported() {
    let (logger, _rx, _incidents) = channel_logger();
    let mut calls = 0;
    let actor = move |n: u64, out: &mut Vec<u64>, _metrics: &mut TrainingMetrics| -> Result<u64, StepError> {
        calls += 1;
        if calls == 4 {
            panic!("simulator segfault");
        }
        out.extend(0..n);
        Ok(n)
    };
    let driver = ParallelDriver::new(small_config(), actor, recording_learner(Batches::default()))
        .unwrap()
        .with_logger(logger);

    let err = driver.run().unwrap_err();

    match err {
        DriverError::Panicked { role, message } => {
            assert_eq!(role, "actor");
            assert!(message.contains("simulator segfault"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// INTENT: external cancellation stops both units promptly.
#[test]
fn test_external_cancel_stops_both_units() {
    let (logger, _rx, _incidents) = channel_logger();
    let driver = ParallelDriver::new(
        small_config(),
        counting_actor(),
        recording_learner(Batches::default()),
    )
    .unwrap()
    .with_logger(logger);
    let cancel = driver.cancel_token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
    });

    let summary = driver.run().unwrap();
    canceller.join().unwrap();

    assert_eq!(summary.status(), RunStatus::Cancelled);
    assert!(summary.actor.steps > 0);
}

/// INTENT: after an external cancel every sink has been flushed.
#[test]
fn test_external_cancel_flushes_sinks() {
    let (logger, buffer) = buffered_logger();
    let driver = ParallelDriver::new(
        small_config().with_log_every(8),
        counting_actor(),
        recording_learner(Batches::default()),
    )
    .unwrap()
    .with_logger(Arc::clone(&logger));
    let cancel = driver.cancel_token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
    });

    let summary = driver.run().unwrap();
    canceller.join().unwrap();

    assert_eq!(summary.status(), RunStatus::Cancelled);
    assert!(!flushed_steps(&buffer, "queue/len").is_empty());
    assert!(buffer.lock().pending.is_empty());
    assert!(buffer.lock().flushes >= 1);
}

// ============================================================================
// Queue Policy
// ============================================================================

/// INTENT: with the drop policy a stalled learner never blocks the actor;
/// the loss is counted and reported.
#[test]
fn test_drop_policy_never_blocks_actor() {
    let (logger, _rx, incidents) = channel_logger();
    let env_step = counter("env_step");
    let train_step = counter("train_step");
    let env = Arc::clone(&env_step);
    let learner = move |_batch: Vec<u64>, _metrics: &mut TrainingMetrics| -> Result<(), StepError> {
        // Hold the first update until the actor has finished.
        while env.get() < 1000 {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    };
    let config = small_config()
        .with_queue_capacity(8)
        .with_overflow(Overflow::Drop)
        .with_total_steps(1000);
    let driver = ParallelDriver::new(config, counting_actor(), learner)
        .unwrap()
        .with_counters(Arc::clone(&env_step), train_step)
        .with_logger(logger);

    let summary = driver.run().unwrap();

    assert_eq!(summary.actor.steps, 1000);
    assert!(summary.dropped > 0);
    assert_eq!(summary.pushed + summary.dropped, 1000);
    assert!(incidents.count(IncidentKind::Dropped) >= 1);
}

// ============================================================================
// Logging And Evaluation
// ============================================================================

/// INTENT: the actor publishes its drained metrics together with queue
/// statistics at each log boundary of env_step.
#[test]
fn test_actor_log_includes_queue_statistics() {
    let (logger, rx, _incidents) = channel_logger();
    let config = small_config().with_log_every(10).with_total_steps(50);
    let driver = ParallelDriver::new(
        config,
        counting_actor(),
        recording_learner(Batches::default()),
    )
    .unwrap()
    .with_logger(logger);

    let summary = driver.run().unwrap();

    assert_eq!(summary.actor.fired_at("actor_log"), vec![10, 20, 30, 40, 50]);
    let records = received(&rx);
    let queue_steps: Vec<u64> = records
        .iter()
        .filter(|r| r.full_key() == "queue/len")
        .map(|r| r.step)
        .collect();
    assert_eq!(queue_steps, vec![10, 20, 30, 40, 50]);
    assert!(records.iter().any(|r| r.full_key() == "episode/length"));

    // Only the learner publishes its progress, once per log firing.
    let mut train_steps: Vec<u64> = records
        .iter()
        .filter(|r| r.full_key() == "train/train_steps")
        .map(|r| r.step)
        .collect();
    assert_eq!(train_steps.len(), summary.learner.fired_at("learner_log").len());
    train_steps.dedup();
    assert_eq!(train_steps.len(), summary.learner.fired_at("learner_log").len());
}

/// INTENT: actor samples recorded after the last log firing are published
/// at the final env step.
#[test]
fn test_actor_tail_published_at_run_end() {
    let (logger, rx, _incidents) = channel_logger();
    let config = small_config().with_log_every(40).with_total_steps(50);
    let driver = ParallelDriver::new(
        config,
        counting_actor(),
        recording_learner(Batches::default()),
    )
    .unwrap()
    .with_logger(logger);

    let summary = driver.run().unwrap();

    assert_eq!(summary.actor.fired_at("actor_log"), vec![40]);
    let length_steps: Vec<u64> = received(&rx)
        .iter()
        .filter(|r| r.full_key() == "episode/length")
        .map(|r| r.step)
        .collect();
    assert_eq!(length_steps, vec![40, 50]);
}

/// INTENT: the learner evaluates on the actor's counter at every eval
/// boundary, although its own chunks are counted in train steps.
#[test]
fn test_learner_evaluates_on_env_step() {
    let (logger, rx, _incidents) = channel_logger();
    let evaluator = |step: u64| -> Result<EvalMetrics, CallbackError> {
        let mut results = EvalMetrics::new();
        results.insert("score".to_string(), MetricValue::from(step as f64));
        Ok(results)
    };
    // The actor's log interval cuts its chunks, so env_step moves in
    // steps of 40 and every boundary has an exact reading.
    let config = small_config()
        .with_log_every(40)
        .with_eval_every(40)
        .with_total_steps(200);
    let driver = ParallelDriver::new(
        config,
        counting_actor(),
        recording_learner(Batches::default()),
    )
    .unwrap()
    .with_logger(logger)
    .with_evaluator(evaluator);

    let summary = driver.run().unwrap();

    assert_eq!(summary.learner.fired_at("eval_initial"), vec![0]);
    let evals = summary.learner.fired_at("eval");
    assert_eq!(evals, vec![40, 80, 120, 160, 200]);
    let scores = received(&rx)
        .into_iter()
        .filter(|r| r.full_key() == "eval_episode/score")
        .count();
    assert_eq!(scores, evals.len() + 1);
    assert_eq!(summary.learner.fired_at("learner_log"), vec![40, 80, 120, 160, 200]);
}
