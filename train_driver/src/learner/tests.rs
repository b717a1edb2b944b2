//! Behavioural tests for the learner step wrapper.

use super::*;
use crate::core::cancel::CancelToken;
use crate::core::counter::counter;
use crate::core::transition_queue::{Overflow, TransitionQueue};
use crate::error::StepError;
use crate::incident::incidents;
use crate::metrics::{training_metrics, TrainingMetrics};
use crate::runners::status::{pipeline_status, LearnerState};
use crate::runners::step::StepFn;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// =============================================================================
// Test Helpers
// =============================================================================

type Batches = Arc<Mutex<Vec<Vec<u32>>>>;

/// Learner that records every batch it receives.
fn recording_learner(batches: Batches) -> impl Learner<u32> {
    move |batch: Vec<u32>, metrics: &mut TrainingMetrics| -> Result<(), StepError> {
        metrics.scalar("train", "batch_len", batch.len() as f64);
        batches.lock().push(batch);
        Ok(())
    }
}

fn filled_queue(capacity: usize, items: u32) -> Arc<TransitionQueue<u32>> {
    let queue = Arc::new(TransitionQueue::new(capacity, Overflow::Block, incidents()));
    let cancel = CancelToken::new();
    for i in 0..items {
        queue.push(i, &cancel);
    }
    queue
}

// =============================================================================
// Batching
// =============================================================================

#[test]
fn test_one_train_step_per_full_batch() {
    let batches = Batches::default();
    let queue = filled_queue(16, 10);
    let metrics = training_metrics();
    let mut step = LearnerStep::new(
        recording_learner(Arc::clone(&batches)),
        Arc::clone(&queue),
        CancelToken::new(),
        4,
        Arc::clone(&metrics),
        pipeline_status(),
    );

    assert_eq!(step.step(2).unwrap(), 2);
    assert_eq!(*batches.lock(), vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);
    assert_eq!(queue.len(), 2);
    assert_eq!(metrics.lock().len(), 1);
}

#[test]
fn test_closed_queue_drains_full_batches_then_exhausts() {
    let batches = Batches::default();
    let queue = filled_queue(16, 10);
    queue.close();
    let status = pipeline_status();
    let mut step = LearnerStep::new(
        recording_learner(Arc::clone(&batches)),
        Arc::clone(&queue),
        CancelToken::new(),
        4,
        training_metrics(),
        Arc::clone(&status),
    );

    assert_eq!(step.step(100).unwrap(), 2);
    assert!(step.is_exhausted());
    assert_eq!(status.learner(), LearnerState::Idle);
    // The trailing partial batch stays behind.
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_train_error_propagates() {
    let queue = filled_queue(8, 4);
    let mut step = LearnerStep::new(
        |_batch: Vec<u32>, _metrics: &mut TrainingMetrics| -> Result<(), StepError> {
            Err(StepError::msg("nan loss"))
        },
        queue,
        CancelToken::new(),
        2,
        training_metrics(),
        pipeline_status(),
    );

    let err = step.step(1).unwrap_err();
    assert_eq!(err.to_string(), "nan loss");
}

#[test]
fn test_train_error_after_progress_reported_on_next_call() {
    let queue = filled_queue(8, 8);
    let mut updates = 0;
    let mut step = LearnerStep::new(
        move |_batch: Vec<u32>, _metrics: &mut TrainingMetrics| -> Result<(), StepError> {
            updates += 1;
            if updates == 3 {
                return Err(StepError::msg("nan loss"));
            }
            Ok(())
        },
        queue,
        CancelToken::new(),
        2,
        training_metrics(),
        pipeline_status(),
    );

    // The two completed updates are credited first.
    assert_eq!(step.step(4).unwrap(), 2);
    assert_eq!(step.step(4).unwrap_err().to_string(), "nan loss");
}

#[test]
fn test_cancelled_while_waiting_for_data() {
    let queue: Arc<TransitionQueue<u32>> =
        Arc::new(TransitionQueue::new(8, Overflow::Block, incidents()));
    let cancel = CancelToken::new();
    let mut step = LearnerStep::new(
        recording_learner(Batches::default()),
        queue,
        cancel.clone(),
        4,
        training_metrics(),
        pipeline_status(),
    );

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
    });
    assert_eq!(step.step(5).unwrap(), 0);
    assert!(!step.is_exhausted());
    canceller.join().unwrap();
}

// =============================================================================
// Pacing
// =============================================================================

#[test]
fn test_train_ratio_paces_updates() {
    let batches = Batches::default();
    let queue = filled_queue(64, 32);
    let env_step = counter("env_step");
    let mut step = LearnerStep::new(
        recording_learner(Arc::clone(&batches)),
        Arc::clone(&queue),
        CancelToken::new(),
        1,
        training_metrics(),
        pipeline_status(),
    )
    .with_train_ratio(0.5, Arc::clone(&env_step));

    env_step.add(4);
    assert_eq!(step.step(2).unwrap(), 2);

    // No allowance left: the next update waits for the actor.
    let actor = {
        let env_step = Arc::clone(&env_step);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            env_step.add(2);
        })
    };
    assert_eq!(step.step(1).unwrap(), 1);
    actor.join().unwrap();
    assert_eq!(batches.lock().len(), 3);
}

#[test]
fn test_full_queue_overrides_pacing() {
    let queue = filled_queue(4, 4);
    let env_step = counter("env_step");
    let mut step = LearnerStep::new(
        recording_learner(Batches::default()),
        Arc::clone(&queue),
        CancelToken::new(),
        2,
        training_metrics(),
        pipeline_status(),
    )
    .with_train_ratio(0.01, env_step);

    assert_eq!(step.step(1).unwrap(), 1);
    assert_eq!(queue.len(), 2);
}
