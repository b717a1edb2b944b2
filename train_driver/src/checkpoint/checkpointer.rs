//! Checkpoint callback contract and a directory-per-step checkpointer.
//!
//! The driver only decides *when* to save. What goes into a checkpoint is
//! up to the caller, which supplies a writer closure receiving the target
//! directory.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::{BoxError, CallbackError};

/// Invoked at save-trigger firings with the current counter value.
///
/// Failures are reported as incidents; they never stop the run.
pub trait Checkpoint: Send {
    fn save(&mut self, step: u64) -> Result<(), CallbackError>;
}

impl<F> Checkpoint for F
where
    F: FnMut(u64) -> Result<(), CallbackError> + Send,
{
    fn save(&mut self, step: u64) -> Result<(), CallbackError> {
        self(step)
    }
}

/// Where checkpoints go and how many survive.
#[derive(Debug, Clone)]
pub struct CheckpointerConfig {
    /// Parent of the per-step checkpoint directories.
    pub checkpoint_dir: PathBuf,
    /// Most recent checkpoints retained; 0 retains all.
    pub keep_last_n: usize,
}

impl Default for CheckpointerConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./checkpoints"),
            keep_last_n: 5,
        }
    }
}

impl CheckpointerConfig {
    /// Checkpoints under `checkpoint_dir`, keeping the last five.
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] io::Error),

    /// The caller's writer failed.
    #[error("checkpoint write failed at step {step}: {source}")]
    Write { step: u64, source: BoxError },

    #[error("no checkpoints found")]
    NoCheckpoints,
}

/// Checkpoint metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Checkpoint directory.
    pub path: PathBuf,
    /// Step at which the checkpoint was saved.
    pub step: u64,
}

const PREFIX: &str = "checkpoint_";

fn checkpoint_name(step: u64) -> String {
    format!("{PREFIX}{step:010}")
}

fn parse_step(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.strip_prefix(PREFIX)?.parse().ok()
}

/// Saves each checkpoint into its own `checkpoint_{step:010}/` directory
/// and removes all but the most recent `keep_last_n`.
pub struct DirectoryCheckpointer<W> {
    config: CheckpointerConfig,
    writer: W,
    history: VecDeque<CheckpointInfo>,
}

impl<W> DirectoryCheckpointer<W>
where
    W: FnMut(&Path, u64) -> Result<(), BoxError> + Send,
{
    /// Create a checkpointer. Creates the checkpoint directory if needed
    /// and picks up checkpoints left by a previous run.
    pub fn new(config: CheckpointerConfig, writer: W) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.checkpoint_dir)?;
        let history = list_checkpoints(&config.checkpoint_dir)?.into();
        Ok(Self {
            config,
            writer,
            history,
        })
    }

    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    /// Write a checkpoint for `step`. Returns its directory.
    ///
    /// A failed write leaves no directory behind.
    pub fn save_step(&mut self, step: u64) -> Result<PathBuf, CheckpointError> {
        let path = self.config.checkpoint_dir.join(checkpoint_name(step));
        fs::create_dir_all(&path)?;
        if let Err(source) = (self.writer)(&path, step) {
            let _ = fs::remove_dir_all(&path);
            return Err(CheckpointError::Write { step, source });
        }

        self.history.retain(|info| info.step != step);
        self.history.push_back(CheckpointInfo {
            path: path.clone(),
            step,
        });
        self.cleanup_old_checkpoints()?;
        log::info!("saved checkpoint {}", path.display());
        Ok(path)
    }

    /// Most recent checkpoint, if any.
    pub fn latest(&self) -> Option<&CheckpointInfo> {
        self.history.back()
    }

    /// Step of the most recent checkpoint, for resuming counters.
    pub fn latest_step(&self) -> Option<u64> {
        self.latest().map(|info| info.step)
    }

    /// Checkpoints currently kept, oldest first.
    pub fn checkpoints(&self) -> impl Iterator<Item = &CheckpointInfo> {
        self.history.iter()
    }

    fn cleanup_old_checkpoints(&mut self) -> Result<(), CheckpointError> {
        if self.config.keep_last_n == 0 {
            return Ok(());
        }
        while self.history.len() > self.config.keep_last_n {
            if let Some(old) = self.history.pop_front() {
                match fs::remove_dir_all(&old.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

impl<W> Checkpoint for DirectoryCheckpointer<W>
where
    W: FnMut(&Path, u64) -> Result<(), BoxError> + Send,
{
    fn save(&mut self, step: u64) -> Result<(), CallbackError> {
        self.save_step(step).map(|_| ()).map_err(CallbackError::new)
    }
}

/// Checkpoints under `dir`, sorted by step.
pub fn list_checkpoints(dir: impl AsRef<Path>) -> Result<Vec<CheckpointInfo>, CheckpointError> {
    let mut checkpoints: Vec<CheckpointInfo> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let path = e.path();
            parse_step(&path).map(|step| CheckpointInfo { path, step })
        })
        .collect();
    checkpoints.sort_by_key(|c| c.step);
    Ok(checkpoints)
}

/// Latest checkpoint under `dir`.
pub fn find_latest_checkpoint(dir: impl AsRef<Path>) -> Result<CheckpointInfo, CheckpointError> {
    list_checkpoints(dir)?
        .pop()
        .ok_or(CheckpointError::NoCheckpoints)
}
