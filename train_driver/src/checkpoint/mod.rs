//! Checkpoint persistence.
//!
//! ## Features
//!
//! - [`Checkpoint`] callback contract invoked at save-trigger firings
//! - One directory per saved step (`checkpoint_{step:010}/`)
//! - Automatic cleanup of old checkpoints
//! - Resume from the latest checkpoint step
//!
//! ## Example
//!
//! ```rust,ignore
//! use train_driver::checkpoint::{CheckpointerConfig, DirectoryCheckpointer};
//!
//! let config = CheckpointerConfig::new("./checkpoints").with_keep_last_n(5);
//! let checkpointer = DirectoryCheckpointer::new(config, |dir, step| {
//!     std::fs::write(dir.join("agent.bin"), agent.to_bytes())?;
//!     Ok(())
//! })?;
//!
//! // Resume training:
//! if let Some(step) = checkpointer.latest_step() {
//!     env_step.restore(step);
//! }
//! ```

pub mod checkpointer;

pub use checkpointer::{
    find_latest_checkpoint, list_checkpoints, Checkpoint, CheckpointError, CheckpointInfo,
    CheckpointerConfig, DirectoryCheckpointer,
};
