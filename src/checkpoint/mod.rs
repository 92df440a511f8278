// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Checkpoint and continuation protocol.
//!
//! Messages that arrive for a channel while its session is generating are held
//! as pending. At the next tool boundary the run is stopped, the work so far is
//! committed as a checkpoint, and a new run starts from a prompt that carries
//! the committed diff and the new instructions.

pub mod driver;
pub mod prompt;

pub use driver::{CheckpointConfig, DriverProgress, SessionDriver, SessionOutcome};
pub use prompt::{
    build_continuation_prompt, build_initial_prompt, build_repair_prompt, truncate_diff,
    DEFAULT_DIFF_CHAR_LIMIT,
};

use crate::generator::GeneratorError;
use crate::workspace::WorkspaceError;

/// Error type for session driving.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}
