// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Arbiter - chat-driven autonomous code editing.
//!
//! Messages arrive from a chat transport, a decision engine picks out coding
//! tasks, and each task runs as an isolated session: its own branch, its own
//! git worktree, its own generator process. Finished work is merged back into
//! the default branch, with automatic repair attempts when the merge fails.
//!
//! # Architecture
//!
//! - [`workspace`] - Session lifecycle over git worktrees (create, commit, rebase, merge, clean up)
//! - [`coordinator`] - Global lifecycle state machine that drains sessions before restart/shutdown
//! - [`queue`] - Priority-banded message queue and per-channel aggregation
//! - [`checkpoint`] - Drives a session's generator, folding follow-up messages in at checkpoints
//! - [`generator`] - Code generator subprocess boundary and its event stream
//! - [`transport`] - Chat transport boundary, message chunking, console adapter
//! - [`decision`] - Decision boundary and the command-prefix engine
//! - [`bot`] - Application wiring
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types and result aliases
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arbiter::bot::Arbiter;
//! use arbiter::config::{load_config, CliOptions};
//! use arbiter::coordinator::ProcessExit;
//! use arbiter::decision::PrefixDecisionEngine;
//! use arbiter::generator::ProcessGenerator;
//! use arbiter::transport::ConsoleTransport;
//!
//! let config = load_config(&std::env::current_dir()?, CliOptions::default())?;
//! let bot = Arbiter::new(
//!     &config,
//!     Arc::new(ConsoleTransport::default()),
//!     Arc::new(PrefixDecisionEngine::new(&config.command_prefix)),
//!     Arc::new(ProcessGenerator::new(config.generator_config())),
//!     Arc::new(ProcessExit),
//! );
//! ```

pub mod bot;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod decision;
pub mod error;
pub mod generator;
pub mod queue;
pub mod telemetry;
pub mod transport;
pub mod workspace;

// Re-export commonly used types at crate root
pub use bot::Arbiter;
pub use config::{load_config, CliOptions, ResolvedConfig};
pub use coordinator::{ActionType, Coordinator, CoordinatorState};
pub use error::{ConfigError, Result};
pub use workspace::{MergeFailureKind, MergeResult, Session, SessionState, WorkspaceManager};

/// Arbiter version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let config = ResolvedConfig::default();
        assert_eq!(config.default_branch, "main");
        assert!(ActionType::Restart.is_terminating());
        assert!(SessionState::Active.is_live());
    }
}
