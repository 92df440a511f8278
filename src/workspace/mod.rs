// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Repository workspace management.
//!
//! Each session gets its own git worktree on its own branch, created from the
//! latest known state of the default branch. Work is committed inside the
//! worktree and merged back into the main repository when the session ends.
//!
//! # Directory Structure
//!
//! ```text
//! /project/                        # Main repo (merges happen here)
//! ├── .git/
//! └── ...
//!
//! ~/.arbiter/workspaces/           # Workspace base
//! ├── 6f1c.../                     # One worktree per session id
//! │   ├── .git                     # Worktree link file
//! │   └── node_modules -> /project/node_modules
//! └── ...
//! ```
//!
//! # Ownership
//!
//! - Completion removes the worktree and keeps the branch for audit.
//! - Abandonment removes the worktree and deletes the branch.
//! - Failure keeps everything in place for debugging.

pub mod branch;
pub mod git;
pub mod manager;
pub mod types;

pub use branch::{slugify, to_base36, BranchNamer, DEFAULT_BRANCH_PREFIX, MAX_SLUG_LEN};
pub use git::{sanitize_message, GitIdentity, GitOutput, GitRunner};
pub use manager::{classify_merge_failure, Checkpoint, ManagerConfig, WorkspaceManager};
pub use types::{MergeFailureKind, MergeResult, Session, SessionEvent, SessionState};

/// Error type for workspace operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {id} is {state}, expected a live session")]
    SessionNotLive { id: String, state: SessionState },

    #[error("Worktree creation failed: {0}")]
    WorktreeCreationFailed(String),

    #[error("Invalid workspace: {0}")]
    InvalidWorkspace(String),

    #[error("Unfinished merge in workspace: {0}")]
    UnmergedPaths(String),
}

/// Check whether a usable `git` binary is on the PATH.
pub async fn git_available() -> bool {
    tokio::process::Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
