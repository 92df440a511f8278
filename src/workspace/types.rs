// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for session workspaces.
//!
//! A [`Session`] is the unit of isolated work: one git worktree bound to one
//! branch, from creation until completion or abandonment.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::ChatMessage;

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Branch and worktree are being created.
    Creating,
    /// Resting state between sub-operations.
    Active,
    /// Staging and committing changes.
    Committing,
    /// Rebasing onto the default branch.
    Rebasing,
    /// Work merged (or finished) and workspace removed.
    Completed,
    /// Setup or generation failed; workspace retained for debugging.
    Failed,
    /// Work discarded; workspace and branch removed.
    Abandoned,
}

impl SessionState {
    /// Check if this state still owns a live workspace.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Active | Self::Committing | Self::Rebasing
        )
    }

    /// Check if this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Abandoned)
    }

    /// Short lowercase name, used in logs and status text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Rebasing => "rebasing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Session
// ============================================================================

/// An isolated unit of work bound to one worktree and one branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier (also the workspace directory name).
    pub id: String,
    /// Branch checked out in the workspace.
    pub branch: String,
    /// Path to the isolated worktree.
    pub workspace_path: PathBuf,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Task description handed to the generator.
    pub task: String,
    /// Message that started this session.
    pub trigger: ChatMessage,
    /// Related messages seen so far.
    #[serde(default)]
    pub related_messages: Vec<ChatMessage>,
    /// Commit identifiers created in this session, oldest first.
    #[serde(default)]
    pub commits: Vec<String>,
    /// Messages received while a generation run was in progress.
    #[serde(default)]
    pub pending_messages: Vec<ChatMessage>,
    /// Number of checkpoints taken so far.
    #[serde(default)]
    pub checkpoint_count: u32,
    /// Whether a checkpoint is owed at the next safe pause point.
    #[serde(default)]
    pub should_checkpoint: bool,
    /// Whether a generation run is currently in flight.
    #[serde(default)]
    pub generating: bool,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
    /// Error text for failed sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Session {
    /// Create a new session record in the `creating` state.
    pub fn new(
        id: impl Into<String>,
        branch: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
        task: impl Into<String>,
        trigger: ChatMessage,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            branch: branch.into(),
            workspace_path: workspace_path.into(),
            state: SessionState::Creating,
            task: task.into(),
            trigger,
            related_messages: Vec::new(),
            commits: Vec::new(),
            pending_messages: Vec::new(),
            checkpoint_count: 0,
            should_checkpoint: false,
            generating: false,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Channel the session was started from.
    pub fn channel_id(&self) -> &str {
        &self.trigger.channel_id
    }

    /// Display name of the requester.
    pub fn requester(&self) -> &str {
        &self.trigger.author
    }

    /// Move to a new state and bump the update timestamp.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// First line of the task, capped for status displays.
    pub fn short_description(&self) -> String {
        let first = self.task.lines().next().unwrap_or_default();
        if first.chars().count() > 80 {
            let cut: String = first.chars().take(77).collect();
            format!("{cut}...")
        } else {
            first.to_string()
        }
    }
}

// ============================================================================
// Merge Result
// ============================================================================

/// Why a merge into the default branch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeFailureKind {
    /// Tracked files in the main checkout have uncommitted changes.
    LocalChanges,
    /// Untracked files in the main checkout would be overwritten.
    UntrackedFiles,
    /// Conflicting hunks between the branch and the default branch.
    MergeConflict,
    /// Anything else.
    Other,
}

impl MergeFailureKind {
    /// Short snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalChanges => "local_changes",
            Self::UntrackedFiles => "untracked_files",
            Self::MergeConflict => "merge_conflict",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for MergeFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of merging a session branch into the default branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeResult {
    /// The merge committed cleanly.
    Merged {
        /// Resulting merge commit on the default branch.
        commit: String,
        /// Whether the push to the remote succeeded.
        pushed: bool,
    },
    /// The merge failed and the main repository was restored.
    Failed {
        /// Classification driving the repair strategy.
        kind: MergeFailureKind,
        /// Diagnostic text from git.
        details: String,
    },
}

impl MergeResult {
    /// Check if the merge succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }

    /// Failure kind, if the merge failed.
    pub fn failure_kind(&self) -> Option<MergeFailureKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            Self::Merged { .. } => None,
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

/// Lifecycle notifications emitted by the workspace manager.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session finished setup (active or failed).
    Created(Session),
    /// A session changed state or data.
    Updated(Session),
    /// A session reached a terminal state.
    Completed(Session),
}

impl SessionEvent {
    /// The session carried by this event.
    pub fn session(&self) -> &Session {
        match self {
            Self::Created(s) | Self::Updated(s) | Self::Completed(s) => s,
        }
    }
}
