// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Types for the session lifecycle coordinator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Coordinator State
// ============================================================================

/// Global lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Accepting new sessions.
    Running,
    /// A global action is queued; waiting for active sessions to finish.
    Draining,
    /// Running queued actions.
    Executing,
    /// A terminating action ran; the process is exiting.
    Stopped,
}

impl CoordinatorState {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Executing => "executing",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Actions
// ============================================================================

/// A global action that waits for every session to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Exit with the restart code so a supervisor starts a fresh process.
    Restart,
    /// Exit cleanly.
    Shutdown,
    /// Housekeeping; the process keeps running.
    Cleanup,
}

impl ActionType {
    /// Whether running this action ends the process.
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::Restart | Self::Shutdown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Shutdown => "shutdown",
            Self::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "restart" => Ok(Self::Restart),
            "shutdown" | "stop" => Ok(Self::Shutdown),
            "cleanup" => Ok(Self::Cleanup),
            other => Err(format!("Unknown action: {other}")),
        }
    }
}

/// An action waiting for the drain to finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub action: ActionType,
    pub reason: String,
    /// Who asked for it, if it came from chat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    /// Where to report progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub queued_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(action: ActionType, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
            requester: None,
            channel_id: None,
            queued_at: Utc::now(),
        }
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }
}

// ============================================================================
// Active Sessions
// ============================================================================

/// Coordinator view of a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: String,
    pub channel_id: String,
    pub requester: String,
    /// Short task description for status output.
    pub description: String,
    pub started_at: DateTime<Utc>,
}

impl ActiveSession {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        requester: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            requester: requester.into(),
            description: description.into(),
            started_at: Utc::now(),
        }
    }
}

impl From<&crate::workspace::Session> for ActiveSession {
    fn from(session: &crate::workspace::Session) -> Self {
        Self {
            id: session.id.clone(),
            channel_id: session.channel_id().to_string(),
            requester: session.requester().to_string(),
            description: session.short_description(),
            started_at: session.created_at,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Observable coordinator activity.
///
/// Delivered to a single dispatcher; dropping the receiver never affects the
/// coordinator.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    StateChanged {
        from: CoordinatorState,
        to: CoordinatorState,
    },
    SessionRegistered(ActiveSession),
    SessionCompleted {
        id: String,
        success: bool,
        summary: String,
    },
    ActionQueued(PendingAction),
    ActionExecuting(PendingAction),
    /// Human-readable status text, optionally targeted at a channel.
    Notification {
        channel_id: Option<String>,
        text: String,
    },
}

// ============================================================================
// Configuration
// ============================================================================

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Pause after the final notification so it can be delivered before exit.
    pub notify_delay: Duration,
    /// Exit code used by `restart`.
    pub restart_exit_code: i32,
}

/// `EX_TEMPFAIL`: tells a supervisor the exit is temporary.
pub const DEFAULT_RESTART_EXIT_CODE: i32 = 75;

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            notify_delay: Duration::from_millis(1500),
            restart_exit_code: DEFAULT_RESTART_EXIT_CODE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse() {
        assert_eq!("restart".parse::<ActionType>().unwrap(), ActionType::Restart);
        assert_eq!(" Shutdown ".parse::<ActionType>().unwrap(), ActionType::Shutdown);
        assert_eq!("cleanup".parse::<ActionType>().unwrap(), ActionType::Cleanup);
        assert!("reboot".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_action_terminating() {
        assert!(ActionType::Restart.is_terminating());
        assert!(ActionType::Shutdown.is_terminating());
        assert!(!ActionType::Cleanup.is_terminating());
    }

    #[test]
    fn test_pending_action_builder() {
        let action = PendingAction::new(ActionType::Restart, "deploy")
            .with_requester("alice")
            .with_channel("ops");
        assert_eq!(action.requester.as_deref(), Some("alice"));
        assert_eq!(action.channel_id.as_deref(), Some("ops"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CoordinatorState::Draining.to_string(), "draining");
    }
}
