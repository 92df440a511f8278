// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session lifecycle coordination.
//!
//! The [`Coordinator`] knows every running session and decides whether new
//! ones may start. Global actions (restart, shutdown, cleanup) are queued,
//! new sessions are refused, and the actions run once the last active session
//! completes.

mod lifecycle;
mod signals;
pub mod types;

pub use lifecycle::{Coordinator, LifecycleHooks, ProcessExit};
pub use signals::spawn_signal_listener;
pub use types::{
    ActionType, ActiveSession, CoordinatorConfig, CoordinatorEvent, CoordinatorState,
    PendingAction, DEFAULT_RESTART_EXIT_CODE,
};

/// Error type for coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Not accepting new sessions while {0}; try again later")]
    NotAccepting(CoordinatorState),

    #[error("Session already registered: {0}")]
    AlreadyRegistered(String),
}
