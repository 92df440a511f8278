// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Drain-then-execute coordinator.
//!
//! ```text
//!   running ──queue_action──▶ draining ──last session done──▶ executing
//!      ▲                                                          │
//!      └──────────── actions exhausted, none terminating ─────────┘
//!                                      restart/shutdown ──▶ stopped
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::types::{
    ActionType, ActiveSession, CoordinatorConfig, CoordinatorEvent, CoordinatorState,
    PendingAction,
};
use super::CoordinatorError;

/// Process-level effects of lifecycle actions.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Housekeeping for the `cleanup` action.
    async fn cleanup(&self) -> crate::error::Result<()> {
        Ok(())
    }

    /// End the process with `code`.
    async fn exit(&self, code: i32);
}

/// Hooks that exit the real process and do no housekeeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

#[async_trait]
impl LifecycleHooks for ProcessExit {
    async fn exit(&self, code: i32) {
        info!("Exiting with code {}", code);
        std::process::exit(code);
    }
}

struct Inner {
    state: CoordinatorState,
    active: HashMap<String, ActiveSession>,
    pending: VecDeque<PendingAction>,
}

/// Tracks active sessions and gates global actions on them.
///
/// Constructed once and shared through `Arc`. All state lives behind one
/// synchronous mutex that is never held across an await, so check-and-register
/// is a single critical section.
pub struct Coordinator {
    inner: Mutex<Inner>,
    config: CoordinatorConfig,
    hooks: Arc<dyn LifecycleHooks>,
    event_tx: Option<mpsc::UnboundedSender<CoordinatorEvent>>,
}

impl Coordinator {
    /// Create a coordinator in the `running` state.
    pub fn new(config: CoordinatorConfig, hooks: Arc<dyn LifecycleHooks>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CoordinatorState::Running,
                active: HashMap::new(),
                pending: VecDeque::new(),
            }),
            config,
            hooks,
            event_tx: None,
        }
    }

    /// Deliver events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<CoordinatorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: CoordinatorEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn notify(&self, channel_id: Option<String>, text: impl Into<String>) {
        self.emit(CoordinatorEvent::Notification {
            channel_id,
            text: text.into(),
        });
    }

    /// Change state under an already-held lock, returning the event to emit.
    fn transition(inner: &mut Inner, to: CoordinatorState) -> Option<CoordinatorEvent> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        info!("Coordinator {} -> {}", from, to);
        Some(CoordinatorEvent::StateChanged { from, to })
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        self.lock().state
    }

    /// True iff new sessions are accepted.
    pub fn can_start_session(&self) -> bool {
        self.lock().state == CoordinatorState::Running
    }

    /// Number of registered sessions.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Registered sessions, oldest first.
    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        let mut sessions: Vec<_> = self.lock().active.values().cloned().collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Queued actions in execution order.
    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.lock().pending.iter().cloned().collect()
    }

    /// One-paragraph status for chat.
    pub fn status_summary(&self) -> String {
        let inner = self.lock();
        let mut out = format!(
            "State: {} | active sessions: {} | queued actions: {}",
            inner.state,
            inner.active.len(),
            inner.pending.len()
        );
        let mut sessions: Vec<_> = inner.active.values().collect();
        sessions.sort_by_key(|s| s.started_at);
        for s in sessions {
            out.push_str(&format!("\n- {} ({}): {}", s.id, s.requester, s.description));
        }
        out
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// Register a session.
    ///
    /// Rejects when not `running`. Callers must treat rejection as "try again
    /// later".
    pub fn register_session(&self, session: ActiveSession) -> Result<(), CoordinatorError> {
        {
            let mut inner = self.lock();
            if inner.state != CoordinatorState::Running {
                return Err(CoordinatorError::NotAccepting(inner.state));
            }
            if inner.active.contains_key(&session.id) {
                return Err(CoordinatorError::AlreadyRegistered(session.id));
            }
            inner.active.insert(session.id.clone(), session.clone());
        }
        debug!("Registered session {}", session.id);
        self.emit(CoordinatorEvent::SessionRegistered(session));
        Ok(())
    }

    /// Remove a session and, if it was the last one while draining, start
    /// executing queued actions.
    ///
    /// Returns false if the session was not registered.
    pub fn complete_session(self: &Arc<Self>, id: &str, success: bool, summary: &str) -> bool {
        let (found, execute) = {
            let mut inner = self.lock();
            let found = inner.active.remove(id).is_some();
            let execute =
                found && inner.active.is_empty() && inner.state == CoordinatorState::Draining;
            (found, execute)
        };

        if !found {
            warn!("Completion for unknown session {}", id);
            return false;
        }

        debug!("Completed session {} (success: {})", id, success);
        self.emit(CoordinatorEvent::SessionCompleted {
            id: id.to_string(),
            success,
            summary: summary.to_string(),
        });

        if execute {
            self.spawn_execution();
        }
        true
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    /// Queue a global action.
    ///
    /// Moves `running` to `draining`. With no active sessions the actions run
    /// on a spawned task, never inline.
    pub fn queue_action(
        self: &Arc<Self>,
        action: ActionType,
        reason: &str,
        requester: Option<&str>,
        channel_id: Option<&str>,
    ) {
        let mut pending = PendingAction::new(action, reason);
        pending.requester = requester.map(str::to_string);
        pending.channel_id = channel_id.map(str::to_string);

        let (transition, execute, active) = {
            let mut inner = self.lock();
            Self::enqueue_locked(&mut inner, pending.clone())
        };
        self.announce_queued(pending, transition, execute, active);
    }

    /// Handle an OS termination signal.
    ///
    /// Translates to a `shutdown` action while `running`; any other state means
    /// a shutdown is already under way and the signal is ignored. Returns
    /// whether the signal was acted on.
    pub fn handle_signal(self: &Arc<Self>, signal: &str) -> bool {
        let pending = PendingAction::new(ActionType::Shutdown, format!("Received {signal}"));
        let queued = {
            let mut inner = self.lock();
            if inner.state != CoordinatorState::Running {
                None
            } else {
                Some(Self::enqueue_locked(&mut inner, pending.clone()))
            }
        };

        match queued {
            Some((transition, execute, active)) => {
                info!("{} received, shutting down after active sessions finish", signal);
                self.announce_queued(pending, transition, execute, active);
                true
            }
            None => {
                warn!("{} received while {}, ignoring duplicate", signal, self.state());
                false
            }
        }
    }

    fn enqueue_locked(
        inner: &mut Inner,
        pending: PendingAction,
    ) -> (Option<CoordinatorEvent>, bool, usize) {
        inner.pending.push_back(pending);
        let transition = if inner.state == CoordinatorState::Running {
            Self::transition(inner, CoordinatorState::Draining)
        } else {
            None
        };
        let execute = inner.active.is_empty() && inner.state == CoordinatorState::Draining;
        (transition, execute, inner.active.len())
    }

    fn announce_queued(
        self: &Arc<Self>,
        pending: PendingAction,
        transition: Option<CoordinatorEvent>,
        execute: bool,
        active: usize,
    ) {
        info!("Queued {} ({}), {} active sessions", pending.action, pending.reason, active);
        if let Some(event) = transition {
            self.emit(event);
        }
        let channel = pending.channel_id.clone();
        let action = pending.action;
        self.emit(CoordinatorEvent::ActionQueued(pending));

        if active > 0 {
            self.notify(
                channel,
                format!("{action} queued; waiting for {active} active session(s) to finish"),
            );
        }
        if execute {
            self.spawn_execution();
        }
    }

    fn spawn_execution(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute_pending().await;
        });
    }

    /// Run queued actions in FIFO order.
    ///
    /// Only one execution runs at a time: the transition out of `draining`
    /// claims it.
    pub async fn execute_pending(self: Arc<Self>) {
        {
            let event = {
                let mut inner = self.lock();
                if inner.state != CoordinatorState::Draining || !inner.active.is_empty() {
                    debug!("Skipping execution in state {}", inner.state);
                    return;
                }
                Self::transition(&mut inner, CoordinatorState::Executing)
            };
            if let Some(event) = event {
                self.emit(event);
            }
        }

        loop {
            let next = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(action) => Ok(action),
                    None => Err(Self::transition(&mut inner, CoordinatorState::Running)),
                }
            };

            let pending = match next {
                Ok(pending) => pending,
                Err(event) => {
                    if let Some(event) = event {
                        self.emit(event);
                    }
                    info!("All queued actions done, accepting sessions again");
                    return;
                }
            };

            info!("Executing {} ({})", pending.action, pending.reason);
            self.emit(CoordinatorEvent::ActionExecuting(pending.clone()));

            match pending.action {
                ActionType::Cleanup => {
                    match self.hooks.cleanup().await {
                        Ok(()) => self.notify(pending.channel_id.clone(), "Cleanup complete"),
                        Err(e) => {
                            error!("Cleanup failed: {}", e);
                            self.notify(pending.channel_id.clone(), format!("Cleanup failed: {e}"));
                        }
                    }
                }
                ActionType::Restart | ActionType::Shutdown => {
                    let (verb, code) = match pending.action {
                        ActionType::Restart => ("Restarting", self.config.restart_exit_code),
                        _ => ("Shutting down", 0),
                    };
                    self.notify(pending.channel_id.clone(), format!("{verb}: {}", pending.reason));
                    tokio::time::sleep(self.config.notify_delay).await;

                    let event = {
                        let mut inner = self.lock();
                        Self::transition(&mut inner, CoordinatorState::Stopped)
                    };
                    if let Some(event) = event {
                        self.emit(event);
                    }
                    self.hooks.exit(code).await;
                    return;
                }
            }
        }
    }
}
