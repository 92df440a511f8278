// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session driver: generation, checkpoints, commit and merge.
//!
//! ```text
//!            ┌──────────────── continuation prompt ◀──────────────┐
//!            ▼                                                     │
//!   ┌─────────────────┐  tool_result + checkpoint owed  ┌──────────┴──────┐
//!   │   generating    │ ──────────── abort ───────────▶ │ checkpoint      │
//!   └────────┬────────┘                                  │ commit          │
//!            │ run ends                                  └─────────────────┘
//!            ▼
//!   final commit ─▶ merge ─▶ (repair ─▶ merge)* ─▶ merged | merge-failed
//!        │
//!        └─ no commits ─▶ no-changes
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::prompt::{
    build_continuation_prompt, build_initial_prompt, build_repair_prompt, repairs_in_main_repo,
    DEFAULT_DIFF_CHAR_LIMIT,
};
use super::CheckpointError;
use crate::coordinator::Coordinator;
use crate::generator::{Generator, GeneratorEvent, GeneratorExit};
use crate::transport::ChatMessage;
use crate::workspace::{MergeFailureKind, MergeResult, Session, WorkspaceManager};

/// Driver tuning.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Cap on the diff rendered into a continuation prompt.
    pub diff_char_limit: usize,
    /// Maximum checkpoint-and-continue cycles per session.
    pub max_continuations: u32,
    /// Repair-and-retry attempts after a failed merge.
    pub merge_repair_attempts: u32,
    /// Time a generator gets to exit after SIGTERM before it is killed.
    pub grace_period: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            diff_char_limit: DEFAULT_DIFF_CHAR_LIMIT,
            max_continuations: 10,
            merge_repair_attempts: 1,
            grace_period: Duration::from_secs(5),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Merged {
        commit: String,
        pushed: bool,
        checkpoints: u32,
    },
    /// Merge failed after every repair attempt; the branch is kept.
    MergeFailed {
        kind: MergeFailureKind,
        details: String,
        branch: String,
    },
    /// The generator finished without changing anything.
    NoChanges,
    /// The generator failed; the workspace is kept for debugging.
    GenerationFailed { summary: String },
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Merged { .. } | Self::NoChanges)
    }

    /// Text for the requester.
    pub fn describe(&self, default_branch: &str) -> String {
        match self {
            Self::Merged {
                commit,
                pushed,
                checkpoints,
            } => {
                let short: String = commit.chars().take(8).collect();
                let mut text = format!("Merged into {default_branch} as {short}");
                if !pushed {
                    text.push_str(" (not pushed)");
                }
                if *checkpoints > 0 {
                    text.push_str(&format!(" after {checkpoints} checkpoint(s)"));
                }
                text
            }
            Self::MergeFailed {
                kind,
                details,
                branch,
            } => {
                let details: String = details.chars().take(500).collect();
                format!(
                    "Could not merge {branch} into {default_branch} ({kind}). The branch is kept for manual resolution.\n{details}"
                )
            }
            Self::NoChanges => "Finished without changing any files.".to_string(),
            Self::GenerationFailed { summary } => format!("Generation failed: {summary}"),
        }
    }
}

/// Progress text emitted while a session runs.
#[derive(Debug, Clone)]
pub struct DriverProgress {
    pub session_id: String,
    pub channel_id: String,
    pub text: String,
}

struct RunOutcome {
    exit: GeneratorExit,
    interrupted: bool,
}

/// Runs one session from first prompt to coordinator hand-off.
pub struct SessionDriver {
    manager: Arc<WorkspaceManager>,
    coordinator: Arc<Coordinator>,
    generator: Arc<dyn Generator>,
    config: CheckpointConfig,
    progress_tx: Option<mpsc::UnboundedSender<DriverProgress>>,
}

impl SessionDriver {
    pub fn new(
        manager: Arc<WorkspaceManager>,
        coordinator: Arc<Coordinator>,
        generator: Arc<dyn Generator>,
        config: CheckpointConfig,
    ) -> Self {
        Self {
            manager,
            coordinator,
            generator,
            config,
            progress_tx: None,
        }
    }

    /// Report progress on `tx`.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<DriverProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn progress(&self, session: &Session, text: impl Into<String>) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(DriverProgress {
                session_id: session.id.clone(),
                channel_id: session.channel_id().to_string(),
                text: text.into(),
            });
        }
    }

    /// Drive a registered session to its end.
    ///
    /// Always finishes the session in the workspace manager and the
    /// coordinator, whatever the outcome. The workspace is torn down first and
    /// the coordinator is told last, so a queued restart or shutdown cannot run
    /// while a worktree is still being removed. Until that hand-off the
    /// coordinator may briefly list a session the manager already reports as
    /// terminal.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, context)))]
    pub async fn run(
        &self,
        session_id: &str,
        context: &[ChatMessage],
    ) -> Result<SessionOutcome, CheckpointError> {
        let result = self.drive(session_id, context).await;

        let (success, summary) = match &result {
            Ok(outcome) => {
                let finalized = match outcome {
                    SessionOutcome::Merged { .. } | SessionOutcome::MergeFailed { .. } => {
                        self.manager.complete_session(session_id).await.map(|_| ())
                    }
                    SessionOutcome::NoChanges => {
                        self.manager.abandon_session(session_id).await.map(|_| ())
                    }
                    SessionOutcome::GenerationFailed { summary } => self
                        .manager
                        .mark_failed(session_id, summary.clone())
                        .await
                        .map(|_| ()),
                };
                if let Err(e) = finalized {
                    error!("Failed to finalize session {}: {}", session_id, e);
                }
                let summary = outcome.describe(&self.manager.config().default_branch);
                (outcome.is_success(), summary)
            }
            Err(e) => {
                if let Err(mark_err) = self.manager.mark_failed(session_id, e.to_string()).await {
                    error!("Failed to mark session {} failed: {}", session_id, mark_err);
                }
                (false, e.to_string())
            }
        };

        self.coordinator.complete_session(session_id, success, &summary);
        result
    }

    async fn drive(
        &self,
        session_id: &str,
        context: &[ChatMessage],
    ) -> Result<SessionOutcome, CheckpointError> {
        let session = self
            .manager
            .get_session(session_id)
            .await
            .ok_or_else(|| CheckpointError::SessionNotFound(session_id.to_string()))?;

        let mut prompt = build_initial_prompt(&session.task, context);
        let mut continuations = 0u32;

        self.manager.set_generating(session_id, true).await?;
        let generated = loop {
            let run = match self.run_once(&session, &prompt).await {
                Ok(run) => run,
                Err(e) => {
                    let _ = self.manager.set_generating(session_id, false).await;
                    return Err(e);
                }
            };

            // A crash is a failure even with follow-ups waiting.
            if !run.interrupted && !run.exit.success() {
                break run.exit;
            }

            let owed = run.interrupted || self.manager.should_checkpoint(session_id).await;
            if !owed {
                break run.exit;
            }
            if continuations >= self.config.max_continuations {
                warn!(
                    "Session {} reached {} continuations, finishing without further instructions",
                    session_id, continuations
                );
                self.progress(&session, "Too many follow-ups; finishing with the work so far.");
                break run.exit;
            }

            prompt = self.checkpoint(&session).await?;
            continuations += 1;
        };
        self.manager.set_generating(session_id, false).await?;

        if !generated.success() && !generated.aborted {
            warn!(
                "Generator failed for session {} (code {:?})",
                session_id, generated.code
            );
            return Ok(SessionOutcome::GenerationFailed {
                summary: generated.summary,
            });
        }

        self.finish(&session).await
    }

    /// One generator run. Stops at the first tool boundary where a checkpoint
    /// is owed.
    async fn run_once(&self, session: &Session, prompt: &str) -> Result<RunOutcome, CheckpointError> {
        let mut run = self.generator.spawn(&session.workspace_path, prompt).await?;
        let mut interrupted = false;

        while let Some(event) = run.next_event().await {
            match &event {
                GeneratorEvent::ToolUse { name, .. } => debug!("Session {} tool: {}", session.id, name),
                GeneratorEvent::Error { message } => warn!("Session {} generator error: {}", session.id, message),
                _ => {}
            }

            if event.is_tool_boundary() && self.manager.should_checkpoint(&session.id).await {
                info!("Checkpoint owed for session {}, stopping at tool boundary", session.id);
                run.abort(self.config.grace_period).await;
                interrupted = true;
                break;
            }
        }

        let exit = run.wait().await?;
        Ok(RunOutcome { exit, interrupted })
    }

    /// Commit progress and build the prompt that resumes it.
    async fn checkpoint(&self, session: &Session) -> Result<String, CheckpointError> {
        let id = &session.id;
        let diff = match self.manager.get_diff(id).await {
            Ok(diff) => diff,
            Err(e) => {
                warn!("Could not capture diff for session {}: {}", id, e);
                String::new()
            }
        };

        let checkpoint = self.manager.take_checkpoint(id).await?;
        let message = format!("Checkpoint {}: {}", checkpoint.number, session.short_description());
        let commit = self.manager.commit_changes(id, &message).await?;

        match commit {
            Some(ref c) => info!("Session {} checkpoint {} at {}", id, checkpoint.number, c),
            None => info!("Session {} checkpoint {} had nothing to commit", id, checkpoint.number),
        }
        self.progress(
            session,
            format!(
                "Checkpoint {}: folding in {} new message(s)",
                checkpoint.number,
                checkpoint.messages.len()
            ),
        );

        Ok(build_continuation_prompt(
            &session.task,
            checkpoint.number,
            &diff,
            self.config.diff_char_limit,
            &checkpoint.messages,
        ))
    }

    /// Final commit, merge and repair.
    async fn finish(&self, session: &Session) -> Result<SessionOutcome, CheckpointError> {
        let id = &session.id;
        self.manager
            .commit_changes(id, &session.short_description())
            .await?;

        let session = self
            .manager
            .get_session(id)
            .await
            .ok_or_else(|| CheckpointError::SessionNotFound(id.to_string()))?;
        if session.commits.is_empty() {
            info!("Session {} made no changes", id);
            return Ok(SessionOutcome::NoChanges);
        }

        self.progress(&session, format!("Merging {} commit(s)", session.commits.len()));
        let mut merge = self.manager.merge_to_main(id).await?;
        let mut attempts = 0;
        let mut repair_failure = None;

        while let MergeResult::Failed { kind, details } = &merge {
            if attempts >= self.config.merge_repair_attempts {
                break;
            }
            attempts += 1;
            info!(
                "Merge of session {} failed ({}), repair attempt {}/{}",
                id, kind, attempts, self.config.merge_repair_attempts
            );
            self.progress(&session, format!("Merge failed ({kind}); attempting repair"));

            let repaired = self.repair(&session, *kind, details).await;
            let unfinished = match self.manager.abort_unfinished_merge(id).await {
                Ok(unfinished) => unfinished,
                Err(e) => {
                    warn!("Could not check session {} for an unfinished merge: {}", id, e);
                    true
                }
            };
            if unfinished {
                repair_failure = Some("the repair left an unfinished merge, which was aborted");
                break;
            }
            if !repaired {
                repair_failure = Some("the repair run failed");
                break;
            }

            self.manager
                .commit_changes(id, &format!("Repair merge ({kind})"))
                .await?;
            merge = self.manager.merge_to_main(id).await?;
        }

        Ok(match merge {
            MergeResult::Merged { commit, pushed } => SessionOutcome::Merged {
                commit,
                pushed,
                checkpoints: session.checkpoint_count,
            },
            MergeResult::Failed { kind, details } => {
                let details = match repair_failure {
                    Some(reason) => {
                        warn!("Repair of session {} gave up: {}", id, reason);
                        format!("{details}\n\nRepair attempt: {reason}")
                    }
                    None => details,
                };
                SessionOutcome::MergeFailed {
                    kind,
                    details,
                    branch: session.branch.clone(),
                }
            }
        })
    }

    /// Run the generator once with a repair prompt. Returns whether the
    /// repair ran to a successful exit.
    async fn repair(&self, session: &Session, kind: MergeFailureKind, details: &str) -> bool {
        if kind == MergeFailureKind::MergeConflict {
            match self.manager.rebase_onto_main(&session.id).await {
                Ok(true) => {
                    info!("Session {} rebased cleanly, skipping repair run", session.id);
                    return true;
                }
                Ok(false) => debug!("Rebase of session {} conflicts, running repair", session.id),
                Err(e) => warn!("Rebase of session {} failed: {}", session.id, e),
            }
        }

        let manager_config = self.manager.config();
        let prompt = build_repair_prompt(
            kind,
            details,
            &session.branch,
            &manager_config.default_branch,
            &session.task,
        );
        let workdir: &Path = if repairs_in_main_repo(kind) {
            &manager_config.repo_path
        } else {
            &session.workspace_path
        };

        let mut run = match self.generator.spawn(workdir, &prompt).await {
            Ok(run) => run,
            Err(e) => {
                warn!("Repair generator failed to start: {}", e);
                return false;
            }
        };
        while run.next_event().await.is_some() {}
        match run.wait().await {
            Ok(exit) if exit.success() => {
                debug!("Repair run finished: {}", exit.summary);
                true
            }
            Ok(exit) => {
                warn!("Repair run exited with {:?}: {}", exit.code, exit.summary);
                false
            }
            Err(e) => {
                warn!("Repair run failed: {}", e);
                false
            }
        }
    }
}
