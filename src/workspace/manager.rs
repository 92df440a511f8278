// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session workspace manager.
//!
//! Owns every [`Session`] and its worktree. Git operations on one session are
//! serialized by a per-session lock; merges into the main repository are
//! serialized process-wide by the merge lock, and `git worktree add` calls by
//! the worktree lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
#[cfg(feature = "telemetry")]
use tracing::instrument;
use uuid::Uuid;

use super::branch::BranchNamer;
use super::git::{sanitize_message, GitIdentity, GitRunner};
use super::types::{MergeFailureKind, MergeResult, Session, SessionEvent, SessionState};
use super::WorkspaceError;
use crate::transport::ChatMessage;

static CONFLICT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^CONFLICT|Automatic merge failed|unmerged files|fix conflicts")
        .expect("valid conflict regex")
});

static LOCAL_CHANGES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Your local changes to the following files would be overwritten")
        .expect("valid local changes regex")
});

static UNTRACKED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"untracked working tree files would be (overwritten|removed)")
        .expect("valid untracked regex")
});

/// Classify a failed merge from git's diagnostic text.
///
/// `has_unmerged_paths` should reflect `git diff --diff-filter=U` after the
/// failed merge; unmerged paths always mean a content conflict.
pub fn classify_merge_failure(details: &str, has_unmerged_paths: bool) -> MergeFailureKind {
    if has_unmerged_paths || CONFLICT_RE.is_match(details) {
        MergeFailureKind::MergeConflict
    } else if LOCAL_CHANGES_RE.is_match(details) {
        MergeFailureKind::LocalChanges
    } else if UNTRACKED_RE.is_match(details) {
        MergeFailureKind::UntrackedFiles
    } else {
        MergeFailureKind::Other
    }
}

/// Configuration for the workspace manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Main repository; merges land here.
    pub repo_path: PathBuf,
    /// Directory holding one worktree per session.
    pub workspace_base: PathBuf,
    /// Branch sessions start from and merge into.
    pub default_branch: String,
    /// Remote name used for fetch, pull and push when present.
    pub remote: String,
    /// Prefix for session branches.
    pub branch_prefix: String,
    /// Directories in the main repo to symlink into each workspace.
    pub shared_cache_dirs: Vec<String>,
    /// Commit identity.
    pub identity: GitIdentity,
}

impl ManagerConfig {
    /// Configuration for a repository with defaults for everything else.
    pub fn for_repo(repo_path: impl Into<PathBuf>, workspace_base: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            workspace_base: workspace_base.into(),
            default_branch: "main".to_string(),
            remote: "origin".to_string(),
            branch_prefix: super::branch::DEFAULT_BRANCH_PREFIX.to_string(),
            shared_cache_dirs: Vec::new(),
            identity: GitIdentity::default(),
        }
    }
}

/// Result of taking a checkpoint: its number and the instructions it folds in.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// 1-based checkpoint number within the session.
    pub number: u32,
    /// Messages that arrived while the interrupted run was in progress.
    pub messages: Vec<ChatMessage>,
}

/// Creates, tracks and tears down session workspaces.
pub struct WorkspaceManager {
    config: ManagerConfig,
    git: GitRunner,
    namer: BranchNamer,
    sessions: RwLock<HashMap<String, Session>>,
    session_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    merge_lock: Mutex<()>,
    worktree_lock: Mutex<()>,
    event_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl WorkspaceManager {
    /// Create a manager for the configured repository.
    pub fn new(config: ManagerConfig) -> Self {
        let git = GitRunner::new(config.identity.clone());
        let namer = BranchNamer::new(config.branch_prefix.clone());
        Self {
            config,
            git,
            namer,
            sessions: RwLock::new(HashMap::new()),
            session_locks: StdMutex::new(HashMap::new()),
            merge_lock: Mutex::new(()),
            worktree_lock: Mutex::new(()),
            event_tx: None,
        }
    }

    /// Emit session lifecycle events on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn session_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn drop_session_lock(&self, id: &str) {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(id);
    }

    /// Apply `f` to a session and emit an update.
    async fn update<F>(&self, id: &str, f: F) -> Result<Session, WorkspaceError>
    where
        F: FnOnce(&mut Session),
    {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| WorkspaceError::SessionNotFound(id.to_string()))?;
            f(session);
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.emit(SessionEvent::Updated(snapshot.clone()));
        Ok(snapshot)
    }

    async fn live_session(&self, id: &str) -> Result<Session, WorkspaceError> {
        let session = self
            .get_session(id)
            .await
            .ok_or_else(|| WorkspaceError::SessionNotFound(id.to_string()))?;
        if !session.state.is_live() {
            return Err(WorkspaceError::SessionNotLive {
                id: id.to_string(),
                state: session.state,
            });
        }
        Ok(session)
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    /// Prepare the workspace base and prune stale worktrees.
    ///
    /// Safe to call on every start: creates the base directory, prunes git's
    /// worktree records, and deletes any directory under the base that is not a
    /// valid worktree. Directories of live sessions are left alone. Returns the
    /// number of orphan directories removed.
    pub async fn initialize(&self) -> Result<usize, WorkspaceError> {
        tokio::fs::create_dir_all(&self.config.workspace_base).await?;

        if let Err(e) = self.git.run(&self.config.repo_path, &["worktree", "prune"]).await {
            warn!("Failed to prune worktree records: {}", e);
        }

        let live: Vec<PathBuf> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.state.is_live())
                .map(|s| s.workspace_path.clone())
                .collect()
        };

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.config.workspace_base).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_dir() || live.contains(&path) {
                continue;
            }
            if !has_valid_git_marker(&path).await {
                info!("Removing orphaned workspace {:?}", path);
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove orphaned workspace {:?}: {}", path, e),
                }
            }
        }

        if removed > 0 {
            let _ = self.git.run(&self.config.repo_path, &["worktree", "prune"]).await;
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Session creation
    // ------------------------------------------------------------------------

    /// Check whether the configured remote exists in the main repository.
    pub async fn has_remote(&self) -> bool {
        match self.git.run(&self.config.repo_path, &["remote"]).await {
            Ok(out) => out.lines().any(|r| r.trim() == self.config.remote),
            Err(_) => false,
        }
    }

    /// Fetch the default branch and pick the freshest ref to branch from.
    ///
    /// Uses the remote-tracking ref when it resolves, the local branch otherwise.
    /// Fetch failures are ignored.
    async fn resolve_base_ref(&self, cwd: &Path) -> String {
        let repo = &self.config.repo_path;
        let default = &self.config.default_branch;
        let remote = &self.config.remote;

        if self.has_remote().await {
            if let Err(e) = self.git.run(cwd, &["fetch", remote, default]).await {
                debug!("Fetch of {}/{} failed, using local state: {}", remote, default, e);
            }
            let tracking = format!("{remote}/{default}");
            if self
                .git
                .succeeds(repo, &["rev-parse", "--verify", "--quiet", &tracking])
                .await
            {
                return tracking;
            }
        }
        default.clone()
    }

    /// Create a session with its own branch and worktree.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, trigger), fields(channel = %trigger.channel_id)))]
    pub async fn create_session(
        &self,
        trigger: ChatMessage,
        task: &str,
    ) -> Result<Session, WorkspaceError> {
        let id = Uuid::new_v4().to_string();
        let branch = self.namer.branch_for(task);
        let path = self.config.workspace_base.join(&id);
        let session = Session::new(&id, &branch, &path, task, trigger);

        {
            let mut sessions = self.sessions.write().await;
            let clash = sessions
                .values()
                .any(|s| s.branch == branch || s.workspace_path == path);
            if clash || path.exists() {
                return Err(WorkspaceError::InvalidWorkspace(format!(
                    "Workspace or branch already in use: {} at {:?}",
                    branch, path
                )));
            }
            sessions.insert(id.clone(), session);
        }

        info!("Creating session {} on branch {} at {:?}", id, branch, path);

        match self.setup_worktree(&branch, &path).await {
            Ok(()) => {
                self.link_shared_dirs(&path).await;
                let session = self.update(&id, |s| s.set_state(SessionState::Active)).await?;
                self.emit(SessionEvent::Created(session.clone()));
                Ok(session)
            }
            Err(e) => {
                error!("Failed to create workspace for session {}: {}", id, e);
                let message = e.to_string();
                let session = self
                    .update(&id, |s| {
                        s.set_state(SessionState::Failed);
                        s.error = Some(message);
                    })
                    .await?;
                self.emit(SessionEvent::Created(session));
                Err(e)
            }
        }
    }

    async fn setup_worktree(&self, branch: &str, path: &Path) -> Result<(), WorkspaceError> {
        tokio::fs::create_dir_all(&self.config.workspace_base).await?;
        let _worktree_guard = self.worktree_lock.lock().await;
        let base_ref = self.resolve_base_ref(&self.config.repo_path).await;
        let path_str = path.to_string_lossy().to_string();

        self.git
            .run(
                &self.config.repo_path,
                &["worktree", "add", "-b", branch, &path_str, &base_ref],
            )
            .await
            .map(|_| ())
            .map_err(|e| WorkspaceError::WorktreeCreationFailed(e.to_string()))
    }

    /// Symlink shared dependency caches into a fresh worktree.
    ///
    /// Best-effort: every failure is logged and skipped.
    async fn link_shared_dirs(&self, workspace: &Path) {
        for name in &self.config.shared_cache_dirs {
            let source = self.config.repo_path.join(name);
            let target = workspace.join(name);
            if !source.exists() || target.exists() {
                continue;
            }

            #[cfg(unix)]
            let linked = tokio::fs::symlink(&source, &target).await;
            #[cfg(windows)]
            let linked = tokio::fs::symlink_dir(&source, &target).await;

            match linked {
                Ok(()) => {
                    debug!("Linked {:?} -> {:?}", target, source);
                    if let Err(e) = self.exclude_from_git(workspace, name).await {
                        warn!("Failed to exclude {} from git: {}", name, e);
                    }
                }
                Err(e) => warn!("Failed to link shared directory {}: {}", name, e),
            }
        }
    }

    /// Add `/name` to the repository's exclude file.
    ///
    /// Git treats a symlink as a file, so a `name/` ignore rule does not cover
    /// it; the anchored form without a trailing slash does.
    async fn exclude_from_git(&self, workspace: &Path, name: &str) -> Result<(), WorkspaceError> {
        let exclude = self
            .git
            .run(workspace, &["rev-parse", "--git-path", "info/exclude"])
            .await?;
        let exclude_path = {
            let p = PathBuf::from(exclude.trim());
            if p.is_absolute() {
                p
            } else {
                workspace.join(p)
            }
        };

        let entry = format!("/{}", name.trim_matches('/'));
        let existing = tokio::fs::read_to_string(&exclude_path).await.unwrap_or_default();
        if existing.lines().any(|l| l.trim() == entry) {
            return Ok(());
        }
        if let Some(parent) = exclude_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&entry);
        content.push('\n');
        tokio::fs::write(&exclude_path, content).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Commit / rebase / merge
    // ------------------------------------------------------------------------

    /// Stage everything and commit it.
    ///
    /// Returns `None` when nothing is staged; no empty commits are ever made.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, message)))]
    pub async fn commit_changes(
        &self,
        id: &str,
        message: &str,
    ) -> Result<Option<String>, WorkspaceError> {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let session = self.live_session(id).await?;
        self.update(id, |s| s.set_state(SessionState::Committing)).await?;

        let result = self.commit_in(&session, message).await;

        self.update(id, |s| {
            s.set_state(SessionState::Active);
            if let Ok(Some(ref commit)) = result {
                s.commits.push(commit.clone());
            }
        })
        .await?;

        if let Ok(Some(ref commit)) = result {
            info!("Session {} committed {}", id, commit);
        }
        result
    }

    async fn commit_in(&self, session: &Session, message: &str) -> Result<Option<String>, WorkspaceError> {
        let cwd = &session.workspace_path;
        // `add -A` would stage conflict markers as resolved content.
        if let Some(state) = self.unfinished_merge(cwd).await? {
            return Err(WorkspaceError::UnmergedPaths(state));
        }
        self.git.run(cwd, &["add", "-A"]).await?;

        let staged = self.git.output(cwd, &["diff", "--cached", "--quiet"]).await?;
        match staged.code {
            0 => {
                debug!("Nothing staged in session {}, skipping commit", session.id);
                return Ok(None);
            }
            1 => {}
            _ => {
                return Err(WorkspaceError::Git {
                    command: "diff".to_string(),
                    message: staged.combined(),
                })
            }
        }

        let full_message = format!(
            "{}\n\nRequested-by: {}\nChannel: {}",
            sanitize_message(message),
            sanitize_message(session.requester()),
            sanitize_message(session.channel_id()),
        );
        self.git.run(cwd, &["commit", "-m", &full_message]).await?;
        let commit = self.git.run(cwd, &["rev-parse", "HEAD"]).await?;
        Ok(Some(commit.trim().to_string()))
    }

    /// Describe merge state left in `cwd`: the unmerged paths, or a note when
    /// `MERGE_HEAD` exists without any. `None` when no merge is under way.
    async fn unfinished_merge(&self, cwd: &Path) -> Result<Option<String>, WorkspaceError> {
        let unmerged = self.git.run(cwd, &["ls-files", "-u"]).await?;
        if !unmerged.trim().is_empty() {
            let mut paths: Vec<&str> = unmerged
                .lines()
                .filter_map(|line| line.split('\t').nth(1))
                .collect();
            paths.dedup();
            return Ok(Some(format!("unmerged paths: {}", paths.join(", "))));
        }
        if self
            .git
            .succeeds(cwd, &["rev-parse", "-q", "--verify", "MERGE_HEAD"])
            .await
        {
            return Ok(Some("merge in progress".to_string()));
        }
        Ok(None)
    }

    /// Abort a merge left unfinished in the session workspace.
    ///
    /// Returns whether there was one. When `merge --abort` cannot clear the
    /// merge state the workspace is hard-reset to its last commit.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn abort_unfinished_merge(&self, id: &str) -> Result<bool, WorkspaceError> {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let session = self.live_session(id).await?;
        let cwd = &session.workspace_path;
        let Some(state) = self.unfinished_merge(cwd).await? else {
            return Ok(false);
        };

        warn!("Session {} has an unfinished merge ({}), aborting it", id, state);
        let aborted = self.git.output(cwd, &["merge", "--abort"]).await?;
        if !aborted.success || self.unfinished_merge(cwd).await?.is_some() {
            self.git.run(cwd, &["reset", "--hard", "HEAD"]).await?;
        }
        Ok(true)
    }

    /// Rebase the session branch onto the default branch.
    ///
    /// On failure the rebase is aborted so the workspace is never left
    /// mid-rebase, and `false` is returned.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn rebase_onto_main(&self, id: &str) -> Result<bool, WorkspaceError> {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let session = self.live_session(id).await?;
        self.update(id, |s| s.set_state(SessionState::Rebasing)).await?;

        let cwd = &session.workspace_path;
        let base_ref = self.resolve_base_ref(cwd).await;
        let rebased = match self.git.output(cwd, &["rebase", &base_ref]).await {
            Ok(out) if out.success => true,
            Ok(out) => {
                warn!("Rebase of session {} onto {} failed: {}", id, base_ref, out.combined());
                let _ = self.git.output(cwd, &["rebase", "--abort"]).await;
                false
            }
            Err(e) => {
                warn!("Rebase of session {} could not run: {}", id, e);
                false
            }
        };

        self.update(id, |s| s.set_state(SessionState::Active)).await?;
        Ok(rebased)
    }

    /// Merge the session branch into the default branch of the main repository.
    ///
    /// Failures are classified and the main repository is reset to the last
    /// known good commit. Push is attempted after a clean merge; a missing
    /// remote or a failed push does not fail the merge.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn merge_to_main(&self, id: &str) -> Result<MergeResult, WorkspaceError> {
        let session = self
            .get_session(id)
            .await
            .ok_or_else(|| WorkspaceError::SessionNotFound(id.to_string()))?;

        let _merge_guard = self.merge_lock.lock().await;
        let repo = &self.config.repo_path;
        let default = &self.config.default_branch;
        let remote = &self.config.remote;

        info!("Merging {} into {}", session.branch, default);

        let checkout = self.git.output(repo, &["checkout", default]).await?;
        if !checkout.success {
            let details = checkout.combined();
            let kind = classify_merge_failure(&details, false);
            warn!("Checkout of {} failed ({}): {}", default, kind, details);
            self.restore_main(None).await;
            return Ok(MergeResult::Failed { kind, details });
        }

        let mut good_ref = self.git.run(repo, &["rev-parse", "HEAD"]).await?;
        let has_remote = self.has_remote().await;

        if has_remote {
            let pull = self
                .git
                .output(repo, &["pull", "--no-rebase", "--no-edit", remote, default])
                .await?;
            if pull.success {
                good_ref = self.git.run(repo, &["rev-parse", "HEAD"]).await?;
            } else {
                warn!("Pull of {}/{} failed, merging onto local state: {}", remote, default, pull.combined());
                let _ = self.git.output(repo, &["merge", "--abort"]).await;
            }
        }

        let message = sanitize_message(&format!(
            "Merge {}: {}\n\nRequested-by: {}\nChannel: {}",
            session.branch,
            session.short_description(),
            session.requester(),
            session.channel_id(),
        ));

        let merge = self
            .git
            .output(repo, &["merge", "--no-ff", "-m", &message, &session.branch])
            .await?;

        if merge.success {
            let commit = self.git.run(repo, &["rev-parse", "HEAD"]).await?;
            let pushed = if has_remote {
                match self.git.output(repo, &["push", remote, default]).await {
                    Ok(out) if out.success => true,
                    Ok(out) => {
                        warn!("Push to {} failed: {}", remote, out.combined());
                        false
                    }
                    Err(e) => {
                        warn!("Push to {} could not run: {}", remote, e);
                        false
                    }
                }
            } else {
                debug!("No remote {} configured, skipping push", remote);
                false
            };
            info!("Merged {} into {} as {}", session.branch, default, commit);
            return Ok(MergeResult::Merged {
                commit: commit.trim().to_string(),
                pushed,
            });
        }

        let unmerged = self
            .git
            .output(repo, &["diff", "--name-only", "--diff-filter=U"])
            .await
            .map(|o| o.stdout)
            .unwrap_or_default();
        let mut details = merge.combined();
        let kind = classify_merge_failure(&details, !unmerged.trim().is_empty());

        if kind == MergeFailureKind::MergeConflict {
            if !unmerged.trim().is_empty() {
                details.push_str("\n\nConflicting files:\n");
                details.push_str(unmerged.trim());
            }
            let _ = self.git.output(repo, &["merge", "--abort"]).await;
        }

        warn!("Merge of {} failed ({})", session.branch, kind);
        self.restore_main(Some(&good_ref)).await;
        Ok(MergeResult::Failed { kind, details })
    }

    /// Put the main repository back on the default branch at `good_ref`.
    async fn restore_main(&self, good_ref: Option<&str>) {
        let repo = &self.config.repo_path;
        let default = &self.config.default_branch;

        let _ = self.git.output(repo, &["merge", "--abort"]).await;
        if let Err(e) = self.git.run(repo, &["checkout", "-f", default]).await {
            error!("Failed to restore {} in main repository: {}", default, e);
        }
        let target = good_ref.unwrap_or("HEAD");
        if let Err(e) = self.git.run(repo, &["reset", "--hard", target]).await {
            error!("Failed to reset main repository to {}: {}", target, e);
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Remove a worktree, falling back to raw deletion. Never fails.
    async fn remove_worktree(&self, path: &Path) {
        let path_str = path.to_string_lossy().to_string();
        if let Err(e) = self
            .git
            .run(&self.config.repo_path, &["worktree", "remove", "--force", &path_str])
            .await
        {
            warn!("Failed to remove worktree via git: {}", e);
            if path.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(path).await {
                    error!("Failed to delete workspace {:?}: {}", path, e);
                }
            }
            let _ = self.git.run(&self.config.repo_path, &["worktree", "prune"]).await;
        }
    }

    /// Remove the workspace and mark the session completed.
    ///
    /// The branch is kept for audit and manual recovery.
    pub async fn complete_session(&self, id: &str) -> Result<Session, WorkspaceError> {
        let lock = self.session_lock(id);
        let guard = lock.lock().await;

        let session = self
            .get_session(id)
            .await
            .ok_or_else(|| WorkspaceError::SessionNotFound(id.to_string()))?;
        info!("Completing session {}", id);
        self.remove_worktree(&session.workspace_path).await;

        let session = self
            .update(id, |s| {
                s.set_state(SessionState::Completed);
                s.generating = false;
            })
            .await?;
        self.emit(SessionEvent::Completed(session.clone()));

        drop(guard);
        self.drop_session_lock(id);
        Ok(session)
    }

    /// Remove the workspace, delete the branch, and mark the session abandoned.
    pub async fn abandon_session(&self, id: &str) -> Result<Session, WorkspaceError> {
        let lock = self.session_lock(id);
        let guard = lock.lock().await;

        let session = self
            .get_session(id)
            .await
            .ok_or_else(|| WorkspaceError::SessionNotFound(id.to_string()))?;
        info!("Abandoning session {}", id);
        self.remove_worktree(&session.workspace_path).await;

        if let Err(e) = self
            .git
            .run(&self.config.repo_path, &["branch", "-D", &session.branch])
            .await
        {
            warn!("Failed to delete branch {}: {}", session.branch, e);
        }

        let session = self
            .update(id, |s| {
                s.set_state(SessionState::Abandoned);
                s.generating = false;
            })
            .await?;
        self.emit(SessionEvent::Completed(session.clone()));

        drop(guard);
        self.drop_session_lock(id);
        Ok(session)
    }

    /// Mark a session failed, keeping its workspace for debugging.
    pub async fn mark_failed(&self, id: &str, error: impl Into<String>) -> Result<Session, WorkspaceError> {
        let error = error.into();
        error!("Session {} failed: {}", id, error);
        let session = self
            .update(id, |s| {
                s.set_state(SessionState::Failed);
                s.generating = false;
                s.error = Some(error);
            })
            .await?;
        self.emit(SessionEvent::Completed(session.clone()));
        self.drop_session_lock(id);
        Ok(session)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Uncommitted changes in the workspace as a unified diff.
    ///
    /// Includes untracked files as new-file diffs.
    pub async fn get_diff(&self, id: &str) -> Result<String, WorkspaceError> {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let session = self.live_session(id).await?;
        let cwd = &session.workspace_path;

        let mut diff = self.git.run(cwd, &["diff", "HEAD"]).await?;
        let untracked = self
            .git
            .run(cwd, &["ls-files", "--others", "--exclude-standard"])
            .await?;

        for file in untracked.lines().filter(|l| !l.trim().is_empty()) {
            // --no-index exits 1 when the files differ, which they always do here.
            let out = self
                .git
                .output(cwd, &["diff", "--no-index", "--", "/dev/null", file])
                .await?;
            if !out.stdout.is_empty() {
                if !diff.is_empty() {
                    diff.push('\n');
                }
                diff.push_str(&out.stdout);
            }
        }
        Ok(diff)
    }

    /// Paths with uncommitted changes (tracked or untracked).
    pub async fn get_changed_files(&self, id: &str) -> Result<Vec<String>, WorkspaceError> {
        let lock = self.session_lock(id);
        let _guard = lock.lock().await;

        let session = self.live_session(id).await?;
        let status = self
            .git
            .run(&session.workspace_path, &["status", "--porcelain", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain(&status))
    }

    /// Snapshot of a session.
    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Snapshot of every known session.
    pub async fn list_sessions(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// The live session started from `channel_id`, if any.
    pub async fn active_session_for_channel(&self, channel_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.state.is_live() && s.channel_id() == channel_id)
            .max_by_key(|s| s.created_at)
            .cloned()
    }

    /// Record a message related to the session.
    pub async fn add_related_message(&self, id: &str, message: ChatMessage) -> Result<(), WorkspaceError> {
        self.update(id, |s| s.related_messages.push(message)).await?;
        Ok(())
    }

    /// Queue a message for the next checkpoint and flag the checkpoint.
    ///
    /// Returns the number of pending messages.
    pub async fn add_pending_message(&self, id: &str, message: ChatMessage) -> Result<usize, WorkspaceError> {
        let session = self
            .update(id, |s| {
                s.related_messages.push(message.clone());
                s.pending_messages.push(message);
                s.should_checkpoint = true;
            })
            .await?;
        debug!("Session {} has {} pending messages", id, session.pending_messages.len());
        Ok(session.pending_messages.len())
    }

    /// Whether a checkpoint is owed.
    pub async fn should_checkpoint(&self, id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| s.should_checkpoint)
            .unwrap_or(false)
    }

    /// Claim the owed checkpoint.
    ///
    /// Increments the counter, drains pending messages and clears the flag in
    /// one step, so requests that piled up during a run produce one checkpoint.
    pub async fn take_checkpoint(&self, id: &str) -> Result<Checkpoint, WorkspaceError> {
        let mut taken = None;
        self.update(id, |s| {
            s.checkpoint_count += 1;
            s.should_checkpoint = false;
            taken = Some(Checkpoint {
                number: s.checkpoint_count,
                messages: std::mem::take(&mut s.pending_messages),
            });
        })
        .await?;
        taken.ok_or_else(|| WorkspaceError::SessionNotFound(id.to_string()))
    }

    /// Record whether a generation run is in flight.
    pub async fn set_generating(&self, id: &str, generating: bool) -> Result<(), WorkspaceError> {
        self.update(id, |s| s.generating = generating).await?;
        Ok(())
    }
}

/// Parse `git status --porcelain` output into paths.
fn parse_porcelain(status: &str) -> Vec<String> {
    status
        .lines()
        .filter(|l| l.len() > 3)
        .map(|l| {
            let path = &l[3..];
            match path.split_once(" -> ") {
                Some((_, to)) => to.trim_matches('"').to_string(),
                None => path.trim_matches('"').to_string(),
            }
        })
        .collect()
}

/// A directory is a valid worktree when its `.git` is a directory, or a file
/// whose `gitdir:` target still exists.
async fn has_valid_git_marker(dir: &Path) -> bool {
    let marker = dir.join(".git");
    let meta = match tokio::fs::metadata(&marker).await {
        Ok(m) => m,
        Err(_) => return false,
    };
    if meta.is_dir() {
        return true;
    }
    match tokio::fs::read_to_string(&marker).await {
        Ok(content) => content
            .lines()
            .find_map(|l| l.strip_prefix("gitdir:"))
            .map(|target| {
                let target = PathBuf::from(target.trim());
                if target.is_absolute() {
                    target.exists()
                } else {
                    dir.join(target).exists()
                }
            })
            .unwrap_or(false),
        Err(_) => false,
    }
}
