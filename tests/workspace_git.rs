// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workspace manager against real git repositories.
//!
//! Every test returns early when git is not installed.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use arbiter::workspace::{
    MergeFailureKind, MergeResult, SessionState, WorkspaceError, WorkspaceManager,
};
use common::{git, git_available, trigger, TestRepo};

// ============================================================================
// Session creation
// ============================================================================

#[tokio::test]
async fn test_concurrent_sessions_get_unique_workspaces() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = Arc::new(WorkspaceManager::new(repo.config()));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager
                .create_session(trigger("fix the bug in auth"), "fix the bug in auth")
                .await
        }));
    }

    let mut branches = HashSet::new();
    let mut paths = HashSet::new();
    for handle in handles {
        let session = handle.await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert!(session.branch.starts_with("arbiter/fix-the-bug-in-auth-"));
        assert!(session.workspace_path.join(".git").exists());
        branches.insert(session.branch);
        paths.insert(session.workspace_path);
    }
    assert_eq!(branches.len(), 5);
    assert_eq!(paths.len(), 5);
}

#[tokio::test]
async fn test_commit_without_changes_returns_none() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("noop"), "noop").await.unwrap();

    let commit = manager.commit_changes(&session.id, "nothing").await.unwrap();
    assert!(commit.is_none());
    assert!(manager.get_session(&session.id).await.unwrap().commits.is_empty());

    std::fs::write(session.workspace_path.join("new.txt"), "hello\n").unwrap();
    let commit = manager.commit_changes(&session.id, "add file").await.unwrap();
    assert!(commit.is_some());

    let files = manager.get_changed_files(&session.id).await.unwrap();
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_diff_includes_untracked_files() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("diff"), "diff").await.unwrap();

    std::fs::write(session.workspace_path.join("brand_new.rs"), "fn main() {}\n").unwrap();
    std::fs::write(session.workspace_path.join("README.md"), "line one\nchanged\n").unwrap();

    let diff = manager.get_diff(&session.id).await.unwrap();
    assert!(diff.contains("brand_new.rs"));
    assert!(diff.contains("+changed"));

    let mut files = manager.get_changed_files(&session.id).await.unwrap();
    files.sort();
    assert_eq!(files, vec!["README.md".to_string(), "brand_new.rs".to_string()]);
}

// ============================================================================
// Merging
// ============================================================================

#[tokio::test]
async fn test_merge_without_remote_succeeds_unpushed() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    assert!(!manager.has_remote().await);

    let session = manager.create_session(trigger("add notes"), "add notes").await.unwrap();
    std::fs::write(session.workspace_path.join("NOTES.md"), "notes\n").unwrap();
    manager.commit_changes(&session.id, "add notes").await.unwrap();

    let result = manager.merge_to_main(&session.id).await.unwrap();
    match result {
        MergeResult::Merged { ref commit, pushed } => {
            assert!(!pushed);
            assert_eq!(*commit, repo.head());
        }
        other => panic!("expected merge, got {:?}", other),
    }
    assert!(repo.repo.join("NOTES.md").exists());
    assert_eq!(repo.current_branch(), "main");

    let completed = manager.complete_session(&session.id).await.unwrap();
    assert_eq!(completed.state, SessionState::Completed);
    assert!(!session.workspace_path.exists());
    // The branch is kept after completion.
    assert!(!git(&repo.repo, &["branch", "--list", &session.branch]).is_empty());
}

#[tokio::test]
async fn test_merge_with_dirty_tree_is_local_changes() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("edit readme"), "edit readme").await.unwrap();

    std::fs::write(session.workspace_path.join("README.md"), "line one\nfrom session\n").unwrap();
    manager.commit_changes(&session.id, "edit readme").await.unwrap();

    let before = repo.head();
    std::fs::write(repo.repo.join("README.md"), "line one\nuncommitted\n").unwrap();

    let result = manager.merge_to_main(&session.id).await.unwrap();
    assert_eq!(result.failure_kind(), Some(MergeFailureKind::LocalChanges));

    assert_eq!(repo.current_branch(), "main");
    assert_eq!(repo.head(), before);
    assert!(repo.tracked_changes().is_empty());
    assert!(!repo.merge_in_progress());
}

#[tokio::test]
async fn test_merge_with_untracked_collision_is_untracked_files() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("add config"), "add config").await.unwrap();

    std::fs::write(session.workspace_path.join("config.toml"), "from = \"session\"\n").unwrap();
    manager.commit_changes(&session.id, "add config").await.unwrap();

    let before = repo.head();
    std::fs::write(repo.repo.join("config.toml"), "from = \"main\"\n").unwrap();

    let result = manager.merge_to_main(&session.id).await.unwrap();
    assert_eq!(result.failure_kind(), Some(MergeFailureKind::UntrackedFiles));

    assert_eq!(repo.current_branch(), "main");
    assert_eq!(repo.head(), before);
    assert!(repo.tracked_changes().is_empty());
    assert!(!repo.merge_in_progress());
}

#[tokio::test]
async fn test_merge_with_conflicting_hunks_is_conflict() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("reword"), "reword").await.unwrap();

    std::fs::write(session.workspace_path.join("README.md"), "line one\nsession wording\n").unwrap();
    manager.commit_changes(&session.id, "reword").await.unwrap();

    repo.commit_on_main("README.md", "line one\nmain wording\n", "main reword");
    let before = repo.head();

    let result = manager.merge_to_main(&session.id).await.unwrap();
    match result {
        MergeResult::Failed { kind, ref details } => {
            assert_eq!(kind, MergeFailureKind::MergeConflict);
            assert!(details.contains("README.md"));
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    assert_eq!(repo.current_branch(), "main");
    assert_eq!(repo.head(), before);
    assert!(repo.tracked_changes().is_empty());
    assert!(!repo.merge_in_progress());
}

#[tokio::test]
async fn test_rebase_onto_main_after_unrelated_change() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("add a"), "add a").await.unwrap();

    std::fs::write(session.workspace_path.join("a.txt"), "a\n").unwrap();
    manager.commit_changes(&session.id, "add a").await.unwrap();
    repo.commit_on_main("b.txt", "b\n", "add b");

    assert!(manager.rebase_onto_main(&session.id).await.unwrap());
    assert!(session.workspace_path.join("b.txt").exists());
    assert_eq!(
        manager.get_session(&session.id).await.unwrap().state,
        SessionState::Active
    );
}

#[tokio::test]
async fn test_commit_refused_during_unfinished_merge() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("reword"), "reword").await.unwrap();

    std::fs::write(session.workspace_path.join("README.md"), "line one\nsession wording\n").unwrap();
    manager.commit_changes(&session.id, "reword").await.unwrap();
    repo.commit_on_main("README.md", "line one\nmain wording\n", "main reword");

    let merge = std::process::Command::new("git")
        .args(["merge", "main"])
        .current_dir(&session.workspace_path)
        .output()
        .unwrap();
    assert!(!merge.status.success());

    let err = manager.commit_changes(&session.id, "resolve").await.unwrap_err();
    assert!(matches!(err, WorkspaceError::UnmergedPaths(ref paths) if paths.contains("README.md")));
    assert_eq!(manager.get_session(&session.id).await.unwrap().commits.len(), 1);

    assert!(manager.abort_unfinished_merge(&session.id).await.unwrap());
    assert!(!manager.abort_unfinished_merge(&session.id).await.unwrap());
    let readme = std::fs::read_to_string(session.workspace_path.join("README.md")).unwrap();
    assert_eq!(readme, "line one\nsession wording\n");
    assert!(manager.commit_changes(&session.id, "nothing").await.unwrap().is_none());
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_abandon_removes_workspace_and_branch() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("drop me"), "drop me").await.unwrap();

    let abandoned = manager.abandon_session(&session.id).await.unwrap();
    assert_eq!(abandoned.state, SessionState::Abandoned);
    assert!(!session.workspace_path.exists());
    assert!(git(&repo.repo, &["branch", "--list", &session.branch]).is_empty());

    // Terminal sessions cannot be committed to.
    assert!(manager.commit_changes(&session.id, "late").await.is_err());
}

#[tokio::test]
async fn test_initialize_keeps_live_sessions() {
    if !git_available() {
        return;
    }
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.config());
    let session = manager.create_session(trigger("keep"), "keep").await.unwrap();
    std::fs::create_dir_all(repo.workspaces.join("stale")).unwrap();

    let removed = manager.initialize().await.unwrap();
    assert_eq!(removed, 1);
    assert!(session.workspace_path.exists());
    assert!(!repo.workspaces.join("stale").exists());
}
