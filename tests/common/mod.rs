// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scratch git repositories for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use arbiter::transport::ChatMessage;
use arbiter::workspace::ManagerConfig;

/// Whether git is on PATH. Tests that need it return early otherwise.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking on failure. Returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A repository on `main` with one commit containing README.md.
pub struct TestRepo {
    pub temp: TempDir,
    pub repo: PathBuf,
    pub workspaces: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let workspaces = temp.path().join("workspaces");
        std::fs::create_dir_all(&repo).unwrap();

        git(&repo, &["init", "-q"]);
        git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(repo.join("README.md"), "line one\nline two\n").unwrap();
        git(&repo, &["add", "-A"]);
        git(&repo, &["commit", "-q", "-m", "initial"]);

        Self {
            temp,
            repo,
            workspaces,
        }
    }

    pub fn config(&self) -> ManagerConfig {
        ManagerConfig::for_repo(&self.repo, &self.workspaces)
    }

    pub fn head(&self) -> String {
        git(&self.repo, &["rev-parse", "HEAD"])
    }

    pub fn current_branch(&self) -> String {
        git(&self.repo, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Tracked changes in the main checkout (untracked files ignored).
    pub fn tracked_changes(&self) -> String {
        git(&self.repo, &["status", "--porcelain", "--untracked-files=no"])
    }

    pub fn merge_in_progress(&self) -> bool {
        self.repo.join(".git").join("MERGE_HEAD").exists()
    }

    /// Commit a file directly on main in the main checkout.
    pub fn commit_on_main(&self, file: &str, content: &str, message: &str) {
        std::fs::write(self.repo.join(file), content).unwrap();
        git(&self.repo, &["add", "-A"]);
        git(&self.repo, &["commit", "-q", "-m", message]);
    }
}

pub fn trigger(content: &str) -> ChatMessage {
    ChatMessage::new("general", "alice", content)
}
