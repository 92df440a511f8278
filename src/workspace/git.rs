// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sanitized git execution.
//!
//! Every git invocation goes through [`GitRunner`]: argument vectors only (no
//! shell), and an environment rebuilt from a fixed allowlist so that neither the
//! host environment nor AI-authored text can change how git behaves.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::WorkspaceError;

/// Output of a git invocation that was allowed to fail.
#[derive(Debug, Clone)]
pub struct GitOutput {
    /// Whether git exited with status 0.
    pub success: bool,
    /// Exit code (-1 if terminated by a signal).
    pub code: i32,
    /// Stdout with trailing whitespace removed.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

impl GitOutput {
    /// Stdout and stderr joined, for diagnostics and classification.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Identity used for commits and merges made by the agent.
#[derive(Debug, Clone)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "Arbiter".to_string(),
            email: "arbiter@localhost".to_string(),
        }
    }
}

/// Runs git with a minimal, fixed environment.
#[derive(Debug, Clone)]
pub struct GitRunner {
    identity: GitIdentity,
    path: Option<String>,
    home: Option<PathBuf>,
}

impl GitRunner {
    /// Create a runner that commits as `identity`.
    pub fn new(identity: GitIdentity) -> Self {
        Self {
            identity,
            path: std::env::var("PATH").ok(),
            home: dirs::home_dir(),
        }
    }

    fn command(&self, cwd: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(cwd)
            .env_clear()
            .env("LANG", "C")
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_AUTHOR_NAME", &self.identity.name)
            .env("GIT_AUTHOR_EMAIL", &self.identity.email)
            .env("GIT_COMMITTER_NAME", &self.identity.name)
            .env("GIT_COMMITTER_EMAIL", &self.identity.email)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref path) = self.path {
            cmd.env("PATH", path);
        }
        if let Some(ref home) = self.home {
            cmd.env("HOME", home);
        }
        cmd
    }

    /// Run git and return its output regardless of exit status.
    #[cfg_attr(feature = "telemetry", instrument(level = "debug", skip(self, cwd), fields(cwd = %cwd.display())))]
    pub async fn output(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, WorkspaceError> {
        debug!("git {}", args.join(" "));
        let output = self.command(cwd, args).output().await?;
        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run git and return stdout, failing on a non-zero exit.
    pub async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String, WorkspaceError> {
        let output = self.output(cwd, args).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(WorkspaceError::Git {
                command: args.first().copied().unwrap_or_default().to_string(),
                message: output.combined(),
            })
        }
    }

    /// Run git and report only whether it succeeded.
    pub async fn succeeds(&self, cwd: &Path, args: &[&str]) -> bool {
        matches!(self.output(cwd, args).await, Ok(out) if out.success)
    }
}

impl Default for GitRunner {
    fn default() -> Self {
        Self::new(GitIdentity::default())
    }
}

/// Make free-form text safe to pass as a single git message argument.
///
/// Strips NUL and control characters (keeping newlines and tabs), and prefixes
/// a message that would otherwise start with `-` so it can never parse as an
/// option.
pub fn sanitize_message(message: &str) -> String {
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return "(no message)".to_string();
    }
    if trimmed.starts_with('-') {
        format!(" {trimmed}")
    } else {
        trimmed.to_string()
    }
}
