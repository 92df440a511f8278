// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointConfig;
use crate::coordinator::{CoordinatorConfig, DEFAULT_RESTART_EXIT_CODE};
use crate::error::ConfigError;
use crate::generator::ProcessGeneratorConfig;
use crate::workspace::{GitIdentity, ManagerConfig, DEFAULT_BRANCH_PREFIX};

/// Workspace configuration for Arbiter.
/// Can be defined in .arbiter.json or .arbiter/config.json in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Repository sessions branch from and merge into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,

    /// Directory holding per-session worktrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_base: Option<PathBuf>,

    /// Branch to merge into (default: main)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,

    /// Remote for fetch/pull/push (default: origin)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Prefix for session branches (default: arbiter/)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_prefix: Option<String>,

    /// Directories symlinked from the main repo into each workspace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_cache_dirs: Option<Vec<String>>,

    /// Commit author name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_author_name: Option<String>,

    /// Commit author email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_author_email: Option<String>,

    /// Chat command prefix (default: !)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_prefix: Option<String>,

    /// Messages of channel history given to decisions and sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,

    /// Generator process settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorSettings>,

    /// Queue and aggregation settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueSettings>,

    /// Lifecycle settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorSettings>,

    /// Checkpoint and merge repair settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointSettings>,
}

/// Generator process settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments placed before the prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Time allowed after SIGTERM before the process is killed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_ms: Option<u64>,
}

/// Queue and aggregation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inter_item_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_window_ms: Option<u64>,
}

/// Lifecycle settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorSettings {
    /// Pause after the final notification before exiting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_delay_ms: Option<u64>,
    /// Exit code for restart
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_exit_code: Option<i32>,
}

/// Checkpoint and merge repair settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_char_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_continuations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_repair_attempts: Option<u32>,
}

/// Resolved configuration with all values set.
/// This is the merged result of global, workspace, local, and CLI configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub repo_path: PathBuf,
    pub workspace_base: PathBuf,
    pub default_branch: String,
    pub remote: String,
    pub branch_prefix: String,
    pub shared_cache_dirs: Vec<String>,
    pub git_author_name: String,
    pub git_author_email: String,
    pub command_prefix: String,
    pub history_limit: usize,
    pub generator_command: String,
    pub generator_args: Vec<String>,
    pub grace_period_ms: u64,
    pub queue_capacity: usize,
    pub inter_item_delay_ms: u64,
    pub aggregation_window_ms: u64,
    pub notify_delay_ms: u64,
    pub restart_exit_code: i32,
    pub diff_char_limit: usize,
    pub max_continuations: u32,
    pub merge_repair_attempts: u32,
}

/// Default workspace base: `~/.arbiter/workspaces`.
pub fn default_workspace_base() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".arbiter").join("workspaces"))
        .unwrap_or_else(|| PathBuf::from(".arbiter").join("workspaces"))
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        let generator = ProcessGeneratorConfig::default();
        let checkpoint = CheckpointConfig::default();
        Self {
            repo_path: PathBuf::from("."),
            workspace_base: default_workspace_base(),
            default_branch: "main".to_string(),
            remote: "origin".to_string(),
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            shared_cache_dirs: Vec::new(),
            git_author_name: GitIdentity::default().name,
            git_author_email: GitIdentity::default().email,
            command_prefix: crate::decision::DEFAULT_COMMAND_PREFIX.to_string(),
            history_limit: 20,
            generator_command: generator.command,
            generator_args: generator.args,
            grace_period_ms: checkpoint.grace_period.as_millis() as u64,
            queue_capacity: crate::queue::DEFAULT_CAPACITY,
            inter_item_delay_ms: crate::queue::DEFAULT_INTER_ITEM_DELAY.as_millis() as u64,
            aggregation_window_ms: crate::queue::DEFAULT_AGGREGATION_WINDOW.as_millis() as u64,
            notify_delay_ms: 1500,
            restart_exit_code: DEFAULT_RESTART_EXIT_CODE,
            diff_char_limit: checkpoint.diff_char_limit,
            max_continuations: checkpoint.max_continuations,
            merge_repair_attempts: checkpoint.merge_repair_attempts,
        }
    }
}

impl ResolvedConfig {
    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_branch.trim().is_empty() {
            return Err(ConfigError::invalid("defaultBranch", "must not be empty"));
        }
        if self.default_branch.starts_with('-') || self.remote.starts_with('-') {
            return Err(ConfigError::invalid("defaultBranch/remote", "must not start with '-'"));
        }
        if self.branch_prefix.starts_with('-') || self.branch_prefix.contains(' ') {
            return Err(ConfigError::invalid(
                "branchPrefix",
                "must not start with '-' or contain spaces",
            ));
        }
        if self.generator_command.trim().is_empty() {
            return Err(ConfigError::invalid("generator.command", "must not be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue.capacity", "must be at least 1"));
        }
        if let Some(bad) = self
            .shared_cache_dirs
            .iter()
            .find(|d| d.contains("..") || PathBuf::from(d).is_absolute())
        {
            return Err(ConfigError::invalid(
                "sharedCacheDirs",
                format!("{bad} must be a relative path inside the repository"),
            ));
        }
        Ok(())
    }

    /// Workspace manager settings.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            repo_path: self.repo_path.clone(),
            workspace_base: self.workspace_base.clone(),
            default_branch: self.default_branch.clone(),
            remote: self.remote.clone(),
            branch_prefix: self.branch_prefix.clone(),
            shared_cache_dirs: self.shared_cache_dirs.clone(),
            identity: GitIdentity {
                name: self.git_author_name.clone(),
                email: self.git_author_email.clone(),
            },
        }
    }

    /// Coordinator settings.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            notify_delay: Duration::from_millis(self.notify_delay_ms),
            restart_exit_code: self.restart_exit_code,
        }
    }

    /// Session driver settings.
    pub fn checkpoint_config(&self) -> CheckpointConfig {
        CheckpointConfig {
            diff_char_limit: self.diff_char_limit,
            max_continuations: self.max_continuations,
            merge_repair_attempts: self.merge_repair_attempts,
            grace_period: Duration::from_millis(self.grace_period_ms),
        }
    }

    /// Generator process settings.
    pub fn generator_config(&self) -> ProcessGeneratorConfig {
        ProcessGeneratorConfig {
            command: self.generator_command.clone(),
            args: self.generator_args.clone(),
        }
    }
}
