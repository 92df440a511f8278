// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub repo_path: Option<PathBuf>,
    pub workspace_base: Option<PathBuf>,
    pub default_branch: Option<String>,
    pub remote: Option<String>,
    pub generator_command: Option<String>,
    pub command_prefix: Option<String>,
    pub merge_repair_attempts: Option<u32>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.arbiter.local.json)
/// 3. Workspace config (.arbiter.json)
/// 4. Global config (~/.arbiter/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, &config);
    }

    // Apply CLI options (highest precedence)
    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(ref path) = config.repo_path {
        result.repo_path = path.clone();
    }
    if let Some(ref path) = config.workspace_base {
        result.workspace_base = path.clone();
    }
    if let Some(ref branch) = config.default_branch {
        result.default_branch = branch.clone();
    }
    if let Some(ref remote) = config.remote {
        result.remote = remote.clone();
    }
    if let Some(ref prefix) = config.branch_prefix {
        result.branch_prefix = prefix.clone();
    }
    if let Some(ref dirs) = config.shared_cache_dirs {
        // Merge shared directory lists
        for dir in dirs {
            if !result.shared_cache_dirs.contains(dir) {
                result.shared_cache_dirs.push(dir.clone());
            }
        }
    }
    if let Some(ref name) = config.git_author_name {
        result.git_author_name = name.clone();
    }
    if let Some(ref email) = config.git_author_email {
        result.git_author_email = email.clone();
    }
    if let Some(ref prefix) = config.command_prefix {
        result.command_prefix = prefix.clone();
    }
    if let Some(limit) = config.history_limit {
        result.history_limit = limit;
    }

    if let Some(ref generator) = config.generator {
        if let Some(ref command) = generator.command {
            result.generator_command = command.clone();
        }
        if let Some(ref args) = generator.args {
            result.generator_args = args.clone();
        }
        if let Some(ms) = generator.grace_period_ms {
            result.grace_period_ms = ms;
        }
    }

    if let Some(ref queue) = config.queue {
        if let Some(capacity) = queue.capacity {
            result.queue_capacity = capacity;
        }
        if let Some(ms) = queue.inter_item_delay_ms {
            result.inter_item_delay_ms = ms;
        }
        if let Some(ms) = queue.aggregation_window_ms {
            result.aggregation_window_ms = ms;
        }
    }

    if let Some(ref coordinator) = config.coordinator {
        if let Some(ms) = coordinator.notify_delay_ms {
            result.notify_delay_ms = ms;
        }
        if let Some(code) = coordinator.restart_exit_code {
            result.restart_exit_code = code;
        }
    }

    if let Some(ref checkpoint) = config.checkpoint {
        if let Some(limit) = checkpoint.diff_char_limit {
            result.diff_char_limit = limit;
        }
        if let Some(max) = checkpoint.max_continuations {
            result.max_continuations = max;
        }
        if let Some(attempts) = checkpoint.merge_repair_attempts {
            result.merge_repair_attempts = attempts;
        }
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref path) = cli.repo_path {
        result.repo_path = path.clone();
    }
    if let Some(ref path) = cli.workspace_base {
        result.workspace_base = path.clone();
    }
    if let Some(ref branch) = cli.default_branch {
        result.default_branch = branch.clone();
    }
    if let Some(ref remote) = cli.remote {
        result.remote = remote.clone();
    }
    if let Some(ref command) = cli.generator_command {
        result.generator_command = command.clone();
    }
    if let Some(ref prefix) = cli.command_prefix {
        result.command_prefix = prefix.clone();
    }
    if let Some(attempts) = cli.merge_repair_attempts {
        result.merge_repair_attempts = attempts;
    }
}
