// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for Arbiter.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.arbiter/config.json
//! - Workspace config: .arbiter.json, .arbiter/config.json, arbiter.config.json
//!   (or .arbiter.yaml)
//! - Local config: .arbiter.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    default_workspace_base, CheckpointSettings, CoordinatorSettings, GeneratorSettings,
    QueueSettings, ResolvedConfig, WorkspaceConfig,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate all configuration sources for a workspace.
///
/// Relative `repoPath` values resolve against `workspace_root`; a relative
/// `workspaceBase` resolves against the repository.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let mut config = merge_config(global, workspace, local, cli_options);

    if config.repo_path.is_relative() {
        config.repo_path = workspace_root.join(&config.repo_path);
    }
    if config.workspace_base.is_relative() {
        config.workspace_base = config.repo_path.join(&config.workspace_base);
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_no_files() {
        let temp = TempDir::new().unwrap();
        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert!(config.repo_path.starts_with(temp.path()));
        assert!(config.workspace_base.is_absolute() || config.workspace_base.starts_with(temp.path()));
    }

    #[test]
    fn test_load_config_resolves_relative_paths() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".arbiter.json"),
            r#"{"repoPath": "repo", "workspaceBase": ".worktrees"}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert_eq!(config.repo_path, temp.path().join("repo"));
        assert_eq!(config.workspace_base, temp.path().join("repo").join(".worktrees"));
    }

    #[test]
    fn test_load_config_cli_override() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".arbiter.json"),
            r#"{"defaultBranch": "develop"}"#,
        )
        .unwrap();

        let cli = CliOptions {
            default_branch: Some("main".to_string()),
            ..Default::default()
        };

        let config = load_config(temp.path(), cli).unwrap();
        assert_eq!(config.default_branch, "main"); // CLI wins
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".arbiter.json"),
            r#"{"queue": {"capacity": 0}}"#,
        )
        .unwrap();
        assert!(matches!(
            load_config(temp.path(), CliOptions::default()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
