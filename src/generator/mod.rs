// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Code-editing generator boundary.
//!
//! A [`Generator`] starts a run in a working directory with a prompt. The run
//! streams [`GeneratorEvent`]s, can be asked to stop, and reports how it ended.

pub mod events;
pub mod process;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

pub use events::{parse_line, GeneratorEvent};
pub use process::{ProcessGenerator, ProcessGeneratorConfig};

/// Error type for generator operations.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Failed to spawn generator: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorExit {
    /// Process exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Final summary text.
    pub summary: String,
    /// Whether the run was stopped through [`GeneratorRun::abort`].
    pub aborted: bool,
}

impl GeneratorExit {
    /// A clean, non-aborted exit.
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.aborted
    }
}

/// A single in-flight generator run.
#[async_trait]
pub trait GeneratorRun: Send {
    /// Next streamed event; `None` once the output is exhausted.
    async fn next_event(&mut self) -> Option<GeneratorEvent>;

    /// Ask the run to stop: graceful signal first, forced kill once `grace`
    /// has elapsed.
    async fn abort(&mut self, grace: Duration);

    /// Wait for the run to end.
    async fn wait(&mut self) -> Result<GeneratorExit, GeneratorError>;
}

/// Starts generator runs.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn spawn(&self, workdir: &Path, prompt: &str) -> Result<Box<dyn GeneratorRun>, GeneratorError>;
}
