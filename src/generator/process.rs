// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subprocess generator.
//!
//! Runs a configured command (for example `claude -p --output-format
//! stream-json --verbose`) with the prompt as its final argument, and decodes
//! its stdout line by line.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::events::{parse_line, GeneratorEvent};
use super::{Generator, GeneratorError, GeneratorExit, GeneratorRun};

/// Maximum stderr kept for failure summaries.
const STDERR_TAIL: usize = 4000;

/// Command line for the generator process.
#[derive(Debug, Clone)]
pub struct ProcessGeneratorConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for ProcessGeneratorConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
        }
    }
}

/// Generator backed by a subprocess.
#[derive(Debug, Clone, Default)]
pub struct ProcessGenerator {
    config: ProcessGeneratorConfig,
}

impl ProcessGenerator {
    pub fn new(config: ProcessGeneratorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Generator for ProcessGenerator {
    #[cfg_attr(feature = "telemetry", instrument(skip(self, prompt), fields(command = %self.config.command)))]
    async fn spawn(&self, workdir: &Path, prompt: &str) -> Result<Box<dyn GeneratorRun>, GeneratorError> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(prompt)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GeneratorError::Spawn(format!("{}: {}", self.config.command, e)))?;

        info!("Generator started (pid {:?}) in {:?}", child.id(), workdir);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GeneratorError::Spawn("stdout not captured".to_string()))?;
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        for event in parse_line(&line) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!("Generator output unreadable: {}", e);
                        return;
                    }
                }
            }
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|mut stderr| {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut raw = Vec::new();
                if stderr.read_to_end(&mut raw).await.is_ok() {
                    let text = String::from_utf8_lossy(&raw);
                    let start = text.len().saturating_sub(STDERR_TAIL);
                    let start = (start..text.len())
                        .find(|&i| text.is_char_boundary(i))
                        .unwrap_or(text.len());
                    let mut guard = buf.lock().unwrap_or_else(|p| p.into_inner());
                    guard.push_str(&text[start..]);
                }
            })
        });

        Ok(Box::new(ProcessRun {
            child,
            events: rx,
            stderr: stderr_buf,
            stderr_task,
            status: None,
            aborted: false,
            last_result: None,
            last_text: None,
        }))
    }
}

struct ProcessRun {
    child: Child,
    events: mpsc::Receiver<GeneratorEvent>,
    stderr: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
    status: Option<ExitStatus>,
    aborted: bool,
    last_result: Option<String>,
    last_text: Option<String>,
}

impl ProcessRun {
    fn observe(&mut self, event: &GeneratorEvent) {
        match event {
            GeneratorEvent::Result { summary, .. } => self.last_result = Some(summary.clone()),
            GeneratorEvent::Text { text } => self.last_text = Some(text.clone()),
            GeneratorEvent::Error { message } => self.last_text = Some(message.clone()),
            _ => {}
        }
    }

    fn summary(&self, success: bool) -> String {
        if let Some(ref result) = self.last_result {
            if !result.is_empty() {
                return result.clone();
            }
        }
        if !success {
            let stderr = self.stderr.lock().unwrap_or_else(|p| p.into_inner());
            if !stderr.trim().is_empty() {
                return stderr.trim().to_string();
            }
        }
        self.last_text.clone().unwrap_or_default()
    }

    #[cfg(unix)]
    fn terminate(&self) -> bool {
        match self.child.id() {
            Some(pid) => {
                // SAFETY: kill(2) with a pid we own; failure is reported via errno.
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                rc == 0
            }
            None => false,
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> bool {
        false
    }
}

#[async_trait]
impl GeneratorRun for ProcessRun {
    async fn next_event(&mut self) -> Option<GeneratorEvent> {
        let event = self.events.recv().await?;
        self.observe(&event);
        Some(event)
    }

    async fn abort(&mut self, grace: Duration) {
        if self.status.is_some() {
            return;
        }
        self.aborted = true;

        if self.terminate() {
            debug!("Sent SIGTERM to generator, waiting up to {:?}", grace);
            if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
                self.status = Some(status);
                return;
            }
            warn!("Generator ignored SIGTERM for {:?}, killing", grace);
        }

        match self.child.kill().await {
            Ok(()) => {}
            Err(e) => warn!("Failed to kill generator: {}", e),
        }
        if let Ok(status) = self.child.wait().await {
            self.status = Some(status);
        }
    }

    async fn wait(&mut self) -> Result<GeneratorExit, GeneratorError> {
        // Drain output first so the final result event is observed. An aborted
        // run may leave descendants holding stdout open, so stop accepting more.
        if self.aborted {
            self.events.close();
        }
        while let Some(event) = self.events.recv().await {
            self.observe(&event);
        }

        let status = match self.status {
            Some(status) => status,
            None => {
                let status = self.child.wait().await?;
                self.status = Some(status);
                status
            }
        };
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }

        Ok(GeneratorExit {
            code: status.code(),
            summary: self.summary(status.success()),
            aborted: self.aborted,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessGenerator {
        ProcessGenerator::new(ProcessGeneratorConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "generator".to_string()],
        })
    }

    #[tokio::test]
    async fn test_streams_events_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let generator = sh(r#"echo '{"type":"text","text":"working"}'; echo '{"type":"tool_result","name":"edit"}'; echo "{\"type\":\"result\",\"summary\":\"did $1\"}""#);

        let mut run = generator.spawn(dir.path(), "the task").await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = run.next_event().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(events[1].is_tool_boundary());

        let exit = run.wait().await.unwrap();
        assert!(exit.success());
        assert_eq!(exit.summary, "did the task");
    }

    #[tokio::test]
    async fn test_failure_uses_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let generator = sh("echo 'model unavailable' >&2; exit 3");
        let mut run = generator.spawn(dir.path(), "x").await.unwrap();
        let exit = run.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());
        assert_eq!(exit.summary, "model unavailable");
    }

    #[tokio::test]
    async fn test_abort_terminates_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let generator = sh("echo '{\"type\":\"tool_result\"}'; exec sleep 30");
        let mut run = generator.spawn(dir.path(), "x").await.unwrap();

        assert!(run.next_event().await.unwrap().is_tool_boundary());
        let started = std::time::Instant::now();
        run.abort(Duration::from_secs(5)).await;
        let exit = run.wait().await.unwrap();
        assert!(exit.aborted);
        assert!(!exit.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_abort_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let generator = sh("trap '' TERM; echo '{\"type\":\"tool_result\"}'; while true; do sleep 1; done");
        let mut run = generator.spawn(dir.path(), "x").await.unwrap();

        assert!(run.next_event().await.unwrap().is_tool_boundary());
        run.abort(Duration::from_millis(200)).await;
        let exit = run.wait().await.unwrap();
        assert!(exit.aborted);
        assert_eq!(exit.code, None);
    }

    #[tokio::test]
    async fn test_spawn_missing_command() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ProcessGenerator::new(ProcessGeneratorConfig {
            command: "definitely-not-a-real-generator".to_string(),
            args: Vec::new(),
        });
        assert!(matches!(
            generator.spawn(dir.path(), "x").await,
            Err(GeneratorError::Spawn(_))
        ));
    }
}
