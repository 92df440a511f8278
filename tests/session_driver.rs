// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session driver and coordinator against real git repositories, with a
//! scripted generator standing in for the code generation process.

mod common;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use arbiter::checkpoint::{CheckpointConfig, SessionDriver, SessionOutcome};
use arbiter::coordinator::{
    ActionType, ActiveSession, Coordinator, CoordinatorConfig, CoordinatorState, LifecycleHooks,
};
use arbiter::generator::{Generator, GeneratorError, GeneratorEvent, GeneratorExit, GeneratorRun};
use arbiter::workspace::{SessionState, WorkspaceManager};
use common::{git, git_available, trigger, TestRepo};

// ============================================================================
// Test doubles
// ============================================================================

/// What one generator run does.
#[derive(Clone, Default)]
struct Step {
    writes: Vec<(&'static str, &'static str)>,
    events: Vec<GeneratorEvent>,
    code: i32,
    /// Message posted to the session's channel while this run is in flight.
    follow_up: Option<&'static str>,
    /// Start `git merge main` in the workdir and leave it however it ends.
    merge_main: bool,
}

impl Step {
    fn writing(file: &'static str, content: &'static str) -> Self {
        Self {
            writes: vec![(file, content)],
            events: vec![
                GeneratorEvent::ToolUse {
                    name: "write".to_string(),
                    input: serde_json::json!({ "path": file }),
                },
                GeneratorEvent::ToolResult {
                    name: Some("write".to_string()),
                    is_error: false,
                    content: "ok".to_string(),
                },
                GeneratorEvent::Result {
                    summary: format!("wrote {file}"),
                    is_error: false,
                },
            ],
            code: 0,
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            events: vec![GeneratorEvent::Error {
                message: "model unavailable".to_string(),
            }],
            code: 1,
            ..Default::default()
        }
    }

    fn with_follow_up(mut self, message: &'static str) -> Self {
        self.follow_up = Some(message);
        self
    }

    /// A repair that starts merging main, cannot resolve it, and gives up.
    fn abandoned_merge() -> Self {
        Self {
            events: vec![GeneratorEvent::Error {
                message: "could not resolve conflicts".to_string(),
            }],
            code: 1,
            merge_main: true,
            ..Default::default()
        }
    }
}

/// Plays back one [`Step`] per spawn and records every prompt.
#[derive(Default)]
struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    prompts: Mutex<Vec<String>>,
    follow_up_target: Mutex<Option<(Arc<WorkspaceManager>, String)>>,
}

impl ScriptedGenerator {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Default::default()
        })
    }

    /// Session that receives each step's follow-up message.
    fn send_follow_ups_to(&self, manager: Arc<WorkspaceManager>, session_id: &str) {
        *self.follow_up_target.lock().unwrap() = Some((manager, session_id.to_string()));
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

struct ScriptedRun {
    events: VecDeque<GeneratorEvent>,
    code: i32,
    aborted: bool,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn spawn(&self, workdir: &Path, prompt: &str) -> Result<Box<dyn GeneratorRun>, GeneratorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let step = self.steps.lock().unwrap().pop_front().unwrap_or_default();
        for (file, content) in &step.writes {
            std::fs::write(workdir.join(file), content)?;
        }
        if step.merge_main {
            // Expected to stop on a conflict; the exit status is irrelevant.
            std::process::Command::new("git")
                .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
                .args(["merge", "main"])
                .current_dir(workdir)
                .output()?;
        }
        if let Some(message) = step.follow_up {
            let target = self.follow_up_target.lock().unwrap().clone();
            if let Some((manager, id)) = target {
                manager
                    .add_pending_message(&id, trigger(message))
                    .await
                    .map_err(|e| GeneratorError::Spawn(e.to_string()))?;
            }
        }
        Ok(Box::new(ScriptedRun {
            events: step.events.into(),
            code: step.code,
            aborted: false,
        }))
    }
}

#[async_trait]
impl GeneratorRun for ScriptedRun {
    async fn next_event(&mut self) -> Option<GeneratorEvent> {
        self.events.pop_front()
    }

    async fn abort(&mut self, _grace: Duration) {
        self.aborted = true;
        self.events.clear();
    }

    async fn wait(&mut self) -> Result<GeneratorExit, GeneratorError> {
        Ok(GeneratorExit {
            code: if self.aborted { None } else { Some(self.code) },
            summary: if self.code == 0 { "done".to_string() } else { "model unavailable".to_string() },
            aborted: self.aborted,
        })
    }
}

/// Records exit codes instead of exiting.
struct RecordingExit(mpsc::UnboundedSender<i32>);

#[async_trait]
impl LifecycleHooks for RecordingExit {
    async fn exit(&self, code: i32) {
        let _ = self.0.send(code);
    }
}

struct Harness {
    repo: TestRepo,
    manager: Arc<WorkspaceManager>,
    coordinator: Arc<Coordinator>,
    generator: Arc<ScriptedGenerator>,
    driver: SessionDriver,
    exits: mpsc::UnboundedReceiver<i32>,
}

fn harness(steps: Vec<Step>) -> Harness {
    harness_with(
        steps,
        CheckpointConfig {
            grace_period: Duration::from_millis(10),
            ..Default::default()
        },
    )
}

fn harness_with(steps: Vec<Step>, config: CheckpointConfig) -> Harness {
    let repo = TestRepo::new();
    let manager = Arc::new(WorkspaceManager::new(repo.config()));
    let (tx, exits) = mpsc::unbounded_channel();
    let coordinator = Arc::new(Coordinator::new(
        CoordinatorConfig {
            notify_delay: Duration::ZERO,
            ..Default::default()
        },
        Arc::new(RecordingExit(tx)),
    ));
    let generator = ScriptedGenerator::new(steps);
    let driver = SessionDriver::new(
        Arc::clone(&manager),
        Arc::clone(&coordinator),
        Arc::clone(&generator) as Arc<dyn Generator>,
        config,
    );
    Harness {
        repo,
        manager,
        coordinator,
        generator,
        driver,
        exits,
    }
}

impl Harness {
    async fn start(&self, task: &str) -> String {
        let session = self.manager.create_session(trigger(task), task).await.unwrap();
        self.coordinator
            .register_session(ActiveSession::from(&session))
            .unwrap();
        session.id
    }
}

// ============================================================================
// Driving sessions
// ============================================================================

#[tokio::test]
async fn test_session_merges_generated_work() {
    if !git_available() {
        return;
    }
    let h = harness(vec![Step::writing("feature.txt", "feature\n")]);
    let id = h.start("add a feature").await;

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    match outcome {
        SessionOutcome::Merged { pushed, checkpoints, .. } => {
            assert!(!pushed);
            assert_eq!(checkpoints, 0);
        }
        other => panic!("expected merge, got {:?}", other),
    }

    assert!(h.repo.repo.join("feature.txt").exists());
    assert_eq!(h.manager.get_session(&id).await.unwrap().state, SessionState::Completed);
    assert_eq!(h.coordinator.active_count(), 0);
    assert!(h.generator.prompts()[0].contains("add a feature"));
}

#[tokio::test]
async fn test_pending_messages_coalesce_into_one_checkpoint() {
    if !git_available() {
        return;
    }
    let h = harness(vec![
        Step::writing("first.txt", "first\n"),
        Step::writing("second.txt", "second\n"),
    ]);
    let id = h.start("build the widget").await;

    // Two follow-ups before the first tool boundary: one checkpoint, not two.
    h.manager
        .add_pending_message(&id, trigger("also make it blue"))
        .await
        .unwrap();
    let pending = h
        .manager
        .add_pending_message(&id, trigger("and add tests"))
        .await
        .unwrap();
    assert_eq!(pending, 2);

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    match outcome {
        SessionOutcome::Merged { checkpoints, .. } => assert_eq!(checkpoints, 1),
        other => panic!("expected merge, got {:?}", other),
    }

    let prompts = h.generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("ALREADY COMMITTED"));
    assert!(prompts[1].contains("also make it blue"));
    assert!(prompts[1].contains("and add tests"));
    assert!(prompts[1].contains("first.txt"));

    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.checkpoint_count, 1);
    assert_eq!(session.commits.len(), 2);
    assert!(session.pending_messages.is_empty());
    assert!(!session.should_checkpoint);
    assert!(!session.generating);

    let log = git(&h.repo.repo, &["log", "--format=%s", "main"]);
    assert!(log.contains("Checkpoint 1: build the widget"));
}

#[tokio::test]
async fn test_no_changes_abandons_session() {
    if !git_available() {
        return;
    }
    let h = harness(vec![Step::default()]);
    let id = h.start("look around").await;

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    assert_eq!(outcome, SessionOutcome::NoChanges);

    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Abandoned);
    assert!(git(&h.repo.repo, &["branch", "--list", &session.branch]).is_empty());
}

#[tokio::test]
async fn test_generator_failure_keeps_workspace() {
    if !git_available() {
        return;
    }
    let h = harness(vec![Step::failing()]);
    let id = h.start("doomed").await;

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::GenerationFailed { .. }));

    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Failed);
    assert!(session.error.is_some());
    assert!(session.workspace_path.exists());
    assert_eq!(h.coordinator.active_count(), 0);
}

#[tokio::test]
async fn test_ineffective_repair_keeps_branch() {
    if !git_available() {
        return;
    }
    let h = harness(vec![
        Step::writing("README.md", "line one\nsession wording\n"),
        Step::default(),
    ]);
    let id = h.start("reword readme").await;
    h.repo
        .commit_on_main("README.md", "line one\nmain wording\n", "main reword");

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    match outcome {
        SessionOutcome::MergeFailed { kind, ref branch, .. } => {
            // The scripted repair changes nothing, so the merge still fails and
            // the branch is kept for a human.
            assert_eq!(kind, arbiter::MergeFailureKind::MergeConflict);
            assert!(!git(&h.repo.repo, &["branch", "--list", branch]).is_empty());
        }
        other => panic!("expected merge failure, got {:?}", other),
    }

    assert_eq!(h.generator.prompts().len(), 2);
    assert!(h.generator.prompts()[1].contains("reword readme"));
    assert_eq!(h.repo.current_branch(), "main");
    assert!(h.repo.tracked_changes().is_empty());
}

#[tokio::test]
async fn test_failed_repair_never_merges_conflict_markers() {
    if !git_available() {
        return;
    }
    let h = harness(vec![
        Step::writing("README.md", "line one\nsession wording\n"),
        Step::abandoned_merge(),
    ]);
    let id = h.start("reword readme").await;
    h.repo
        .commit_on_main("README.md", "line one\nmain wording\n", "main reword");
    let main_head = h.repo.head();

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    match outcome {
        SessionOutcome::MergeFailed { kind, ref branch, ref details } => {
            assert_eq!(kind, arbiter::MergeFailureKind::MergeConflict);
            assert!(details.contains("unfinished merge"));
            assert!(!git(&h.repo.repo, &["branch", "--list", branch]).is_empty());
            // Only the generated commit is on the branch; no conflicted merge.
            let log = git(&h.repo.repo, &["log", "--format=%s", &format!("main..{branch}")]);
            assert_eq!(log.lines().count(), 1);
        }
        other => panic!("expected merge failure, got {:?}", other),
    }

    assert_eq!(h.repo.head(), main_head);
    let readme = std::fs::read_to_string(h.repo.repo.join("README.md")).unwrap();
    assert_eq!(readme, "line one\nmain wording\n");
    assert_eq!(h.repo.current_branch(), "main");
    assert!(h.repo.tracked_changes().is_empty());
}

#[tokio::test]
async fn test_generator_crash_is_not_taken_for_a_checkpoint() {
    if !git_available() {
        return;
    }
    let h = harness(vec![Step::failing(), Step::writing("late.txt", "late\n")]);
    let id = h.start("crashes early").await;
    h.manager
        .add_pending_message(&id, trigger("one more thing"))
        .await
        .unwrap();

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::GenerationFailed { .. }));
    assert_eq!(h.generator.prompts().len(), 1);

    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Failed);
    assert_eq!(session.checkpoint_count, 0);
    assert!(session.workspace_path.exists());
    assert!(!h.repo.repo.join("late.txt").exists());
}

#[tokio::test]
async fn test_follow_ups_during_runs_checkpoint_in_sequence() {
    if !git_available() {
        return;
    }
    let h = harness(vec![
        Step::writing("a.txt", "a\n").with_follow_up("make it blue"),
        Step::writing("b.txt", "b\n").with_follow_up("and add tests"),
        Step::writing("c.txt", "c\n"),
    ]);
    let id = h.start("build the widget").await;
    h.generator.send_follow_ups_to(Arc::clone(&h.manager), &id);

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    match outcome {
        SessionOutcome::Merged { checkpoints, .. } => assert_eq!(checkpoints, 2),
        other => panic!("expected merge, got {:?}", other),
    }

    let prompts = h.generator.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("checkpoint 1"));
    assert!(prompts[1].contains("make it blue"));
    assert!(!prompts[1].contains("and add tests"));
    assert!(prompts[2].contains("checkpoint 2"));
    assert!(prompts[2].contains("and add tests"));

    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.checkpoint_count, 2);
    assert_eq!(session.commits.len(), 3);

    let log = git(&h.repo.repo, &["log", "--format=%s", "main"]);
    let first = log.find("Checkpoint 1: build the widget").unwrap();
    let second = log.find("Checkpoint 2: build the widget").unwrap();
    // Newest first.
    assert!(second < first);
    for file in ["a.txt", "b.txt", "c.txt"] {
        assert!(h.repo.repo.join(file).exists());
    }
}

#[tokio::test]
async fn test_continuation_cap_finishes_with_work_so_far() {
    if !git_available() {
        return;
    }
    let h = harness_with(
        vec![
            Step::writing("a.txt", "a\n").with_follow_up("make it blue"),
            Step::writing("b.txt", "b\n").with_follow_up("and add tests"),
            Step::writing("never.txt", "never\n"),
        ],
        CheckpointConfig {
            grace_period: Duration::from_millis(10),
            max_continuations: 1,
            ..Default::default()
        },
    );
    let id = h.start("build the widget").await;
    h.generator.send_follow_ups_to(Arc::clone(&h.manager), &id);

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    match outcome {
        SessionOutcome::Merged { checkpoints, .. } => assert_eq!(checkpoints, 1),
        other => panic!("expected merge, got {:?}", other),
    }

    assert_eq!(h.generator.prompts().len(), 2);
    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.checkpoint_count, 1);
    assert_eq!(session.pending_messages.len(), 1);
    assert!(h.repo.repo.join("b.txt").exists());
    assert!(!h.repo.repo.join("never.txt").exists());
}

// ============================================================================
// Coordinator drain
// ============================================================================

#[tokio::test]
async fn test_restart_waits_for_running_session() {
    if !git_available() {
        return;
    }
    let mut h = harness(vec![Step::writing("late.txt", "late\n")]);
    let id = h.start("finish before restart").await;

    h.coordinator
        .queue_action(ActionType::Restart, "deploy", None, None);
    assert_eq!(h.coordinator.state(), CoordinatorState::Draining);
    assert!(!h.coordinator.can_start_session());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.exits.try_recv().is_err());

    let outcome = h.driver.run(&id, &[]).await.unwrap();
    assert!(outcome.is_success());

    let code = tokio::time::timeout(Duration::from_secs(5), h.exits.recv())
        .await
        .unwrap();
    assert_eq!(code, Some(75));
    assert_eq!(h.coordinator.state(), CoordinatorState::Stopped);
    // Teardown finished before the coordinator was told the session ended.
    let session = h.manager.get_session(&id).await.unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert!(!session.workspace_path.exists());
    assert!(h.repo.repo.join("late.txt").exists());
}
