// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Application wiring.
//!
//! [`Arbiter`] connects a chat transport to the orchestration core:
//!
//! ```text
//! inbound ─┬─ generating session in channel ──► add_pending_message (checkpoint)
//!          └─ aggregator ──(window)──► queue ──► decision engine
//!                                                  ├─ Reply      ─► transport
//!                                                  ├─ Lifecycle  ─► coordinator
//!                                                  └─ CodeTask   ─► workspace + driver task
//! ```
//!
//! Coordinator notifications, session events and driver progress each have a
//! single dispatcher task that relays them to the transport.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::checkpoint::{DriverProgress, SessionDriver};
use crate::config::ResolvedConfig;
use crate::coordinator::{
    ActionType, ActiveSession, Coordinator, CoordinatorEvent, LifecycleHooks,
};
use crate::decision::{Decision, DecisionContext, DecisionEngine};
use crate::error::{QueueError, Result};
use crate::generator::Generator;
use crate::queue::{
    AggregatedMessage, MessageAggregator, MessageProcessor, MessageQueue, Priority, QueuedMessage,
};
use crate::transport::{send_chunked, ChatMessage, ChatTransport};
use crate::workspace::{Session, SessionEvent, WorkspaceManager};

/// Poll interval for the aggregation ticker when nothing is buffered.
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Reply sent when the queue has no room.
const BUSY_REPLY: &str = "I'm at capacity right now. Please try again in a minute.";

/// Lifecycle hooks used by the running bot.
///
/// Cleanup prunes orphaned worktrees; exiting is delegated so tests can
/// observe it instead of ending the process.
struct WorkspaceHooks {
    manager: Arc<WorkspaceManager>,
    exit: Arc<dyn LifecycleHooks>,
}

#[async_trait]
impl LifecycleHooks for WorkspaceHooks {
    async fn cleanup(&self) -> Result<()> {
        let removed = self.manager.initialize().await?;
        info!("Cleanup removed {} orphaned workspace(s)", removed);
        Ok(())
    }

    async fn exit(&self, code: i32) {
        self.exit.exit(code).await;
    }
}

struct Receivers {
    sessions: mpsc::UnboundedReceiver<SessionEvent>,
    coordinator: mpsc::UnboundedReceiver<CoordinatorEvent>,
    progress: mpsc::UnboundedReceiver<DriverProgress>,
}

/// The assembled bot.
pub struct Arbiter {
    transport: Arc<dyn ChatTransport>,
    decision: Arc<dyn DecisionEngine>,
    manager: Arc<WorkspaceManager>,
    coordinator: Arc<Coordinator>,
    queue: Arc<MessageQueue>,
    driver: Arc<SessionDriver>,
    aggregation_window: Duration,
    history_limit: usize,
    receivers: Mutex<Option<Receivers>>,
    channels: Mutex<HashSet<String>>,
}

impl Arbiter {
    /// Build every component from resolved configuration.
    pub fn new(
        config: &ResolvedConfig,
        transport: Arc<dyn ChatTransport>,
        decision: Arc<dyn DecisionEngine>,
        generator: Arc<dyn Generator>,
        exit: Arc<dyn LifecycleHooks>,
    ) -> Arc<Self> {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (coordinator_tx, coordinator_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(WorkspaceManager::new(config.manager_config()).with_events(session_tx));
        let hooks = Arc::new(WorkspaceHooks {
            manager: Arc::clone(&manager),
            exit,
        });
        let coordinator = Arc::new(
            Coordinator::new(config.coordinator_config(), hooks).with_events(coordinator_tx),
        );
        let queue = Arc::new(MessageQueue::new(
            config.queue_capacity,
            Duration::from_millis(config.inter_item_delay_ms),
        ));
        let driver = Arc::new(
            SessionDriver::new(
                Arc::clone(&manager),
                Arc::clone(&coordinator),
                generator,
                config.checkpoint_config(),
            )
            .with_progress(progress_tx),
        );

        Arc::new(Self {
            transport,
            decision,
            manager,
            coordinator,
            queue,
            driver,
            aggregation_window: Duration::from_millis(config.aggregation_window_ms),
            history_limit: config.history_limit,
            receivers: Mutex::new(Some(Receivers {
                sessions: session_rx,
                coordinator: coordinator_rx,
                progress: progress_rx,
            })),
            channels: Mutex::new(HashSet::new()),
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn manager(&self) -> &Arc<WorkspaceManager> {
        &self.manager
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Run until `shutdown` becomes true.
    ///
    /// Prunes stale workspaces, starts the dispatchers and the queue consumer,
    /// then feeds inbound messages through the aggregator. When the transport's
    /// inbound stream ends a shutdown is queued.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let removed = self.manager.initialize().await?;
        if removed > 0 {
            info!("Removed {} orphaned workspace(s) at startup", removed);
        }

        let receivers = self
            .receivers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| anyhow!("Arbiter is already running"))?;
        let mut inbound = self
            .transport
            .take_inbound()
            .ok_or_else(|| anyhow!("Transport inbound stream was already taken"))?;

        self.spawn_dispatchers(receivers);

        let processor: Arc<dyn MessageProcessor> = Arc::clone(&self) as Arc<dyn MessageProcessor>;
        let consumer = tokio::spawn(Arc::clone(&self.queue).run(processor, shutdown.clone()));

        info!("Arbiter running");
        let mut aggregator = MessageAggregator::new(self.aggregation_window);
        let mut inbound_open = true;

        loop {
            let tick = aggregator
                .next_deadline(Instant::now())
                .unwrap_or(IDLE_TICK);

            tokio::select! {
                received = inbound.recv(), if inbound_open => match received {
                    Some(message) => self.handle_inbound(message, &mut aggregator).await,
                    None => {
                        info!("Inbound stream closed, shutting down");
                        inbound_open = false;
                        self.enqueue_batches(aggregator.flush_all()).await;
                        self.coordinator
                            .queue_action(ActionType::Shutdown, "input closed", None, None);
                    }
                },
                _ = tokio::time::sleep(tick) => {
                    let expired = aggregator.drain_expired(Instant::now());
                    self.enqueue_batches(expired).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = consumer.await {
            warn!("Queue consumer ended abnormally: {}", e);
        }
        info!("Arbiter stopped");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    fn remember_channel(&self, channel_id: &str) {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(channel_id.to_string());
    }

    fn known_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect();
        channels.sort();
        channels
    }

    async fn handle_inbound(&self, message: ChatMessage, aggregator: &mut MessageAggregator) {
        let bot = self.transport.bot_identity();
        if message.author == bot.id || message.author == bot.name {
            return;
        }
        self.remember_channel(&message.channel_id);

        if !self.decision.is_control(&message) {
            if let Some(session) = self.manager.active_session_for_channel(&message.channel_id).await {
                if session.generating {
                    let channel = message.channel_id.clone();
                    match self.manager.add_pending_message(&session.id, message).await {
                        Ok(pending) => {
                            self.say(
                                &channel,
                                &format!(
                                    "Noted. I'll fold that into `{}` at the next checkpoint ({} pending).",
                                    session.branch, pending
                                ),
                            )
                            .await;
                        }
                        Err(e) => warn!("Could not attach message to session {}: {}", session.id, e),
                    }
                    return;
                }
            }
        }

        let buffered = aggregator.push(message, Instant::now());
        debug!("Buffered message ({} in window)", buffered);
    }

    async fn enqueue_batches(&self, batches: Vec<AggregatedMessage>) {
        for batch in batches {
            let Some(message) = batch.combined() else {
                continue;
            };
            let priority = if message.mentions_bot {
                Priority::High
            } else {
                Priority::Normal
            };
            let channel = message.channel_id.clone();
            match self.queue.enqueue(message, priority) {
                Ok(id) => debug!(
                    "Queued {} message(s) from {} as {}",
                    batch.messages.len(),
                    channel,
                    id
                ),
                Err(QueueError::Full { capacity, .. }) => {
                    warn!("Queue full ({}), rejecting message from {}", capacity, channel);
                    self.say(&channel, BUSY_REPLY).await;
                }
                Err(e) => warn!("Failed to queue message from {}: {}", channel, e),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------------

    async fn say(&self, channel_id: &str, text: &str) {
        if let Err(e) = send_chunked(self.transport.as_ref(), channel_id, text).await {
            warn!("Failed to send to {}: {}", channel_id, e);
        }
    }

    async fn start_task(
        &self,
        item: &QueuedMessage,
        description: String,
        history: Vec<ChatMessage>,
    ) -> Result<()> {
        let channel = item.message.channel_id.clone();

        if !self.coordinator.can_start_session() {
            self.say(
                &channel,
                &format!(
                    "Not accepting new work while {}. Please try again later.",
                    self.coordinator.state()
                ),
            )
            .await;
            return Ok(());
        }

        let session = match self.manager.create_session(item.message.clone(), &description).await {
            Ok(session) => session,
            Err(e) => {
                error!("Session setup failed: {}", e);
                self.say(&channel, &format!("Could not set up a workspace: {e}")).await;
                return Ok(());
            }
        };

        if let Err(e) = self.coordinator.register_session(ActiveSession::from(&session)) {
            warn!("Coordinator rejected session {}: {}", session.id, e);
            if let Err(abandon_err) = self.manager.abandon_session(&session.id).await {
                warn!("Failed to abandon session {}: {}", session.id, abandon_err);
            }
            self.say(&channel, &e.to_string()).await;
            return Ok(());
        }

        if let Err(e) = self.queue.associate_session(&item.id, &session.id) {
            debug!("Could not associate message with session {}: {}", session.id, e);
        }

        self.say(
            &channel,
            &format!("On it. Working on branch `{}`.", session.branch),
        )
        .await;

        let driver = Arc::clone(&self.driver);
        let queue = Arc::clone(&self.queue);
        let transport = Arc::clone(&self.transport);
        let default_branch = self.manager.config().default_branch.clone();
        tokio::spawn(async move {
            let text = match driver.run(&session.id, &history).await {
                Ok(outcome) => outcome.describe(&default_branch),
                Err(e) => {
                    error!("Session {} failed: {}", session.id, e);
                    format!("Session failed: {e}")
                }
            };
            queue.clear_session(&session.id);
            if let Err(e) = send_chunked(transport.as_ref(), &channel, &text).await {
                warn!("Failed to report outcome of session {}: {}", session.id, e);
            }
        });

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Dispatchers
    // ------------------------------------------------------------------------

    fn spawn_dispatchers(self: &Arc<Self>, receivers: Receivers) {
        let Receivers {
            mut sessions,
            mut coordinator,
            mut progress,
        } = receivers;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = coordinator.recv().await {
                if let CoordinatorEvent::Notification { channel_id, text } = event {
                    let targets = match channel_id {
                        Some(channel) => vec![channel],
                        None => this.known_channels(),
                    };
                    if targets.is_empty() {
                        info!("{}", text);
                    }
                    for channel in targets {
                        this.say(&channel, &text).await;
                    }
                }
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(update) = progress.recv().await {
                this.say(&update.channel_id, &update.text).await;
            }
        });

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let Some(status) = transport.status_updates() else {
                // Drain so the manager's sends stay cheap.
                while sessions.recv().await.is_some() {}
                return;
            };

            let mut handles: HashMap<String, (String, String)> = HashMap::new();
            while let Some(event) = sessions.recv().await {
                let session = event.session();
                let text = status_line(session);
                let channel = session.channel_id().to_string();

                match handles.get(&session.id).cloned() {
                    Some((_, last)) if last == text => {}
                    Some((handle, _)) => {
                        if let Err(e) = status.edit_status(&channel, &handle, &text).await {
                            debug!("Status edit failed for {}: {}", session.id, e);
                        }
                        handles.insert(session.id.clone(), (handle, text));
                    }
                    None => match status.post_status(&channel, &text).await {
                        Ok(handle) => {
                            handles.insert(session.id.clone(), (handle, text));
                        }
                        Err(e) => debug!("Status post failed for {}: {}", session.id, e),
                    },
                }

                if matches!(event, SessionEvent::Completed(_)) {
                    handles.remove(&session.id);
                }
            }
        });
    }
}

/// One-line session status for editable status messages.
fn status_line(session: &Session) -> String {
    let mut line = format!(
        "`{}` {}: {}",
        session.branch,
        session.state,
        session.short_description()
    );
    if session.generating {
        line.push_str(" (generating)");
    }
    if session.checkpoint_count > 0 {
        line.push_str(&format!(" [checkpoint {}]", session.checkpoint_count));
    }
    line
}

#[async_trait]
impl MessageProcessor for Arbiter {
    async fn process(&self, item: &QueuedMessage) -> Result<()> {
        let message = &item.message;
        let history = match self
            .transport
            .get_history(&message.channel_id, self.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("Could not load history for {}: {}", message.channel_id, e);
                Vec::new()
            }
        };

        let context = DecisionContext {
            history,
            bot: self.transport.bot_identity(),
            status: self.coordinator.status_summary(),
        };

        match self.decision.decide(message, &context).await? {
            Decision::Ignore => debug!("Ignoring message {}", message.id),
            Decision::Reply(text) => self.say(&message.channel_id, &text).await,
            Decision::Lifecycle { action, reason } => {
                self.coordinator.queue_action(
                    action,
                    &reason,
                    Some(message.author.as_str()),
                    Some(message.channel_id.as_str()),
                );
            }
            Decision::CodeTask { description } => {
                self.start_task(item, description, context.history).await?;
            }
        }
        Ok(())
    }
}
