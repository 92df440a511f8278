// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Priority-banded FIFO queue with a single consumer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::types::{MessageStatus, Priority, QueuedMessage};
use super::QueueError;
use crate::transport::ChatMessage;

/// Default number of queued items.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default pause between processed items.
pub const DEFAULT_INTER_ITEM_DELAY: Duration = Duration::from_millis(100);

/// Finished items kept for inspection.
const FINISHED_HISTORY: usize = 50;

/// Handles one queued message at a time.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, item: &QueuedMessage) -> crate::error::Result<()>;
}

#[derive(Default)]
struct Inner {
    items: Vec<QueuedMessage>,
    finished: VecDeque<QueuedMessage>,
    session_messages: HashMap<String, Vec<ChatMessage>>,
}

/// Inbound message queue.
///
/// Items are kept in processing order: a new item goes immediately before the
/// first item of strictly lower priority, so arrival order holds within a band.
pub struct MessageQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    inter_item_delay: Duration,
    notify: Notify,
}

impl MessageQueue {
    pub fn new(capacity: usize, inter_item_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            inter_item_delay,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a message, returning its queue id.
    ///
    /// At capacity the oldest queued `low` item is evicted; if there is none the
    /// call fails and nothing is dropped.
    pub fn enqueue(&self, message: ChatMessage, priority: Priority) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        {
            let mut inner = self.lock();
            if inner.items.len() >= self.capacity {
                let victim = inner
                    .items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| {
                        item.priority == Priority::Low && item.status == MessageStatus::Queued
                    })
                    .min_by_key(|(_, item)| item.enqueued_at)
                    .map(|(index, _)| index);

                match victim {
                    Some(index) => {
                        let evicted = inner.items.remove(index);
                        warn!("Queue full, evicted low-priority message {}", evicted.id);
                    }
                    None => {
                        return Err(QueueError::Full {
                            capacity: self.capacity,
                            priority,
                        })
                    }
                }
            }

            let position = inner
                .items
                .iter()
                .position(|item| item.priority < priority)
                .unwrap_or(inner.items.len());
            inner
                .items
                .insert(position, QueuedMessage::new(&id, message, priority));
            debug!("Enqueued {} at {} with priority {}", id, position, priority);
        }
        self.notify.notify_one();
        Ok(id)
    }

    /// Tag a queued message with a session and record it in that session's list.
    pub fn associate_session(&self, message_id: &str, session_id: &str) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let message = {
            let item = inner
                .items
                .iter_mut()
                .find(|item| item.id == message_id)
                .ok_or_else(|| QueueError::NotFound(message_id.to_string()))?;
            item.session_id = Some(session_id.to_string());
            item.message.clone()
        };
        inner
            .session_messages
            .entry(session_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    /// Messages attached to a session, in association order.
    pub fn session_messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.lock()
            .session_messages
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a finished session's message list.
    pub fn clear_session(&self, session_id: &str) {
        self.lock().session_messages.remove(session_id);
    }

    /// Items in processing order.
    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.lock().items.clone()
    }

    /// Recently finished items, oldest first, with their final status.
    pub fn finished(&self) -> Vec<QueuedMessage> {
        self.lock().finished.iter().cloned().collect()
    }

    /// Number of items (queued or processing).
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the first queued item.
    fn take_next(&self) -> Option<QueuedMessage> {
        let mut inner = self.lock();
        let item = inner
            .items
            .iter_mut()
            .find(|item| item.status == MessageStatus::Queued)?;
        item.status = MessageStatus::Processing;
        Some(item.clone())
    }

    fn finish(&self, id: &str, status: MessageStatus) {
        let mut inner = self.lock();
        if let Some(index) = inner.items.iter().position(|item| item.id == id) {
            let mut item = inner.items.remove(index);
            item.status = status;
            debug!("Message {} finished as {:?}", id, status);
            if inner.finished.len() >= FINISHED_HISTORY {
                inner.finished.pop_front();
            }
            inner.finished.push_back(item);
        }
    }

    /// Process one item if any is queued. Returns whether an item was handled.
    pub async fn process_next(&self, processor: &dyn MessageProcessor) -> bool {
        let Some(item) = self.take_next() else {
            return false;
        };
        let status = match processor.process(&item).await {
            Ok(()) => MessageStatus::Completed,
            Err(e) => {
                error!("Failed to process message {}: {}", item.id, e);
                MessageStatus::Failed
            }
        };
        self.finish(&item.id, status);
        true
    }

    /// Single-consumer processing loop.
    ///
    /// Waits for items when idle and sleeps the inter-item delay after each one.
    /// Returns when `shutdown` becomes true.
    pub async fn run(
        self: Arc<Self>,
        processor: Arc<dyn MessageProcessor>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            if self.process_next(processor.as_ref()).await {
                tokio::select! {
                    _ = tokio::time::sleep(self.inter_item_delay) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_INTER_ITEM_DELAY)
    }
}
