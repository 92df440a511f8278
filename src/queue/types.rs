// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Queue item types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::ChatMessage;

/// Processing priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// Where a queued message is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// A chat message waiting for the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Queue-assigned id.
    pub id: String,
    pub message: ChatMessage,
    pub priority: Priority,
    /// Session this message was attached to, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: MessageStatus,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(id: impl Into<String>, message: ChatMessage, priority: Priority) -> Self {
        Self {
            id: id.into(),
            message,
            priority,
            session_id: None,
            status: MessageStatus::Queued,
            enqueued_at: Utc::now(),
        }
    }
}

/// Messages from one channel combined into a single unit of work.
#[derive(Debug, Clone)]
pub struct AggregatedMessage {
    pub channel_id: String,
    /// Buffered messages, oldest first. Never empty.
    pub messages: Vec<ChatMessage>,
}

impl AggregatedMessage {
    /// A single message representing the whole batch.
    ///
    /// Identity and author come from the newest message; content is every
    /// message's content joined by newlines.
    pub fn combined(&self) -> Option<ChatMessage> {
        let last = self.messages.last()?;
        let mut combined = last.clone();
        combined.content = self
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        combined.mentions_bot = self.messages.iter().any(|m| m.mentions_bot);
        Some(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_aggregate_combined() {
        let mut first = ChatMessage::new("c", "bob", "one");
        first.mentions_bot = true;
        let agg = AggregatedMessage {
            channel_id: "c".to_string(),
            messages: vec![first, ChatMessage::new("c", "bob", "two")],
        };
        let combined = agg.combined().unwrap();
        assert_eq!(combined.content, "one\ntwo");
        assert!(combined.mentions_bot);
        assert_eq!(combined.id, agg.messages[1].id);
    }
}
