// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Chat transport boundary.
//!
//! Arbiter talks to people through a [`ChatTransport`]: something that can send
//! text to a channel, read recent history, and deliver inbound messages.
//! Transports that can edit a message in place (for live status) expose that
//! through [`ChatTransport::status_updates`].

pub mod chunk;
pub mod console;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

pub use chunk::{chunk_message, send_chunked};
pub use console::ConsoleTransport;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Send to {channel} failed: {message}")]
    Send { channel: String, message: String },

    #[error("Transport closed")]
    Closed,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A chat message as seen by Arbiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    /// Display name of the sender.
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Whether the message addresses the bot directly.
    #[serde(default)]
    pub mentions_bot: bool,
}

impl ChatMessage {
    /// Create a message with a fresh id, timestamped now.
    pub fn new(
        channel_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            author: author.into(),
            content: content.into(),
            timestamp: Utc::now(),
            mentions_bot: false,
        }
    }

    /// Mark the message as addressed to the bot.
    pub fn with_mention(mut self) -> Self {
        self.mentions_bot = true;
        self
    }
}

/// Who the bot is on this transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: String,
    pub name: String,
}

/// Optional capability: post a status message and edit it in place.
#[async_trait]
pub trait EditableStatus: Send + Sync {
    /// Post a status message, returning a handle for later edits.
    async fn post_status(&self, channel_id: &str, text: &str) -> Result<String, TransportError>;

    /// Replace the text of a previously posted status message.
    async fn edit_status(
        &self,
        channel_id: &str,
        handle: &str,
        text: &str,
    ) -> Result<(), TransportError>;
}

/// Message source and sink.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send text to a channel. Text longer than [`max_message_len`] may be
    /// rejected; use [`send_chunked`] for arbitrary text.
    ///
    /// [`max_message_len`]: ChatTransport::max_message_len
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), TransportError>;

    /// Most recent messages in a channel, oldest first.
    async fn get_history(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, TransportError>;

    /// The bot's identity on this transport.
    fn bot_identity(&self) -> BotIdentity;

    /// Longest text a single `send` accepts, in characters.
    fn max_message_len(&self) -> usize;

    /// Take the inbound message stream. Returns `None` after the first call.
    fn take_inbound(&self) -> Option<mpsc::Receiver<ChatMessage>>;

    /// Editable status capability, when the transport has one.
    fn status_updates(&self) -> Option<Arc<dyn EditableStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_new() {
        let a = ChatMessage::new("c", "alice", "hello");
        let b = ChatMessage::new("c", "alice", "hello");
        assert_ne!(a.id, b.id);
        assert!(!a.mentions_bot);
        assert!(a.clone().with_mention().mentions_bot);
    }

    #[test]
    fn test_chat_message_deserialize_defaults_mention() {
        let json = r#"{"id":"1","channel_id":"c","author":"a","content":"x","timestamp":"2026-01-01T00:00:00Z"}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert!(!msg.mentions_bot);
    }
}
