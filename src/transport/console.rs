// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Terminal transport.
//!
//! Each stdin line is an inbound message on the `console` channel; outbound
//! text is printed to stdout.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use super::{BotIdentity, ChatMessage, ChatTransport, EditableStatus, TransportError};

/// Channel id used for all console traffic.
pub const CONSOLE_CHANNEL: &str = "console";

const HISTORY_LIMIT: usize = 200;

/// Chat over stdin/stdout.
pub struct ConsoleTransport {
    user: String,
    history: Arc<Mutex<VecDeque<ChatMessage>>>,
    started: Mutex<bool>,
}

impl ConsoleTransport {
    /// Create a console transport; inbound messages are attributed to `user`.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            history: Arc::new(Mutex::new(VecDeque::new())),
            started: Mutex::new(false),
        }
    }

    fn record(&self, message: ChatMessage) {
        record(&self.history, message);
    }
}

fn record(history: &Mutex<VecDeque<ChatMessage>>, message: ChatMessage) {
    let mut history = history.lock().unwrap_or_else(|p| p.into_inner());
    if history.len() >= HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(message);
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new(CONSOLE_CHANNEL)
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), TransportError> {
        println!("{} {}", "arbiter>".cyan().bold(), text);
        self.record(ChatMessage::new(channel_id, "arbiter", text));
        Ok(())
    }

    async fn get_history(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, TransportError> {
        let history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let matching: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }

    fn bot_identity(&self) -> BotIdentity {
        BotIdentity {
            id: "arbiter".to_string(),
            name: "arbiter".to_string(),
        }
    }

    fn max_message_len(&self) -> usize {
        4000
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<ChatMessage>> {
        {
            let mut started = self.started.lock().unwrap_or_else(|p| p.into_inner());
            if *started {
                return None;
            }
            *started = true;
        }

        let (tx, rx) = mpsc::channel(64);
        let user = self.user.clone();
        let history = Arc::clone(&self.history);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // Everything typed at the console is addressed to the bot.
                let message = ChatMessage::new(CONSOLE_CHANNEL, &user, line).with_mention();
                record(&history, message.clone());
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            debug!("Console input closed");
        });
        Some(rx)
    }

    fn status_updates(&self) -> Option<Arc<dyn EditableStatus>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_is_per_channel_and_limited() {
        let transport = ConsoleTransport::default();
        transport.send("console", "one").await.unwrap();
        transport.send("other", "x").await.unwrap();
        transport.send("console", "two").await.unwrap();
        transport.send("console", "three").await.unwrap();

        let history = transport.get_history("console", 2).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[test]
    fn test_no_editable_status() {
        let transport = ConsoleTransport::default();
        assert!(transport.status_updates().is_none());
        assert_eq!(transport.bot_identity().name, "arbiter");
    }
}
