// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Time-windowed per-channel batching.
//!
//! People often send a request as several quick messages. The aggregator
//! holds each channel's messages until the oldest has waited a full window,
//! then hands them on together.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::types::AggregatedMessage;
use crate::transport::ChatMessage;

/// Default aggregation window.
pub const DEFAULT_AGGREGATION_WINDOW: Duration = Duration::from_millis(2000);

struct Buffer {
    first_at: Instant,
    messages: Vec<ChatMessage>,
}

/// Per-channel message buffers.
///
/// Time is passed in explicitly so callers decide the clock.
pub struct MessageAggregator {
    window: Duration,
    buffers: HashMap<String, Buffer>,
}

impl MessageAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            buffers: HashMap::new(),
        }
    }

    /// The aggregation window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Buffer a message. Returns the channel's buffered count.
    pub fn push(&mut self, message: ChatMessage, now: Instant) -> usize {
        let buffer = self
            .buffers
            .entry(message.channel_id.clone())
            .or_insert_with(|| Buffer {
                first_at: now,
                messages: Vec::new(),
            });
        buffer.messages.push(message);
        buffer.messages.len()
    }

    /// Flush every channel whose oldest message has aged past the window.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<AggregatedMessage> {
        let expired: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, b)| now.saturating_duration_since(b.first_at) >= self.window)
            .map(|(channel, _)| channel.clone())
            .collect();

        let mut out: Vec<AggregatedMessage> = expired
            .into_iter()
            .filter_map(|channel| self.flush(&channel))
            .collect();
        out.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        out
    }

    /// Flush one channel immediately, regardless of age.
    pub fn flush(&mut self, channel_id: &str) -> Option<AggregatedMessage> {
        let buffer = self.buffers.remove(channel_id)?;
        if buffer.messages.is_empty() {
            return None;
        }
        Some(AggregatedMessage {
            channel_id: channel_id.to_string(),
            messages: buffer.messages,
        })
    }

    /// Flush everything.
    pub fn flush_all(&mut self) -> Vec<AggregatedMessage> {
        let channels: Vec<String> = self.buffers.keys().cloned().collect();
        channels.iter().filter_map(|c| self.flush(c)).collect()
    }

    /// Buffered message count for a channel.
    pub fn pending(&self, channel_id: &str) -> usize {
        self.buffers
            .get(channel_id)
            .map(|b| b.messages.len())
            .unwrap_or(0)
    }

    /// Time until the earliest buffer expires.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.buffers
            .values()
            .map(|b| (b.first_at + self.window).saturating_duration_since(now))
            .min()
    }
}

impl Default for MessageAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_AGGREGATION_WINDOW)
    }
}
