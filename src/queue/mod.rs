// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Inbound message buffering.
//!
//! Chat messages pass through the [`MessageAggregator`] (per-channel batching)
//! into the [`MessageQueue`] (priority order, single consumer).

pub mod aggregator;
pub mod priority_queue;
pub mod types;

pub use aggregator::{MessageAggregator, DEFAULT_AGGREGATION_WINDOW};
pub use priority_queue::{MessageProcessor, MessageQueue, DEFAULT_CAPACITY, DEFAULT_INTER_ITEM_DELAY};
pub use types::{AggregatedMessage, MessageStatus, Priority, QueuedMessage};

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue full ({capacity} items) and no low-priority item to evict for a {priority} message")]
    Full { capacity: usize, priority: Priority },

    #[error("Queued message not found: {0}")]
    NotFound(String),
}
