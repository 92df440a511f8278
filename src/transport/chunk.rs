// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Splitting long text for transports with a length limit.

use super::{ChatTransport, TransportError};

/// Split `text` into chunks of at most `max_len` characters.
///
/// Prefers breaking at the last newline in range, then the last space, and
/// only cuts mid-word when a single word is longer than `max_len`.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_len {
        // Byte offset just past the first `max_len` characters.
        let limit = rest
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..limit];

        let (cut, skip) = if let Some(i) = window.rfind('\n').filter(|&i| i > 0) {
            (i, 1)
        } else if let Some(i) = window.rfind(' ').filter(|&i| i > 0) {
            (i, 1)
        } else {
            (limit, 0)
        };

        let chunk = rest[..cut].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = &rest[cut + skip..];
    }

    if !rest.trim().is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Send `text`, chunked to the transport's limit.
pub async fn send_chunked(
    transport: &dyn ChatTransport,
    channel_id: &str,
    text: &str,
) -> Result<(), TransportError> {
    for chunk in chunk_message(text, transport.max_message_len()) {
        transport.send(channel_id, &chunk).await?;
    }
    Ok(())
}
