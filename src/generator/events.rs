// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Generator event stream decoding.
//!
//! Generators write newline-delimited JSON. Two shapes are understood:
//!
//! - Flat tagged events: `{"type":"tool_result","name":"edit","is_error":false}`
//! - Claude CLI `stream-json` envelopes: `assistant` / `user` messages whose
//!   `content` blocks carry `text`, `tool_use` and `tool_result`, plus a final
//!   `result` object.
//!
//! Anything that is not JSON is passed through as text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// One event from a running generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorEvent {
    /// Assistant prose.
    Text { text: String },
    /// A tool call started.
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// A tool call finished. This is the only point where a run may be
    /// interrupted safely.
    ToolResult {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        content: String,
    },
    /// The run's final summary.
    Result {
        #[serde(default)]
        summary: String,
        #[serde(default)]
        is_error: bool,
    },
    /// The generator reported an error.
    Error { message: String },
}

impl GeneratorEvent {
    /// Whether this event marks a safe pause point.
    pub fn is_tool_boundary(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }
}

/// Decode one output line into zero or more events.
pub fn parse_line(line: &str) -> Vec<GeneratorEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            return vec![GeneratorEvent::Text {
                text: line.to_string(),
            }]
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some("assistant") | Some("user") => parse_envelope(&value),
        Some("result") if value.get("summary").is_none() => vec![GeneratorEvent::Result {
            summary: value
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            is_error: value
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }],
        Some("system") => Vec::new(),
        _ => match serde_json::from_value::<GeneratorEvent>(value) {
            Ok(event) => vec![event],
            Err(e) => {
                trace!("Ignoring unrecognized generator line: {}", e);
                Vec::new()
            }
        },
    }
}

fn parse_envelope(value: &Value) -> Vec<GeneratorEvent> {
    let blocks = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array);
    let Some(blocks) = blocks else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter_map(|block| match block.get("type").and_then(Value::as_str) {
            Some("text") => block.get("text").and_then(Value::as_str).map(|t| {
                GeneratorEvent::Text {
                    text: t.to_string(),
                }
            }),
            Some("tool_use") => Some(GeneratorEvent::ToolUse {
                name: block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                input: block.get("input").cloned().unwrap_or(Value::Null),
            }),
            Some("tool_result") => Some(GeneratorEvent::ToolResult {
                name: block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                is_error: block
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                content: tool_result_text(block.get("content")),
            }),
            _ => None,
        })
        .collect()
}

/// Tool result content is either a string or a list of text blocks.
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
