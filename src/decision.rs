// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Decision boundary: what to do with a message.
//!
//! The engine that decides whether a message is a coding task is external to
//! the orchestration core. [`PrefixDecisionEngine`] is a deterministic
//! command-prefix implementation.

use async_trait::async_trait;

use crate::coordinator::ActionType;
use crate::error::Result;
use crate::transport::{BotIdentity, ChatMessage};

/// What to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not for us.
    Ignore,
    /// Answer in the channel.
    Reply(String),
    /// Start a coding session.
    CodeTask { description: String },
    /// Queue a global action.
    Lifecycle { action: ActionType, reason: String },
}

/// Inputs available to a decision besides the message itself.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    /// Recent channel history, oldest first.
    pub history: Vec<ChatMessage>,
    pub bot: BotIdentity,
    /// Coordinator status text.
    pub status: String,
}

/// Decides what a message asks for.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, message: &ChatMessage, context: &DecisionContext) -> Result<Decision>;

    /// Whether `message` is a control command that must reach the engine even
    /// while a session in its channel is generating.
    fn is_control(&self, _message: &ChatMessage) -> bool {
        false
    }
}

/// Default command prefix.
pub const DEFAULT_COMMAND_PREFIX: &str = "!";

/// Command-prefix decisions.
///
/// | Message                 | Decision                 |
/// |-------------------------|--------------------------|
/// | `!task <description>`   | `CodeTask`               |
/// | `!restart [reason]`     | `Lifecycle(restart)`     |
/// | `!shutdown [reason]`    | `Lifecycle(shutdown)`    |
/// | `!cleanup [reason]`     | `Lifecycle(cleanup)`     |
/// | `!status`               | `Reply(status)`          |
/// | `!help`                 | `Reply(help)`            |
/// | anything else           | `Ignore`                 |
#[derive(Debug, Clone)]
pub struct PrefixDecisionEngine {
    prefix: String,
}

impl PrefixDecisionEngine {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Split a prefixed message into command and argument.
    fn parse<'a>(&self, content: &'a str) -> Option<(String, &'a str)> {
        let rest = content.trim().strip_prefix(self.prefix.as_str())?;
        let (command, arg) = match rest.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }
        Some((command.to_lowercase(), arg))
    }

    fn help(&self) -> String {
        let p = &self.prefix;
        format!(
            "Commands:\n{p}task <description> - start a coding session\n\
             {p}status - show active sessions\n\
             {p}restart | {p}shutdown | {p}cleanup [reason] - lifecycle actions (run once active sessions finish)"
        )
    }
}

impl Default for PrefixDecisionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_PREFIX)
    }
}

#[async_trait]
impl DecisionEngine for PrefixDecisionEngine {
    async fn decide(&self, message: &ChatMessage, context: &DecisionContext) -> Result<Decision> {
        let Some((command, arg)) = self.parse(&message.content) else {
            return Ok(Decision::Ignore);
        };

        let decision = match command.as_str() {
            "task" if arg.is_empty() => Decision::Reply(format!("Usage: {}task <description>", self.prefix)),
            "task" => Decision::CodeTask {
                description: arg.to_string(),
            },
            "status" => Decision::Reply(context.status.clone()),
            "help" => Decision::Reply(self.help()),
            other => match other.parse::<ActionType>() {
                Ok(action) => Decision::Lifecycle {
                    action,
                    reason: if arg.is_empty() {
                        format!("requested by {}", message.author)
                    } else {
                        arg.to_string()
                    },
                },
                Err(_) => Decision::Reply(format!("Unknown command `{other}`. {}", self.help())),
            },
        };
        Ok(decision)
    }

    fn is_control(&self, message: &ChatMessage) -> bool {
        matches!(self.parse(&message.content), Some((command, _)) if command != "task")
    }
}
