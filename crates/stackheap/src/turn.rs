//! Conversation turns: the unit stored in frame logs.
//!
//! A [`Turn`] is one item of the conversation as the context manager sees
//! it. Plain messages, private reasoning, tool invocations, and tool results
//! are all turns, so a frame log is just `Vec<Turn>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix carried by tool results that report a failure.
pub const ERROR_PREFIX: &str = "Error:";

/// Author of a plain message turn.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One conversation item.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    /// Plain text from the user, the assistant, or the system.
    Message { role: Role, content: String },
    /// Private reasoning annotation produced by the model.
    Reasoning { content: String },
    /// A tool invocation requested by the model.
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// The result of a tool invocation.
    ToolResult { call_id: String, output: String },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn::Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Turn::Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        Turn::Reasoning {
            content: content.into(),
        }
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Turn::ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Turn::ToolResult {
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    /// Whether this is a private reasoning annotation.
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Turn::Reasoning { .. })
    }

    /// Call id for tool invocations and results, `None` otherwise.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Turn::ToolCall { call_id, .. } | Turn::ToolResult { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Whether this is a tool result whose output reports a failure.
    pub fn is_error_result(&self) -> bool {
        match self {
            Turn::ToolResult { output, .. } => output.trim_start().starts_with(ERROR_PREFIX),
            _ => false,
        }
    }

    /// Short human-readable label, used by log output and the CLI.
    pub fn label(&self) -> String {
        match self {
            Turn::Message { role, .. } => role.to_string(),
            Turn::Reasoning { .. } => "reasoning".into(),
            Turn::ToolCall { name, .. } => format!("call:{name}"),
            Turn::ToolResult { call_id, .. } => format!("result:{call_id}"),
        }
    }
}
