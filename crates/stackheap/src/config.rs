//! Agent configuration.
//!
//! [`AgentConfig`] carries everything the runner needs besides the model
//! backend: sampling settings, retry policy, frame-space limits, the state
//! file location, and the note template a fresh session starts from.
//! Defaults work out of the box; [`AgentConfig::from_env`] overlays the
//! `STACKHEAP_*` environment variables and CLI flags override both.

use crate::api::{DEFAULT_MODEL, RetryConfig};
use crate::error::Result;
use crate::prompt::DEFAULT_NOTE_TEMPLATE;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable overriding [`AgentConfig::model`].
pub const ENV_MODEL: &str = "STACKHEAP_MODEL";
/// Environment variable overriding [`AgentConfig::state_path`].
pub const ENV_STATE_PATH: &str = "STACKHEAP_STATE_PATH";
/// Environment variable naming a file whose contents replace the note template.
pub const ENV_NOTE_TEMPLATE: &str = "STACKHEAP_NOTE_TEMPLATE";

/// Default location of the saved session.
pub const DEFAULT_STATE_PATH: &str = "logs/conversation.json";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier (e.g. `"anthropic/claude-sonnet-4"`).
    pub model: String,
    /// Maximum tokens per model response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Retry configuration for transient API failures.
    pub retry: RetryConfig,
    /// Total messages across all frames the model is told it can hold.
    pub max_context_messages: usize,
    /// How many messages before the limit the frame-space warning starts.
    pub reminder_margin: usize,
    /// Where the session is saved after every cycle.
    pub state_path: PathBuf,
    /// Note contents for a fresh session.
    pub note_template: String,
    /// Character description placed ahead of the system prompt. Empty means none.
    pub persona: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            retry: RetryConfig::default(),
            max_context_messages: 80,
            reminder_margin: 10,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            note_template: DEFAULT_NOTE_TEMPLATE.to_string(),
            persona: String::new(),
        }
    }
}

impl AgentConfig {
    /// Defaults overlaid with the `STACKHEAP_*` environment variables.
    ///
    /// Fails only when `STACKHEAP_NOTE_TEMPLATE` names an unreadable file.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay settings from `lookup`, which maps a variable name to its value.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            self.model = model;
        }
        if let Some(path) = lookup(ENV_STATE_PATH).filter(|v| !v.trim().is_empty()) {
            self.state_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_NOTE_TEMPLATE).filter(|v| !v.trim().is_empty()) {
            debug!("Loading note template from {path}");
            self.note_template = std::fs::read_to_string(&path)?;
        }
        Ok(self)
    }

    // ── Builder methods ───────────────────────────────────────────

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the frame-space limit and the margin at which warnings begin.
    pub fn with_context_limit(mut self, max_messages: usize, margin: usize) -> Self {
        self.max_context_messages = max_messages;
        self.reminder_margin = margin;
        self
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = path.into();
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Messages left before the frame-space limit, once the warning zone is
    /// reached. `None` while there is still plenty of room.
    pub fn messages_left(&self, total_messages: usize) -> Option<usize> {
        let threshold = self
            .max_context_messages
            .saturating_sub(self.reminder_margin);
        (total_messages >= threshold)
            .then(|| self.max_context_messages.saturating_sub(total_messages))
    }
}
