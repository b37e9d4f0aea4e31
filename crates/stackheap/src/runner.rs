//! The agent cycle.
//!
//! [`Runner::run_cycle`] drives one model turn against a [`ContextManager`]:
//!
//! 1. Build the conversation and the stage's system prompt and tool set.
//! 2. Ask the [`ModelBackend`] for the next batch of turns.
//! 3. Dispatch every tool call in order through the stage gate, resolving
//!    user interactions through the [`UserChannel`].
//! 4. Ingest the batch into the active frame.
//!
//! Calls already executed in a response are flushed into the current frame
//! before a push or pop runs, so the call that opens or closes a frame lands
//! in the right place. Calls that follow a successful push or pop in the same
//! response are not executed; the model sees an error result for each and can
//! repeat them next cycle.

use crate::api::{ApiError, ModelBackend, ModelRequest};
use crate::config::AgentConfig;
use crate::context::ContextManager;
use crate::error::StackError;
use crate::events::{EventHandler, NoopHandler, RunEvent};
use crate::prompt;
use crate::tools::{self, Interaction, ToolOutcome, names};
use crate::turn::Turn;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info};

/// Tool output for calls skipped after a frame change.
pub const SKIPPED_OUTPUT: &str = "Error: not executed because an earlier call in this response \
changed the active subtask. Call it again if it is still needed.";

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Stack(#[from] StackError),
}

// ── User channel ───────────────────────────────────────────────────

/// Boxed future returned by [`UserChannel::ask`].
pub type ReplyFuture<'a> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

/// Where messages to the user go and replies come from.
pub trait UserChannel: Send + Sync {
    /// Show `message` and wait for a raw reply. `None` means the user is gone.
    fn ask<'a>(&'a self, message: &'a str, options: &'a [String]) -> ReplyFuture<'a>;

    /// Show `message` without waiting.
    fn display(&self, message: &str);
}

/// A user who never answers. Messages are only logged.
pub struct SilentUser;

impl UserChannel for SilentUser {
    fn ask<'a>(&'a self, message: &'a str, _options: &'a [String]) -> ReplyFuture<'a> {
        info!("[user] {message}");
        Box::pin(async { None })
    }

    fn display(&self, message: &str) {
        info!("[user] {message}");
    }
}

/// Interpret a raw reply.
///
/// Blank input, `skip` and `0` mean no response. A number picks one of
/// `options` (1-based); anything else is taken verbatim.
pub fn resolve_reply(raw: Option<&str>, options: &[String]) -> Option<String> {
    let reply = raw?.trim();
    if reply.is_empty() || reply.eq_ignore_ascii_case("skip") || reply == "0" {
        return None;
    }
    if let Ok(n) = reply.parse::<usize>()
        && let Some(option) = n.checked_sub(1).and_then(|i| options.get(i))
    {
        return Some(option.clone());
    }
    Some(reply.to_string())
}

/// Tool output reporting a user reply.
pub fn reply_output(reply: Option<&str>) -> String {
    match reply {
        Some(text) => format!("<system>The user replied: {text}</system>"),
        None => "<system>No response</system>".to_string(),
    }
}

/// Tool output for the closing message of a conversation.
pub fn final_message_output(content: &str) -> String {
    format!("<system>Conversation stage finished. Final message delivered:\n{content}</system>")
}

/// Suffix warning the model that frame space is running out.
pub fn space_reminder(messages_left: usize) -> String {
    format!(
        "\n<system>Warning: Only {messages_left} messages left in the context. Wrap up the \
current subtask, save what matters to the note, and pop back soon.</system>"
    )
}

// ── Runner ─────────────────────────────────────────────────────────

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Tool calls the model made, including skipped ones.
    pub operations: usize,
    /// Calls not executed because the frame changed earlier.
    pub skipped: usize,
    /// Calls that produced an error result.
    pub errors: usize,
    /// Whether a conversation ended this cycle.
    pub conversation_finished: bool,
}

/// Totals for [`Runner::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u32,
    pub operations: usize,
    pub errors: usize,
}

pub struct Runner<'a> {
    backend: &'a dyn ModelBackend,
    user: &'a dyn UserChannel,
    config: AgentConfig,
    events: &'a dyn EventHandler,
    cycle: u32,
}

impl<'a> Runner<'a> {
    pub fn new(
        backend: &'a dyn ModelBackend,
        user: &'a dyn UserChannel,
        config: AgentConfig,
    ) -> Self {
        Self {
            backend,
            user,
            config,
            events: &NoopHandler,
            cycle: 0,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.events = handler;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The request the next cycle would send.
    pub fn request_for(&self, cm: &ContextManager) -> ModelRequest {
        let stage = cm.stage();
        ModelRequest {
            model: self.config.model.clone(),
            system: prompt::system_prompt(stage, &cm.active_frame().id, &self.config.persona),
            turns: cm.build_conversation(),
            tools: tools::definitions_for(stage),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    /// Run one model turn and apply its operations to `cm`.
    pub async fn run_cycle(&mut self, cm: &mut ContextManager) -> Result<CycleReport, RunError> {
        self.cycle += 1;
        let cycle = self.cycle;
        self.events.on_event(&RunEvent::CycleStart {
            cycle,
            stage: cm.stage(),
            frame_id: &cm.active_frame().id,
            depth: cm.stack().depth(),
            messages: cm.stack().message_count(),
        });

        let request = self.request_for(cm);
        let turns = self.backend.complete(&request).await?;

        let mut report = CycleReport::default();
        let mut pending: Vec<Turn> = Vec::with_capacity(turns.len() * 2);
        let mut frame_changed = false;

        for turn in turns {
            let Turn::ToolCall {
                call_id,
                name,
                arguments,
            } = &turn
            else {
                match &turn {
                    Turn::Reasoning { content } => {
                        self.events.on_event(&RunEvent::Reasoning(content));
                    }
                    Turn::Message { content, .. } => {
                        self.events.on_event(&RunEvent::Text(content));
                    }
                    _ => {}
                }
                pending.push(turn);
                continue;
            };
            let (call_id, name, arguments) = (call_id.clone(), name.clone(), arguments.clone());
            report.operations += 1;

            if frame_changed {
                self.events.on_event(&RunEvent::OperationSkipped {
                    name: &name,
                    call_id: &call_id,
                });
                report.skipped += 1;
                pending.push(turn);
                pending.push(Turn::tool_result(call_id, SKIPPED_OUTPUT));
                continue;
            }

            let changes_frame = names::operation_for(&name).is_some_and(|op| op.changes_frame());
            // Earlier calls belong to the current frame. Leading reasoning and
            // text travel with the push or pop call.
            if changes_frame && pending.iter().any(|t| matches!(t, Turn::ToolCall { .. })) {
                cm.ingest(std::mem::take(&mut pending));
            }

            self.events.on_event(&RunEvent::OperationStarted {
                name: &name,
                arguments: &arguments,
            });
            let (mut output, is_error) = match tools::dispatch(cm, &call_id, &name, &arguments) {
                Ok(outcome) => {
                    if matches!(outcome.interaction, Some(Interaction::Display { last: true, .. })) {
                        report.conversation_finished = true;
                    }
                    (self.resolve(outcome).await, false)
                }
                Err(e) if e.is_recoverable() => (e.to_tool_output(), true),
                Err(e) => return Err(e.into()),
            };
            if is_error {
                report.errors += 1;
            }

            let projected = cm.stack().message_count() + pending.len() + 2;
            if let Some(left) = self.config.messages_left(projected) {
                output.push_str(&space_reminder(left));
            }

            self.events.on_event(&RunEvent::OperationFinished {
                name: &name,
                call_id: &call_id,
                output: &output,
                is_error,
            });
            pending.push(turn);
            pending.push(Turn::tool_result(call_id, output));

            if changes_frame && !is_error {
                frame_changed = true;
                self.events.on_event(&RunEvent::FrameChanged {
                    frame_id: &cm.active_frame().id,
                    depth: cm.stack().depth(),
                });
            }
        }

        if report.operations == 0 {
            self.events.on_event(&RunEvent::NoOperations { cycle });
        }
        cm.ingest(pending);
        debug!(
            "[cycle {cycle}] {} operation(s), {} skipped, {} error(s)",
            report.operations, report.skipped, report.errors
        );
        self.events.on_event(&RunEvent::CycleEnd {
            cycle,
            stage: cm.stage(),
        });
        Ok(report)
    }

    /// Run up to `max_cycles` cycles, saving after each one.
    ///
    /// Stops at the first unrecoverable error; the last save is the recovery
    /// point.
    pub async fn run(
        &mut self,
        cm: &mut ContextManager,
        max_cycles: u32,
    ) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        for _ in 0..max_cycles {
            let report = self.run_cycle(cm).await?;
            self.save(cm)?;
            summary.cycles += 1;
            summary.operations += report.operations;
            summary.errors += report.errors;
        }
        info!(
            "Run finished: {} cycle(s), {} operation(s), {} error(s)",
            summary.cycles, summary.operations, summary.errors
        );
        Ok(summary)
    }

    /// Save `cm` to the configured state path.
    pub fn save(&self, cm: &ContextManager) -> Result<(), RunError> {
        cm.save(&self.config.state_path)?;
        self.events.on_event(&RunEvent::Saved {
            path: &self.config.state_path.display().to_string(),
        });
        Ok(())
    }

    async fn resolve(&self, outcome: ToolOutcome) -> String {
        match outcome.interaction {
            None => outcome.output,
            Some(Interaction::AwaitUser { content, options }) => {
                let raw = self.user.ask(&content, &options).await;
                let reply = resolve_reply(raw.as_deref(), &options);
                reply_output(reply.as_deref())
            }
            Some(Interaction::Display { content, last }) => {
                self.user.display(&content);
                if last {
                    final_message_output(&content)
                } else {
                    outcome.output
                }
            }
        }
    }
}
