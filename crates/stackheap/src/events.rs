//! Events and handlers for the [`Runner`](crate::runner::Runner).
//!
//! The runner reports what happens during a cycle through [`RunEvent`]
//! variants. Callers implement [`EventHandler`] to observe them for logging,
//! terminal output, or tests.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |

use crate::stage::Stage;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the runner.
#[derive(Debug)]
pub enum RunEvent<'a> {
    /// A new cycle is starting.
    CycleStart {
        cycle: u32,
        stage: Stage,
        frame_id: &'a str,
        depth: usize,
        messages: usize,
    },
    /// The model produced reasoning text.
    Reasoning(&'a str),
    /// The model produced plain assistant text.
    Text(&'a str),
    /// An operation is about to be dispatched.
    OperationStarted { name: &'a str, arguments: &'a str },
    /// An operation finished; `output` is what the model will see.
    OperationFinished {
        name: &'a str,
        call_id: &'a str,
        output: &'a str,
        is_error: bool,
    },
    /// A call was not executed because an earlier call in the same response
    /// changed the active frame.
    OperationSkipped { name: &'a str, call_id: &'a str },
    /// The active frame changed.
    FrameChanged { frame_id: &'a str, depth: usize },
    /// The model answered without calling any operation.
    NoOperations { cycle: u32 },
    /// Session saved.
    Saved { path: &'a str },
    /// A cycle finished.
    CycleEnd { cycle: u32, stage: Stage },
}

/// Observer for [`RunEvent`]s.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &RunEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let RunEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&RunEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&RunEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&RunEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &RunEvent<'_>) {
        (self.0)(event)
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &RunEvent<'_>) {
        match event {
            RunEvent::CycleStart {
                cycle,
                stage,
                frame_id,
                depth,
                messages,
            } => {
                info!("[cycle {cycle}] stage={stage} frame={frame_id} depth={depth} messages={messages}");
            }
            RunEvent::Reasoning(text) => {
                debug!("LLM reasoning: {}", preview(text, 200));
            }
            RunEvent::Text(text) => {
                debug!("LLM text: {}", preview(text, 200));
            }
            RunEvent::OperationStarted { name, .. } => {
                debug!("Dispatching operation: {name}");
            }
            RunEvent::OperationFinished {
                name,
                output,
                is_error,
                ..
            } => {
                if *is_error {
                    warn!("{name} failed: {}", preview(output, 200));
                } else {
                    debug!("{name} result: {} bytes", output.len());
                }
            }
            RunEvent::OperationSkipped { name, call_id } => {
                warn!("Skipped {name} ({call_id}): the active frame changed earlier in this response");
            }
            RunEvent::FrameChanged { frame_id, depth } => {
                info!("[stack] active frame {frame_id} (depth {depth})");
            }
            RunEvent::NoOperations { cycle } => {
                warn!("[cycle {cycle}] model called no operations");
            }
            RunEvent::Saved { path } => {
                debug!("Session saved to {path}");
            }
            RunEvent::CycleEnd { cycle, stage } => {
                debug!("[cycle {cycle}] done, stage={stage}");
            }
        }
    }
}

/// First `max` characters of `text`, with an ellipsis when truncated.
pub(crate) fn preview(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
