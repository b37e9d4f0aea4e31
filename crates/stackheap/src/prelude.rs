//! Convenience re-exports for common `stackheap` types.
//!
//! ```ignore
//! use stackheap::prelude::*;
//! ```
//!
//! Patch internals and wire-level message types are left out; import those
//! from their modules directly.

// ── Core state ──────────────────────────────────────────────────────
pub use crate::context::ContextManager;
pub use crate::document::Document;
pub use crate::error::{Result, StackError};
pub use crate::frame::{Frame, FrameStack};
pub use crate::stage::{Operation, Stage, StageController, WorkingStage};
pub use crate::turn::{Role, Turn};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::api::{ApiError, ModelBackend, ModelRequest, OpenRouterClient, RetryConfig};
pub use crate::config::AgentConfig;
pub use crate::events::{EventHandler, FnEventHandler, LoggingHandler, NoopHandler, RunEvent};
pub use crate::runner::{RunError, Runner, SilentUser, UserChannel};
pub use crate::json_schema_for;
