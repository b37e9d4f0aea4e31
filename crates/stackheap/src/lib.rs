//! Stack-and-heap context manager for long-running LLM agents.
//!
//! A long-running agent cannot keep every message it ever produced in its
//! context window. `stackheap` splits memory in two:
//!
//! - **Stack**: a [`FrameStack`](frame::FrameStack) of subtask frames. Each
//!   frame holds the messages exchanged while working on one subtask. Popping
//!   a frame discards its messages and leaves a short residue (the call that
//!   opened it plus a summary notice) in the parent.
//! - **Heap**: a markdown note ([`Document`](document::Document)) that
//!   survives every pop. The model edits it with a small patch language
//!   ([`patch`]).
//!
//! The [`StageController`](stage::StageController) gates which operations the
//! model may use at any moment, and [`ContextManager`](context::ContextManager)
//! ties everything together with save/load persistence.
//!
//! # Getting started
//!
//! ```ignore
//! use stackheap::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RunError> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap();
//!     let client = OpenRouterClient::new(api_key)?;
//!     let config = AgentConfig::from_env()?;
//!
//!     let mut cm = ContextManager::load_or_new(&config.state_path, config.note_template.clone())?;
//!     Runner::new(&client, &SilentUser, config)
//!         .with_event_handler(&LoggingHandler)
//!         .run(&mut cm, 10)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`patch`] | Patch grammar parser and applier |
//! | [`document`] | Versioned note document |
//! | [`frame`] | Frames and the frame stack |
//! | [`stage`] | Stages, operations, and the stage gate |
//! | [`context`] | [`ContextManager`](context::ContextManager) and persistence |
//! | [`tools`] | Model-facing operation catalog and dispatch |
//! | [`runner`] | One agent cycle against a model backend |
//! | [`api`] | OpenRouter client, wire types, retry |

pub mod api;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod events;
pub mod frame;
pub mod patch;
pub mod prelude;
pub mod prompt;
pub mod runner;
pub mod stage;
pub mod tools;
pub mod turn;

use schemars::JsonSchema;

pub use error::{Result, StackError};

// Re-export schemars for downstream crates.
pub use schemars;

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Used for every operation's argument schema.
///
/// ```
/// use stackheap::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct PopArgs {
///     summary: String,
/// }
///
/// let schema = json_schema_for::<PopArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"summary".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
