//! Error types for context management.
//!
//! Uses `thiserror` for the error definitions. Most variants are
//! *recoverable*: the runner renders them as `"Error: ..."` tool results so
//! the model can correct itself on the next cycle. [`StackError::CorruptStack`]
//! and the persistence variants abort the run instead.

use thiserror::Error;

/// The error type for stack, stage, and patch operations.
#[derive(Debug, Error)]
pub enum StackError {
    // --- Patch errors ---
    #[error("malformed patch: {0}")]
    MalformedPatch(String),

    #[error("hunk {index} ({}) did not match the note", .header.as_deref().unwrap_or("no header"))]
    HunkMismatch {
        /// Zero-based position of the failing hunk in the patch.
        index: usize,
        header: Option<String>,
    },

    // --- Stack errors ---
    #[error("cannot pop the root frame")]
    EmptyStack,

    #[error("a frame with id '{0}' is already on the stack")]
    DuplicateFrameId(String),

    #[error("stack is corrupt: {0}")]
    CorruptStack(String),

    // --- Stage errors ---
    #[error("operation '{operation}' is not allowed in stage '{stage}'")]
    StageViolation { operation: String, stage: String },

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    // --- Persistence ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StackError {
    /// Whether the error can be reported back to the model as a tool result.
    ///
    /// Returns `false` for structural corruption and persistence failures,
    /// which must abort the run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            StackError::CorruptStack(_) | StackError::Io(_) | StackError::Serialization(_)
        )
    }

    /// Render the error the way tool results carry failures.
    pub fn to_tool_output(&self) -> String {
        format!("Error: {self}")
    }
}

/// Result type alias using [`StackError`].
pub type Result<T> = std::result::Result<T, StackError>;
