//! Canonical tool name constants.
//!
//! All tool-name string literals should reference these constants. The
//! names are what the model sees; [`operation_for`] maps them onto the
//! stage-gated [`Operation`]s.

use crate::stage::Operation;

pub const BRAINSTORM: &str = "brainstorm";
pub const START_SUBTASK: &str = "start_subtask";
pub const FINISH_SUBTASK: &str = "finish_subtask";
pub const APPLY_PATCH_TO_NOTE: &str = "apply_patch_to_note";
pub const POP_SUBTASK: &str = "pop_subtask";
pub const SEND_MESSAGE_AND_WAIT: &str = "send_message_and_wait";
pub const SEND_MESSAGE_AND_FINISH_CONVERSATION: &str = "send_message_and_finish_conversation";

/// The operation a tool name performs.
pub fn operation_for(name: &str) -> Option<Operation> {
    match name {
        BRAINSTORM => Some(Operation::Brainstorm),
        START_SUBTASK => Some(Operation::Push),
        FINISH_SUBTASK => Some(Operation::Finish),
        APPLY_PATCH_TO_NOTE => Some(Operation::ApplyPatch),
        POP_SUBTASK => Some(Operation::Pop),
        SEND_MESSAGE_AND_WAIT => Some(Operation::SendMessage),
        SEND_MESSAGE_AND_FINISH_CONVERSATION => Some(Operation::EndConversation),
        _ => None,
    }
}

/// The tool name the model uses for an operation.
pub fn tool_name(op: Operation) -> &'static str {
    match op {
        Operation::Brainstorm => BRAINSTORM,
        Operation::Push => START_SUBTASK,
        Operation::Finish => FINISH_SUBTASK,
        Operation::ApplyPatch => APPLY_PATCH_TO_NOTE,
        Operation::Pop => POP_SUBTASK,
        Operation::SendMessage => SEND_MESSAGE_AND_WAIT,
        Operation::EndConversation => SEND_MESSAGE_AND_FINISH_CONVERSATION,
    }
}
