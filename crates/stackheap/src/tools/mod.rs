//! Model-facing operations.
//!
//! Every structural operation the model can perform is exposed as a tool.
//! Definitions are filtered by the current stage ([`definitions_for`]) so the
//! model only sees what it may call, and [`dispatch`] checks the stage again
//! before any mutation.
//!
//! - Arguments are typed structs with `schemars` schemas and are validated
//!   with `jsonschema` before they are deserialized.
//! - Messaging tools return an [`Interaction`] for the runner to resolve
//!   with the user; the tool output is then rewritten with the reply.

pub mod names;

use crate::api::ToolDef;
use crate::context::ContextManager;
use crate::error::{Result, StackError};
use crate::json_schema_for;
use crate::prompt;
use crate::stage::{Operation, Stage, WorkingStage};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, trace};

// ── Arguments ──────────────────────────────────────────────────────

/// Arguments for `brainstorm`.
#[derive(Deserialize, JsonSchema)]
pub struct BrainstormArgs {
    /// Your thoughts, ideas, or reflections.
    pub thinking: String,
}

/// Arguments for `start_subtask`.
#[derive(Deserialize, JsonSchema)]
pub struct StartSubtaskArgs {
    /// Short unique id for the subtask, e.g. "plan-first-chat".
    pub subtask_id: String,
    /// What the subtask should achieve and when it is done.
    pub subtask_goal: String,
    /// Stage to work in. Defaults to "regular".
    #[serde(default)]
    pub task_type: Option<WorkingStage>,
}

/// Arguments for `apply_patch_to_note`.
#[derive(Deserialize, JsonSchema)]
pub struct ApplyPatchArgs {
    /// Patch text, from "*** Begin Patch" to "*** End Patch".
    pub patch: String,
}

/// Arguments for `pop_subtask`.
#[derive(Deserialize, JsonSchema)]
pub struct PopSubtaskArgs {
    /// One-sentence summary of what happened in the subtask and whether its
    /// goal was reached.
    pub summary: String,
}

/// Arguments for `send_message_and_wait`.
#[derive(Deserialize, JsonSchema)]
pub struct SendMessageArgs {
    /// The message to send to the user.
    pub content: String,
    /// Up to three short replies the user can pick from.
    #[serde(default)]
    pub user_response_options: Vec<String>,
}

/// Arguments for `send_message_and_finish_conversation`.
#[derive(Deserialize, JsonSchema)]
pub struct FinishConversationArgs {
    /// The final message to send before the conversation ends.
    pub content: String,
}

// ── Definitions ────────────────────────────────────────────────────

const PATCH_GRAMMAR: &str = "\
Patch format:
*** Begin Patch
@@ <exact heading line of the section, including the leading #>
-old line, copied exactly
+new line
*** End Patch

Rules:
- Always give the section heading after @@. It must match the heading line exactly.
- Never repeat the heading as a line inside the hunk.
- Use '-' for lines to remove and '+' for lines to add. Lines starting with a space are context.
- Only add context lines when the same text appears more than once in the section.
- To only add lines to a section, use '+' lines alone.
- Use one hunk per section. A heading that does not exist yet is created at the end of the note.";

/// Tool definition for one operation.
pub fn definition(op: Operation) -> ToolDef {
    let name = names::tool_name(op);
    match op {
        Operation::Brainstorm => ToolDef::new(
            name,
            "Think before acting. Consider what the current subtask needs, what \
             information is missing, what the character feels, and what to do next. \
             This does not change any state.",
            json_schema_for::<BrainstormArgs>(),
        ),
        Operation::Push => ToolDef::new(
            name,
            format!(
                "Open a nested subtask with its own context. Everything said inside \
                 it is removed when it is popped, leaving only a summary. Always \
                 brainstorm right after starting one. Task types: {}",
                WorkingStage::ALL
                    .iter()
                    .map(|w| format!("'{}' ({})", w.as_str(), w.description()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            json_schema_for::<StartSubtaskArgs>(),
        ),
        Operation::Finish => ToolDef::new(
            name,
            "Finish the current subtask once its goal is reached or cannot be \
             reached. Switches to the summarizing stage.",
            serde_json::json!({"type": "object", "properties": {}}),
        ),
        Operation::ApplyPatch => ToolDef::new(
            name,
            format!(
                "Edit the note, the only memory that survives a subtask. \n{PATCH_GRAMMAR}"
            ),
            json_schema_for::<ApplyPatchArgs>(),
        ),
        Operation::Pop => ToolDef::new(
            name,
            "Close the current subtask and return to its parent. The subtask's \
             conversation is removed; only your summary remains. Save anything \
             worth keeping to the note first.",
            json_schema_for::<PopSubtaskArgs>(),
        ),
        Operation::SendMessage => ToolDef::new(
            name,
            "Send a message to the user as the character and wait for the reply.",
            json_schema_for::<SendMessageArgs>(),
        ),
        Operation::EndConversation => ToolDef::new(
            name,
            "Send a final message and end the conversation, e.g. when the user \
             left, stopped answering, or asked for something that needs its own \
             subtask. Switches to the summarizing stage.",
            json_schema_for::<FinishConversationArgs>(),
        ),
    }
}

/// Definitions for every operation `stage` allows, in table order.
pub fn definitions_for(stage: Stage) -> Vec<ToolDef> {
    stage
        .allowed_operations()
        .iter()
        .map(|op| definition(*op))
        .collect()
}

// ── Dispatch ───────────────────────────────────────────────────────

/// A side effect the runner must resolve with the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    /// Show `content` and wait for a reply, offering `options`.
    AwaitUser {
        content: String,
        options: Vec<String>,
    },
    /// Show `content`. `last` marks the final message of a conversation.
    Display { content: String, last: bool },
}

/// Result of one dispatched tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub output: String,
    pub interaction: Option<Interaction>,
}

impl ToolOutcome {
    fn plain(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            interaction: None,
        }
    }
}

/// Execute one tool call against the context manager.
///
/// The stage gate runs before argument parsing, so a forbidden call never
/// mutates anything. `call_id` is recorded on frames opened by this call.
pub fn dispatch(
    cm: &mut ContextManager,
    call_id: &str,
    name: &str,
    arguments: &str,
) -> Result<ToolOutcome> {
    let op = names::operation_for(name)
        .ok_or_else(|| StackError::UnknownOperation(name.to_string()))?;
    cm.check(op)?;
    log_tool_call(name, arguments);

    // Some models send an empty string for argument-less tools.
    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };

    if let Some(error) = validate_tool_arguments(&definition(op), arguments) {
        return Err(StackError::InvalidArguments(error));
    }

    let outcome = match op {
        Operation::Brainstorm => {
            let args: BrainstormArgs = parse_tool_args(arguments)?;
            trace!("[tool] brainstorm: {}", args.thinking);
            ToolOutcome::plain("Thoughts recorded.")
        }
        Operation::Push => {
            let args: StartSubtaskArgs = parse_tool_args(arguments)?;
            let stage = args.task_type.unwrap_or_default();
            cm.push_opened_by(&args.subtask_id, &args.subtask_goal, stage, call_id)?;
            let mut output = format!(
                "Subtask started. You are now working on subtask: {} with goal: {}",
                args.subtask_id, args.subtask_goal
            );
            if let Some(extra) = prompt::stage_instructions(stage) {
                output.push_str("\nAdditional instructions for this stage:\n");
                output.push_str(extra);
            }
            ToolOutcome::plain(output)
        }
        Operation::Finish => {
            cm.finish()?;
            ToolOutcome::plain(format!(
                "Subtask {} finished. Switching to the summarizing stage.",
                cm.active_frame().id
            ))
        }
        Operation::ApplyPatch => {
            let args: ApplyPatchArgs = parse_tool_args(arguments)?;
            cm.apply_patch(&args.patch)?;
            ToolOutcome::plain("Patch applied. The note is now updated.")
        }
        Operation::Pop => {
            let args: PopSubtaskArgs = parse_tool_args(arguments)?;
            let popped = cm.active_frame().id.clone();
            cm.pop(&args.summary)?;
            ToolOutcome::plain(format!(
                "Subtask {popped} popped. Now active: {}.",
                cm.active_frame().id
            ))
        }
        Operation::SendMessage => {
            let args: SendMessageArgs = parse_tool_args(arguments)?;
            ToolOutcome {
                output: "Message sent.".into(),
                interaction: Some(Interaction::AwaitUser {
                    content: args.content,
                    options: args.user_response_options,
                }),
            }
        }
        Operation::EndConversation => {
            let args: FinishConversationArgs = parse_tool_args(arguments)?;
            cm.finish()?;
            ToolOutcome {
                output: "Conversation finished.".into(),
                interaction: Some(Interaction::Display {
                    content: args.content,
                    last: true,
                }),
            }
        }
    };

    debug!("[tool] {name} -> {} bytes", outcome.output.len());
    Ok(outcome)
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against a tool's declared JSON Schema.
///
/// Returns `None` if valid, or a description of every violation.
pub fn validate_tool_arguments(def: &ToolDef, arguments: &str) -> Option<String> {
    let value: serde_json::Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => return Some(format!("arguments are not valid JSON: {e}")),
    };

    // If the schema itself is invalid, skip validation.
    let validator = jsonschema::validator_for(&def.function.parameters).ok()?;

    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "tool '{}' rejected its arguments:\n{}\nPlease fix the arguments and try again.",
            def.function.name,
            errors.join("\n")
        ))
    }
}

/// Parse raw JSON arguments into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T> {
    serde_json::from_str(arguments).map_err(|e| StackError::InvalidArguments(e.to_string()))
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[op] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    trace!("[op] {name} arguments: {arguments}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::Turn;

    fn names_for(stage: Stage) -> Vec<String> {
        definitions_for(stage)
            .into_iter()
            .map(|d| d.function.name)
            .collect()
    }

    fn started(cm: &mut ContextManager, id: &str, call_id: &str) {
        let args = format!(r#"{{"subtask_id":"{id}","subtask_goal":"g"}}"#);
        let out = dispatch(cm, call_id, names::START_SUBTASK, &args).unwrap();
        cm.ingest(vec![
            Turn::tool_call(call_id, names::START_SUBTASK, args),
            Turn::tool_result(call_id, out.output),
        ]);
    }

    #[test]
    fn definitions_follow_stage_table() {
        assert_eq!(names_for(Stage::Root), vec![names::START_SUBTASK]);
        assert_eq!(
            names_for(Stage::Summarizing),
            vec![names::APPLY_PATCH_TO_NOTE, names::POP_SUBTASK]
        );
        let conversation = names_for(Stage::Working(WorkingStage::Conversation));
        assert!(conversation.contains(&names::SEND_MESSAGE_AND_WAIT.to_string()));
        assert!(!conversation.contains(&names::START_SUBTASK.to_string()));
    }

    #[test]
    fn definition_names_map_back_to_their_operation() {
        let stages = [
            Stage::Root,
            Stage::Summarizing,
            Stage::Working(WorkingStage::Regular),
            Stage::Working(WorkingStage::Conversation),
        ];
        for stage in stages {
            for op in stage.allowed_operations() {
                let def = definition(*op);
                assert_eq!(def.function.name, names::tool_name(*op));
                assert_eq!(names::operation_for(&def.function.name), Some(*op));
            }
        }
    }

    #[test]
    fn every_definition_has_object_schema() {
        for op in Stage::Working(WorkingStage::Regular)
            .allowed_operations()
            .iter()
            .chain(Stage::Working(WorkingStage::Conversation).allowed_operations())
            .chain(Stage::Summarizing.allowed_operations())
        {
            let def = definition(*op);
            assert_eq!(def.function.parameters["type"], "object", "{op}");
        }
    }

    #[test]
    fn start_subtask_defaults_to_regular_and_records_call() {
        let mut cm = ContextManager::new("");
        started(&mut cm, "plan", "c1");
        assert_eq!(cm.stage(), Stage::Working(WorkingStage::Regular));
        assert_eq!(cm.active_frame().opened_by.as_deref(), Some("c1"));
    }

    #[test]
    fn start_subtask_includes_stage_instructions() {
        let mut cm = ContextManager::new("");
        let out = dispatch(
            &mut cm,
            "c1",
            names::START_SUBTASK,
            r#"{"subtask_id":"chat","subtask_goal":"say hi","task_type":"conversation"}"#,
        )
        .unwrap();
        assert!(out.output.contains("Additional instructions"));
        assert_eq!(cm.stage(), Stage::Working(WorkingStage::Conversation));
    }

    #[test]
    fn forbidden_tool_is_rejected_before_parsing() {
        let mut cm = ContextManager::new("");
        let err = dispatch(&mut cm, "c1", names::POP_SUBTASK, "not json").unwrap_err();
        assert!(matches!(err, StackError::StageViolation { .. }));
    }

    #[test]
    fn unknown_tool_is_reported() {
        let mut cm = ContextManager::new("");
        let err = dispatch(&mut cm, "c1", "shell", "{}").unwrap_err();
        assert_eq!(err.to_tool_output(), "Error: unknown operation 'shell'");
    }

    #[test]
    fn schema_violation_is_invalid_arguments() {
        let mut cm = ContextManager::new("");
        let err = dispatch(&mut cm, "c1", names::START_SUBTASK, r#"{"subtask_id":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, StackError::InvalidArguments(_)));
        assert_eq!(cm.stack().depth(), 1);

        let err = dispatch(
            &mut cm,
            "c1",
            names::START_SUBTASK,
            r#"{"subtask_id":"x","subtask_goal":"g","task_type":"dance"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, StackError::InvalidArguments(_)));
    }

    #[test]
    fn conversation_tools_yield_interactions() {
        let mut cm = ContextManager::new("");
        cm.push("chat", "talk", WorkingStage::Conversation).unwrap();

        let out = dispatch(
            &mut cm,
            "m1",
            names::SEND_MESSAGE_AND_WAIT,
            r#"{"content":"hello!","user_response_options":["hi","busy"]}"#,
        )
        .unwrap();
        assert_eq!(
            out.interaction,
            Some(Interaction::AwaitUser {
                content: "hello!".into(),
                options: vec!["hi".into(), "busy".into()],
            })
        );

        let out = dispatch(
            &mut cm,
            "m2",
            names::SEND_MESSAGE_AND_FINISH_CONVERSATION,
            r#"{"content":"bye"}"#,
        )
        .unwrap();
        assert!(matches!(
            out.interaction,
            Some(Interaction::Display { last: true, .. })
        ));
        assert_eq!(cm.stage(), Stage::Summarizing);
    }

    #[test]
    fn finish_patch_and_pop_through_dispatch() {
        let mut cm = ContextManager::new("# Plan\n(empty)");
        started(&mut cm, "plan", "c1");

        dispatch(&mut cm, "c2", names::FINISH_SUBTASK, "{}").unwrap();
        assert_eq!(cm.stage(), Stage::Summarizing);

        let patch = serde_json::json!({
            "patch": "*** Begin Patch\n@@ # Plan\n-(empty)\n+talk to the user\n*** End Patch"
        })
        .to_string();
        dispatch(&mut cm, "c3", names::APPLY_PATCH_TO_NOTE, &patch).unwrap();
        assert_eq!(cm.note().text(), "# Plan\ntalk to the user");

        let out = dispatch(&mut cm, "c4", names::POP_SUBTASK, r#"{"summary":"planned"}"#)
            .unwrap();
        assert_eq!(out.output, "Subtask plan popped. Now active: root.");
        assert_eq!(cm.stage(), Stage::Root);
        assert_eq!(cm.active_frame().messages.len(), 2);
    }
}
