//! System prompts and the default note template.
//!
//! The system prompt depends on the stage: working stages get the main
//! working principles, summarizing gets a focused prompt naming the frame
//! being folded into the note. Working stages may add instructions that are
//! returned to the model when a subtask of that type starts.

use crate::stage::{Stage, WorkingStage};

/// Note used when no template is configured.
pub const DEFAULT_NOTE_TEMPLATE: &str = "\
# Note

## Character details
> Personality, background, and memories of the character.
empty for now

## Current state
> Where the story and the relationship stand right now.
empty for now

## User profile
> What is known about the user: interests, habits, preferences.
empty for now

## Plan
> Next steps and open threads.
empty for now

## Recent interactions
> Short log of the latest conversations with the user.
empty for now

## Story
> Events that have happened so far.
empty for now
";

const WORKING_PRINCIPLES: &str = "\
<working_principles>
Invariants:
- You are the sole author of the whole process. The only way to reach the user is a conversation subtask.
- Call at least one tool every turn. This is a very long-running session; plan for the long term.
- Start every subtask with `brainstorm`.
- Before any action (research, messaging the user), start a subtask for it with `start_subtask`.
- Subtasks can nest, but a nested subtask must be closely related to its parent.
- When a subtask's goal is reached, or is clearly unreachable, call `finish_subtask`.

Context rules:
- Everything said inside a subtask is removed when the subtask is popped. Only the note and a \
one-line summary survive, so write what matters into the note with `apply_patch_to_note`.
- If the result of a `start_subtask` call says the subtask ended, that is expected: you finished it \
earlier. Treat its goal as done and brainstorm what comes next.
- Text wrapped in <system></system> comes from the system, not from the user. User replies are \
relayed as \"The user replied: ...\".
</working_principles>";

const CONVERSATION_INSTRUCTIONS: &str = "\
You are now talking with the user.
- Send one message at a time with `send_message_and_wait` and react to the reply.
- Offer up to three short reply options that fit the character's tone.
- If the user does not respond, do not press; end the conversation gracefully.
- End with `send_message_and_finish_conversation` when the topic is exhausted, the user left, or the \
request needs a subtask of its own.";

const RESEARCH_INSTRUCTIONS: &str = "\
You are researching the user.
- Collect concrete, verifiable facts. Do not speculate beyond the evidence.
- Record findings in the user profile section of the note before finishing.";

/// Extra instructions returned when a subtask of `stage` starts.
pub fn stage_instructions(stage: WorkingStage) -> Option<&'static str> {
    match stage {
        WorkingStage::Regular => None,
        WorkingStage::Conversation => Some(CONVERSATION_INSTRUCTIONS),
        WorkingStage::Research => Some(RESEARCH_INSTRUCTIONS),
    }
}

/// System prompt for the current stage.
///
/// `persona` is prepended verbatim when non-empty.
pub fn system_prompt(stage: Stage, active_frame_id: &str, persona: &str) -> String {
    let body = match stage {
        Stage::Summarizing => summarizing_prompt(active_frame_id),
        Stage::Root | Stage::Working(_) => WORKING_PRINCIPLES.to_string(),
    };
    if persona.trim().is_empty() {
        body
    } else {
        format!("{}\n\n{body}", persona.trim_end())
    }
}

fn summarizing_prompt(active_frame_id: &str) -> String {
    format!(
        "<role>
You are the subtask summarizer. The subtask '{active_frame_id}' has finished.
</role>

<goal>
Fold everything worth keeping from this subtask into the note, then close it.
Only look at this subtask's conversation and the note.
</goal>

<working_principles>
- Use `apply_patch_to_note` to merge the results into the relevant sections.
- Keep the note complete and well organised; update stale lines instead of appending duplicates.
- Finally call `pop_subtask` with a one-sentence summary listing everything that happened.
</working_principles>"
    )
}
