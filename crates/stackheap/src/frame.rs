//! Frames and the frame stack.
//!
//! Each [`Frame`] holds the transcript of one subtask. Popping a frame
//! discards its transcript and leaves a small residue in the parent:
//!
//! - the frame's leading reasoning turn, if it has one;
//! - the invocation that opened the subtask;
//! - that invocation's result, rewritten to a summary notice.

use crate::error::{Result, StackError};
use crate::stage::Stage;
use crate::tools::names;
use crate::turn::Turn;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Id of the frame every stack starts with.
pub const ROOT_FRAME_ID: &str = "root";

/// One subtask on the stack.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub id: String,
    pub goal: String,
    /// Stage the frame was opened under. Restored when the frame becomes
    /// active again.
    pub stage: Stage,
    pub messages: Vec<Turn>,
    /// Call id of the tool invocation that opened this frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_by: Option<String>,
}

impl Frame {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            stage,
            messages: Vec::new(),
            opened_by: None,
        }
    }

    pub fn root() -> Self {
        Self::new(ROOT_FRAME_ID, "", Stage::Root)
    }

    /// Record the call id of the invocation that opened this frame.
    pub fn with_opened_by(mut self, call_id: impl Into<String>) -> Self {
        self.opened_by = Some(call_id.into());
        self
    }

    /// The invocation carried into the parent on pop, with its call id.
    fn opening_call(&self) -> Option<(&Turn, &str)> {
        self.messages.iter().find_map(|t| match t {
            Turn::ToolCall { call_id, .. }
                if self.opened_by.as_deref().is_none_or(|id| id == call_id) =>
            {
                Some((t, call_id.as_str()))
            }
            _ => None,
        })
    }
}

/// Notice that replaces the opening invocation's result on pop.
pub fn pop_notice(removed: usize, summary: &str, parent_id: &str) -> String {
    format!(
        "[{removed} messages removed] Subtask ended with summary: \"{summary}\". \
         Now active: {parent_id}."
    )
}

/// Non-empty stack of frames. The last frame is active.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(try_from = "Vec<Frame>", into = "Vec<Frame>")]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Vec<Frame>> for FrameStack {
    type Error = String;

    fn try_from(frames: Vec<Frame>) -> std::result::Result<Self, Self::Error> {
        if frames.is_empty() {
            return Err("frame stack must contain the root frame".into());
        }
        Ok(Self { frames })
    }
}

impl From<FrameStack> for Vec<Frame> {
    fn from(stack: FrameStack) -> Self {
        stack.frames
    }
}

impl FrameStack {
    /// A stack holding only the root frame.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::root()],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The active frame.
    pub fn top(&self) -> &Frame {
        // The stack is never empty: construction and pop both guarantee a root.
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn contains(&self, id: &str) -> bool {
        self.frames.iter().any(|f| f.id == id)
    }

    /// Total turns across every frame.
    pub fn message_count(&self) -> usize {
        self.frames.iter().map(|f| f.messages.len()).sum()
    }

    /// Push an empty frame.
    ///
    /// Fails with [`StackError::DuplicateFrameId`] if a frame with the same
    /// id is already on the stack.
    pub fn push(&mut self, frame: Frame) -> Result<()> {
        if self.contains(&frame.id) {
            return Err(StackError::DuplicateFrameId(frame.id));
        }
        info!(
            "[stack] push '{}' ({}) at depth {}",
            frame.id,
            frame.stage,
            self.depth() + 1
        );
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the active frame, carrying its residue into the parent.
    ///
    /// Returns the stage of the frame that is active after the pop.
    pub fn pop(&mut self, summary: &str) -> Result<Stage> {
        if self.depth() <= 1 {
            return Err(StackError::EmptyStack);
        }

        // Validate before mutating so a corrupt frame leaves the stack intact.
        let residue = {
            let top = self.top();
            let parent = &self.frames[self.frames.len() - 2];
            residue_for(top, &parent.id, summary)?
        };

        let popped = self.frames.pop().ok_or(StackError::EmptyStack)?;
        let parent = self.top_mut();
        info!(
            "[stack] pop '{}' ({} messages) -> '{}'",
            popped.id,
            popped.messages.len(),
            parent.id
        );
        debug!("[stack] carrying {} residue turn(s)", residue.len());
        parent.messages.extend(residue);
        Ok(parent.stage)
    }

    /// Append a batch of turns to the active frame.
    ///
    /// A batch whose first invocation is a successful pop is dropped: the pop
    /// already wrote its residue into the parent.
    pub fn append(&mut self, turns: Vec<Turn>) {
        if is_completed_pop(&turns) {
            debug!("[stack] skipping batch of completed pop");
            return;
        }
        self.top_mut().messages.extend(turns);
    }
}

fn residue_for(frame: &Frame, parent_id: &str, summary: &str) -> Result<Vec<Turn>> {
    let mut residue = Vec::with_capacity(3);
    if let Some(first @ Turn::Reasoning { .. }) = frame.messages.first() {
        residue.push(first.clone());
    }

    let (call, call_id) = frame.opening_call().ok_or_else(|| {
        StackError::CorruptStack(format!("frame '{}' has no opening invocation", frame.id))
    })?;
    let has_result = frame
        .messages
        .iter()
        .any(|t| matches!(t, Turn::ToolResult { call_id: id, .. } if id == call_id));
    if !has_result {
        return Err(StackError::CorruptStack(format!(
            "frame '{}' has no result for invocation '{call_id}'",
            frame.id
        )));
    }

    residue.push(call.clone());
    residue.push(Turn::tool_result(
        call_id,
        pop_notice(frame.messages.len(), summary, parent_id),
    ));
    Ok(residue)
}

/// Whether the batch's first invocation is a pop whose result succeeded.
fn is_completed_pop(turns: &[Turn]) -> bool {
    let Some(Turn::ToolCall { call_id, name, .. }) =
        turns.iter().find(|t| matches!(t, Turn::ToolCall { .. }))
    else {
        return false;
    };
    if name != names::POP_SUBTASK {
        return false;
    }
    turns
        .iter()
        .find(|t| matches!(t, Turn::ToolResult { call_id: id, .. } if id == call_id))
        .is_some_and(|result| !result.is_error_result())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::WorkingStage;

    fn regular() -> Stage {
        Stage::Working(WorkingStage::Regular)
    }

    fn opened_child(id: &str) -> FrameStack {
        let mut stack = FrameStack::new();
        stack
            .push(Frame::new(id, "look things up", regular()).with_opened_by("c1"))
            .unwrap();
        stack.append(vec![
            Turn::reasoning("I should research first"),
            Turn::tool_call("c1", names::START_SUBTASK, r#"{"subtask_id":"research"}"#),
            Turn::tool_result("c1", "Subtask started"),
        ]);
        stack
    }

    #[test]
    fn new_stack_has_root_only() {
        let stack = FrameStack::new();
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().id, ROOT_FRAME_ID);
        assert_eq!(stack.top().stage, Stage::Root);
    }

    #[test]
    fn pop_on_root_fails_and_leaves_stack() {
        let mut stack = FrameStack::new();
        stack.append(vec![Turn::user("hello")]);
        let before = stack.clone();
        assert!(matches!(stack.pop("done"), Err(StackError::EmptyStack)));
        assert_eq!(stack, before);
    }

    #[test]
    fn pop_carries_reasoning_call_and_rewritten_result() {
        let mut stack = opened_child("research");
        stack.append(vec![
            Turn::tool_call("c2", names::BRAINSTORM, "{}"),
            Turn::tool_result("c2", "thinking"),
        ]);

        let stage = stack.pop("done").unwrap();
        assert_eq!(stage, Stage::Root);
        assert_eq!(stack.depth(), 1);

        let root = &stack.top().messages;
        assert_eq!(root.len(), 3);
        assert!(root[0].is_reasoning());
        assert_eq!(root[1].call_id(), Some("c1"));
        assert_eq!(
            root[2],
            Turn::tool_result("c1", pop_notice(5, "done", ROOT_FRAME_ID))
        );
    }

    #[test]
    fn pop_without_leading_reasoning_leaves_two_turns() {
        let mut stack = FrameStack::new();
        stack.push(Frame::new("research", "g", regular())).unwrap();
        stack.append(vec![
            Turn::tool_call("c1", names::START_SUBTASK, "{}"),
            Turn::tool_result("c1", "ok"),
        ]);
        stack.pop("done").unwrap();
        let root = &stack.top().messages;
        assert_eq!(root.len(), 2);
        assert!(
            matches!(&root[1], Turn::ToolResult { output, .. } if output.contains("2 messages removed"))
        );
    }

    #[test]
    fn opened_by_selects_the_right_invocation() {
        let mut stack = FrameStack::new();
        stack
            .push(Frame::new("child", "g", regular()).with_opened_by("c2"))
            .unwrap();
        stack.append(vec![
            Turn::tool_call("c1", names::BRAINSTORM, "{}"),
            Turn::tool_result("c1", "idea"),
            Turn::tool_call("c2", names::START_SUBTASK, "{}"),
            Turn::tool_result("c2", "started"),
        ]);
        stack.pop("ok").unwrap();
        assert_eq!(stack.top().messages[0].call_id(), Some("c2"));
    }

    #[test]
    fn pop_without_invocation_is_corruption() {
        let mut stack = FrameStack::new();
        stack.push(Frame::new("child", "g", regular())).unwrap();
        stack.append(vec![Turn::assistant("no tools here")]);
        let before = stack.clone();
        assert!(matches!(stack.pop("x"), Err(StackError::CorruptStack(_))));
        assert_eq!(stack, before);
    }

    #[test]
    fn pop_without_result_is_corruption() {
        let mut stack = FrameStack::new();
        stack.push(Frame::new("child", "g", regular())).unwrap();
        stack.append(vec![Turn::tool_call("c1", names::START_SUBTASK, "{}")]);
        let err = stack.pop("x").unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn push_rejects_duplicate_ids() {
        let mut stack = FrameStack::new();
        stack.push(Frame::new("a", "g", regular())).unwrap();
        assert!(matches!(
            stack.push(Frame::new("a", "g", regular())),
            Err(StackError::DuplicateFrameId(_))
        ));
        assert!(matches!(
            stack.push(Frame::new(ROOT_FRAME_ID, "g", regular())),
            Err(StackError::DuplicateFrameId(_))
        ));
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn append_skips_successful_pop_batch() {
        let mut stack = FrameStack::new();
        stack.append(vec![
            Turn::reasoning("wrap up"),
            Turn::tool_call("p1", names::POP_SUBTASK, r#"{"summary":"done"}"#),
            Turn::tool_result("p1", pop_notice(4, "done", ROOT_FRAME_ID)),
        ]);
        assert!(stack.top().messages.is_empty());
    }

    #[test]
    fn append_keeps_failed_pop_batch() {
        let mut stack = FrameStack::new();
        stack.append(vec![
            Turn::tool_call("p1", names::POP_SUBTASK, "{}"),
            Turn::tool_result("p1", "Error: cannot pop the root frame"),
        ]);
        assert_eq!(stack.top().messages.len(), 2);
    }

    #[test]
    fn append_only_checks_first_invocation() {
        let mut stack = FrameStack::new();
        stack.append(vec![
            Turn::tool_call("b1", names::BRAINSTORM, "{}"),
            Turn::tool_result("b1", "idea"),
            Turn::tool_call("p1", names::POP_SUBTASK, "{}"),
            Turn::tool_result("p1", "[3 messages removed]"),
        ]);
        assert_eq!(stack.top().messages.len(), 4);
    }

    #[test]
    fn empty_stack_does_not_deserialize() {
        let err = serde_json::from_str::<FrameStack>("[]").unwrap_err();
        assert!(err.to_string().contains("root frame"));
    }
}
