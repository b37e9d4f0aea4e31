//! Stage state machine.
//!
//! The stage decides which operations the model may invoke. Legality is an
//! explicit table ([`Stage::allowed_operations`]) checked once, before
//! dispatch, by [`StageController::check`].
//!
//! | Stage | Operations |
//! |-------|------------|
//! | `root` | push |
//! | `regular`, `research` | brainstorm, push, finish, apply_patch |
//! | `conversation` | brainstorm, send_message, end_conversation |
//! | `summarizing` | apply_patch, pop |
//!
//! Transitions:
//!
//! - root or working → working (child frame) via push
//! - working → summarizing via finish (or end_conversation)
//! - summarizing → stage of the new top frame via pop

use crate::error::{Result, StackError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// A named working stage a frame can be opened under.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkingStage {
    /// Planning, character design, and note keeping.
    #[default]
    Regular,
    /// Talking with the user.
    Conversation,
    /// Gathering and analysing information about the user.
    Research,
}

impl WorkingStage {
    pub const ALL: [WorkingStage; 3] = [
        WorkingStage::Regular,
        WorkingStage::Conversation,
        WorkingStage::Research,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkingStage::Regular => "regular",
            WorkingStage::Conversation => "conversation",
            WorkingStage::Research => "research",
        }
    }

    /// One-line description shown to the model when choosing a task type.
    pub fn description(self) -> &'static str {
        match self {
            WorkingStage::Regular => "Planning, character design, or other non-conversational work.",
            WorkingStage::Conversation => "Talking with the user through messages.",
            WorkingStage::Research => "Researching and analysing what is known about the user.",
        }
    }
}

/// Operating mode of the context manager.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(into = "String", try_from = "String")]
pub enum Stage {
    /// Idle at the root frame. Only push is legal.
    Root,
    Working(WorkingStage),
    /// Folding a finished subtask into the note before popping it.
    Summarizing,
}

/// A structural or model-facing operation gated by the stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Brainstorm,
    Push,
    Finish,
    ApplyPatch,
    Pop,
    SendMessage,
    EndConversation,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Brainstorm => "brainstorm",
            Operation::Push => "push",
            Operation::Finish => "finish",
            Operation::ApplyPatch => "apply_patch",
            Operation::Pop => "pop",
            Operation::SendMessage => "send_message",
            Operation::EndConversation => "end_conversation",
        }
    }

    /// Whether the operation changes which frame is active.
    pub fn changes_frame(self) -> bool {
        matches!(self, Operation::Push | Operation::Pop)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Root => "root",
            Stage::Working(w) => w.as_str(),
            Stage::Summarizing => "summarizing",
        }
    }

    /// The stage → allowed operations table.
    pub fn allowed_operations(self) -> &'static [Operation] {
        use Operation::*;
        match self {
            Stage::Root => &[Push],
            Stage::Working(WorkingStage::Regular) => &[Brainstorm, Push, Finish, ApplyPatch],
            Stage::Working(WorkingStage::Conversation) => {
                &[Brainstorm, SendMessage, EndConversation]
            }
            Stage::Working(WorkingStage::Research) => &[Brainstorm, Push, Finish, ApplyPatch],
            Stage::Summarizing => &[ApplyPatch, Pop],
        }
    }

    pub fn allows(self, op: Operation) -> bool {
        self.allowed_operations().contains(&op)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "root" => Ok(Stage::Root),
            "summarizing" => Ok(Stage::Summarizing),
            other => other.parse().map(Stage::Working),
        }
    }
}

impl FromStr for WorkingStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        WorkingStage::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.as_str().to_string()
    }
}

impl TryFrom<String> for Stage {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Tracks the current stage and enforces the transition rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageController {
    current: Stage,
}

impl Default for StageController {
    fn default() -> Self {
        Self::new()
    }
}

impl StageController {
    /// Start in [`Stage::Root`].
    pub fn new() -> Self {
        Self {
            current: Stage::Root,
        }
    }

    /// Resume at a previously saved stage.
    pub fn resume(current: Stage) -> Self {
        Self { current }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Reject `op` if the current stage does not allow it.
    pub fn check(&self, op: Operation) -> Result<()> {
        if self.current.allows(op) {
            Ok(())
        } else {
            Err(StackError::StageViolation {
                operation: op.to_string(),
                stage: self.current.to_string(),
            })
        }
    }

    /// Push transition: the child frame's stage becomes current.
    pub fn enter(&mut self, stage: WorkingStage) -> Result<()> {
        self.check(Operation::Push)?;
        self.transition(Stage::Working(stage));
        Ok(())
    }

    /// Finish transition: working → summarizing, no frame change.
    pub fn finish(&mut self) -> Result<()> {
        match self.current {
            Stage::Working(_) => {
                self.transition(Stage::Summarizing);
                Ok(())
            }
            stage => Err(StackError::StageViolation {
                operation: Operation::Finish.to_string(),
                stage: stage.to_string(),
            }),
        }
    }

    /// Pop transition: restore the stage of the frame that is now active.
    pub fn restore(&mut self, stage: Stage) -> Result<()> {
        self.check(Operation::Pop)?;
        self.transition(stage);
        Ok(())
    }

    fn transition(&mut self, to: Stage) {
        debug!("[stage] {} -> {}", self.current, to);
        self.current = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_allows_only_push() {
        assert_eq!(Stage::Root.allowed_operations(), &[Operation::Push]);
        let ctl = StageController::new();
        assert!(ctl.check(Operation::Push).is_ok());
        assert!(matches!(
            ctl.check(Operation::Pop),
            Err(StackError::StageViolation { .. })
        ));
    }

    #[test]
    fn summarizing_allows_patch_and_pop_only() {
        for op in [
            Operation::Brainstorm,
            Operation::Push,
            Operation::Finish,
            Operation::SendMessage,
            Operation::EndConversation,
        ] {
            assert!(!Stage::Summarizing.allows(op), "{op} should be rejected");
        }
        assert!(Stage::Summarizing.allows(Operation::ApplyPatch));
        assert!(Stage::Summarizing.allows(Operation::Pop));
    }

    #[test]
    fn full_cycle_of_transitions() {
        let mut ctl = StageController::new();
        ctl.enter(WorkingStage::Regular).unwrap();
        assert_eq!(ctl.current(), Stage::Working(WorkingStage::Regular));

        ctl.enter(WorkingStage::Research).unwrap();
        ctl.finish().unwrap();
        assert_eq!(ctl.current(), Stage::Summarizing);

        ctl.restore(Stage::Working(WorkingStage::Regular)).unwrap();
        assert_eq!(ctl.current(), Stage::Working(WorkingStage::Regular));
    }

    #[test]
    fn conversation_cannot_push() {
        let mut ctl = StageController::resume(Stage::Working(WorkingStage::Conversation));
        let err = ctl.enter(WorkingStage::Regular).unwrap_err();
        assert_eq!(
            err.to_string(),
            "operation 'push' is not allowed in stage 'conversation'"
        );
        assert_eq!(ctl.current(), Stage::Working(WorkingStage::Conversation));
    }

    #[test]
    fn finish_outside_working_stage_is_rejected() {
        let mut ctl = StageController::new();
        assert!(ctl.finish().is_err());
        let mut ctl = StageController::resume(Stage::Summarizing);
        assert!(ctl.finish().is_err());
        assert_eq!(ctl.current(), Stage::Summarizing);
    }

    #[test]
    fn restore_requires_summarizing() {
        let mut ctl = StageController::resume(Stage::Working(WorkingStage::Regular));
        assert!(ctl.restore(Stage::Root).is_err());
    }

    #[test]
    fn stage_names_round_trip_through_serde() {
        for stage in [
            Stage::Root,
            Stage::Summarizing,
            Stage::Working(WorkingStage::Conversation),
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            let back: Stage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, stage);
        }
        assert_eq!(
            serde_json::to_string(&Stage::Working(WorkingStage::Research)).unwrap(),
            "\"research\""
        );
        assert!(serde_json::from_str::<Stage>("\"idle\"").is_err());
    }
}
