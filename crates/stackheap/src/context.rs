//! The context manager: frame stack + note + stage.
//!
//! [`ContextManager`] is the single owner of the agent's working state. Each
//! cycle the runner calls [`build_conversation`](ContextManager::build_conversation),
//! hands the result to the model, executes structural operations through the
//! gated methods here, and feeds the new turns back with
//! [`ingest`](ContextManager::ingest).
//!
//! State is persisted as one JSON file plus a `note.md` copy of the note
//! next to it for human inspection.

use crate::document::Document;
use crate::error::Result;
use crate::frame::{Frame, FrameStack};
use crate::stage::{Operation, Stage, StageController, WorkingStage};
use crate::turn::Turn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the human-readable note written beside the state file.
pub const NOTE_FILE_NAME: &str = "note.md";

/// Path of the note copy that [`ContextManager::save`] writes for `state_path`.
pub fn note_path_for(state_path: &Path) -> PathBuf {
    state_path.with_file_name(NOTE_FILE_NAME)
}

/// Owns the frame stack, the note, and the stage controller.
#[derive(Debug, Clone)]
pub struct ContextManager {
    stack: FrameStack,
    note: Document,
    stage: StageController,
    /// Every ingested turn, never pruned.
    history: Vec<Turn>,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(crate::prompt::DEFAULT_NOTE_TEMPLATE)
    }
}

impl ContextManager {
    /// Fresh state: root frame only, root stage, the given note text.
    pub fn new(note: impl Into<String>) -> Self {
        Self {
            stack: FrameStack::new(),
            note: Document::new(note),
            stage: StageController::new(),
            history: Vec::new(),
        }
    }

    pub fn stack(&self) -> &FrameStack {
        &self.stack
    }

    pub fn note(&self) -> &Document {
        &self.note
    }

    pub fn stage(&self) -> Stage {
        self.stage.current()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn active_frame(&self) -> &Frame {
        self.stack.top()
    }

    /// Reject `op` if the current stage does not allow it.
    pub fn check(&self, op: Operation) -> Result<()> {
        self.stage.check(op)
    }

    // ── Conversation ───────────────────────────────────────────────

    /// The turns to send to the model: a preamble exposing the note and the
    /// active frame id, then every frame's log, outermost first.
    pub fn build_conversation(&self) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(self.stack.message_count() + 1);
        turns.push(Turn::user(format!(
            "<system>Here is your editable note:\n```note\n{}\n```\n\
             You are now working on subtask: {}</system>",
            self.note.text(),
            self.active_frame().id
        )));
        for frame in self.stack.frames() {
            turns.extend(frame.messages.iter().cloned());
        }
        turns
    }

    /// Record a batch of new turns.
    ///
    /// The full transcript always keeps the batch. The active frame gets it
    /// unless the batch is the one that completed a pop.
    pub fn ingest(&mut self, turns: Vec<Turn>) {
        if turns.is_empty() {
            return;
        }
        debug!(
            "[context] ingest {} turn(s) into '{}'",
            turns.len(),
            self.active_frame().id
        );
        self.history.extend(turns.iter().cloned());
        self.stack.append(turns);
    }

    // ── Structural operations ──────────────────────────────────────

    /// Open a child frame under `stage` and make it active.
    pub fn push(
        &mut self,
        id: impl Into<String>,
        goal: impl Into<String>,
        stage: WorkingStage,
    ) -> Result<()> {
        self.push_frame(Frame::new(id, goal, Stage::Working(stage)), stage)
    }

    /// Like [`push`](Self::push), recording the call id of the invocation
    /// that opened the frame so the right call is carried on pop.
    pub fn push_opened_by(
        &mut self,
        id: impl Into<String>,
        goal: impl Into<String>,
        stage: WorkingStage,
        call_id: impl Into<String>,
    ) -> Result<()> {
        let frame = Frame::new(id, goal, Stage::Working(stage)).with_opened_by(call_id);
        self.push_frame(frame, stage)
    }

    fn push_frame(&mut self, frame: Frame, stage: WorkingStage) -> Result<()> {
        self.stage.check(Operation::Push)?;
        self.stack.push(frame)?;
        self.stage.enter(stage)
    }

    /// Leave the working stage and start summarizing the active frame.
    pub fn finish(&mut self) -> Result<()> {
        self.stage.finish()?;
        info!("[context] finished '{}'", self.active_frame().id);
        Ok(())
    }

    /// Pop the active frame with `summary`, restoring the parent's stage.
    pub fn pop(&mut self, summary: &str) -> Result<()> {
        self.stage.check(Operation::Pop)?;
        let restored = self.stack.pop(summary)?;
        self.stage.restore(restored)
    }

    /// Apply a patch to the note. On failure the note is unchanged.
    pub fn apply_patch(&mut self, patch_text: &str) -> Result<()> {
        self.stage.check(Operation::ApplyPatch)?;
        let patched = self.note.apply_patch(patch_text)?;
        info!(
            "[context] note patched (v{} -> v{})",
            self.note.version(),
            patched.version()
        );
        self.note = patched;
        Ok(())
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Write the state to `path` atomically and the note to `note.md` in the
    /// same directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let snapshot = SnapshotRef {
            saved_at: chrono::Utc::now().to_rfc3339(),
            stage: self.stage.current(),
            stack: &self.stack,
            note: &self.note,
            history: &self.history,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        std::fs::write(note_path_for(path), self.note.text())?;

        debug!(
            "[context] saved {} frame(s) to {}",
            self.stack.depth(),
            path.display()
        );
        Ok(())
    }

    /// Load state previously written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&json)?;
        info!(
            "[context] loaded {} frame(s) from {} (saved {})",
            snapshot.stack.depth(),
            path.display(),
            snapshot.saved_at.as_deref().unwrap_or("unknown")
        );
        Ok(Self {
            stack: snapshot.stack,
            note: snapshot.note,
            stage: StageController::resume(snapshot.stage),
            history: snapshot.history,
        })
    }

    /// Load from `path` if it exists, otherwise start fresh with `note`.
    pub fn load_or_new(path: &Path, note: impl Into<String>) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("[context] no state at {}, starting fresh", path.display());
            Ok(Self::new(note))
        }
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    saved_at: String,
    stage: Stage,
    stack: &'a FrameStack,
    note: &'a Document,
    history: &'a [Turn],
}

#[derive(Deserialize)]
struct Snapshot {
    #[serde(default)]
    saved_at: Option<String>,
    stage: Stage,
    stack: FrameStack,
    note: Document,
    #[serde(default)]
    history: Vec<Turn>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use crate::frame::ROOT_FRAME_ID;
    use crate::tools::names;

    const PATCH: &str = "*** Begin Patch\n@@ # Plan\n-(empty)\n+step 1: gather info\n*** End Patch\n";

    /// Push `id` the way a model response does: the push call and its result
    /// land in the new frame.
    fn push_via_call(cm: &mut ContextManager, id: &str, call_id: &str) {
        cm.push_opened_by(id, "goal", WorkingStage::Regular, call_id)
            .unwrap();
        cm.ingest(vec![
            Turn::tool_call(call_id, names::START_SUBTASK, "{}"),
            Turn::tool_result(call_id, "started"),
        ]);
    }

    #[test]
    fn build_conversation_starts_with_note_preamble() {
        let mut cm = ContextManager::new("# Plan\n(empty)");
        cm.ingest(vec![Turn::user("hi")]);
        let conv = cm.build_conversation();
        assert_eq!(conv.len(), 2);
        let Turn::Message { content, .. } = &conv[0] else {
            panic!("preamble should be a message");
        };
        assert!(content.contains("# Plan\n(empty)"));
        assert!(content.contains(&format!("working on subtask: {ROOT_FRAME_ID}")));
    }

    #[test]
    fn conversation_lists_frames_outermost_first() {
        let mut cm = ContextManager::new("");
        cm.ingest(vec![Turn::user("root turn")]);
        push_via_call(&mut cm, "child", "c1");
        let conv = cm.build_conversation();
        assert_eq!(conv[1], Turn::user("root turn"));
        assert_eq!(conv[2].call_id(), Some("c1"));
    }

    #[test]
    fn push_then_pop_leaves_residue_in_root() {
        let mut cm = ContextManager::new("");
        push_via_call(&mut cm, "research", "c1");
        assert_eq!(cm.stack().depth(), 2);
        assert_eq!(cm.stage(), Stage::Working(WorkingStage::Regular));

        cm.finish().unwrap();
        cm.pop("done").unwrap();
        assert_eq!(cm.stack().depth(), 1);
        assert_eq!(cm.stage(), Stage::Root);
        assert_eq!(cm.active_frame().messages.len(), 2);
    }

    #[test]
    fn pop_on_root_is_a_stage_violation_before_empty_stack() {
        let mut cm = ContextManager::new("");
        assert!(matches!(
            cm.pop("done"),
            Err(StackError::StageViolation { .. })
        ));
        assert_eq!(cm.stack().depth(), 1);
    }

    #[test]
    fn apply_patch_requires_working_or_summarizing_stage() {
        let mut cm = ContextManager::new("# Plan\n(empty)\n");
        assert!(matches!(
            cm.apply_patch(PATCH),
            Err(StackError::StageViolation { .. })
        ));

        push_via_call(&mut cm, "plan", "c1");
        cm.apply_patch(PATCH).unwrap();
        assert_eq!(cm.note().text(), "# Plan\nstep 1: gather info");

        // Second application fails and keeps the note.
        assert!(matches!(
            cm.apply_patch(PATCH),
            Err(StackError::HunkMismatch { .. })
        ));
        assert_eq!(cm.note().version(), 1);
    }

    #[test]
    fn failing_second_hunk_commits_nothing() {
        let mut cm = ContextManager::new("# Plan\n(empty)\n# Story\nonce");
        push_via_call(&mut cm, "plan", "c1");
        let before = cm.note().text().to_string();
        let version = cm.note().version();

        let err = cm
            .apply_patch(
                "*** Begin Patch\n@@ # Plan\n-(empty)\n+step 1\n@@ # Story\n-missing\n+x\n*** End Patch\n",
            )
            .unwrap_err();
        assert!(matches!(err, StackError::HunkMismatch { index: 1, .. }));
        assert_eq!(cm.note().text(), before);
        assert_eq!(cm.note().version(), version);
        assert!(!cm.note().text().contains("step 1"));
    }

    #[test]
    fn duplicate_push_keeps_stage() {
        let mut cm = ContextManager::new("");
        push_via_call(&mut cm, "a", "c1");
        assert!(matches!(
            cm.push("a", "g", WorkingStage::Research),
            Err(StackError::DuplicateFrameId(_))
        ));
        assert_eq!(cm.stage(), Stage::Working(WorkingStage::Regular));
        assert_eq!(cm.stack().depth(), 2);
    }

    #[test]
    fn conversation_stage_cannot_push() {
        let mut cm = ContextManager::new("");
        push_via_call(&mut cm, "a", "c1");
        cm.push("chat", "g", WorkingStage::Conversation).unwrap();
        assert!(matches!(
            cm.push("b", "g", WorkingStage::Research),
            Err(StackError::StageViolation { .. })
        ));
        assert_eq!(cm.active_frame().id, "chat");
    }

    #[test]
    fn ingest_records_history_even_when_frame_skips() {
        let mut cm = ContextManager::new("");
        push_via_call(&mut cm, "a", "c1");
        cm.finish().unwrap();
        cm.pop("done").unwrap();
        cm.ingest(vec![
            Turn::tool_call("p1", names::POP_SUBTASK, "{}"),
            Turn::tool_result("p1", "[2 messages removed]"),
        ]);
        assert_eq!(cm.active_frame().messages.len(), 2);
        assert_eq!(cm.history().len(), 4);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("conversation.json");

        let mut cm = ContextManager::new("# Plan\n(empty)\n");
        push_via_call(&mut cm, "plan", "c1");
        cm.apply_patch(PATCH).unwrap();
        cm.save(&path).unwrap();

        let note = std::fs::read_to_string(dir.path().join("logs").join(NOTE_FILE_NAME)).unwrap();
        assert_eq!(note, "# Plan\nstep 1: gather info");

        let loaded = ContextManager::load(&path).unwrap();
        assert_eq!(loaded.stack(), cm.stack());
        assert_eq!(loaded.note(), cm.note());
        assert_eq!(loaded.stage(), cm.stage());
        assert_eq!(loaded.history(), cm.history());
        assert_eq!(loaded.active_frame().opened_by.as_deref(), Some("c1"));
    }

    #[test]
    fn load_or_new_starts_fresh_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let cm = ContextManager::load_or_new(&dir.path().join("missing.json"), "# Note").unwrap();
        assert_eq!(cm.note().text(), "# Note");
        assert_eq!(cm.stage(), Stage::Root);
    }

    #[test]
    fn load_rejects_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = ContextManager::load(&path).unwrap_err();
        assert!(!err.is_recoverable());
    }
}
