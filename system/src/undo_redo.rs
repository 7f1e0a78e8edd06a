use crate::types::StrokeId;

/// Per-connection undo/redo stacks over the shared history.
///
/// Only ids of strokes drawn by the owning connection are ever pushed, so
/// undo can never reach another participant's work. An id lives in at most
/// one of the two stacks.
#[derive(Debug, Default, Clone)]
pub struct UndoRedoState {
    undo_stack: Vec<StrokeId>,
    redo_stack: Vec<StrokeId>,
}

impl UndoRedoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// New work invalidates the redo branch. Returns the discarded ids.
    pub fn record_draw(&mut self, stroke_id: StrokeId) -> Vec<StrokeId> {
        self.undo_stack.push(stroke_id);
        std::mem::take(&mut self.redo_stack)
    }

    pub fn undo(&mut self) -> Option<StrokeId> {
        let stroke_id = self.undo_stack.pop()?;
        self.redo_stack.push(stroke_id);
        Some(stroke_id)
    }

    pub fn redo(&mut self) -> Option<StrokeId> {
        let stroke_id = self.redo_stack.pop()?;
        self.undo_stack.push(stroke_id);
        Some(stroke_id)
    }

    /// Empties both stacks. Returns the ids that were waiting to be redone.
    pub fn reset(&mut self) -> Vec<StrokeId> {
        self.undo_stack.clear();
        std::mem::take(&mut self.redo_stack)
    }

    pub fn undo_stack(&self) -> &[StrokeId] {
        &self.undo_stack
    }

    pub fn redo_stack(&self) -> &[StrokeId] {
        &self.redo_stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint(state: &UndoRedoState) {
        for id in state.undo_stack() {
            assert!(!state.redo_stack().contains(id), "{} in both stacks", id);
        }
    }

    #[test]
    fn it_moves_ids_between_stacks() {
        let mut state = UndoRedoState::new();
        state.record_draw(StrokeId(1));
        state.record_draw(StrokeId(2));

        assert_eq!(state.undo(), Some(StrokeId(2)));
        assert_eq!(state.undo(), Some(StrokeId(1)));
        assert_eq!(state.undo(), None);
        assert_eq!(state.redo_stack(), &[StrokeId(2), StrokeId(1)]);
        assert_disjoint(&state);

        assert_eq!(state.redo(), Some(StrokeId(1)));
        assert_eq!(state.undo_stack(), &[StrokeId(1)]);
        assert_disjoint(&state);
    }

    #[test]
    fn it_is_noop_on_empty_stacks() {
        let mut state = UndoRedoState::new();
        assert_eq!(state.undo(), None);
        assert_eq!(state.redo(), None);
        assert!(state.undo_stack().is_empty());
        assert!(state.redo_stack().is_empty());
    }

    #[test]
    fn it_discards_redo_branch_on_new_draw() {
        let mut state = UndoRedoState::new();
        state.record_draw(StrokeId(1));
        state.undo();

        let discarded = state.record_draw(StrokeId(2));
        assert_eq!(discarded, vec![StrokeId(1)]);
        assert_eq!(state.redo(), None);
        assert_eq!(state.undo_stack(), &[StrokeId(2)]);
    }

    #[test]
    fn it_resets_both_stacks() {
        let mut state = UndoRedoState::new();
        state.record_draw(StrokeId(1));
        state.record_draw(StrokeId(2));
        state.undo();

        assert_eq!(state.reset(), vec![StrokeId(2)]);
        assert_eq!(state.undo(), None);
        assert_eq!(state.redo(), None);
    }
}
