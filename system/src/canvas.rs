use crate::types::{ConnectionId, Cursor, CursorMap, Point, Stroke, StrokeId};
use crate::undo_redo::UndoRedoState;
use std::collections::HashMap;

/// Everything the canvas keeps for one drawing connection.
///
/// Dropping the participant drops its stacks and cursor together.
#[derive(Debug, Default, Clone)]
pub struct Participant {
    pub undo_redo: UndoRedoState,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanvasSnapshot {
    pub drawings: Vec<Stroke>,
    pub users: CursorMap,
}

/// Shared drawing history and cursors. Not network-aware.
///
/// Strokes are kept in an arena keyed by id. `history` lists the visible ones
/// in the order they became visible. A stroke removed by undo stays in the
/// arena for as long as some participant can still redo it.
#[derive(Debug, Default)]
pub struct CanvasState {
    strokes: HashMap<StrokeId, Stroke>,
    history: Vec<StrokeId>,
    next_stroke_id: u64,
    participants: HashMap<ConnectionId, Participant>,
}

impl CanvasState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, connection_id: ConnectionId) {
        self.participants.entry(connection_id).or_default();
    }

    /// Removes the participant with its stacks and cursor. Strokes it could
    /// still redo are no longer reachable and are dropped from the arena.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> bool {
        if let Some(mut participant) = self.participants.remove(connection_id) {
            let unreachable = participant.undo_redo.reset();
            self.forget(&unreachable);
            true
        } else {
            false
        }
    }

    pub fn participant(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(connection_id)
    }

    pub fn participant_mut(&mut self, connection_id: &ConnectionId) -> Option<&mut Participant> {
        self.participants.get_mut(connection_id)
    }

    pub fn participants_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.participants.values_mut()
    }

    pub fn append_stroke(
        &mut self,
        author: ConnectionId,
        points: Vec<Point>,
        username: String,
        color: String,
    ) -> StrokeId {
        self.next_stroke_id += 1;
        let id = StrokeId(self.next_stroke_id);
        self.strokes.insert(
            id,
            Stroke {
                id,
                author,
                points,
                username,
                color,
            },
        );
        self.history.push(id);
        id
    }

    /// Hides the stroke. Absent ids are ignored.
    pub fn remove_stroke(&mut self, stroke_id: &StrokeId) -> bool {
        if let Some(index) = self.history.iter().position(|id| id == stroke_id) {
            self.history.remove(index);
            true
        } else {
            false
        }
    }

    /// Makes a hidden stroke visible again at the tail of the history, not at
    /// its original position.
    pub fn re_append_stroke(&mut self, stroke_id: &StrokeId) -> bool {
        if !self.strokes.contains_key(stroke_id) || self.history.contains(stroke_id) {
            return false;
        }
        self.history.push(*stroke_id);
        true
    }

    /// Empties history and arena. Participants and cursors stay.
    pub fn clear(&mut self) {
        self.history.clear();
        self.strokes.clear();
    }

    /// Drops arena entries that are not visible.
    pub fn forget(&mut self, stroke_ids: &[StrokeId]) {
        for stroke_id in stroke_ids {
            if !self.history.contains(stroke_id) {
                self.strokes.remove(stroke_id);
            }
        }
    }

    pub fn stroke(&self, stroke_id: &StrokeId) -> Option<&Stroke> {
        self.strokes.get(stroke_id)
    }

    pub fn history(&self) -> &[StrokeId] {
        &self.history
    }

    pub fn arena_len(&self) -> usize {
        self.strokes.len()
    }

    pub fn drawings(&self) -> Vec<Stroke> {
        self.history
            .iter()
            .filter_map(|id| self.strokes.get(id))
            .cloned()
            .collect()
    }

    /// Ignored for connections that already left.
    pub fn set_cursor(&mut self, connection_id: &ConnectionId, cursor: Cursor) -> bool {
        if let Some(participant) = self.participants.get_mut(connection_id) {
            participant.cursor = Some(cursor);
            true
        } else {
            false
        }
    }

    pub fn drop_cursor(&mut self, connection_id: &ConnectionId) {
        if let Some(participant) = self.participants.get_mut(connection_id) {
            participant.cursor = None;
        }
    }

    pub fn cursors(&self) -> CursorMap {
        self.participants
            .iter()
            .filter_map(|(id, participant)| participant.cursor.clone().map(|c| (*id, c)))
            .collect()
    }

    pub fn snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot {
            drawings: self.drawings(),
            users: self.cursors(),
        }
    }
}
