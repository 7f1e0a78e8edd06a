use crate::canvas::CanvasState;
use crate::message::{DrawingCommand, DrawingEvent};
use crate::types::{ConnectionId, Cursor};

/// The drawing coordinator's state machine.
///
/// Every method takes `&mut self`, so whoever owns the session applies
/// commands one at a time. The returned event, if any, is meant for every
/// drawing connection.
#[derive(Debug, Default)]
pub struct Session {
    canvas: CanvasState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canvas(&self) -> &CanvasState {
        &self.canvas
    }

    /// Activates a connection. Returns what the joining connection alone must
    /// receive to start consistent with the group.
    pub fn join(&mut self, connection_id: ConnectionId) -> Vec<DrawingEvent> {
        self.canvas.join(connection_id);
        let snapshot = self.canvas.snapshot();
        vec![
            DrawingEvent::History {
                drawings: snapshot.drawings,
            },
            DrawingEvent::CursorUpdate {
                users: snapshot.users,
            },
        ]
    }

    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<DrawingEvent> {
        if self.canvas.leave(connection_id) {
            Some(DrawingEvent::CursorUpdate {
                users: self.canvas.cursors(),
            })
        } else {
            None
        }
    }

    pub fn apply(&mut self, from: ConnectionId, command: DrawingCommand) -> Option<DrawingEvent> {
        if self.canvas.participant(&from).is_none() {
            log::warn!("Ignoring command from inactive connection {}", from);
            return None;
        }

        match command {
            DrawingCommand::Draw {
                points,
                username,
                color,
            } => {
                let stroke_id = self.canvas.append_stroke(from, points, username, color);
                let discarded = self
                    .canvas
                    .participant_mut(&from)?
                    .undo_redo
                    .record_draw(stroke_id);
                self.canvas.forget(&discarded);
                self.canvas
                    .stroke(&stroke_id)
                    .cloned()
                    .map(DrawingEvent::Draw)
            }
            DrawingCommand::Undo => {
                let stroke_id = self.canvas.participant_mut(&from)?.undo_redo.undo()?;
                self.canvas.remove_stroke(&stroke_id);
                Some(self.history())
            }
            DrawingCommand::Redo => {
                let stroke_id = self.canvas.participant_mut(&from)?.undo_redo.redo()?;
                self.canvas.re_append_stroke(&stroke_id);
                Some(self.history())
            }
            DrawingCommand::Cursor {
                username,
                x,
                y,
                color,
            } => {
                self.canvas.set_cursor(
                    &from,
                    Cursor {
                        x,
                        y,
                        color,
                        username,
                    },
                );
                Some(DrawingEvent::CursorUpdate {
                    users: self.canvas.cursors(),
                })
            }
            DrawingCommand::Clear => {
                self.canvas.clear();
                for participant in self.canvas.participants_mut() {
                    participant.undo_redo.reset();
                }
                Some(DrawingEvent::Clear)
            }
        }
    }

    fn history(&self) -> DrawingEvent {
        DrawingEvent::History {
            drawings: self.canvas.drawings(),
        }
    }
}
