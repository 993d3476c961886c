//! Undo and redo of the local player's note edits.

use crate::command::Command;

/// One executed command and the command that takes it back.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    done: Command,
    inverse: Command,
}

#[derive(Debug, Default)]
pub struct UndoHistory {
    undo: Vec<Entry>,
    redo: Vec<Entry>,
}

impl UndoHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember an executed command.  Clears the redo stack.
    pub fn record(&mut self, done: Command, inverse: Command) {
        self.redo.clear();
        self.undo.push(Entry { done, inverse });
    }

    /// Pop the latest command.  Returns the command to execute to undo it.
    pub fn undo(&mut self) -> Option<Command> {
        let entry = self.undo.pop()?;
        let inverse = entry.inverse.clone();
        self.redo.push(entry);
        Some(inverse)
    }

    /// Pop the latest undone command.  Returns the command to execute again.
    pub fn redo(&mut self) -> Option<Command> {
        let entry = self.redo.pop()?;
        let done = entry.done.clone();
        self.undo.push(entry);
        Some(done)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(value: u8) -> (Command, Command) {
        (
            Command::AddNote { cell: 0, value },
            Command::RemoveNote { cell: 0, value },
        )
    }

    #[test]
    fn undo_then_redo_walks_back_and_forth() {
        let mut h = UndoHistory::new();
        let (a, a_inv) = add(1);
        let (b, b_inv) = add(2);
        h.record(a.clone(), a_inv.clone());
        h.record(b.clone(), b_inv.clone());

        assert_eq!(h.undo(), Some(b_inv));
        assert_eq!(h.undo(), Some(a_inv));
        assert_eq!(h.undo(), None);
        assert_eq!(h.redo(), Some(a));
        assert_eq!(h.redo(), Some(b));
        assert!(!h.can_redo());
    }

    #[test]
    fn new_command_drops_redo() {
        let mut h = UndoHistory::new();
        let (a, a_inv) = add(1);
        h.record(a, a_inv);
        h.undo();
        assert!(h.can_redo());
        let (b, b_inv) = add(2);
        h.record(b, b_inv);
        assert!(!h.can_redo());
        assert!(h.can_undo());
    }
}
