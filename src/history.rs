use crate::models::Artifact;

/// Linear undo/redo stack over generated artifacts.
///
/// A push after undo drops every entry past the cursor, so there is never
/// more than one forward branch.
#[derive(Debug, Default, Clone)]
pub struct EditHistory {
    entries: Vec<Artifact>,
    cursor: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Moved(usize),
    NothingToUndo,
    NothingToRedo,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn push(&mut self, artifact: Artifact) {
        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        }
        self.entries.push(artifact);
        self.cursor = Some(self.entries.len() - 1);
    }

    pub fn undo(&mut self) -> Step {
        match self.cursor {
            Some(c) if c > 0 => {
                self.cursor = Some(c - 1);
                Step::Moved(c - 1)
            }
            _ => Step::NothingToUndo,
        }
    }

    pub fn redo(&mut self) -> Step {
        match self.cursor {
            Some(c) if c + 1 < self.entries.len() => {
                self.cursor = Some(c + 1);
                Step::Moved(c + 1)
            }
            _ => Step::NothingToRedo,
        }
    }

    pub fn current(&self) -> Option<&Artifact> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    /// Cursor position, `-1` when empty.
    pub fn cursor(&self) -> isize {
        self.cursor.map_or(-1, |c| c as isize)
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(c) if c + 1 < self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Artifact] {
        &self.entries
    }
}
