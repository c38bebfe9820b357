//! Undo history.
//!
//! A linear log of applied commands with a movable head. Commands are
//! grouped by undo-root markers: `undo` walks back to (and including) the
//! nearest undo root, `redo` walks forward through one whole group.
//! Pushing while the head is behind the end discards the redo tail.

use chrono::{DateTime, Utc};

use crate::command::{Command, CommandContext, CommandRecord};
use crate::graph::SceneGraph;
use crate::Result;

#[derive(Debug)]
struct Entry {
    command: Box<dyn Command>,
    undo_root: bool,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct UndoStack {
    entries: Vec<Entry>,
    /// Number of applied entries; `entries[..head]` are live.
    head: usize,
    /// Maximum number of undo groups retained.
    limit: Option<usize>,
}

impl UndoStack {
    pub fn new(limit: Option<usize>) -> Self {
        Self { entries: Vec::new(), head: 0, limit }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn can_undo(&self) -> bool {
        self.head > 0
    }

    pub fn can_redo(&self) -> bool {
        self.head < self.entries.len()
    }

    /// Number of undo groups currently held.
    pub fn groups(&self) -> usize {
        self.entries.iter().filter(|e| e.undo_root).count()
    }

    /// Record an applied command. The first entry always starts a group.
    pub fn push(&mut self, command: Box<dyn Command>, undo_root: bool, graph: &mut SceneGraph) -> Result<()> {
        self.truncate(graph)?;
        let undo_root = undo_root || self.entries.is_empty();
        self.entries.push(Entry { command, undo_root, at: Utc::now() });
        self.head = self.entries.len();
        self.enforce_limit();
        Ok(())
    }

    /// Drop every entry past the head, newest first.
    fn truncate(&mut self, graph: &mut SceneGraph) -> Result<()> {
        while self.entries.len() > self.head {
            if let Some(mut entry) = self.entries.pop() {
                tracing::trace!(command = entry.command.name(), "discarding redo entry");
                entry.command.discard(graph)?;
            }
        }
        Ok(())
    }

    fn enforce_limit(&mut self) {
        let Some(limit) = self.limit else { return };
        while self.groups() > limit.max(1) {
            let end = self
                .entries
                .iter()
                .skip(1)
                .position(|e| e.undo_root)
                .map(|p| p + 1)
                .unwrap_or(self.entries.len());
            self.entries.drain(..end);
            self.head = self.head.saturating_sub(end);
        }
    }

    /// Undo one group. Returns the names of the undone commands, most
    /// recent first; empty when there is nothing to undo.
    pub fn undo(&mut self, cx: &mut CommandContext<'_>) -> Result<Vec<&'static str>> {
        let mut names = Vec::new();
        while self.head > 0 {
            let entry = &mut self.entries[self.head - 1];
            entry.command.undo(cx)?;
            names.push(entry.command.name());
            self.head -= 1;
            if entry.undo_root {
                break;
            }
        }
        Ok(names)
    }

    /// Redo one group. Returns the names of the redone commands in order.
    pub fn redo(&mut self, cx: &mut CommandContext<'_>) -> Result<Vec<&'static str>> {
        let mut names = Vec::new();
        while self.head < self.entries.len() {
            if !names.is_empty() && self.entries[self.head].undo_root {
                break;
            }
            let entry = &mut self.entries[self.head];
            entry.command.redo(cx)?;
            names.push(entry.command.name());
            self.head += 1;
        }
        Ok(names)
    }

    /// Serialized log of the applied commands.
    pub fn log(&self) -> Result<Vec<CommandRecord>> {
        self.entries[..self.head]
            .iter()
            .map(|e| CommandRecord::of(e.command.as_ref(), e.undo_root, e.at))
            .collect()
    }

    /// Forget everything, discarding the redo tail first.
    pub fn clear(&mut self, graph: &mut SceneGraph) -> Result<()> {
        self.truncate(graph)?;
        self.entries.clear();
        self.head = 0;
        Ok(())
    }
}
