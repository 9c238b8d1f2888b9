//! Undo/redo history built from object snapshots.
//!
//! Every recorded edit stores the complete state of one object before and
//! after the change. Undoing writes the `before` state back into the
//! [`ObjectMap`]; redoing writes `after`. Macros group several commands into one
//! history step.

use super::ObjectMap;
use crate::error::{CoreError, Result};
use crate::objects::Object;
use tracing::debug;

/// One step of history.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A single object edit.
    Snapshot {
        key: String,
        before: Box<Object>,
        after: Box<Object>,
        text: String,
    },
    /// An object leaving the map; undo puts it back at `index`.
    Removal {
        key: String,
        index: usize,
        object: Box<Object>,
        text: String,
    },
    /// Several commands undone and redone together.
    Macro { text: String, commands: Vec<Command> },
}

impl Command {
    pub fn snapshot(key: impl Into<String>, before: Object, after: Object, text: impl Into<String>) -> Self {
        Command::Snapshot {
            key: key.into(),
            before: Box::new(before),
            after: Box::new(after),
            text: text.into(),
        }
    }

    pub fn removal(key: impl Into<String>, index: usize, object: Object, text: impl Into<String>) -> Self {
        Command::Removal {
            key: key.into(),
            index,
            object: Box::new(object),
            text: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Command::Snapshot { text, .. } | Command::Removal { text, .. } | Command::Macro { text, .. } => {
                text
            }
        }
    }

    /// Whether replaying this command reads or writes `key`.
    fn mentions(&self, key: &str) -> bool {
        match self {
            Command::Snapshot {
                key: own, before, after, ..
            } => own == key || before.references().iter().chain(&after.references()).any(|k| k == key),
            Command::Removal { key: own, .. } => own == key,
            Command::Macro { commands, .. } => commands.iter().any(|c| c.mentions(key)),
        }
    }

    fn undo(&self, map: &mut ObjectMap, touched: &mut Vec<String>) -> Result<()> {
        match self {
            Command::Snapshot { key, before, .. } => {
                map.restore(key, (**before).clone())?;
                touched.push(key.clone());
            }
            Command::Removal { key, index, object, .. } => {
                map.reinsert(*index, key, (**object).clone())?;
                touched.push(key.clone());
            }
            Command::Macro { commands, .. } => {
                for command in commands.iter().rev() {
                    command.undo(map, touched)?;
                }
            }
        }
        Ok(())
    }

    fn redo(&self, map: &mut ObjectMap, touched: &mut Vec<String>) -> Result<()> {
        match self {
            Command::Snapshot { key, after, .. } => {
                map.restore(key, (**after).clone())?;
                touched.push(key.clone());
            }
            Command::Removal { key, .. } => {
                map.remove(key)?;
            }
            Command::Macro { commands, .. } => {
                for command in commands {
                    command.redo(map, touched)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct OpenMacro {
    text: String,
    commands: Vec<Command>,
}

/// Linear undo/redo history with optional macro grouping.
#[derive(Debug, Clone, Default)]
pub struct UndoStack {
    enabled: bool,
    max_history: Option<usize>,
    history: Vec<Command>,
    future: Vec<Command>,
    open_macro: Option<OpenMacro>,
}

impl UndoStack {
    pub fn new(enabled: bool, max_history: Option<usize>) -> Self {
        Self {
            enabled,
            max_history,
            ..Default::default()
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Overrides `enabled`, returning the previous state so it can be restored.
    pub fn force_state(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.enabled, enabled)
    }

    pub fn max_history(&self) -> Option<usize> {
        self.max_history
    }

    pub fn set_max_history(&mut self, max_history: Option<usize>) {
        self.max_history = max_history;
        self.trim();
    }

    /// Records a command. Ignored while disabled.
    pub fn push(&mut self, command: Command) {
        if !self.enabled {
            return;
        }
        if let Some(open) = self.open_macro.as_mut() {
            open.commands.push(command);
            return;
        }
        debug!(text = command.text(), "recording undo step");
        self.history.push(command);
        self.future.clear();
        self.trim();
    }

    fn trim(&mut self) {
        if let Some(max) = self.max_history {
            let excess = self.history.len().saturating_sub(max);
            self.history.drain(..excess);
        }
    }

    pub fn begin_macro(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if let Some(open) = &self.open_macro {
            return Err(CoreError::Stack(format!(
                "cannot begin macro '{text}' while macro '{}' is open",
                open.text
            )));
        }
        self.open_macro = Some(OpenMacro {
            text,
            commands: Vec::new(),
        });
        Ok(())
    }

    /// Closes the open macro and records it as one step (if it holds anything).
    pub fn end_macro(&mut self) -> Result<()> {
        let open = self
            .open_macro
            .take()
            .ok_or_else(|| CoreError::Stack("no macro is open".to_string()))?;
        if open.commands.is_empty() {
            return Ok(());
        }
        let enabled = self.force_state(true);
        self.push(Command::Macro {
            text: open.text,
            commands: open.commands,
        });
        self.enabled = enabled;
        Ok(())
    }

    /// Drops the open macro and everything recorded into it.
    pub(crate) fn abort_macro(&mut self) -> Option<Vec<Command>> {
        self.open_macro.take().map(|open| open.commands)
    }

    pub fn is_macro_open(&self) -> bool {
        self.open_macro.is_some()
    }

    pub fn can_undo(&self) -> bool {
        self.open_macro.is_none() && !self.history.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        self.open_macro.is_none() && !self.future.is_empty()
    }

    pub fn undo_text(&self) -> Option<&str> {
        self.history.last().map(Command::text)
    }

    pub fn redo_text(&self) -> Option<&str> {
        self.future.last().map(Command::text)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Drops every step that would replay `key`. Used when `key` leaves the
    /// map without being recorded.
    pub(crate) fn forget(&mut self, key: &str) {
        self.history.retain(|command| !command.mentions(key));
        self.future.retain(|command| !command.mentions(key));
        if let Some(open) = self.open_macro.as_mut() {
            open.commands.retain(|command| !command.mentions(key));
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.future.clear();
        self.open_macro = None;
    }

    /// Restores the state before the latest step. Returns the keys written.
    pub fn undo(&mut self, map: &mut ObjectMap) -> Result<Vec<String>> {
        if self.open_macro.is_some() {
            return Err(CoreError::Stack("cannot undo while a macro is open".to_string()));
        }
        let command = self
            .history
            .pop()
            .ok_or_else(|| CoreError::Stack("nothing to undo".to_string()))?;
        debug!(text = command.text(), "undo");
        let mut touched = Vec::new();
        let outcome = command.undo(map, &mut touched);
        self.future.push(command);
        outcome.map(|_| touched)
    }

    /// Re-applies the most recently undone step. Returns the keys written.
    pub fn redo(&mut self, map: &mut ObjectMap) -> Result<Vec<String>> {
        if self.open_macro.is_some() {
            return Err(CoreError::Stack("cannot redo while a macro is open".to_string()));
        }
        let command = self
            .future
            .pop()
            .ok_or_else(|| CoreError::Stack("nothing to redo".to_string()))?;
        debug!(text = command.text(), "redo");
        let mut touched = Vec::new();
        let outcome = command.redo(map, &mut touched);
        self.history.push(command);
        outcome.map(|_| touched)
    }
}
