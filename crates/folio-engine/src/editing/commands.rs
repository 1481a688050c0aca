//! The command bus: a priority-tiered, synchronous dispatcher.
//!
//! Handlers are registered per [`CommandId`] and tier. Dispatch walks the tiers from
//! `Critical` down to `Editor`, in registration order within a tier, and stops at the
//! first handler that reports the command as handled. Handlers receive the running
//! transaction, so everything they do commits (or aborts) together.

use std::collections::{BTreeMap, HashMap};

use crate::editing::node::{ElementFormat, ElementKind, TextFormat};
use crate::editing::selection::Selection;
use crate::editing::transaction::Transaction;
use crate::error::Result;
use crate::io::json::SerializedNode;

/// MIME type of a clipboard entry holding exported folio nodes.
pub const FOLIO_MIME: &str = "application/x-folio-nodes+json";
/// MIME type of a clipboard entry holding a serialized markup tree.
pub const MARKUP_MIME: &str = "application/x-folio-markup+json";
pub const PLAIN_MIME: &str = "text/plain";

/// Clipboard contents as MIME type → data, in the order the host offered them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClipboardData {
    entries: Vec<(String, String)>,
}

impl ClipboardData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new().with(PLAIN_MIME, text)
    }

    pub fn with(mut self, mime: impl Into<String>, data: impl Into<String>) -> Self {
        self.entries.push((mime.into(), data.into()));
        self
    }

    pub fn get(&self, mime: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(m, _)| m == mime)
            .map(|(_, data)| data.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(m, d)| (m.as_str(), d.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every externally triggered mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InsertText(String),
    /// Text that may contain line breaks and tabs.
    InsertRawText(String),
    InsertParagraph,
    InsertLineBreak,
    DeleteCharacter { backward: bool },
    RemoveText,
    FormatText(TextFormat),
    FormatElement(ElementFormat),
    SetBlockType(ElementKind),
    WrapBlocks(ElementKind),
    Indent,
    Outdent,
    MoveCaret { backward: bool, extend: bool },
    SelectAll,
    SetSelection(Option<Selection>),
    Paste(ClipboardData),
    InsertNodes(Vec<SerializedNode>),
    Undo,
    Redo,
    ClearHistory,
    Custom {
        name: String,
        payload: serde_json::Value,
    },
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Command::InsertText(_) => CommandId::InsertText,
            Command::InsertRawText(_) => CommandId::InsertRawText,
            Command::InsertParagraph => CommandId::InsertParagraph,
            Command::InsertLineBreak => CommandId::InsertLineBreak,
            Command::DeleteCharacter { .. } => CommandId::DeleteCharacter,
            Command::RemoveText => CommandId::RemoveText,
            Command::FormatText(_) => CommandId::FormatText,
            Command::FormatElement(_) => CommandId::FormatElement,
            Command::SetBlockType(_) => CommandId::SetBlockType,
            Command::WrapBlocks(_) => CommandId::WrapBlocks,
            Command::Indent => CommandId::Indent,
            Command::Outdent => CommandId::Outdent,
            Command::MoveCaret { .. } => CommandId::MoveCaret,
            Command::SelectAll => CommandId::SelectAll,
            Command::SetSelection(_) => CommandId::SetSelection,
            Command::Paste(_) => CommandId::Paste,
            Command::InsertNodes(_) => CommandId::InsertNodes,
            Command::Undo => CommandId::Undo,
            Command::Redo => CommandId::Redo,
            Command::ClearHistory => CommandId::ClearHistory,
            Command::Custom { name, .. } => CommandId::Custom(name.clone()),
        }
    }
}

/// What handlers register against: one id per [`Command`] variant, custom commands by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandId {
    InsertText,
    InsertRawText,
    InsertParagraph,
    InsertLineBreak,
    DeleteCharacter,
    RemoveText,
    FormatText,
    FormatElement,
    SetBlockType,
    WrapBlocks,
    Indent,
    Outdent,
    MoveCaret,
    SelectAll,
    SetSelection,
    Paste,
    InsertNodes,
    Undo,
    Redo,
    ClearHistory,
    Custom(String),
}

/// Handler tiers, lowest first. The built-in rich-text handlers sit at `Editor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandPriority {
    Editor,
    Low,
    Normal,
    High,
    Critical,
}

/// Returns `Ok(true)` when the command was handled and propagation should stop.
pub type CommandHandler = Box<dyn Fn(&mut Transaction<'_>, &Command) -> Result<bool>>;

/// Receipt for [`CommandRegistry::register`]; pass it back to unregister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRegistration {
    id: CommandId,
    priority: CommandPriority,
    serial: u64,
}

impl CommandRegistration {
    pub fn id(&self) -> &CommandId {
        &self.id
    }

    pub fn priority(&self) -> CommandPriority {
        self.priority
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<CommandId, BTreeMap<CommandPriority, Vec<(u64, CommandHandler)>>>,
    next_serial: u64,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: CommandId,
        priority: CommandPriority,
        handler: CommandHandler,
    ) -> CommandRegistration {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.handlers
            .entry(id.clone())
            .or_default()
            .entry(priority)
            .or_default()
            .push((serial, handler));
        CommandRegistration {
            id,
            priority,
            serial,
        }
    }

    /// Returns false when the registration was already removed.
    pub fn unregister(&mut self, registration: &CommandRegistration) -> bool {
        let Some(tiers) = self.handlers.get_mut(&registration.id) else {
            return false;
        };
        let Some(handlers) = tiers.get_mut(&registration.priority) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(serial, _)| *serial != registration.serial);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            tiers.remove(&registration.priority);
        }
        if tiers.is_empty() {
            self.handlers.remove(&registration.id);
        }
        removed
    }

    pub fn has_handlers(&self, id: &CommandId) -> bool {
        self.handlers.contains_key(id)
    }

    /// Run handlers for `command`, highest tier first, until one handles it.
    pub fn dispatch(&self, tx: &mut Transaction<'_>, command: &Command) -> Result<bool> {
        let id = command.id();
        let Some(tiers) = self.handlers.get(&id) else {
            log::trace!("no handlers for {id:?}");
            return Ok(false);
        };
        for (priority, handlers) in tiers.iter().rev() {
            for (_, handler) in handlers {
                if handler(tx, command)? {
                    log::trace!("{id:?} handled at {priority:?}");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::Editor;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(
        log: &Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
        handled: bool,
    ) -> CommandHandler {
        let log = Rc::clone(log);
        Box::new(move |_, _| {
            log.borrow_mut().push(name);
            Ok(handled)
        })
    }

    #[test]
    fn test_higher_tiers_run_first_and_stop_propagation() {
        let mut editor = Editor::headless();
        let log = Rc::new(RefCell::new(Vec::new()));
        editor.register_command(
            CommandId::Indent,
            CommandPriority::Editor,
            recorder(&log, "editor", true),
        );
        editor.register_command(
            CommandId::Indent,
            CommandPriority::Critical,
            recorder(&log, "critical", false),
        );
        editor.register_command(
            CommandId::Indent,
            CommandPriority::Normal,
            recorder(&log, "normal", true),
        );

        assert!(editor.dispatch_command(Command::Indent).unwrap());
        assert_eq!(*log.borrow(), vec!["critical", "normal"]);
    }

    #[test]
    fn test_unregistered_handler_no_longer_runs() {
        let mut editor = Editor::headless();
        let log = Rc::new(RefCell::new(Vec::new()));
        let registration = editor.register_command(
            CommandId::Custom("ping".into()),
            CommandPriority::Low,
            recorder(&log, "ping", true),
        );
        let ping = Command::Custom {
            name: "ping".into(),
            payload: serde_json::Value::Null,
        };

        assert!(editor.dispatch_command(ping.clone()).unwrap());
        assert!(editor.unregister_command(&registration));
        assert!(!editor.unregister_command(&registration));
        assert!(!editor.dispatch_command(ping).unwrap());
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_handlers_can_dispatch_nested_commands_in_the_same_transaction() {
        let mut editor = Editor::headless();
        editor.register_command(
            CommandId::Custom("shout".into()),
            CommandPriority::Normal,
            Box::new(|tx, _| {
                tx.add_tag("shouted");
                tx.dispatch_command(&Command::SelectAll)
            }),
        );
        let seen = Rc::new(RefCell::new(false));
        let seen_in_handler = Rc::clone(&seen);
        editor.register_command(
            CommandId::SelectAll,
            CommandPriority::Normal,
            Box::new(move |tx, _| {
                *seen_in_handler.borrow_mut() = tx.has_tag("shouted");
                Ok(true)
            }),
        );

        let handled = editor
            .dispatch_command(Command::Custom {
                name: "shout".into(),
                payload: serde_json::json!({"volume": 11}),
            })
            .unwrap();
        assert!(handled);
        assert!(*seen.borrow());
    }
}
