//! Undo/redo as stacks of whole snapshots.
//!
//! A commit listener records each committed change, flushed or not; the
//! `Undo`/`Redo`/`ClearHistory` handlers restore snapshots through the running
//! transaction. The stacks only move once that restoring transaction has committed.
//! Tags steer recording: `historic` (set by undo/redo themselves) is never recorded,
//! `history-merge` folds the change into the current entry and `history-push` always
//! starts a new one.
//! Without tags, consecutive typing in one text node within the merge interval
//! becomes a single entry.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::config::HistoryConfig;
use crate::editing::commands::{Command, CommandId, CommandPriority, CommandRegistration};
use crate::editing::editor::{CommitEvent, Editor, ListenerId};
use crate::editing::node::NodeKey;
use crate::editing::snapshot::Snapshot;
use crate::reconciler::RenderSurface;

pub const HISTORIC: &str = "historic";
pub const HISTORY_MERGE: &str = "history-merge";
pub const HISTORY_PUSH: &str = "history-push";

const UNDOING: &str = "history-undo";
const REDOING: &str = "history-redo";

struct HistoryState {
    undo: Vec<Snapshot>,
    redo: Vec<Snapshot>,
    /// The latest recorded document.
    current: Snapshot,
    /// Text node and time of the last recorded keystroke.
    typing: Option<(NodeKey, Instant)>,
    config: HistoryConfig,
}

impl HistoryState {
    fn record(&mut self, event: &CommitEvent<'_>) {
        let next = event.next.clone();
        if event.tags.contains(HISTORIC) {
            let previous = std::mem::replace(&mut self.current, next);
            if event.tags.contains(UNDOING) && self.undo.pop().is_some() {
                self.redo.push(previous);
            } else if event.tags.contains(REDOING) && self.redo.pop().is_some() {
                self.undo.push(previous);
            }
            self.typing = None;
            return;
        }
        if event.dirty.is_empty() {
            // selection only
            self.current = next;
            return;
        }

        let typed = typed_node(event);
        let now = Instant::now();
        let merge = if event.tags.contains(HISTORY_PUSH) {
            false
        } else if event.tags.contains(HISTORY_MERGE) {
            true
        } else {
            let window = Duration::from_millis(self.config.merge_interval_ms);
            matches!(
                (typed, self.typing),
                (Some(key), Some((last, at))) if key == last && now.duration_since(at) <= window
            )
        };
        self.typing = typed.map(|key| (key, now));

        if merge {
            log::trace!("merging version {} into the current history entry", next.version());
        } else {
            let previous = std::mem::replace(&mut self.current, next.clone());
            self.undo.push(previous);
            if self.undo.len() > self.config.max_depth {
                let excess = self.undo.len() - self.config.max_depth;
                self.undo.drain(..excess);
            }
            self.redo.clear();
        }
        self.current = next;
    }
}

/// The single text node a keystroke changed by one character, if that is all that
/// happened.
fn typed_node(event: &CommitEvent<'_>) -> Option<NodeKey> {
    let dirty = event.dirty;
    if dirty.full || dirty.leaves.len() != 1 || dirty.elements.values().any(|written| *written) {
        return None;
    }
    let key = *dirty.leaves.iter().next()?;
    let before = event.prev.get(key)?.text()?.len();
    let after = event.next.get(key)?.text()?.len();
    (before.abs_diff(after) == 1).then_some(key)
}

/// Handle on an editor's history, returned by [`register_history`].
#[derive(Clone)]
pub struct History {
    state: Rc<RefCell<HistoryState>>,
    listener: ListenerId,
    registrations: Vec<CommandRegistration>,
}

impl History {
    pub fn can_undo(&self) -> bool {
        !self.state.borrow().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.borrow().redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.state.borrow().undo.len()
    }

    /// Remove the listener and handlers from `editor`.
    pub fn unregister<S: RenderSurface>(self, editor: &mut Editor<S>) {
        editor.remove_commit_listener(self.listener);
        for registration in &self.registrations {
            editor.unregister_command(registration);
        }
    }
}

/// Start recording history for `editor`, from its current document.
pub fn register_history<S: RenderSurface>(editor: &mut Editor<S>) -> History {
    let state = Rc::new(RefCell::new(HistoryState {
        undo: Vec::new(),
        redo: Vec::new(),
        current: editor.snapshot().clone(),
        typing: None,
        config: editor.config().history.clone(),
    }));

    let recorder = Rc::clone(&state);
    let listener = editor.register_commit_listener(Box::new(move |event| {
        recorder.borrow_mut().record(event);
    }));

    let mut registrations = Vec::new();
    for id in [CommandId::Undo, CommandId::Redo, CommandId::ClearHistory] {
        let state = Rc::clone(&state);
        let registration = editor.register_command(
            id,
            CommandPriority::Editor,
            Box::new(move |tx, command| {
                let (target, direction) = {
                    let mut state = state.borrow_mut();
                    match command {
                        Command::Undo => (state.undo.last().cloned(), UNDOING),
                        Command::Redo => (state.redo.last().cloned(), REDOING),
                        Command::ClearHistory => {
                            state.undo.clear();
                            state.redo.clear();
                            state.typing = None;
                            return Ok(true);
                        }
                        _ => return Ok(false),
                    }
                };
                let Some(target) = target else {
                    return Ok(false);
                };
                log::debug!("restoring history entry at version {}", target.version());
                tx.restore(&target);
                tx.add_tag(HISTORIC);
                tx.add_tag(direction);
                Ok(true)
            }),
        );
        registrations.push(registration);
    }

    History {
        state,
        listener,
        registrations,
    }
}
