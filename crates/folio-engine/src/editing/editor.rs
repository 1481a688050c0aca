//! The editor: owns the committed snapshot, runs one transaction at a time, and
//! flushes commits to the render surface.
//!
//! ```text
//! Idle ──update──▶ Updating ──callback ok──▶ Committing ──▶ Idle (+ pending flush)
//!                      │                          │
//!                      └──────── error ───────────┴──▶ Idle (nothing published)
//! pending flush ──sync / discrete / flush_now──▶ Reconciling ──▶ Idle
//! ```
//!
//! Updates requested while a transaction is running, and updates requested by
//! listeners, wait in a FIFO queue and each runs as its own transaction afterwards.

use std::collections::{HashSet, VecDeque};

use uuid::Uuid;

use crate::config::{EditorConfig, FlushMode};
use crate::editing::commands::{
    Command, CommandHandler, CommandId, CommandPriority, CommandRegistration, CommandRegistry,
};
use crate::editing::registry::{NodeRegistry, Transform};
use crate::editing::snapshot::Snapshot;
use crate::editing::transaction::{DirtySets, Prepared, QueuedUpdate, Transaction, TxContext};
use crate::error::{EngineError, Result};
use crate::io::json;
use crate::reconciler::{MemorySurface, MutationLedger, Reconciler, RenderSurface};

/// Per-update settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Free-form labels visible to transforms, handlers and listeners (`historic`,
    /// `history-merge`, `history-push`, `paste`, ...).
    pub tags: HashSet<String>,
    /// Reconcile right after this commit even in deferred mode.
    pub discrete: bool,
    /// Commit without running registered transforms. Text normalization still runs.
    pub skip_transforms: bool,
}

impl UpdateOptions {
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self::default().with_tag(tag)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn discrete(mut self) -> Self {
        self.discrete = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Updating,
    Committing,
    Reconciling,
}

/// What listeners see after a flush.
pub struct UpdateEvent<'e> {
    /// The snapshot the surface showed before the flush.
    pub prev: &'e Snapshot,
    pub next: &'e Snapshot,
    pub dirty: &'e DirtySets,
    pub tags: &'e HashSet<String>,
    pub mutations: &'e MutationLedger,
}

/// Updates requested by a listener; they run after every listener has been called.
#[derive(Default)]
pub struct UpdateQueue {
    updates: Vec<QueuedUpdate>,
}

impl UpdateQueue {
    pub fn push<F>(&mut self, options: UpdateOptions, f: F)
    where
        F: for<'t> FnOnce(&mut Transaction<'t>) -> Result<()> + 'static,
    {
        self.updates.push(QueuedUpdate {
            run: Box::new(f),
            options,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// What commit listeners see: one committed transaction, whether or not it has been
/// flushed to the surface yet.
pub struct CommitEvent<'e> {
    /// The snapshot that was current before this commit.
    pub prev: &'e Snapshot,
    pub next: &'e Snapshot,
    pub dirty: &'e DirtySets,
    pub tags: &'e HashSet<String>,
}

pub type UpdateListener = Box<dyn FnMut(&UpdateEvent<'_>, &mut UpdateQueue)>;
pub type CommitListener = Box<dyn FnMut(&CommitEvent<'_>)>;
pub type ErrorHandler = Box<dyn FnMut(&EngineError)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Host hook for deferred flushing: asked once per pending flush, the host answers
/// later with [`Editor::flush_now`].
pub trait FlushScheduler {
    fn schedule_flush(&mut self);
}

/// Commits not yet shown on the surface.
struct PendingFlush {
    /// What the surface currently shows.
    prev: Snapshot,
    dirty: DirtySets,
    tags: HashSet<String>,
}

pub struct Editor<S: RenderSurface = MemorySurface> {
    id: Uuid,
    config: EditorConfig,
    registry: NodeRegistry,
    commands: CommandRegistry,
    current: Snapshot,
    pending: Option<PendingFlush>,
    queue: VecDeque<QueuedUpdate>,
    phase: Phase,
    surface: S,
    reconciler: Reconciler,
    scheduler: Option<Box<dyn FlushScheduler>>,
    update_listeners: Vec<(ListenerId, UpdateListener)>,
    commit_listeners: Vec<(ListenerId, CommitListener)>,
    error_handlers: Vec<(ListenerId, ErrorHandler)>,
    next_listener: u64,
}

impl Editor<MemorySurface> {
    /// Built-in node types, default config, an in-memory surface and no commands.
    pub fn headless() -> Self {
        Self::new(
            EditorConfig::default(),
            NodeRegistry::with_builtin(),
            MemorySurface::new(),
        )
    }
}

impl<S: RenderSurface> Editor<S> {
    /// An editor over an empty document. `surface` must be empty.
    pub fn new(config: EditorConfig, registry: NodeRegistry, surface: S) -> Self {
        let mut reconciler = Reconciler::new(config.theme.clone());
        reconciler.attach_root(surface.root());
        let id = Uuid::new_v4();
        log::debug!("created editor {id} ({})", config.namespace);
        Self {
            id,
            config,
            registry,
            commands: CommandRegistry::new(),
            current: Snapshot::empty(),
            pending: None,
            queue: VecDeque::new(),
            phase: Phase::Idle,
            surface,
            reconciler,
            scheduler: None,
            update_listeners: Vec::new(),
            commit_listeners: Vec::new(),
            error_handlers: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The last committed snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.current
    }

    pub fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        f(&self.current)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// True while commits are waiting for a flush.
    pub fn has_pending_flush(&self) -> bool {
        self.pending.is_some()
    }

    /// Run `f` as a transaction, then any updates it queued.
    ///
    /// On error nothing is published, the error handlers are called and the error is
    /// returned. Errors from queued updates only reach the handlers.
    pub fn update<F>(&mut self, options: UpdateOptions, f: F) -> Result<()>
    where
        F: for<'t> FnOnce(&mut Transaction<'t>) -> Result<()>,
    {
        let result = self.run(options, f);
        self.drain_queue();
        result
    }

    /// Replace the whole document, reconciling every node.
    pub fn set_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        snapshot.check_invariants()?;
        self.update(UpdateOptions::default().discrete(), move |tx| {
            tx.restore(&snapshot);
            Ok(())
        })
    }

    /// Dispatch `command` in its own transaction. `Ok(false)` when no handler took it.
    pub fn dispatch_command(&mut self, command: Command) -> Result<bool> {
        let mut handled = false;
        self.update(UpdateOptions::default(), |tx| {
            handled = tx.dispatch_command(&command)?;
            Ok(())
        })?;
        Ok(handled)
    }

    pub fn register_command(
        &mut self,
        id: CommandId,
        priority: CommandPriority,
        handler: CommandHandler,
    ) -> CommandRegistration {
        self.commands.register(id, priority, handler)
    }

    pub fn unregister_command(&mut self, registration: &CommandRegistration) -> bool {
        self.commands.unregister(registration)
    }

    pub fn register_transform(&mut self, type_tag: &'static str, transform: Transform) {
        self.registry.register_transform(type_tag, transform);
    }

    pub fn register_update_listener(&mut self, listener: UpdateListener) -> ListenerId {
        let id = self.next_listener_id();
        self.update_listeners.push((id, listener));
        id
    }

    pub fn remove_update_listener(&mut self, id: ListenerId) -> bool {
        let before = self.update_listeners.len();
        self.update_listeners.retain(|(l, _)| *l != id);
        self.update_listeners.len() != before
    }

    /// Called synchronously after every commit, before any flush. Runs in both flush
    /// modes, so it sees each transaction exactly once.
    pub fn register_commit_listener(&mut self, listener: CommitListener) -> ListenerId {
        let id = self.next_listener_id();
        self.commit_listeners.push((id, listener));
        id
    }

    pub fn remove_commit_listener(&mut self, id: ListenerId) -> bool {
        let before = self.commit_listeners.len();
        self.commit_listeners.retain(|(l, _)| *l != id);
        self.commit_listeners.len() != before
    }

    pub fn register_error_handler(&mut self, handler: ErrorHandler) -> ListenerId {
        let id = self.next_listener_id();
        self.error_handlers.push((id, handler));
        id
    }

    pub fn remove_error_handler(&mut self, id: ListenerId) -> bool {
        let before = self.error_handlers.len();
        self.error_handlers.retain(|(l, _)| *l != id);
        self.error_handlers.len() != before
    }

    pub fn set_scheduler(&mut self, scheduler: Box<dyn FlushScheduler>) {
        self.scheduler = Some(scheduler);
    }

    /// Reconcile pending commits now, then run whatever the listeners queued.
    pub fn flush_now(&mut self) -> Result<()> {
        let result = self.flush();
        self.drain_queue();
        result
    }

    /// The document as export JSON.
    pub fn export_json(&self) -> Result<String> {
        let document = json::export_document(&self.current)?;
        Ok(json::to_string(&document)?)
    }

    /// Replace the document with an exported one. Keys are fresh; the selection is cleared.
    pub fn import_json(&mut self, source: &str) -> Result<()> {
        let document = json::from_str(source)?;
        self.update(UpdateOptions::default().discrete(), |tx| {
            json::replace_document(tx, &document)
        })
    }

    fn next_listener_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }

    fn run<F>(&mut self, options: UpdateOptions, f: F) -> Result<()>
    where
        F: for<'t> FnOnce(&mut Transaction<'t>) -> Result<()>,
    {
        self.phase = Phase::Updating;
        let outcome = {
            let ctx = TxContext {
                registry: &self.registry,
                commands: &self.commands,
                config: &self.config,
            };
            let mut tx = Transaction::new(&self.current, ctx, options.tags.clone());
            match f(&mut tx) {
                Ok(()) => {
                    self.phase = Phase::Committing;
                    tx.prepare_commit(&options)
                }
                Err(err) => Err(err),
            }
        };

        let prepared = match outcome {
            Ok(prepared) => prepared,
            Err(err) => {
                self.phase = Phase::Idle;
                log::error!("update aborted: {err}");
                self.report(&err);
                return Err(err);
            }
        };
        self.phase = Phase::Idle;
        let already_pending = self.pending.is_some();
        if !self.publish(prepared) {
            return Ok(());
        }

        let deferred = self.config.flush == FlushMode::Deferred && !options.discrete;
        if !deferred {
            return self.flush();
        }
        if !already_pending && let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.schedule_flush();
        }
        Ok(())
    }

    /// Make the prepared snapshot current. False when the transaction wrote nothing.
    fn publish(&mut self, prepared: Prepared) -> bool {
        let Prepared {
            snapshot,
            dirty,
            tags,
            queued,
        } = prepared;
        self.queue.extend(queued);
        let Some(snapshot) = snapshot else {
            return false;
        };
        log::debug!(
            "committed version {} ({} elements, {} leaves dirty)",
            snapshot.version(),
            dirty.elements.len(),
            dirty.leaves.len()
        );
        let prev = std::mem::replace(&mut self.current, snapshot);
        self.notify_commit(&prev, &dirty, &tags);
        match self.pending.as_mut() {
            Some(pending) => {
                pending.dirty.merge(dirty);
                pending.tags.extend(tags);
            }
            None => self.pending = Some(PendingFlush { prev, dirty, tags }),
        }
        true
    }

    fn flush(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        self.phase = Phase::Reconciling;
        let result = self.reconcile(&pending);
        self.phase = Phase::Idle;

        match result {
            Ok(ledger) => {
                self.notify(&pending, &ledger);
                Ok(())
            }
            Err(err) => {
                log::error!("reconcile failed, rebuilding the surface: {err}");
                if let Err(rebuild) = self.reconciler.rebuild(&mut self.surface, &self.current) {
                    log::error!("surface rebuild failed: {rebuild}");
                }
                self.report(&err);
                Err(err)
            }
        }
    }

    fn reconcile(&mut self, pending: &PendingFlush) -> Result<MutationLedger> {
        let ledger =
            self.reconciler
                .reconcile(&mut self.surface, &pending.prev, &self.current, &pending.dirty)?;
        if pending.prev.selection() != self.current.selection() || !ledger.is_empty() {
            self.reconciler
                .sync_selection(&mut self.surface, self.current.selection())?;
        }
        Ok(ledger)
    }

    fn notify(&mut self, pending: &PendingFlush, ledger: &MutationLedger) {
        let mut listeners = std::mem::take(&mut self.update_listeners);
        let mut queue = UpdateQueue::default();
        let event = UpdateEvent {
            prev: &pending.prev,
            next: &self.current,
            dirty: &pending.dirty,
            tags: &pending.tags,
            mutations: ledger,
        };
        for (_, listener) in listeners.iter_mut() {
            listener(&event, &mut queue);
        }
        self.update_listeners = listeners;
        self.queue.extend(queue.updates);
    }

    fn notify_commit(&mut self, prev: &Snapshot, dirty: &DirtySets, tags: &HashSet<String>) {
        let mut listeners = std::mem::take(&mut self.commit_listeners);
        let event = CommitEvent {
            prev,
            next: &self.current,
            dirty,
            tags,
        };
        for (_, listener) in listeners.iter_mut() {
            listener(&event);
        }
        self.commit_listeners = listeners;
    }

    fn report(&mut self, err: &EngineError) {
        for (_, handler) in self.error_handlers.iter_mut() {
            handler(err);
        }
    }

    fn drain_queue(&mut self) {
        while let Some(QueuedUpdate { run, options }) = self.queue.pop_front() {
            // already logged and reported by run
            let _ = self.run(options, run);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::node::{NodeKey, TextFormat};
    use crate::editing::selection::{Point, Selection};
    use crate::reconciler::RenderSurface;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn editor_with_paragraph(text: &str) -> (Editor, NodeKey, NodeKey) {
        let mut editor = Editor::headless();
        let keys = Rc::new(Cell::new((NodeKey::ROOT, NodeKey::ROOT)));
        let out = Rc::clone(&keys);
        let text = text.to_string();
        editor
            .update(UpdateOptions::default(), move |tx| {
                let paragraph = tx.create_paragraph()?;
                let node = tx.create_text(text)?;
                tx.append(paragraph, &[node])?;
                tx.append(NodeKey::ROOT, &[paragraph])?;
                tx.set_selection(Some(Selection::caret(Point::text(node, 0))));
                out.set((paragraph, node));
                Ok(())
            })
            .unwrap();
        let (paragraph, node) = keys.get();
        (editor, paragraph, node)
    }

    #[test]
    fn test_commit_bumps_version_and_reconciles() {
        let (editor, _, _) = editor_with_paragraph("hi");
        assert_eq!(editor.snapshot().version(), 1);
        assert_eq!(editor.surface().to_html(), "<p><span>hi</span></p>");
        assert!(!editor.has_pending_flush());
        assert_eq!(editor.phase(), Phase::Idle);
    }

    #[test]
    fn test_failed_update_publishes_nothing_and_reports() {
        let (mut editor, _, text) = editor_with_paragraph("hi");
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reported);
        editor.register_error_handler(Box::new(move |err| {
            sink.borrow_mut().push(err.to_string())
        }));

        let err = editor
            .update(UpdateOptions::default(), |tx| {
                tx.set_text(text, "changed")?;
                tx.splice(NodeKey::ROOT, 5, 0, &[])?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::SpliceOutOfBounds { .. }));
        assert_eq!(editor.snapshot().version(), 1);
        assert_eq!(editor.snapshot().text_content(NodeKey::ROOT), "hi");
        assert_eq!(reported.borrow().len(), 1);
    }

    #[test]
    fn test_read_only_update_commits_nothing() {
        let (mut editor, _, _) = editor_with_paragraph("hi");
        editor
            .update(UpdateOptions::default(), |tx| {
                tx.view().text_content(NodeKey::ROOT);
                Ok(())
            })
            .unwrap();
        assert_eq!(editor.snapshot().version(), 1);
    }

    #[test]
    fn test_queued_updates_run_in_order_as_separate_transactions() {
        let (mut editor, _, text) = editor_with_paragraph("a");
        editor
            .update(UpdateOptions::default(), move |tx| {
                tx.queue_update(UpdateOptions::default(), move |tx| {
                    tx.splice_text(text, 2, 0, "c")
                });
                tx.queue_update(UpdateOptions::default(), move |tx| {
                    tx.splice_text(text, 3, 0, "d")
                });
                tx.splice_text(text, 1, 0, "b")
            })
            .unwrap();

        assert_eq!(editor.snapshot().text_content(NodeKey::ROOT), "abcd");
        assert_eq!(editor.snapshot().version(), 4);
    }

    #[test]
    fn test_queued_failure_only_reaches_the_handler() {
        let (mut editor, _, _) = editor_with_paragraph("a");
        let failures = Rc::new(Cell::new(0));
        let count = Rc::clone(&failures);
        editor.register_error_handler(Box::new(move |_| count.set(count.get() + 1)));

        let result = editor.update(UpdateOptions::default(), |tx| {
            tx.queue_update(UpdateOptions::default(), |tx| {
                tx.remove(NodeKey::ROOT, false)
            });
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(failures.get(), 1);
    }

    struct CountingScheduler(Rc<Cell<u32>>);

    impl FlushScheduler for CountingScheduler {
        fn schedule_flush(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_deferred_flush_batches_commits() {
        let mut config = EditorConfig::default();
        config.flush = FlushMode::Deferred;
        let mut editor = Editor::new(config, NodeRegistry::with_builtin(), MemorySurface::new());
        let asked = Rc::new(Cell::new(0));
        editor.set_scheduler(Box::new(CountingScheduler(Rc::clone(&asked))));
        let events = Rc::new(Cell::new(0));
        let seen = Rc::clone(&events);
        editor.register_update_listener(Box::new(move |event, _| {
            assert_eq!(event.prev.version(), 0);
            assert_eq!(event.next.version(), 2);
            seen.set(seen.get() + 1);
        }));

        for word in ["one", "two"] {
            editor
                .update(UpdateOptions::default(), move |tx| {
                    let paragraph = tx.create_paragraph()?;
                    let text = tx.create_text(word)?;
                    tx.append(paragraph, &[text])?;
                    tx.append(NodeKey::ROOT, &[paragraph])
                })
                .unwrap();
        }
        assert_eq!(editor.snapshot().version(), 2);
        assert!(editor.has_pending_flush());
        assert!(editor.surface().is_empty());
        assert_eq!(asked.get(), 1);

        editor.flush_now().unwrap();
        assert_eq!(
            editor.surface().to_html(),
            "<p><span>one</span></p><p><span>two</span></p>"
        );
        assert_eq!(events.get(), 1);
    }

    #[test]
    fn test_commit_listeners_see_every_commit_before_flush() {
        let mut config = EditorConfig::default();
        config.flush = FlushMode::Deferred;
        let mut editor = Editor::new(config, NodeRegistry::with_builtin(), MemorySurface::new());
        let versions = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&versions);
        let id = editor.register_commit_listener(Box::new(move |event| {
            seen.borrow_mut()
                .push((event.prev.version(), event.next.version()));
        }));

        for word in ["one", "two"] {
            editor
                .update(UpdateOptions::default(), move |tx| {
                    let paragraph = tx.create_paragraph()?;
                    let text = tx.create_text(word)?;
                    tx.append(paragraph, &[text])?;
                    tx.append(NodeKey::ROOT, &[paragraph])
                })
                .unwrap();
        }
        assert!(editor.has_pending_flush());
        assert_eq!(*versions.borrow(), vec![(0, 1), (1, 2)]);

        let failed = editor.update(UpdateOptions::default(), |tx| {
            tx.create_paragraph()?;
            Err(EngineError::InvariantViolation("rejected".into()))
        });
        assert!(failed.is_err());
        assert_eq!(versions.borrow().len(), 2);

        assert!(editor.remove_commit_listener(id));
        editor.flush_now().unwrap();
        assert_eq!(versions.borrow().len(), 2);
    }

    #[test]
    fn test_listener_updates_are_queued() {
        let (mut editor, _, text) = editor_with_paragraph("x");
        editor.register_update_listener(Box::new(move |event, queue| {
            if !event.tags.contains("echo") {
                queue.push(UpdateOptions::tagged("echo"), move |tx| {
                    tx.set_format(text, TextFormat::BOLD)
                });
            }
        }));

        editor
            .update(UpdateOptions::default(), move |tx| tx.set_text(text, "y"))
            .unwrap();
        let snapshot = editor.snapshot();
        assert_eq!(snapshot.version(), 3);
        assert_eq!(snapshot.node(text).unwrap().text().unwrap().format, TextFormat::BOLD);
        assert_eq!(
            editor.surface().to_html(),
            "<p><span data-format=\"bold\">y</span></p>"
        );
    }

    #[test]
    fn test_only_child_removal_leaves_an_empty_surface_element() {
        let (mut editor, paragraph, _) = editor_with_paragraph("solo");
        editor
            .update(UpdateOptions::default(), move |tx| {
                tx.splice(paragraph, 0, 1, &[])?;
                Ok(())
            })
            .unwrap();

        let surface_id = editor.reconciler().surface_id(paragraph).unwrap();
        assert!(editor.snapshot().contains(paragraph));
        assert_eq!(editor.surface().children(surface_id).len(), 0);
        assert_eq!(editor.surface().to_html(), "<p></p>");
    }

    #[test]
    fn test_selection_is_synced_to_the_surface() {
        let (editor, _, text) = editor_with_paragraph("hey");
        let selection = editor.surface().selection().unwrap();
        let text_id = editor.reconciler().text_id(text).unwrap();
        assert_eq!(selection.anchor.node, text_id);
        assert_eq!(selection.anchor.offset, 0);
        assert!(editor.surface().contains(text_id));
        assert_eq!(editor.surface().root(), crate::reconciler::SurfaceId(0));
    }
}
