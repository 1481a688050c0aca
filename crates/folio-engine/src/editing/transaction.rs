//! The read-write context handed to every mutation callback.
//!
//! A [`Transaction`] owns the pending snapshot (cloned lazily from the previous one
//! on the first write), the dirty sets, the update tags, and the queue of updates
//! requested while it runs. It is created and consumed by the editor's update loop;
//! nothing outlives it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use crate::config::EditorConfig;
use crate::editing::commands::{Command, CommandRegistry};
use crate::editing::node::{
    DecoratorData, ElementData, ElementKind, Node, NodeKey, NodeKind, TextData,
};
use crate::editing::registry::NodeRegistry;
use crate::editing::selection::{RangeSelection, Selection, normalize_selection};
use crate::editing::snapshot::Snapshot;
use crate::editing::editor::UpdateOptions;
use crate::error::{EngineError, Result};

/// Keys touched in a transaction, directly or through ancestry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirtySets {
    /// Element keys; `true` when the element itself was written, `false` when it is
    /// only dirty because a descendant changed.
    pub elements: HashMap<NodeKey, bool>,
    pub leaves: HashSet<NodeKey>,
    /// Every node must be compared (snapshot replaced wholesale).
    pub full: bool,
}

impl DirtySets {
    pub fn is_empty(&self) -> bool {
        !self.full && self.elements.is_empty() && self.leaves.is_empty()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.full || self.elements.contains_key(&key) || self.leaves.contains(&key)
    }

    pub fn element_is_dirty(&self, key: NodeKey) -> bool {
        self.full || self.elements.contains_key(&key)
    }

    /// Fold a later transaction's dirty sets into these (deferred flushes).
    pub fn merge(&mut self, other: DirtySets) {
        self.full |= other.full;
        for (key, intentional) in other.elements {
            let entry = self.elements.entry(key).or_insert(false);
            *entry |= intentional;
        }
        self.leaves.extend(other.leaves);
    }
}

/// Dirty keys not yet seen by a normalization/transform pass.
#[derive(Debug, Default)]
struct TransformQueue {
    leaves: BTreeSet<NodeKey>,
    elements: BTreeSet<NodeKey>,
}

impl TransformQueue {
    fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.elements.is_empty()
    }
}

/// Mutation callback as stored in the update queue.
pub type UpdateFn = Box<dyn for<'t> FnOnce(&mut Transaction<'t>) -> Result<()>>;

/// An update requested while another one was running.
pub struct QueuedUpdate {
    pub(crate) run: UpdateFn,
    pub(crate) options: UpdateOptions,
}

/// Shared, read-only editor state a transaction can consult.
#[derive(Clone, Copy)]
pub(crate) struct TxContext<'a> {
    pub registry: &'a NodeRegistry,
    pub commands: &'a CommandRegistry,
    pub config: &'a EditorConfig,
}

/// Result of a successful commit preparation.
pub(crate) struct Prepared {
    /// `None` when the transaction wrote nothing.
    pub snapshot: Option<Snapshot>,
    pub dirty: DirtySets,
    pub tags: HashSet<String>,
    pub queued: Vec<QueuedUpdate>,
}

pub struct Transaction<'a> {
    prev: &'a Snapshot,
    pending: Option<Snapshot>,
    dirty: DirtySets,
    transform_queue: TransformQueue,
    tags: HashSet<String>,
    ctx: TxContext<'a>,
    queued: Vec<QueuedUpdate>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(prev: &'a Snapshot, ctx: TxContext<'a>, tags: HashSet<String>) -> Self {
        Self {
            prev,
            pending: None,
            dirty: DirtySets::default(),
            transform_queue: TransformQueue::default(),
            tags,
            ctx,
            queued: Vec::new(),
        }
    }

    /// The document as this transaction currently sees it.
    pub fn view(&self) -> &Snapshot {
        self.pending.as_ref().unwrap_or(self.prev)
    }

    /// The last committed snapshot this transaction started from.
    pub fn previous(&self) -> &Snapshot {
        self.prev
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.ctx.registry
    }

    pub fn config(&self) -> &EditorConfig {
        self.ctx.config
    }

    pub fn dirty(&self) -> &DirtySets {
        &self.dirty
    }

    pub fn get(&self, key: NodeKey) -> Result<&Node> {
        self.view().node(key)
    }

    fn pending_mut(&mut self) -> &mut Snapshot {
        let prev = self.prev;
        self.pending.get_or_insert_with(|| prev.clone())
    }

    /// Transaction-scoped mutable copy of `key`.
    ///
    /// Marks the key dirty (element or leaf set) and copies every strict ancestor,
    /// marking each as an element dirtied through ancestry.
    pub fn get_writable(&mut self, key: NodeKey) -> Result<&mut Node> {
        let node = self.view().node(key)?;
        let is_element = node.is_element();
        let ancestors: Vec<NodeKey> = self.view().ancestors(key).collect();

        if is_element {
            self.dirty.elements.insert(key, true);
            self.transform_queue.elements.insert(key);
        } else {
            self.dirty.leaves.insert(key);
            self.transform_queue.leaves.insert(key);
        }
        for ancestor in &ancestors {
            self.dirty.elements.entry(*ancestor).or_insert(false);
        }

        let pending = self.pending_mut();
        for ancestor in ancestors {
            if let Some(shared) = pending.nodes.get_mut(&ancestor) {
                Rc::make_mut(shared);
            }
        }
        pending
            .nodes
            .get_mut(&key)
            .map(Rc::make_mut)
            .ok_or(EngineError::NodeNotFound(key))
    }

    /// Register a new, detached node under a fresh key.
    pub fn create_node(&mut self, kind: NodeKind) -> Result<NodeKey> {
        self.ctx.registry.check_kind(&kind)?;
        let key = NodeKey::fresh();
        let is_element = matches!(kind, NodeKind::Root(_) | NodeKind::Element { .. });
        self.pending_mut()
            .nodes
            .insert(key, Rc::new(Node::new(key, kind)));
        if is_element {
            self.dirty.elements.insert(key, true);
            self.transform_queue.elements.insert(key);
        } else {
            self.dirty.leaves.insert(key);
            self.transform_queue.leaves.insert(key);
        }
        Ok(key)
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> Result<NodeKey> {
        self.create_node(NodeKind::Text(TextData::new(text)))
    }

    pub fn create_element(&mut self, kind: ElementKind) -> Result<NodeKey> {
        self.create_node(NodeKind::Element {
            kind,
            data: ElementData::default(),
        })
    }

    pub fn create_paragraph(&mut self) -> Result<NodeKey> {
        self.create_element(ElementKind::Paragraph)
    }

    pub fn create_line_break(&mut self) -> Result<NodeKey> {
        self.create_node(NodeKind::LineBreak)
    }

    pub fn create_decorator(&mut self, data: DecoratorData) -> Result<NodeKey> {
        self.create_node(NodeKind::Decorator(data))
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.view().selection()
    }

    pub fn range_selection(&self) -> Option<&RangeSelection> {
        self.selection().and_then(Selection::as_range)
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.pending_mut().selection = selection;
    }

    pub fn selection_mut(&mut self) -> Option<&mut Selection> {
        self.pending_mut().selection.as_mut()
    }

    pub(crate) fn range_selection_mut(&mut self) -> Option<&mut RangeSelection> {
        self.selection_mut().and_then(Selection::as_range_mut)
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Run `f` as its own transaction once this one has committed.
    pub fn queue_update<F>(&mut self, options: UpdateOptions, f: F)
    where
        F: for<'t> FnOnce(&mut Transaction<'t>) -> Result<()> + 'static,
    {
        self.queued.push(QueuedUpdate {
            run: Box::new(f),
            options,
        });
    }

    /// Dispatch a command within this transaction.
    pub fn dispatch_command(&mut self, command: &Command) -> Result<bool> {
        let commands = self.ctx.commands;
        commands.dispatch(self, command)
    }

    /// Replace the whole document with `snapshot`; the next flush compares every node.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        let mut next = snapshot.clone();
        next.version = self.prev.version;
        self.pending = Some(next);
        self.dirty.full = true;
    }

    /// Normalize, transform to a fixed point, collect garbage and fix the selection.
    pub(crate) fn prepare_commit(mut self, options: &UpdateOptions) -> Result<Prepared> {
        if self.pending.is_none() {
            return Ok(Prepared {
                snapshot: None,
                dirty: self.dirty,
                tags: self.tags,
                queued: self.queued,
            });
        }
        self.apply_transforms(options.skip_transforms)?;
        self.collect_garbage();

        let mut snapshot = self
            .pending
            .take()
            .ok_or_else(|| EngineError::InvariantViolation("pending snapshot vanished".into()))?;
        if let Some(selection) = snapshot.selection.take() {
            snapshot.selection = normalize_selection(&snapshot, &selection);
            if snapshot.selection.is_none() {
                log::debug!("selection could not be re-anchored and was dropped");
            }
        }
        snapshot.version = self.prev.version + 1;

        Ok(Prepared {
            snapshot: Some(snapshot),
            dirty: self.dirty,
            tags: self.tags,
            queued: self.queued,
        })
    }

    fn apply_transforms(&mut self, skip_transforms: bool) -> Result<()> {
        let cap = self.ctx.config.max_transform_iterations;
        let registry = self.ctx.registry;
        let mut passes = 0;
        loop {
            let queue = std::mem::take(&mut self.transform_queue);
            if queue.is_empty() {
                return Ok(());
            }
            passes += 1;
            if passes > cap {
                return Err(EngineError::TransformDidNotConverge { iterations: cap });
            }

            for key in &queue.leaves {
                if self.view().is_attached(*key) {
                    self.normalize_text_node(*key)?;
                }
            }
            if skip_transforms || !registry.has_transforms() {
                continue;
            }
            for key in queue.leaves.iter().chain(queue.elements.iter()) {
                let Some(node) = self.view().get(*key) else {
                    continue;
                };
                let tag = node.type_tag();
                if !self.view().is_attached(*key) {
                    continue;
                }
                for transform in registry.transforms_for(tag) {
                    transform(self, *key)?;
                    if !self.view().is_attached(*key) {
                        break;
                    }
                }
            }
        }
    }

    /// Remove an empty text node, or merge it with compatible text neighbors.
    fn normalize_text_node(&mut self, key: NodeKey) -> Result<()> {
        let Some(text) = self.view().get(key).and_then(Node::text) else {
            return Ok(());
        };
        if text.is_empty() {
            return self.remove(key, false);
        }

        let mut key = key;
        while let Some(prev) = self.compatible_text_sibling(key, false) {
            key = self.merge_text(prev, key)?;
        }
        while let Some(next) = self.compatible_text_sibling(key, true) {
            key = self.merge_text(key, next)?;
        }
        Ok(())
    }

    fn compatible_text_sibling(&self, key: NodeKey, forward: bool) -> Option<NodeKey> {
        let view = self.view();
        let node = view.get(key)?;
        let sibling_key = if forward {
            node.next_sibling()
        } else {
            node.prev_sibling()
        }?;
        let sibling = view.get(sibling_key)?.text()?;
        (node.text()?.is_compatible(sibling) && !sibling.is_empty()).then_some(sibling_key)
    }

    /// Drop every detached node (and its subtree) from the pending map. The previous
    /// snapshot still holds them, which is all the reconciler needs to tear down.
    fn collect_garbage(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        let candidates: Vec<NodeKey> = self
            .dirty
            .elements
            .keys()
            .chain(self.dirty.leaves.iter())
            .copied()
            .collect();
        let mut doomed = Vec::new();
        for key in candidates {
            if pending.contains(key) && !pending.is_attached(key) {
                let mut stack = vec![key];
                while let Some(k) = stack.pop() {
                    stack.extend(pending.children(k));
                    doomed.push(k);
                }
            }
        }
        if !doomed.is_empty() {
            log::trace!("collecting {} detached nodes", doomed.len());
        }
        for key in doomed {
            pending.nodes.remove(&key);
        }
    }
}
