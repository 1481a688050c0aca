//! Incremental render-surface patching.
//!
//! The reconciler keeps a map from node keys to surface handles and, given the last
//! reconciled snapshot and the next one, walks only the subtrees whose nodes were
//! copied on write (`Rc::ptr_eq` identifies everything untouched). Child lists are
//! diffed by key: common prefix and suffix are matched first, the middle is then
//! resolved into removals, creations and moves. Moves keep the longest run of kept
//! nodes whose relative order did not change in place.

pub mod memory;
pub mod surface;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use crate::config::ThemeConfig;
use crate::editing::node::{ElementKind, ListType, Node, NodeKey, NodeKind, TextDirection};
use crate::editing::selection::{Point, PointType, Selection};
use crate::editing::snapshot::Snapshot;
use crate::editing::text::{char_len, common_affixes, slice_chars};
use crate::editing::transaction::DirtySets;
use crate::error::{EngineError, Result};

pub use memory::{MemoryContent, MemorySurface};
pub use surface::{ElementSpec, RenderSurface, SurfaceId, SurfacePoint, SurfaceSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Created,
    Updated,
    Destroyed,
}

/// What one reconciliation did, per type tag and key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationLedger {
    entries: BTreeMap<&'static str, BTreeMap<NodeKey, Mutation>>,
}

impl MutationLedger {
    fn record(&mut self, type_tag: &'static str, key: NodeKey, mutation: Mutation) {
        let slot = self.entries.entry(type_tag).or_default();
        match slot.get(&key) {
            // creation already covers any later update of the same node
            Some(Mutation::Created) if mutation == Mutation::Updated => {}
            _ => {
                slot.insert(key, mutation);
            }
        }
    }

    pub fn get(&self, type_tag: &str, key: NodeKey) -> Option<Mutation> {
        self.entries.get(type_tag)?.get(&key).copied()
    }

    pub fn for_type(&self, type_tag: &str) -> impl Iterator<Item = (NodeKey, Mutation)> + '_ {
        self.entries
            .get(type_tag)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (*k, *v)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, NodeKey, Mutation)> + '_ {
        self.entries
            .iter()
            .flat_map(|(tag, m)| m.iter().map(move |(k, v)| (*tag, *k, *v)))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Surface tag and attributes for a node.
pub fn element_spec(node: &Node, theme: &ThemeConfig) -> ElementSpec {
    let class = |tag: &str| theme.element_class(tag).unwrap_or_default().to_string();
    match node.kind() {
        NodeKind::Root(_) => ElementSpec::new("div").attr("class", class("root")),
        NodeKind::Text(data) => {
            let mut classes: Vec<&str> = theme.element_class("text").into_iter().collect();
            let names: Vec<String> = data.format.names().collect();
            classes.extend(names.iter().filter_map(|n| theme.format_class(n)));
            let marks = names.join(" ");
            ElementSpec::new("span")
                .attr("class", classes.join(" "))
                .attr("style", data.style.clone())
                .attr("data-format", marks)
        }
        NodeKind::LineBreak => ElementSpec::new("br"),
        NodeKind::Decorator(data) => {
            ElementSpec::new(if data.inline { "span" } else { "div" })
                .attr("class", class("decorator"))
                .attr("data-decorator", data.kind.clone())
                .attr("contenteditable", "false")
        }
        NodeKind::Element { kind, data } => {
            let (tag, spec) = match kind {
                ElementKind::Paragraph => ("paragraph", ElementSpec::new("p")),
                ElementKind::Heading(h) => ("heading", ElementSpec::new(h.as_str())),
                ElementKind::Quote => ("quote", ElementSpec::new("blockquote")),
                ElementKind::Code { language } => (
                    "code",
                    ElementSpec::new("code")
                        .attr("data-language", language.clone().unwrap_or_default()),
                ),
                ElementKind::List { list_type, start } => {
                    let spec = match list_type {
                        ListType::Number if *start != 1 => {
                            ElementSpec::new("ol").attr("start", start.to_string())
                        }
                        ListType::Number => ElementSpec::new("ol"),
                        ListType::Bullet => ElementSpec::new("ul"),
                        ListType::Check => ElementSpec::new("ul").attr("role", "list"),
                    };
                    ("list", spec)
                }
                ElementKind::ListItem { value, checked } => {
                    let spec = ElementSpec::new("li").attr("value", value.to_string());
                    let spec = match checked {
                        Some(checked) => spec
                            .attr("role", "checkbox")
                            .attr("aria-checked", checked.to_string()),
                        None => spec,
                    };
                    ("listitem", spec)
                }
                ElementKind::Link { url, title } => (
                    "link",
                    ElementSpec::new("a")
                        .attr("href", url.clone())
                        .attr("title", title.clone().unwrap_or_default()),
                ),
            };
            let mut style = Vec::new();
            if let Some(align) = data.format.as_css() {
                style.push(format!("text-align: {align}"));
            }
            if data.indent > 0 {
                style.push(format!("padding-inline-start: calc({} * 40px)", data.indent));
            }
            let dir = match data.direction {
                Some(TextDirection::Ltr) => "ltr",
                Some(TextDirection::Rtl) => "rtl",
                None => "",
            };
            spec.attr("class", class(tag))
                .attr("style", style.join("; "))
                .attr("dir", dir)
        }
    }
}

/// State of one reconciliation pass.
struct Pass<'p> {
    prev: &'p Snapshot,
    next: &'p Snapshot,
    ledger: MutationLedger,
    mounting: bool,
    /// Keys that got a fresh surface element during this pass.
    created: HashSet<NodeKey>,
}

/// Keeps a render surface in step with committed snapshots.
#[derive(Debug, Default)]
pub struct Reconciler {
    elements: HashMap<NodeKey, SurfaceId>,
    /// Text node → the surface text inside its span.
    texts: HashMap<NodeKey, SurfaceId>,
    theme: ThemeConfig,
}

impl Reconciler {
    pub fn new(theme: ThemeConfig) -> Self {
        Self {
            elements: HashMap::new(),
            texts: HashMap::new(),
            theme,
        }
    }

    pub fn surface_id(&self, key: NodeKey) -> Option<SurfaceId> {
        self.elements.get(&key).copied()
    }

    /// Surface text handle of a text node.
    pub fn text_id(&self, key: NodeKey) -> Option<SurfaceId> {
        self.texts.get(&key).copied()
    }

    /// Map the root node onto the surface root; enough for an empty document.
    pub fn attach_root(&mut self, root: SurfaceId) {
        self.elements.insert(NodeKey::ROOT, root);
    }

    /// Render `snapshot` from scratch onto an empty surface.
    pub fn mount(
        &mut self,
        surface: &mut dyn RenderSurface,
        snapshot: &Snapshot,
    ) -> Result<MutationLedger> {
        self.elements.clear();
        self.texts.clear();
        self.elements.insert(NodeKey::ROOT, surface.root());
        let root = snapshot.node(NodeKey::ROOT)?;
        surface.update_element(surface.root(), &element_spec(root, &self.theme));

        let mut pass = Pass {
            prev: snapshot,
            next: snapshot,
            ledger: MutationLedger::default(),
            mounting: true,
            created: HashSet::new(),
        };
        for child in snapshot.children(NodeKey::ROOT) {
            let id = self.create(surface, &mut pass, child)?;
            surface.insert(surface.root(), id, None);
        }
        log::debug!("mounted version {}", snapshot.version());
        Ok(pass.ledger)
    }

    /// Drop everything on the surface and render `snapshot` again.
    pub fn rebuild(
        &mut self,
        surface: &mut dyn RenderSurface,
        snapshot: &Snapshot,
    ) -> Result<MutationLedger> {
        surface.clear();
        self.mount(surface, snapshot)
    }

    /// Patch the surface from `prev` (what it currently shows) to `next`.
    pub fn reconcile(
        &mut self,
        surface: &mut dyn RenderSurface,
        prev: &Snapshot,
        next: &Snapshot,
        dirty: &DirtySets,
    ) -> Result<MutationLedger> {
        if dirty.is_empty() {
            return Ok(MutationLedger::default());
        }
        let mut pass = Pass {
            prev,
            next,
            ledger: MutationLedger::default(),
            mounting: false,
            created: HashSet::new(),
        };
        self.reconcile_node(surface, &mut pass, NodeKey::ROOT)?;
        log::debug!(
            "reconciled {} -> {}: {} node mutations",
            prev.version(),
            next.version(),
            pass.ledger.len()
        );
        Ok(pass.ledger)
    }

    /// Move the surface selection to match `selection`.
    pub fn sync_selection(
        &self,
        surface: &mut dyn RenderSurface,
        selection: Option<&Selection>,
    ) -> Result<()> {
        let range = selection.and_then(Selection::as_range);
        let Some(range) = range else {
            surface.set_selection(None);
            return Ok(());
        };
        let anchor = self.surface_point(range.anchor)?;
        let focus = self.surface_point(range.focus)?;
        surface.set_selection(Some(SurfaceSelection { anchor, focus }));
        Ok(())
    }

    fn surface_point(&self, point: Point) -> Result<SurfacePoint> {
        let map = match point.kind {
            PointType::Text => &self.texts,
            PointType::Element => &self.elements,
        };
        let node = map
            .get(&point.key)
            .copied()
            .ok_or(EngineError::MissingRenderElement(point.key))?;
        Ok(SurfacePoint {
            node,
            offset: point.offset,
        })
    }

    fn lookup(&self, key: NodeKey) -> Result<SurfaceId> {
        self.surface_id(key)
            .ok_or(EngineError::MissingRenderElement(key))
    }

    /// Reconcile a key present in both snapshots, returning its (possibly new) handle.
    fn reconcile_node(
        &mut self,
        surface: &mut dyn RenderSurface,
        pass: &mut Pass<'_>,
        key: NodeKey,
    ) -> Result<SurfaceId> {
        let id = self.lookup(key)?;
        let (Some(prev), Some(next)) = (pass.prev.shared(key), pass.next.shared(key)) else {
            return Err(EngineError::NodeNotFound(key));
        };
        if Rc::ptr_eq(prev, next) {
            return Ok(id);
        }
        let (prev, next) = (Rc::clone(prev), Rc::clone(next));

        let prev_spec = element_spec(&prev, &self.theme);
        let next_spec = element_spec(&next, &self.theme);
        if prev.type_tag() != next.type_tag() || prev_spec.tag != next_spec.tag {
            log::trace!("{key} changed type, recreating");
            return self.recreate(surface, pass, key, id);
        }
        if prev_spec != next_spec {
            surface.update_element(id, &next_spec);
            pass.ledger.record(next.type_tag(), key, Mutation::Updated);
        }

        match (prev.text(), next.text()) {
            (Some(before), Some(after)) if before.text() != after.text() => {
                let text_id = self
                    .texts
                    .get(&key)
                    .copied()
                    .ok_or(EngineError::MissingRenderElement(key))?;
                let (prefix, suffix) = common_affixes(before.text(), after.text());
                let deleted = char_len(before.text()) - prefix - suffix;
                let inserted = slice_chars(after.text(), prefix, char_len(after.text()) - suffix);
                surface.splice_text(text_id, prefix, deleted, inserted);
                pass.ledger.record("text", key, Mutation::Updated);
            }
            _ => {}
        }

        if next.element().is_some() {
            self.reconcile_children(surface, pass, key, id)?;
        }
        Ok(id)
    }

    fn recreate(
        &mut self,
        surface: &mut dyn RenderSurface,
        pass: &mut Pass<'_>,
        key: NodeKey,
        old: SurfaceId,
    ) -> Result<SurfaceId> {
        self.elements.remove(&key);
        self.texts.remove(&key);
        let new = self.create(surface, pass, key)?;
        surface.replace(old, new);
        self.forget_subtree(pass, key);
        Ok(new)
    }

    fn reconcile_children(
        &mut self,
        surface: &mut dyn RenderSurface,
        pass: &mut Pass<'_>,
        key: NodeKey,
        id: SurfaceId,
    ) -> Result<()> {
        let prev_children = pass.prev.child_keys(key);
        let next_children = pass.next.child_keys(key);

        if prev_children == next_children {
            for child in next_children {
                self.reconcile_node(surface, pass, child)?;
            }
            return Ok(());
        }
        if let ([before], [after]) = (prev_children.as_slice(), next_children.as_slice()) {
            self.forget(surface, pass, *before);
            let new = self.create(surface, pass, *after)?;
            surface.insert(id, new, None);
            return Ok(());
        }

        let (mut prev_start, mut next_start) = (0, 0);
        let (mut prev_end, mut next_end) = (prev_children.len(), next_children.len());
        while prev_start < prev_end
            && next_start < next_end
            && prev_children[prev_start] == next_children[next_start]
        {
            self.reconcile_node(surface, pass, next_children[next_start])?;
            prev_start += 1;
            next_start += 1;
        }
        while prev_start < prev_end
            && next_start < next_end
            && prev_children[prev_end - 1] == next_children[next_end - 1]
        {
            self.reconcile_node(surface, pass, next_children[next_end - 1])?;
            prev_end -= 1;
            next_end -= 1;
        }

        let prev_middle = &prev_children[prev_start..prev_end];
        let next_middle = &next_children[next_start..next_end];
        let prev_index: HashMap<NodeKey, usize> = prev_middle
            .iter()
            .enumerate()
            .map(|(i, k)| (*k, i))
            .collect();
        let next_set: HashSet<NodeKey> = next_middle.iter().copied().collect();

        for removed in prev_middle.iter().filter(|k| !next_set.contains(k)) {
            self.forget(surface, pass, *removed);
        }

        let kept: Vec<usize> = next_middle
            .iter()
            .filter_map(|k| prev_index.get(k).copied())
            .collect();
        let stable: HashSet<usize> = longest_increasing_run(&kept).into_iter().collect();

        let mut before = match next_children.get(next_end) {
            Some(anchor) => Some(self.lookup(*anchor)?),
            None => None,
        };
        for child in next_middle.iter().rev() {
            let child_id = match prev_index.get(child) {
                Some(index) => {
                    let child_id = self.reconcile_node(surface, pass, *child)?;
                    if !stable.contains(index) {
                        log::trace!("moving {child}");
                        surface.insert(id, child_id, before);
                    }
                    child_id
                }
                None => {
                    let child_id = self.create(surface, pass, *child)?;
                    surface.insert(id, child_id, before);
                    child_id
                }
            };
            before = Some(child_id);
        }
        Ok(())
    }

    /// Build a fresh surface subtree for `key` as it is in the next snapshot.
    fn create(
        &mut self,
        surface: &mut dyn RenderSurface,
        pass: &mut Pass<'_>,
        key: NodeKey,
    ) -> Result<SurfaceId> {
        // a node moved in from a parent that has not been reconciled yet
        if let Some(stale) = self.elements.remove(&key) {
            surface.detach(stale);
            self.texts.remove(&key);
        }

        let node = Rc::clone(
            pass.next
                .shared(key)
                .ok_or(EngineError::NodeNotFound(key))?,
        );
        let id = surface.create_element(&element_spec(&node, &self.theme));
        if let Some(text) = node.text() {
            let text_id = surface.create_text(text.text());
            surface.insert(id, text_id, None);
            self.texts.insert(key, text_id);
        }
        for child in pass.next.child_keys(key) {
            let child_id = self.create(surface, pass, child)?;
            surface.insert(id, child_id, None);
        }

        self.elements.insert(key, id);
        pass.created.insert(key);
        let mutation = if !pass.mounting && pass.prev.contains(key) {
            Mutation::Updated
        } else {
            Mutation::Created
        };
        pass.ledger.record(node.type_tag(), key, mutation);
        Ok(id)
    }

    /// Tear down the surface element of a key that left this child list.
    fn forget(&mut self, surface: &mut dyn RenderSurface, pass: &mut Pass<'_>, key: NodeKey) {
        if pass.created.contains(&key) {
            return;
        }
        let Some(id) = self.elements.remove(&key) else {
            return;
        };
        self.texts.remove(&key);
        self.forget_subtree(pass, key);
        surface.detach(id);
        if !pass.next.contains(key)
            && let Some(node) = pass.prev.get(key)
        {
            pass.ledger.record(node.type_tag(), key, Mutation::Destroyed);
        }
    }

    /// Drop the mappings of `key`'s old descendants that were not rebuilt in this pass.
    fn forget_subtree(&mut self, pass: &mut Pass<'_>, key: NodeKey) {
        let mut stack = pass.prev.child_keys(key);
        while let Some(descendant) = stack.pop() {
            stack.extend(pass.prev.children(descendant));
            if pass.created.contains(&descendant) {
                continue;
            }
            self.elements.remove(&descendant);
            self.texts.remove(&descendant);
            if !pass.next.contains(descendant)
                && let Some(node) = pass.prev.get(descendant)
            {
                pass.ledger
                    .record(node.type_tag(), descendant, Mutation::Destroyed);
            }
        }
    }
}

/// Values of the longest strictly increasing subsequence of `seq`.
fn longest_increasing_run(seq: &[usize]) -> Vec<usize> {
    // tails[l] = index into seq of the smallest tail of an increasing run of length l + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut parents: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, value) in seq.iter().enumerate() {
        let len = tails.partition_point(|&t| seq[t] < *value);
        parents[i] = len.checked_sub(1).map(|l| tails[l]);
        if len == tails.len() {
            tails.push(i);
        } else {
            tails[len] = i;
        }
    }
    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        run.push(seq[i]);
        cursor = parents[i];
    }
    run.reverse();
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::node::HeadingTag;
    use crate::editing::testing::{commit, paragraph_doc, texts_of};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn everything() -> DirtySets {
        DirtySets {
            full: true,
            ..Default::default()
        }
    }

    fn mounted(snap: &Snapshot) -> (Reconciler, MemorySurface) {
        let mut reconciler = Reconciler::default();
        let mut surface = MemorySurface::new();
        reconciler.mount(&mut surface, snap).unwrap();
        (reconciler, surface)
    }

    fn block(snap: &Snapshot, index: usize) -> NodeKey {
        snap.child_at(NodeKey::ROOT, index).unwrap()
    }

    #[test]
    fn test_mount_renders_the_whole_tree() {
        let snap = paragraph_doc(&[&["plain", "bold"], &[]]);
        let (_, surface) = mounted(&snap);
        assert_eq!(
            surface.to_html(),
            "<p><span>plain</span><span data-format=\"bold\">bold</span></p><p></p>"
        );
    }

    #[test]
    fn test_identical_snapshots_cost_nothing() {
        let snap = paragraph_doc(&[&["a", "b"], &["c"]]);
        let (mut reconciler, mut surface) = mounted(&snap);
        let before = surface.mutation_count();

        let ledger = reconciler
            .reconcile(&mut surface, &snap, &snap, &DirtySets::default())
            .unwrap();
        assert!(ledger.is_empty());
        // even a forced full pass skips every shared node
        reconciler
            .reconcile(&mut surface, &snap, &snap, &everything())
            .unwrap();
        assert_eq!(surface.mutation_count(), before);
    }

    #[test]
    fn test_text_edit_splices_only_the_changed_run() {
        let snap = paragraph_doc(&[&["hello"]]);
        let text = texts_of(&snap, block(&snap, 0))[0];
        let next = commit(&snap, |tx| tx.set_text(text, "help!"));
        let (mut reconciler, mut surface) = mounted(&snap);
        let before = surface.mutation_count();

        let ledger = reconciler
            .reconcile(&mut surface, &snap, &next, &everything())
            .unwrap();
        assert_eq!(surface.mutation_count() - before, 1);
        assert_eq!(ledger.get("text", text), Some(Mutation::Updated));
        assert_eq!(surface.to_html(), "<p><span>help!</span></p>");
    }

    #[test]
    fn test_reordered_children_reuse_their_surface_elements() {
        let snap = paragraph_doc(&[&["one"], &["two"], &["three"]]);
        let (first, third) = (block(&snap, 0), block(&snap, 2));
        let next = commit(&snap, |tx| tx.insert_before(first, third));
        let (mut reconciler, mut surface) = mounted(&snap);
        let ids: Vec<SurfaceId> = [first, third]
            .iter()
            .map(|k| reconciler.surface_id(*k).unwrap())
            .collect();

        reconciler
            .reconcile(&mut surface, &snap, &next, &everything())
            .unwrap();
        assert_eq!(reconciler.surface_id(first), Some(ids[0]));
        assert_eq!(reconciler.surface_id(third), Some(ids[1]));
        assert_eq!(
            surface.to_html(),
            "<p><span>three</span></p><p><span>one</span></p><p><span>two</span></p>"
        );
    }

    #[test]
    fn test_type_change_recreates_the_element() {
        let snap = paragraph_doc(&[&["title"], &["body"]]);
        let first = block(&snap, 0);
        let next = commit(&snap, |tx| {
            tx.set_element_kind(first, ElementKind::Heading(HeadingTag::H1))
        });
        let (mut reconciler, mut surface) = mounted(&snap);
        let old = reconciler.surface_id(first).unwrap();

        reconciler
            .reconcile(&mut surface, &snap, &next, &everything())
            .unwrap();
        assert_ne!(reconciler.surface_id(first), Some(old));
        assert!(!surface.contains(old));
        assert_eq!(
            surface.to_html(),
            "<h1><span>title</span></h1><p><span>body</span></p>"
        );
    }

    #[test]
    fn test_removed_nodes_are_destroyed_and_recorded() {
        let snap = paragraph_doc(&[&["keep"], &["drop", "me"]]);
        let doomed = block(&snap, 1);
        let doomed_texts = texts_of(&snap, doomed);
        let next = commit(&snap, |tx| tx.remove(doomed, false));
        let (mut reconciler, mut surface) = mounted(&snap);

        let ledger = reconciler
            .reconcile(&mut surface, &snap, &next, &everything())
            .unwrap();
        assert_eq!(ledger.get("paragraph", doomed), Some(Mutation::Destroyed));
        assert_eq!(ledger.get("text", doomed_texts[1]), Some(Mutation::Destroyed));
        assert_eq!(reconciler.surface_id(doomed), None);
        assert_eq!(surface.to_html(), "<p><span>keep</span></p>");
    }

    #[test]
    fn test_node_moved_across_parents_is_rebuilt_once() {
        let snap = paragraph_doc(&[&["a"], &["b"]]);
        let (first, second) = (block(&snap, 0), block(&snap, 1));
        let moved = texts_of(&snap, second)[0];
        let next = commit(&snap, |tx| {
            let quote = tx.create_element(ElementKind::Quote)?;
            tx.insert_after(second, quote)?;
            tx.append(quote, &[moved])?;
            tx.remove(second, false)
        });
        let (mut reconciler, mut surface) = mounted(&snap);

        reconciler
            .reconcile(&mut surface, &snap, &next, &everything())
            .unwrap();
        assert_eq!(
            surface.to_html(),
            "<p><span>a</span></p><blockquote><span>b</span></blockquote>"
        );
        assert!(reconciler.surface_id(first).is_some());
        assert!(reconciler.surface_id(second).is_none());
        assert!(reconciler.text_id(moved).is_some());
    }

    #[test]
    fn test_unmounted_surface_reports_missing_element() {
        let snap = paragraph_doc(&[&["x"]]);
        let next = commit(&snap, |tx| tx.set_text(texts_of(&snap, block(&snap, 0))[0], "y"));
        let mut reconciler = Reconciler::default();
        let mut surface = MemorySurface::new();

        let err = reconciler
            .reconcile(&mut surface, &snap, &next, &everything())
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingRenderElement(key) if key == NodeKey::ROOT));
    }

    #[rstest]
    #[case(&[], &[])]
    #[case(&[0, 1, 2], &[0, 1, 2])]
    #[case(&[2, 0, 1], &[0, 1])]
    #[case(&[3, 1, 2, 0, 4], &[1, 2, 4])]
    fn test_longest_increasing_run(#[case] seq: &[usize], #[case] expected: &[usize]) {
        assert_eq!(longest_increasing_run(seq), expected);
    }
}
