use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::rc::Rc;

use crate::editing::node::{ElementData, Node, NodeKey, NodeKind};
use crate::editing::selection::{PointType, Selection};
use crate::error::{EngineError, Result};

/// One immutable version of the whole document plus its selection.
///
/// Nodes are shared between versions through `Rc`: a transaction that touches a
/// node gets its own copy (and copies of every ancestor), everything else stays
/// pointer-identical to the previous snapshot. The reconciler relies on that:
/// `Rc::ptr_eq` on two versions of a subtree root means the subtree is unchanged.
///
/// ## Reading
///
/// ```rust
/// # use folio_engine::{Snapshot, NodeKey};
/// let snapshot = Snapshot::empty();
/// assert_eq!(snapshot.child_keys(NodeKey::ROOT).len(), 0);
/// assert_eq!(snapshot.text_content(NodeKey::ROOT), "");
/// ```
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) nodes: HashMap<NodeKey, Rc<Node>>,
    pub(crate) selection: Option<Selection>,
    pub(crate) version: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot {
    /// A document holding only the root.
    pub fn empty() -> Self {
        let root = Node::new(NodeKey::ROOT, NodeKind::Root(ElementData::default()));
        Self {
            nodes: HashMap::from([(NodeKey::ROOT, Rc::new(root))]),
            selection: None,
            version: 0,
        }
    }

    /// Incremented once per committed transaction.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.get(NodeKey::ROOT)
            .map(|root| root.size() == 0)
            .unwrap_or(true)
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key).map(Rc::as_ref)
    }

    pub fn node(&self, key: NodeKey) -> Result<&Node> {
        self.get(key).ok_or(EngineError::NodeNotFound(key))
    }

    pub(crate) fn shared(&self, key: NodeKey) -> Option<&Rc<Node>> {
        self.nodes.get(&key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.keys().copied()
    }

    pub fn children(&self, key: NodeKey) -> Children<'_> {
        let next = self
            .get(key)
            .and_then(|n| n.element())
            .and_then(|e| e.first_child());
        Children {
            snapshot: self,
            next,
        }
    }

    pub fn child_keys(&self, key: NodeKey) -> Vec<NodeKey> {
        self.children(key).collect()
    }

    /// Walks from whichever end of the sibling list is closer.
    pub fn child_at(&self, key: NodeKey, index: usize) -> Option<NodeKey> {
        let data = self.get(key)?.element()?;
        if index >= data.size() {
            return None;
        }
        if index <= data.size() / 2 {
            self.children(key).nth(index)
        } else {
            let mut current = data.last_child();
            for _ in 0..(data.size() - 1 - index) {
                current = current.and_then(|k| self.get(k)).and_then(|n| n.prev_sibling());
            }
            current
        }
    }

    pub fn index_in_parent(&self, key: NodeKey) -> Option<usize> {
        let node = self.get(key)?;
        node.parent()?;
        let mut index = 0;
        let mut current = node.prev_sibling();
        while let Some(prev) = current {
            index += 1;
            current = self.get(prev).and_then(|n| n.prev_sibling());
        }
        Some(index)
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self, key: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        let mut current = self.get(key).and_then(|n| n.parent());
        std::iter::from_fn(move || {
            let key = current?;
            current = self.get(key).and_then(|n| n.parent());
            Some(key)
        })
    }

    pub fn is_attached(&self, key: NodeKey) -> bool {
        if key.is_root() {
            return self.contains(key);
        }
        self.contains(key) && self.ancestors(key).any(|k| k.is_root())
    }

    pub fn is_ancestor(&self, ancestor: NodeKey, key: NodeKey) -> bool {
        self.ancestors(key).any(|k| k == ancestor)
    }

    /// Nearest block element at or above `key`. `None` for the root itself.
    pub fn parent_block(&self, key: NodeKey) -> Option<NodeKey> {
        std::iter::once(key)
            .chain(self.ancestors(key))
            .find(|k| self.get(*k).is_some_and(Node::is_block))
    }

    /// The ancestor-or-self whose parent is the root.
    pub fn top_level_element(&self, key: NodeKey) -> Option<NodeKey> {
        std::iter::once(key)
            .chain(self.ancestors(key))
            .find(|k| self.get(*k).and_then(Node::parent) == Some(NodeKey::ROOT))
    }

    /// Deepest first descendant, or `None` when `key` has no children.
    pub fn first_descendant(&self, key: NodeKey) -> Option<NodeKey> {
        let mut current = self.get(key)?.element()?.first_child()?;
        while let Some(first) = self
            .get(current)
            .and_then(|n| n.element())
            .and_then(ElementData::first_child)
        {
            current = first;
        }
        Some(current)
    }

    pub fn last_descendant(&self, key: NodeKey) -> Option<NodeKey> {
        let mut current = self.get(key)?.element()?.last_child()?;
        while let Some(last) = self
            .get(current)
            .and_then(|n| n.element())
            .and_then(ElementData::last_child)
        {
            current = last;
        }
        Some(current)
    }

    /// Plain text of a subtree. Block children are separated by a blank line.
    pub fn text_content(&self, key: NodeKey) -> String {
        let mut out = String::new();
        self.write_text_content(key, &mut out);
        out
    }

    fn write_text_content(&self, key: NodeKey, out: &mut String) {
        let Some(node) = self.get(key) else { return };
        match node.kind() {
            NodeKind::Text(data) => out.push_str(data.text()),
            NodeKind::LineBreak => out.push('\n'),
            NodeKind::Decorator(_) => {}
            NodeKind::Root(_) | NodeKind::Element { .. } => {
                let children = self.child_keys(key);
                let last = children.len().saturating_sub(1);
                for (i, child) in children.into_iter().enumerate() {
                    self.write_text_content(child, out);
                    if i != last && self.get(child).is_some_and(Node::is_block) {
                        out.push_str("\n\n");
                    }
                }
            }
        }
    }

    /// Verify the structural invariants of a committed snapshot.
    ///
    /// - every non-root node is reachable from the root exactly once;
    /// - sibling links agree with each other and with the parent's child count;
    /// - text nodes are non-empty;
    /// - selection points reference present keys with in-range offsets.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::InvariantViolation(msg));
        let root = self.node(NodeKey::ROOT)?;
        if root.parent().is_some() {
            return fail("root has a parent".into());
        }

        let mut seen = HashSet::from([NodeKey::ROOT]);
        let mut stack = vec![NodeKey::ROOT];
        while let Some(key) = stack.pop() {
            let node = self.node(key)?;
            if let Some(text) = node.text()
                && text.is_empty()
            {
                return fail(format!("text node {key} is empty"));
            }
            let Some(data) = node.element() else { continue };

            let mut count = 0;
            let mut prev: Option<NodeKey> = None;
            let mut current = data.first_child();
            while let Some(child_key) = current {
                let child = self.node(child_key)?;
                if !seen.insert(child_key) {
                    return fail(format!("{child_key} appears more than once"));
                }
                if child.parent() != Some(key) {
                    return fail(format!("{child_key} does not point back to parent {key}"));
                }
                if child.prev_sibling() != prev {
                    return fail(format!("{child_key} has a stale previous link"));
                }
                count += 1;
                prev = Some(child_key);
                stack.push(child_key);
                current = child.next_sibling();
            }
            if prev != data.last_child() {
                return fail(format!("{key} last child link does not match the chain"));
            }
            if count != data.size() {
                return fail(format!(
                    "{key} records {} children but the chain has {count}",
                    data.size()
                ));
            }
        }
        if seen.len() != self.nodes.len() {
            return fail(format!(
                "{} nodes are not reachable from the root",
                self.nodes.len() - seen.len()
            ));
        }

        match &self.selection {
            Some(Selection::Range(range)) => {
                for point in [range.anchor, range.focus] {
                    let node = self.node(point.key)?;
                    let ok = match point.kind {
                        PointType::Text => node.text().is_some_and(|t| point.offset <= t.len()),
                        PointType::Element => {
                            node.element().is_some_and(|e| point.offset <= e.size())
                        }
                    };
                    if !ok {
                        return fail(format!("selection point {point:?} is out of range"));
                    }
                }
            }
            Some(Selection::Node(nodes)) => {
                if let Some(missing) = nodes.keys.iter().find(|k| !self.contains(**k)) {
                    return fail(format!("node selection references missing {missing}"));
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Indented outline of the tree without keys, stable across runs.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(NodeKey::ROOT, 0, &mut out);
        out
    }

    fn write_outline(&self, key: NodeKey, depth: usize, out: &mut String) {
        let Some(node) = self.get(key) else { return };
        let pad = "  ".repeat(depth);
        let _ = match node.kind() {
            NodeKind::Text(data) => {
                let marks: Vec<String> = data.format.names().collect();
                if marks.is_empty() {
                    writeln!(out, "{pad}text {:?}", data.text())
                } else {
                    writeln!(out, "{pad}text {:?} [{}]", data.text(), marks.join(","))
                }
            }
            NodeKind::Element { kind, data } if data.indent > 0 => {
                writeln!(out, "{pad}{} indent={}", describe_element(kind), data.indent)
            }
            NodeKind::Element { kind, .. } => writeln!(out, "{pad}{}", describe_element(kind)),
            NodeKind::Decorator(data) => writeln!(out, "{pad}decorator {}", data.kind),
            other => writeln!(out, "{pad}{}", other.type_tag()),
        };
        for child in self.children(key) {
            self.write_outline(child, depth + 1, out);
        }
    }
}

fn describe_element(kind: &crate::editing::node::ElementKind) -> String {
    use crate::editing::node::ElementKind;
    match kind {
        ElementKind::Heading(tag) => format!("heading {}", tag.as_str()),
        ElementKind::List { list_type, .. } => format!("list {list_type:?}").to_lowercase(),
        ElementKind::Link { url, .. } => format!("link {url}"),
        other => other.type_tag().to_string(),
    }
}

/// Iterator over a node's child keys, following next-sibling links.
pub struct Children<'a> {
    snapshot: &'a Snapshot,
    next: Option<NodeKey>,
}

impl Iterator for Children<'_> {
    type Item = NodeKey;

    fn next(&mut self) -> Option<NodeKey> {
        let key = self.next?;
        self.next = self.snapshot.get(key).and_then(Node::next_sibling);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::testing::{paragraph_doc, texts_of};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_snapshot_holds_only_root() {
        let snap = Snapshot::empty();
        assert_eq!(snap.len(), 1);
        assert!(snap.is_empty());
        assert!(snap.check_invariants().is_ok());
    }

    #[test]
    fn test_child_at_walks_from_both_ends() {
        let snap = paragraph_doc(&[&["a"], &["b"], &["c"], &["d"], &["e"]]);
        let children = snap.child_keys(NodeKey::ROOT);
        for (i, key) in children.iter().enumerate() {
            assert_eq!(snap.child_at(NodeKey::ROOT, i), Some(*key));
            assert_eq!(snap.index_in_parent(*key), Some(i));
        }
        assert_eq!(snap.child_at(NodeKey::ROOT, 5), None);
    }

    #[test]
    fn test_text_content_separates_blocks() {
        let snap = paragraph_doc(&[&["Hello", " world"], &["Second"]]);
        assert_eq!(snap.text_content(NodeKey::ROOT), "Hello world\n\nSecond");
    }

    #[test]
    fn test_parent_block_and_top_level() {
        let snap = paragraph_doc(&[&["ab"]]);
        let paragraph = snap.child_at(NodeKey::ROOT, 0).unwrap();
        let text = texts_of(&snap, paragraph)[0];

        assert_eq!(snap.parent_block(text), Some(paragraph));
        assert_eq!(snap.top_level_element(text), Some(paragraph));
        assert_eq!(snap.parent_block(NodeKey::ROOT), None);
        assert!(snap.is_attached(text));
        assert!(snap.is_ancestor(NodeKey::ROOT, text));
    }

    #[test]
    fn test_first_and_last_descendant() {
        let snap = paragraph_doc(&[&["a", "b"], &["c"]]);
        let first = snap.child_at(NodeKey::ROOT, 0).unwrap();
        let last = snap.child_at(NodeKey::ROOT, 1).unwrap();

        assert_eq!(
            snap.first_descendant(NodeKey::ROOT),
            Some(texts_of(&snap, first)[0])
        );
        assert_eq!(
            snap.last_descendant(NodeKey::ROOT),
            Some(texts_of(&snap, last)[0])
        );
    }

    #[test]
    fn test_outline_lists_marks() {
        let snap = paragraph_doc(&[&["plain", "bold"]]);
        insta::assert_snapshot!(snap.outline(), @r#"
        root
          paragraph
            text "plain"
            text "bold" [bold]
        "#);
    }
}
