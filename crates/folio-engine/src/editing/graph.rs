//! Structural mutations on the pending graph.
//!
//! Everything here funnels through [`Transaction::get_writable`], so the only
//! externally visible effect of a mutation is dirty-set growth. Selection points
//! that reference touched nodes are kept valid as part of each operation.

use std::collections::HashSet;

use crate::editing::node::{
    ElementData, ElementFormat, ElementKind, NodeKey, NodeKind, TextData, TextDirection,
    TextFormat, TextMode,
};
use crate::editing::selection::{Point, PointType};
use crate::editing::snapshot::Snapshot;
use crate::editing::text;
use crate::editing::transaction::Transaction;
use crate::error::{EngineError, Result};

impl Transaction<'_> {
    /// Apply `f` to both points of the range selection, if any.
    pub(crate) fn map_points(&mut self, f: impl Fn(&Snapshot, Point) -> Point) {
        let Some(range) = self.range_selection() else {
            return;
        };
        let view = self.view();
        let anchor = f(view, range.anchor);
        let focus = f(view, range.focus);
        if anchor == range.anchor && focus == range.focus {
            return;
        }
        if let Some(range) = self.range_selection_mut() {
            range.anchor = anchor;
            range.focus = focus;
        }
    }

    fn element_writable(&mut self, key: NodeKey) -> Result<&mut ElementData> {
        let actual = self.get(key)?.type_tag();
        self.get_writable(key)?
            .element_mut()
            .ok_or(EngineError::InvalidNodeType {
                key,
                expected: "element",
                actual,
            })
    }

    fn text_writable(&mut self, key: NodeKey) -> Result<&mut TextData> {
        let actual = self.get(key)?.type_tag();
        if actual != "text" {
            return Err(EngineError::InvalidNodeType {
                key,
                expected: "text",
                actual,
            });
        }
        self.get_writable(key)?
            .text_mut()
            .ok_or(EngineError::InvalidNodeType {
                key,
                expected: "text",
                actual,
            })
    }

    /// Detach `key` from its parent, fixing sibling links and the parent's size.
    fn unlink(&mut self, key: NodeKey) -> Result<()> {
        let node = self.get(key)?;
        let Some(parent) = node.parent() else {
            return Ok(());
        };
        let (prev, next) = (node.prev_sibling(), node.next_sibling());
        let index = self.view().index_in_parent(key).unwrap_or(0);

        if let Some(prev) = prev {
            self.get_writable(prev)?.next = next;
        }
        if let Some(next) = next {
            self.get_writable(next)?.prev = prev;
        }
        let data = self.element_writable(parent)?;
        if data.first == Some(key) {
            data.first = next;
        }
        if data.last == Some(key) {
            data.last = prev;
        }
        data.size -= 1;

        let node = self.get_writable(key)?;
        node.parent = None;
        node.prev = None;
        node.next = None;

        self.map_points(|_, p| {
            if p.kind == PointType::Element && p.key == parent && p.offset > index {
                Point::element(parent, p.offset - 1)
            } else {
                p
            }
        });
        Ok(())
    }

    /// Link a detached `key` into `parent` right after `after` (at the head for `None`).
    fn link_after(&mut self, parent: NodeKey, after: Option<NodeKey>, key: NodeKey) -> Result<()> {
        let (next, index) = match after {
            Some(after) => (
                self.get(after)?.next_sibling(),
                self.view().index_in_parent(after).map_or(0, |i| i + 1),
            ),
            None => (
                self.get(parent)?.element().and_then(ElementData::first_child),
                0,
            ),
        };

        {
            let node = self.get_writable(key)?;
            node.parent = Some(parent);
            node.prev = after;
            node.next = next;
        }
        if let Some(after) = after {
            self.get_writable(after)?.next = Some(key);
        }
        if let Some(next) = next {
            self.get_writable(next)?.prev = Some(key);
        }
        let data = self.element_writable(parent)?;
        if after.is_none() {
            data.first = Some(key);
        }
        if next.is_none() {
            data.last = Some(key);
        }
        data.size += 1;

        self.map_points(|_, p| {
            if p.kind == PointType::Element && p.key == parent && p.offset >= index {
                Point::element(parent, p.offset + 1)
            } else {
                p
            }
        });
        Ok(())
    }

    /// Remove `delete_count` children of `parent` starting at `index` and insert
    /// `insert` in their place. Returns the removed keys.
    ///
    /// Inserted nodes that are attached elsewhere are moved. Element points on
    /// `parent` past the deleted run shift by `insert.len() - delete_count`; points
    /// inside the run land after the inserted nodes; points inside removed subtrees
    /// move to the nearest text around the gap, or to the gap itself.
    pub fn splice(
        &mut self,
        parent: NodeKey,
        index: usize,
        delete_count: usize,
        insert: &[NodeKey],
    ) -> Result<Vec<NodeKey>> {
        self.splice_impl(parent, index, delete_count, insert, true)
    }

    fn splice_impl(
        &mut self,
        parent: NodeKey,
        index: usize,
        delete_count: usize,
        insert: &[NodeKey],
        collapse_empty: bool,
    ) -> Result<Vec<NodeKey>> {
        let parent_node = self.get(parent)?;
        let size = parent_node
            .element()
            .ok_or(EngineError::InvalidNodeType {
                key: parent,
                expected: "element",
                actual: parent_node.type_tag(),
            })?
            .size();
        if index + delete_count > size {
            return Err(EngineError::SpliceOutOfBounds {
                parent,
                index,
                delete_count,
                size,
            });
        }
        let inserted: HashSet<NodeKey> = insert.iter().copied().collect();
        if inserted.len() != insert.len() {
            return Err(EngineError::InvariantViolation(format!(
                "splice into {parent} inserts the same node more than once"
            )));
        }
        for &child in insert {
            if child.is_root() || child == parent || self.view().is_ancestor(child, parent) {
                return Err(EngineError::CyclicInsert { parent, child });
            }
            self.get(child)?;
        }

        let children = self.view().child_keys(parent);
        let removed: Vec<NodeKey> = children[index..index + delete_count]
            .iter()
            .copied()
            .filter(|k| !inserted.contains(k))
            .collect();
        let mut anchor = children[..index]
            .iter()
            .rev()
            .find(|k| !inserted.contains(k))
            .copied();

        for &key in &removed {
            self.unlink(key)?;
        }
        let mut vacated = Vec::new();
        for &key in insert {
            if let Some(old_parent) = self.get(key)?.parent()
                && old_parent != parent
            {
                vacated.push(old_parent);
            }
            self.unlink(key)?;
        }
        for &key in insert {
            self.link_after(parent, anchor, key)?;
            anchor = Some(key);
        }

        if !removed.is_empty() {
            let gap = anchor
                .and_then(|k| self.view().index_in_parent(k))
                .map_or(0, |i| i + 1);
            self.repair_removed_points(parent, gap, &removed);
        }

        if collapse_empty {
            self.remove_if_empty(parent)?;
        }
        for old_parent in vacated {
            self.remove_if_empty(old_parent)?;
        }
        Ok(removed)
    }

    /// Remove an attached element that is empty and whose type cannot stay empty.
    fn remove_if_empty(&mut self, key: NodeKey) -> Result<()> {
        let Some(node) = self.view().get(key) else {
            return Ok(());
        };
        if key.is_root()
            || node.size() != 0
            || node.behavior().can_be_empty
            || node.parent().is_none()
        {
            return Ok(());
        }
        log::trace!("removing {key}: it cannot be empty");
        self.remove(key, false)
    }

    /// Move points that lived inside `removed` subtrees next to the gap they left.
    fn repair_removed_points(&mut self, parent: NodeKey, gap: usize, removed: &[NodeKey]) {
        self.map_points(|view, p| {
            let inside = removed
                .iter()
                .any(|r| *r == p.key || view.is_ancestor(*r, p.key));
            if !inside {
                return p;
            }
            let before = gap
                .checked_sub(1)
                .and_then(|i| view.child_at(parent, i))
                .and_then(|k| view.get(k));
            let after = view.child_at(parent, gap).and_then(|k| view.get(k));
            if let Some(node) = before
                && let Some(text) = node.text()
            {
                Point::text(node.key(), text.len())
            } else if let Some(node) = after
                && node.is_text()
            {
                Point::text(node.key(), 0)
            } else {
                Point::element(parent, gap)
            }
        });
    }

    pub fn append(&mut self, parent: NodeKey, children: &[NodeKey]) -> Result<()> {
        let size = self.get(parent)?.size();
        self.splice(parent, size, 0, children)?;
        Ok(())
    }

    fn parent_and_index(&self, key: NodeKey) -> Result<(NodeKey, usize)> {
        let parent = self.get(key)?.parent().ok_or_else(|| {
            EngineError::InvariantViolation(format!("{key} is not attached to a parent"))
        })?;
        let index = self.view().index_in_parent(key).unwrap_or(0);
        Ok((parent, index))
    }

    pub fn insert_before(&mut self, target: NodeKey, node: NodeKey) -> Result<()> {
        let (parent, index) = self.parent_and_index(target)?;
        self.splice(parent, index, 0, &[node])?;
        Ok(())
    }

    pub fn insert_after(&mut self, target: NodeKey, node: NodeKey) -> Result<()> {
        let (parent, index) = self.parent_and_index(target)?;
        self.splice(parent, index + 1, 0, &[node])?;
        Ok(())
    }

    /// Detach `key`. Unless `preserve_empty_parent`, a parent that cannot be empty
    /// is removed with it once it has no children left.
    pub fn remove(&mut self, key: NodeKey, preserve_empty_parent: bool) -> Result<()> {
        if key.is_root() {
            return Err(EngineError::InvariantViolation("the root cannot be removed".into()));
        }
        let Some(parent) = self.get(key)?.parent() else {
            return Ok(());
        };
        let index = self.view().index_in_parent(key).unwrap_or(0);
        self.splice_impl(parent, index, 1, &[], !preserve_empty_parent)?;
        Ok(())
    }

    /// Put `new` where `old` is, optionally moving `old`'s children into it.
    pub fn replace(&mut self, old: NodeKey, new: NodeKey, include_children: bool) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let (parent, index) = self.parent_and_index(old)?;

        if include_children {
            let base = self.get(new)?.size();
            let saved = self.range_selection().map(|r| (r.anchor, r.focus));
            let children = self.view().child_keys(old);
            self.append(new, &children)?;
            if let Some((anchor, focus)) = saved {
                let remap = |p: Point, current: Point| {
                    if p.kind == PointType::Element && p.key == old {
                        Point::element(new, base + p.offset)
                    } else {
                        current
                    }
                };
                if let Some(range) = self.range_selection_mut() {
                    range.anchor = remap(anchor, range.anchor);
                    range.focus = remap(focus, range.focus);
                }
            }
        }
        self.splice(parent, index, 1, &[new])?;
        Ok(())
    }

    // ============ Text ============

    pub fn set_text(&mut self, key: NodeKey, content: impl Into<String>) -> Result<()> {
        let data = self.text_writable(key)?;
        data.text = content.into();
        let len = data.len();
        self.map_points(|_, p| {
            if p.key == key && p.offset > len {
                Point::text(key, len)
            } else {
                p
            }
        });
        Ok(())
    }

    /// Replace `delete` chars at `offset` with `insert`. Points past the deleted run
    /// shift, points inside it collapse to `offset`.
    pub fn splice_text(
        &mut self,
        key: NodeKey,
        offset: usize,
        delete: usize,
        insert: &str,
    ) -> Result<()> {
        let data = self.text_writable(key)?;
        let len = data.len();
        let offset = offset.min(len);
        let delete = delete.min(len - offset);
        data.text = text::splice_chars(&data.text, offset, delete, insert);
        let inserted = text::char_len(insert);

        self.map_points(|_, p| {
            if p.key != key || p.kind != PointType::Text || p.offset <= offset {
                p
            } else if p.offset >= offset + delete {
                Point::text(key, p.offset + inserted - delete)
            } else {
                Point::text(key, offset)
            }
        });
        Ok(())
    }

    /// Split a text node at the given char offsets. The first part keeps `key`;
    /// returns every part in order. Offsets at either end are ignored.
    pub fn split_text(&mut self, key: NodeKey, offsets: &[usize]) -> Result<Vec<NodeKey>> {
        let actual = self.get(key)?.type_tag();
        let data = self
            .get(key)?
            .text()
            .cloned()
            .ok_or(EngineError::InvalidNodeType {
                key,
                expected: "text",
                actual,
            })?;
        let len = data.len();
        let mut cuts: Vec<usize> = offsets.iter().copied().filter(|o| *o > 0 && *o < len).collect();
        cuts.sort_unstable();
        cuts.dedup();
        if cuts.is_empty() {
            return Ok(vec![key]);
        }

        let mut bounds = vec![0];
        bounds.extend(&cuts);
        bounds.push(len);

        let mut parts = vec![key];
        let mut previous = key;
        for window in bounds.windows(2).skip(1) {
            let part = self.create_node(NodeKind::Text(TextData {
                text: text::slice_chars(&data.text, window[0], window[1]).to_string(),
                format: data.format,
                style: data.style.clone(),
                mode: data.mode,
            }))?;
            self.insert_after(previous, part)?;
            parts.push(part);
            previous = part;
        }
        self.text_writable(key)?.text = text::slice_chars(&data.text, 0, bounds[1]).to_string();

        self.map_points(|_, p| {
            if p.key != key || p.kind != PointType::Text {
                return p;
            }
            // A point on a boundary stays at the end of the earlier part.
            let part = bounds
                .windows(2)
                .position(|w| p.offset <= w[1])
                .unwrap_or(parts.len() - 1);
            Point::text(parts[part], p.offset - bounds[part])
        });
        Ok(parts)
    }

    /// Merge the adjacent text node `sibling` into `key`. Returns `key`.
    pub fn merge_text(&mut self, key: NodeKey, sibling: NodeKey) -> Result<NodeKey> {
        let node = self.get(key)?;
        let sibling_is_next = if node.next_sibling() == Some(sibling) {
            true
        } else if node.prev_sibling() == Some(sibling) {
            false
        } else {
            return Err(EngineError::InvariantViolation(format!(
                "{sibling} is not adjacent to {key}"
            )));
        };
        let own = node.text().map(|t| t.text.clone()).unwrap_or_default();
        let actual = self.get(sibling)?.type_tag();
        let other = self
            .get(sibling)?
            .text()
            .map(|t| t.text.clone())
            .ok_or(EngineError::InvalidNodeType {
                key: sibling,
                expected: "text",
                actual,
            })?;
        let own_len = text::char_len(&own);
        let other_len = text::char_len(&other);

        self.text_writable(key)?.text = if sibling_is_next {
            own + &other
        } else {
            other + &own
        };
        self.map_points(|_, p| match (p.kind, p.key) {
            (PointType::Text, k) if k == sibling && sibling_is_next => {
                Point::text(key, own_len + p.offset)
            }
            (PointType::Text, k) if k == sibling => Point::text(key, p.offset),
            (PointType::Text, k) if k == key && !sibling_is_next => {
                Point::text(key, p.offset + other_len)
            }
            _ => p,
        });
        self.remove(sibling, true)?;
        Ok(key)
    }

    pub fn set_format(&mut self, key: NodeKey, format: TextFormat) -> Result<()> {
        self.text_writable(key)?.format = format;
        Ok(())
    }

    pub fn toggle_format(&mut self, key: NodeKey, flag: TextFormat) -> Result<()> {
        let data = self.text_writable(key)?;
        data.format = data.format.toggled(flag);
        Ok(())
    }

    pub fn set_style(&mut self, key: NodeKey, style: impl Into<String>) -> Result<()> {
        self.text_writable(key)?.style = style.into();
        Ok(())
    }

    pub fn set_mode(&mut self, key: NodeKey, mode: TextMode) -> Result<()> {
        self.text_writable(key)?.mode = mode;
        Ok(())
    }

    // ============ Elements ============

    /// Change an element's variant in place; the key survives.
    pub fn set_element_kind(&mut self, key: NodeKey, kind: ElementKind) -> Result<()> {
        self.registry().check_kind(&NodeKind::Element {
            kind: kind.clone(),
            data: ElementData::default(),
        })?;
        let actual = self.get(key)?.type_tag();
        match &mut self.get_writable(key)?.kind {
            NodeKind::Element { kind: current, .. } => {
                *current = kind;
                Ok(())
            }
            _ => Err(EngineError::InvalidNodeType {
                key,
                expected: "element",
                actual,
            }),
        }
    }

    pub fn set_element_format(&mut self, key: NodeKey, format: ElementFormat) -> Result<()> {
        self.element_writable(key)?.format = format;
        Ok(())
    }

    pub fn set_indent(&mut self, key: NodeKey, indent: u32) -> Result<()> {
        self.element_writable(key)?.indent = indent;
        Ok(())
    }

    pub fn set_direction(&mut self, key: NodeKey, direction: Option<TextDirection>) -> Result<()> {
        self.element_writable(key)?.direction = direction;
        Ok(())
    }
}
