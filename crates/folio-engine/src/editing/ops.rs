//! Selection-level editing: the algorithms behind typing, deleting, splitting and
//! formatting. Each works on the transaction's current range selection and leaves
//! a valid selection behind.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::editing::caret::{Caret, CaretRange, Direction, caret_from_point};
use crate::editing::node::{
    ElementFormat, ElementKind, ListType, Node, NodeKey, TextFormat, TextMode,
};
use crate::editing::selection::{Point, PointType, RangeSelection, Selection, normalize_point};
use crate::editing::snapshot::Snapshot;
use crate::editing::text::{char_len, next_grapheme, prev_grapheme, slice_chars};
use crate::editing::transaction::Transaction;
use crate::error::{EngineError, Result};

// ============ Helpers ============

fn detached(key: NodeKey) -> EngineError {
    EngineError::InvariantViolation(format!("{key} is not attached to a parent"))
}

/// Collapse the selection onto `point`, keeping the pending format.
fn set_caret(tx: &mut Transaction<'_>, point: Point) {
    match tx.range_selection_mut() {
        Some(range) => {
            range.anchor = point;
            range.focus = point;
        }
        None => tx.set_selection(Some(Selection::caret(point))),
    }
}

fn set_range(tx: &mut Transaction<'_>, anchor: Point, focus: Point) {
    match tx.range_selection_mut() {
        Some(range) => {
            range.anchor = anchor;
            range.focus = focus;
        }
        None => tx.set_selection(Some(Selection::Range(RangeSelection::new(anchor, focus)))),
    }
}

/// Take the pending format and style from the text the caret sits in.
fn sync_format(tx: &mut Transaction<'_>) {
    let Some(range) = tx.range_selection() else {
        return;
    };
    let Some(text) = tx.view().get(range.anchor.key).and_then(Node::text) else {
        return;
    };
    let (format, style) = (text.format, text.style.clone());
    if let Some(range) = tx.range_selection_mut() {
        range.format = format;
        range.style = style;
    }
}

fn block_of_point(view: &Snapshot, point: Point) -> Option<NodeKey> {
    view.parent_block(point.key)
}

/// A block whose children are inline content.
fn is_leaf_block(view: &Snapshot, key: NodeKey) -> bool {
    view.get(key).is_some_and(Node::is_block)
        && !view
            .children(key)
            .any(|c| view.get(c).is_some_and(Node::is_block))
}

/// Whether `key` may hold inline children directly.
fn accepts_inline(view: &Snapshot, key: NodeKey) -> bool {
    match view.get(key) {
        Some(node) => {
            !node.is_root() && !matches!(node.element_kind(), Some(ElementKind::List { .. }))
        }
        None => false,
    }
}

fn end_of(view: &Snapshot, key: NodeKey) -> Point {
    match view.get(key).and_then(Node::text) {
        Some(text) => Point::text(key, text.len()),
        None => normalize_point(view, Point::element(key, view.get(key).map_or(0, Node::size))),
    }
}

/// The position right after `key`.
fn point_after(view: &Snapshot, key: NodeKey) -> Result<Point> {
    let node = view.node(key)?;
    if node.is_text() || node.is_block() {
        return Ok(end_of(view, key));
    }
    let parent = node.parent().ok_or_else(|| detached(key))?;
    let index = view.index_in_parent(key).unwrap_or(0);
    Ok(normalize_point(view, Point::element(parent, index + 1)))
}

fn create_styled_text(
    tx: &mut Transaction<'_>,
    content: &str,
    range: &RangeSelection,
) -> Result<NodeKey> {
    let key = tx.create_text(content)?;
    if !range.format.is_empty() {
        tx.set_format(key, range.format)?;
    }
    if !range.style.is_empty() {
        tx.set_style(key, range.style.clone())?;
    }
    Ok(key)
}

/// A fresh block able to hold inline content inside `container`.
fn create_block_for(tx: &mut Transaction<'_>, container: NodeKey) -> Result<NodeKey> {
    let in_list = matches!(
        tx.get(container)?.element_kind(),
        Some(ElementKind::List { .. })
    );
    if in_list {
        tx.create_element(ElementKind::ListItem {
            value: 1,
            checked: None,
        })
    } else {
        tx.create_paragraph()
    }
}

/// Insert inline `nodes` at `(container, index)`, wrapping them in a new block when
/// the container only takes blocks.
fn insert_inline_at(
    tx: &mut Transaction<'_>,
    container: NodeKey,
    index: usize,
    nodes: &[NodeKey],
) -> Result<()> {
    if accepts_inline(tx.view(), container) {
        tx.splice(container, index, 0, nodes)?;
    } else {
        let block = create_block_for(tx, container)?;
        tx.append(block, nodes)?;
        tx.splice(container, index, 0, &[block])?;
    }
    Ok(())
}

/// Split the text at `point` and every inline element between it and `stop`.
/// Returns the child index of `stop` at which the split falls.
fn split_inline_to(tx: &mut Transaction<'_>, point: Point, stop: NodeKey) -> Result<usize> {
    let (mut container, mut index) = match point.kind {
        PointType::Element => (point.key, point.offset),
        PointType::Text => {
            let node = tx.get(point.key)?;
            let parent = node.parent().ok_or_else(|| detached(point.key))?;
            let (len, token) = node
                .text()
                .map_or((0, false), |t| (t.len(), t.mode == TextMode::Token));
            let position = tx.view().index_in_parent(point.key).unwrap_or(0);
            if point.offset == 0 {
                (parent, position)
            } else if point.offset >= len || token {
                (parent, position + 1)
            } else {
                tx.split_text(point.key, &[point.offset])?;
                (parent, position + 1)
            }
        }
    };

    while container != stop {
        let node = tx.get(container)?;
        let parent = node.parent().ok_or_else(|| detached(container))?;
        let size = node.size();
        let kind = node.element_kind().cloned();
        let position = tx.view().index_in_parent(container).unwrap_or(0);
        if index == 0 {
            index = position;
        } else if index >= size {
            index = position + 1;
        } else {
            let kind = kind.ok_or(EngineError::InvalidNodeType {
                key: container,
                expected: "element",
                actual: "root",
            })?;
            let twin = tx.create_element(kind)?;
            let tail = tx.view().child_keys(container)[index..].to_vec();
            tx.append(twin, &tail)?;
            tx.insert_after(container, twin)?;
            index = position + 1;
        }
        container = parent;
    }
    Ok(index)
}

/// The block created when `block` is split; `at_end` when nothing moves into it.
fn create_block_after(tx: &mut Transaction<'_>, block: NodeKey, at_end: bool) -> Result<NodeKey> {
    let node = tx.get(block)?;
    let data = node.element().cloned().unwrap_or_default();
    let kind = match node.element_kind() {
        Some(ElementKind::Heading(tag)) if !at_end => ElementKind::Heading(*tag),
        Some(ElementKind::ListItem { value, checked }) => ElementKind::ListItem {
            value: value + 1,
            checked: checked.map(|_| false),
        },
        Some(ElementKind::Code { language }) if !at_end => ElementKind::Code {
            language: language.clone(),
        },
        _ => ElementKind::Paragraph,
    };
    let new = tx.create_element(kind)?;
    tx.set_element_format(new, data.format)?;
    tx.set_indent(new, data.indent)?;
    tx.set_direction(new, data.direction)?;
    Ok(new)
}

/// Split `block` at `point`; everything after the point moves into a new block
/// inserted right after it, which is returned.
fn split_block(tx: &mut Transaction<'_>, point: Point, block: NodeKey) -> Result<NodeKey> {
    let index = split_inline_to(tx, point, block)?;
    let size = tx.get(block)?.size();
    let tail = create_block_after(tx, block, index >= size)?;
    let moved = tx.view().child_keys(block)[index.min(size)..].to_vec();
    tx.append(tail, &moved)?;
    tx.insert_after(block, tail)?;
    Ok(tail)
}

/// Replace a list item with a paragraph placed outside its list, splitting the
/// list when the item sits in the middle. Returns the paragraph.
fn list_item_to_paragraph(tx: &mut Transaction<'_>, item: NodeKey) -> Result<NodeKey> {
    let list = tx.get(item)?.parent().ok_or_else(|| detached(item))?;
    let list_kind = tx.get(list)?.element_kind().cloned();
    let index = tx.view().index_in_parent(item).unwrap_or(0);
    let size = tx.get(list)?.size();

    let paragraph = tx.create_paragraph()?;
    tx.replace(item, paragraph, true)?;
    if index == 0 {
        tx.insert_before(list, paragraph)?;
    } else if index + 1 >= size {
        tx.insert_after(list, paragraph)?;
    } else {
        let kind = list_kind.ok_or(EngineError::InvalidNodeType {
            key: list,
            expected: "list",
            actual: "root",
        })?;
        let rest = tx.create_element(kind)?;
        let tail = tx.view().child_keys(list)[index + 1..].to_vec();
        tx.append(rest, &tail)?;
        tx.insert_after(list, paragraph)?;
        tx.insert_after(paragraph, rest)?;
    }
    Ok(paragraph)
}

/// What sits next to a boundary point in some direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Neighbor {
    Text(NodeKey),
    /// A line break or decorator.
    Leaf(NodeKey),
    /// The edge of the enclosing block.
    Boundary,
}

/// Look past a boundary point, stepping into inline elements and out of them.
fn neighbor(view: &Snapshot, point: Point, direction: Direction) -> Neighbor {
    let Some(mut caret) = caret_from_point(view, point, direction) else {
        return Neighbor::Boundary;
    };
    if let Caret::Text { origin, .. } = caret {
        caret = Caret::sibling(origin, direction);
    }
    loop {
        match caret.adjacent(view).and_then(|k| view.get(k)) {
            Some(node) if node.is_text() => return Neighbor::Text(node.key()),
            Some(node) if node.is_element() && node.is_inline() => {
                caret = Caret::child(node.key(), direction);
            }
            Some(node) if node.is_element() => return Neighbor::Boundary,
            Some(node) => return Neighbor::Leaf(node.key()),
            None => {
                let Some(container) = caret.container(view).and_then(|k| view.get(k)) else {
                    return Neighbor::Boundary;
                };
                if container.is_inline() && !container.is_root() {
                    caret = Caret::sibling(container.key(), direction);
                } else {
                    return Neighbor::Boundary;
                }
            }
        }
    }
}

/// The nearest block before or after `block`, descending to a block that holds
/// inline content (or a block-level leaf).
fn adjacent_block(view: &Snapshot, block: NodeKey, direction: Direction) -> Option<NodeKey> {
    let forward = direction == Direction::Next;
    let mut current = block;
    let mut target = loop {
        let node = view.get(current)?;
        let sibling = if forward {
            node.next_sibling()
        } else {
            node.prev_sibling()
        };
        if let Some(sibling) = sibling {
            break sibling;
        }
        let parent = node.parent()?;
        if parent.is_root() {
            return None;
        }
        current = parent;
    };
    loop {
        let data = view.get(target)?.element();
        let child = data.and_then(|d| if forward { d.first_child() } else { d.last_child() });
        match child {
            Some(child) if view.get(child).is_some_and(Node::is_block) => target = child,
            _ => return Some(target),
        }
    }
}

/// Leaf blocks touched by the range, in document order.
pub fn selected_blocks(view: &Snapshot, range: &RangeSelection) -> Vec<NodeKey> {
    let span = CaretRange::new(view, range.anchor, range.focus);
    let mut keys = vec![span.start.key];
    keys.extend(span.iter(view).map(|c| c.origin()));
    keys.push(span.end.key);

    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for key in keys {
        if let Some(block) = view.parent_block(key)
            && is_leaf_block(view, block)
            && seen.insert(block)
        {
            blocks.push(block);
        }
    }
    blocks
}

// ============ Insertion ============

/// Type `content` at the selection, replacing any selected content.
pub fn insert_text(tx: &mut Transaction<'_>, content: &str) -> Result<()> {
    if tx.range_selection().is_some_and(|r| !r.is_collapsed()) {
        remove_text(tx)?;
    }
    if content.is_empty() {
        return Ok(());
    }
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(());
    };
    let point = range.anchor;
    let inserted = char_len(content);

    match point.kind {
        PointType::Text => {
            let node = tx.get(point.key)?;
            let data = node.text().cloned().ok_or(EngineError::InvalidNodeType {
                key: point.key,
                expected: "text",
                actual: node.type_tag(),
            })?;
            let extends = data.mode == TextMode::Normal
                && data.format == range.format
                && data.style == range.style;
            if extends {
                tx.splice_text(point.key, point.offset, 0, content)?;
                set_caret(tx, Point::text(point.key, point.offset + inserted));
            } else {
                let new = create_styled_text(tx, content, &range)?;
                if point.offset == 0 {
                    tx.insert_before(point.key, new)?;
                } else if point.offset >= data.len() || data.mode == TextMode::Token {
                    tx.insert_after(point.key, new)?;
                } else {
                    let parts = tx.split_text(point.key, &[point.offset])?;
                    tx.insert_after(parts[0], new)?;
                }
                set_caret(tx, Point::text(new, inserted));
            }
        }
        PointType::Element => {
            let new = create_styled_text(tx, content, &range)?;
            insert_inline_at(tx, point.key, point.offset, &[new])?;
            set_caret(tx, Point::text(new, inserted));
        }
    }
    Ok(())
}

fn line_breaks() -> &'static Regex {
    static LINE_BREAK: OnceLock<Regex> = OnceLock::new();
    LINE_BREAK.get_or_init(|| Regex::new(r"\r?\n").expect("Invalid line break regex"))
}

/// Insert text that may contain newlines; each newline becomes a line break node.
pub fn insert_raw_text(tx: &mut Transaction<'_>, content: &str) -> Result<()> {
    for (i, line) in line_breaks().split(content).enumerate() {
        if i > 0 {
            insert_line_break(tx)?;
        }
        insert_text(tx, line)?;
    }
    Ok(())
}

pub fn insert_line_break(tx: &mut Transaction<'_>) -> Result<()> {
    if tx.range_selection().is_some_and(|r| !r.is_collapsed()) {
        remove_text(tx)?;
    }
    let Some(point) = tx.range_selection().map(|r| r.anchor) else {
        return Ok(());
    };
    let container = match point.kind {
        PointType::Text => tx.get(point.key)?.parent().ok_or_else(|| detached(point.key))?,
        PointType::Element => point.key,
    };
    let index = split_inline_to(tx, point, container)?;
    let line_break = tx.create_line_break()?;
    insert_inline_at(tx, container, index, &[line_break])?;

    let view = tx.view();
    let after = match view.get(line_break).and_then(Node::next_sibling) {
        Some(next) if view.get(next).is_some_and(Node::is_text) => Point::text(next, 0),
        _ => {
            let parent = view.get(line_break).and_then(Node::parent).unwrap_or(container);
            let position = view.index_in_parent(line_break).unwrap_or(0);
            Point::element(parent, position + 1)
        }
    };
    set_caret(tx, after);
    Ok(())
}

/// Split the block at the caret (Enter).
pub fn insert_paragraph(tx: &mut Transaction<'_>) -> Result<()> {
    if tx.range_selection().is_some_and(|r| !r.is_collapsed()) {
        remove_text(tx)?;
    }
    let Some(point) = tx.range_selection().map(|r| r.anchor) else {
        return Ok(());
    };
    let view = tx.view();
    let Some(block) = block_of_point(view, point).filter(|b| is_leaf_block(view, *b)) else {
        let paragraph = tx.create_paragraph()?;
        tx.splice(point.key, point.offset, 0, &[paragraph])?;
        set_caret(tx, Point::element(paragraph, 0));
        return Ok(());
    };

    let empty_item = matches!(
        view.get(block).and_then(Node::element_kind),
        Some(ElementKind::ListItem { .. })
    ) && view.get(block).is_some_and(|n| n.size() == 0);
    if empty_item {
        let paragraph = list_item_to_paragraph(tx, block)?;
        set_caret(tx, Point::element(paragraph, 0));
        return Ok(());
    }

    let tail = split_block(tx, point, block)?;
    set_caret(tx, Point::element(tail, 0));
    Ok(())
}

/// Insert detached nodes at the selection. Inline nodes go in at the caret; any
/// block among them splits the current block and lands between the halves.
pub fn insert_nodes(tx: &mut Transaction<'_>, nodes: &[NodeKey]) -> Result<()> {
    if nodes.is_empty() {
        return Ok(());
    }
    if tx.range_selection().is_some_and(|r| !r.is_collapsed()) {
        remove_text(tx)?;
    }
    let point = match tx.range_selection() {
        Some(range) => range.anchor,
        None => {
            let size = tx.get(NodeKey::ROOT)?.size();
            Point::element(NodeKey::ROOT, size)
        }
    };
    let view = tx.view();
    let all_inline = nodes
        .iter()
        .all(|k| view.get(*k).is_some_and(Node::is_inline));
    let block = block_of_point(view, point).filter(|b| is_leaf_block(view, *b));
    let last = nodes[nodes.len() - 1];

    if all_inline {
        let container = match point.kind {
            PointType::Text => tx.get(point.key)?.parent().ok_or_else(|| detached(point.key))?,
            PointType::Element => point.key,
        };
        let index = split_inline_to(tx, point, container)?;
        insert_inline_at(tx, container, index, nodes)?;
        let after = point_after(tx.view(), last)?;
        set_caret(tx, after);
        return Ok(());
    }

    let blocks = wrap_inline_runs(tx, nodes)?;
    let block_is_empty = match block {
        Some(block) => tx.get(block)?.size() == 0,
        None => false,
    };
    match block {
        None => {
            let (container, index) = match point.kind {
                PointType::Element => (point.key, point.offset),
                PointType::Text => {
                    let parent = tx.get(point.key)?.parent().ok_or_else(|| detached(point.key))?;
                    (parent, tx.view().index_in_parent(point.key).map_or(0, |i| i + 1))
                }
            };
            tx.splice(container, index, 0, &blocks)?;
        }
        Some(block) if block_is_empty => {
            let (parent, index) = parent_slot(tx.view(), block)?;
            tx.splice(parent, index + 1, 0, &blocks)?;
            tx.remove(block, false)?;
        }
        Some(block) => {
            let tail = split_block(tx, point, block)?;
            let (parent, index) = parent_slot(tx.view(), block)?;
            tx.splice(parent, index + 1, 0, &blocks)?;
            if tx.get(tail)?.size() == 0 {
                tx.remove(tail, false)?;
            }
            if tx.get(block)?.size() == 0 {
                tx.remove(block, false)?;
            }
        }
    }
    let last_block = blocks[blocks.len() - 1];
    let after = end_of(tx.view(), last_block);
    set_caret(tx, after);
    Ok(())
}

fn parent_slot(view: &Snapshot, key: NodeKey) -> Result<(NodeKey, usize)> {
    let parent = view.node(key)?.parent().ok_or_else(|| detached(key))?;
    Ok((parent, view.index_in_parent(key).unwrap_or(0)))
}

/// Group runs of inline nodes into paragraphs so the result is all blocks.
fn wrap_inline_runs(tx: &mut Transaction<'_>, nodes: &[NodeKey]) -> Result<Vec<NodeKey>> {
    let mut blocks = Vec::new();
    let mut run: Vec<NodeKey> = Vec::new();
    for &key in nodes {
        if tx.get(key)?.is_inline() {
            run.push(key);
            continue;
        }
        if !run.is_empty() {
            let paragraph = tx.create_paragraph()?;
            tx.append(paragraph, &run)?;
            blocks.push(paragraph);
            run.clear();
        }
        blocks.push(key);
    }
    if !run.is_empty() {
        let paragraph = tx.create_paragraph()?;
        tx.append(paragraph, &run)?;
        blocks.push(paragraph);
    }
    Ok(blocks)
}

// ============ Deletion ============

/// Delete the selected content, merging the block the selection ends in into the
/// block it starts in. The selection collapses to the start.
pub fn remove_text(tx: &mut Transaction<'_>) -> Result<()> {
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(());
    };
    if range.is_collapsed() {
        return Ok(());
    }
    let view = tx.view();
    let span = CaretRange::new(view, range.anchor, range.focus);
    let start_block = block_of_point(view, span.start);
    let end_block = block_of_point(view, span.end);
    let slices = span.text_slices(view);
    let doomed = span.top_contained(view);

    set_caret(tx, span.start);

    for slice in slices {
        let key = slice.key();
        let token = tx
            .get(key)?
            .text()
            .is_some_and(|t| t.mode == TextMode::Token);
        if token {
            tx.remove(key, true)?;
            continue;
        }
        let (from, to) = slice.indices();
        tx.splice_text(key, from, to - from, "")?;
    }
    for key in doomed {
        if tx.view().is_attached(key) {
            tx.remove(key, false)?;
        }
    }

    if let (Some(into), Some(from)) = (start_block, end_block) {
        let view = tx.view();
        let mergeable = into != from
            && view.is_attached(into)
            && view.is_attached(from)
            && !view.is_ancestor(into, from)
            && !view.is_ancestor(from, into);
        if mergeable {
            let children = view.child_keys(from);
            tx.append(into, &children)?;
            tx.remove(from, false)?;
        }
    }
    sync_format(tx);
    Ok(())
}

fn delete_between(tx: &mut Transaction<'_>, from: Point, to: Point) -> Result<()> {
    set_range(tx, from, to);
    remove_text(tx)
}

/// Backspace (`backward`) or forward delete at the selection.
pub fn delete_character(tx: &mut Transaction<'_>, backward: bool) -> Result<()> {
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(());
    };
    if !range.is_collapsed() {
        return remove_text(tx);
    }
    let point = range.anchor;
    let direction = Direction::backward(backward);

    if let Some(data) = tx.view().get(point.key).and_then(Node::text).cloned() {
        if data.mode == TextMode::Token {
            return tx.remove(point.key, false);
        }
        let step = if backward {
            prev_grapheme(data.text(), point.offset)
        } else {
            next_grapheme(data.text(), point.offset)
        };
        if let Some(other) = step {
            return delete_between(tx, point, Point::text(point.key, other));
        }
    }

    match neighbor(tx.view(), point, direction) {
        Neighbor::Text(key) => {
            let data = tx.get(key)?.text().cloned().unwrap_or_default();
            if data.mode == TextMode::Token {
                return tx.remove(key, false);
            }
            let len = data.len();
            let (from, to) = if backward {
                (prev_grapheme(data.text(), len).unwrap_or(0), len)
            } else {
                (0, next_grapheme(data.text(), 0).unwrap_or(len))
            };
            delete_between(tx, Point::text(key, from), Point::text(key, to))
        }
        Neighbor::Leaf(key) => tx.remove(key, false),
        Neighbor::Boundary => delete_at_block_edge(tx, point, backward),
    }
}

fn delete_at_block_edge(tx: &mut Transaction<'_>, point: Point, backward: bool) -> Result<()> {
    let view = tx.view();
    let Some(block) = block_of_point(view, point) else {
        return Ok(());
    };
    let node = view.node(block)?;
    let collapses = backward && node.behavior().collapse_at_start;
    let is_item = matches!(node.element_kind(), Some(ElementKind::ListItem { .. }));
    if collapses && is_item {
        let paragraph = list_item_to_paragraph(tx, block)?;
        set_caret(tx, Point::element(paragraph, 0));
        return Ok(());
    }
    if collapses {
        return tx.set_element_kind(block, ElementKind::Paragraph);
    }

    let direction = Direction::backward(backward);
    let Some(target) = adjacent_block(view, block, direction) else {
        return Ok(());
    };
    if !view.get(target).is_some_and(Node::is_element) {
        return tx.remove(target, false);
    }
    let (from, to) = if backward {
        (end_of(view, target), Point::element(block, 0))
    } else {
        (end_of(view, block), Point::element(target, 0))
    };
    delete_between(tx, from, to)
}

// ============ Formatting ============

fn with_flag(format: TextFormat, flag: TextFormat, on: bool) -> TextFormat {
    if !on {
        return format.difference(flag);
    }
    let mut next = format.union(flag);
    if flag.contains(TextFormat::SUBSCRIPT) {
        next.remove(TextFormat::SUPERSCRIPT);
    }
    if flag.contains(TextFormat::SUPERSCRIPT) {
        next.remove(TextFormat::SUBSCRIPT);
    }
    next
}

/// Toggle `flag` over the selected text. Whether it is switched on or off follows
/// the first selected node; a collapsed selection only toggles the pending format.
pub fn format_text(tx: &mut Transaction<'_>, flag: TextFormat) -> Result<()> {
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(());
    };
    if range.is_collapsed() {
        if let Some(range) = tx.range_selection_mut() {
            range.format = range.format.toggled(flag);
        }
        return Ok(());
    }

    let view = tx.view();
    let backward = range.is_backward(view);
    let span = CaretRange::new(view, range.anchor, range.focus);
    let text_len = |key: NodeKey| view.get(key).and_then(Node::text).map(|t| t.len());

    let mut targets: Vec<(NodeKey, usize, usize)> = Vec::new();
    if span.start.is_text() && span.end.is_text() && span.start.key == span.end.key {
        targets.push((span.start.key, span.start.offset, span.end.offset));
    } else {
        if span.start.is_text()
            && let Some(len) = text_len(span.start.key)
        {
            targets.push((span.start.key, span.start.offset, len));
        }
        for key in span.contained_nodes(view) {
            if let Some(len) = text_len(key) {
                targets.push((key, 0, len));
            }
        }
        if span.end.is_text() {
            targets.push((span.end.key, 0, span.end.offset));
        }
    }
    targets.retain(|(_, from, to)| from < to);
    let Some(&(first, _, _)) = targets.first() else {
        return Ok(());
    };
    let switch_on = !view
        .get(first)
        .and_then(Node::text)
        .is_some_and(|t| t.format.contains(flag));

    let mut parts = Vec::with_capacity(targets.len());
    for (key, from, to) in targets {
        let data = tx.get(key)?.text().cloned().unwrap_or_default();
        let whole = from == 0 && to == data.len();
        let part = if whole || data.mode == TextMode::Token {
            key
        } else {
            let pieces = tx.split_text(key, &[from, to])?;
            if from == 0 { pieces[0] } else { pieces[1] }
        };
        tx.set_format(part, with_flag(data.format, flag, switch_on))?;
        parts.push(part);
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    let start = Point::text(first, 0);
    let end = Point::text(last, text_len_of(tx.view(), last));
    if backward {
        set_range(tx, end, start);
    } else {
        set_range(tx, start, end);
    }
    let format = tx
        .get(first)?
        .text()
        .map(|t| t.format)
        .unwrap_or_default();
    if let Some(range) = tx.range_selection_mut() {
        range.format = format;
    }
    Ok(())
}

fn text_len_of(view: &Snapshot, key: NodeKey) -> usize {
    view.get(key).and_then(Node::text).map_or(0, |t| t.len())
}

/// Set the alignment of every selected block.
pub fn format_element(tx: &mut Transaction<'_>, format: ElementFormat) -> Result<()> {
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(());
    };
    for block in selected_blocks(tx.view(), &range) {
        tx.set_element_format(block, format)?;
    }
    Ok(())
}

/// Convert every selected block to `kind`. List kinds gather the blocks into a
/// new list, one item per block.
pub fn set_blocks_type(tx: &mut Transaction<'_>, kind: ElementKind) -> Result<()> {
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(());
    };
    let blocks = selected_blocks(tx.view(), &range);
    let Some(&first) = blocks.first() else {
        return Ok(());
    };

    match kind {
        ElementKind::List { list_type, .. } => {
            let list = tx.create_element(kind)?;
            tx.insert_before(first, list)?;
            for (i, block) in blocks.into_iter().enumerate() {
                let item = tx.create_element(ElementKind::ListItem {
                    value: i as u32 + 1,
                    checked: (list_type == ListType::Check).then_some(false),
                })?;
                tx.replace(block, item, true)?;
                tx.append(list, &[item])?;
            }
        }
        ElementKind::ListItem { .. } | ElementKind::Link { .. } => {
            log::warn!("{} is not a block type; ignoring", kind.type_tag());
        }
        kind => {
            for block in blocks {
                let is_item = matches!(
                    tx.get(block)?.element_kind(),
                    Some(ElementKind::ListItem { .. })
                );
                let block = if is_item {
                    list_item_to_paragraph(tx, block)?
                } else {
                    block
                };
                tx.set_element_kind(block, kind.clone())?;
            }
        }
    }
    Ok(())
}

/// Wrap the selected blocks in one new element of `kind`. The wrapper takes exactly
/// the blocks' children, in order.
pub fn wrap_blocks(tx: &mut Transaction<'_>, kind: ElementKind) -> Result<Option<NodeKey>> {
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(None);
    };
    let blocks = selected_blocks(tx.view(), &range);
    let Some(&first) = blocks.first() else {
        return Ok(None);
    };
    let wrapper = tx.create_element(kind)?;
    tx.insert_before(first, wrapper)?;
    for block in blocks {
        let children = tx.view().child_keys(block);
        tx.append(wrapper, &children)?;
        tx.remove(block, false)?;
    }
    Ok(Some(wrapper))
}

pub fn indent(tx: &mut Transaction<'_>) -> Result<()> {
    shift_indent(tx, true)
}

pub fn outdent(tx: &mut Transaction<'_>) -> Result<()> {
    shift_indent(tx, false)
}

fn shift_indent(tx: &mut Transaction<'_>, deeper: bool) -> Result<()> {
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(());
    };
    for block in selected_blocks(tx.view(), &range) {
        let node = tx.get(block)?;
        if !node.behavior().can_indent {
            continue;
        }
        let current = node.element().map_or(0, |e| e.indent);
        let next = if deeper {
            current + 1
        } else {
            current.saturating_sub(1)
        };
        if next != current {
            tx.set_indent(block, next)?;
        }
    }
    Ok(())
}

// ============ Navigation ============

/// One grapheme (or one atomic node, or one block edge) further in `direction`.
fn step_point(view: &Snapshot, point: Point, direction: Direction) -> Option<Point> {
    let backward = direction == Direction::Previous;
    if let Some(text) = view.get(point.key).and_then(Node::text) {
        let step = if backward {
            prev_grapheme(text.text(), point.offset)
        } else {
            next_grapheme(text.text(), point.offset)
        };
        if let Some(offset) = step {
            return Some(Point::text(point.key, offset));
        }
    }
    match neighbor(view, point, direction) {
        Neighbor::Text(key) => {
            let text = view.get(key)?.text()?;
            let offset = if backward {
                prev_grapheme(text.text(), text.len())?
            } else {
                next_grapheme(text.text(), 0)?
            };
            Some(Point::text(key, offset))
        }
        Neighbor::Leaf(key) => {
            let parent = view.get(key)?.parent()?;
            let index = view.index_in_parent(key)?;
            Some(Point::element(parent, if backward { index } else { index + 1 }))
        }
        Neighbor::Boundary => {
            let block = block_of_point(view, point)?;
            let target = adjacent_block(view, block, direction)?;
            let node = view.get(target)?;
            if !node.is_element() {
                let parent = node.parent()?;
                let index = view.index_in_parent(target)?;
                return Some(Point::element(parent, if backward { index } else { index + 1 }));
            }
            let offset = if backward { node.size() } else { 0 };
            Some(normalize_point(view, Point::element(target, offset)))
        }
    }
}

/// Arrow keys. Without `extend`, a non-collapsed selection collapses to its edge.
pub fn move_caret(tx: &mut Transaction<'_>, backward: bool, extend: bool) -> Result<()> {
    let Some(range) = tx.range_selection().cloned() else {
        return Ok(());
    };
    let view = tx.view();
    if !extend && !range.is_collapsed() {
        let (start, end) = range.ordered(view);
        set_caret(tx, if backward { start } else { end });
        sync_format(tx);
        return Ok(());
    }
    let Some(next) = step_point(view, range.focus, Direction::backward(backward)) else {
        return Ok(());
    };
    if extend {
        set_range(tx, range.anchor, next);
    } else {
        set_caret(tx, next);
        sync_format(tx);
    }
    Ok(())
}

pub fn select_all(tx: &mut Transaction<'_>) -> Result<()> {
    let view = tx.view();
    let size = view.node(NodeKey::ROOT)?.size();
    let anchor = normalize_point(view, Point::element(NodeKey::ROOT, 0));
    let focus = normalize_point(view, Point::element(NodeKey::ROOT, size));
    set_range(tx, anchor, focus);
    Ok(())
}

/// Plain text of the selected content. Blocks are separated by a blank line.
pub fn get_text_content(view: &Snapshot, range: &RangeSelection) -> String {
    if range.is_collapsed() {
        return String::new();
    }
    let span = CaretRange::new(view, range.anchor, range.focus);
    let mut out = String::new();
    let mut last_block: Option<NodeKey> = None;
    let mut push = |key: NodeKey, content: &str| {
        let block = view.parent_block(key);
        if last_block.is_some() && block != last_block {
            out.push_str("\n\n");
        }
        last_block = block;
        out.push_str(content);
    };
    let text_of = |key: NodeKey| view.get(key).and_then(Node::text).map(|t| t.text());

    if span.start.is_text() && span.end.is_text() && span.start.key == span.end.key {
        let content = text_of(span.start.key).unwrap_or_default();
        push(
            span.start.key,
            slice_chars(content, span.start.offset, span.end.offset),
        );
        return out;
    }
    if span.start.is_text()
        && let Some(content) = text_of(span.start.key)
    {
        push(
            span.start.key,
            slice_chars(content, span.start.offset, char_len(content)),
        );
    }
    for caret in span.iter(view) {
        let Caret::Sibling { origin, .. } = caret else {
            continue;
        };
        let Some(node) = view.get(origin) else { continue };
        if let Some(text) = node.text() {
            push(origin, text.text());
        } else if node.is_line_break() {
            push(origin, "\n");
        }
    }
    if span.end.is_text()
        && let Some(content) = text_of(span.end.key)
    {
        push(span.end.key, slice_chars(content, 0, span.end.offset));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::testing::{commit, paragraph_doc, texts_of};
    use pretty_assertions::assert_eq;

    fn caret_in(snap: &Snapshot, block: usize, text: usize, offset: usize) -> Point {
        let block = snap.child_at(NodeKey::ROOT, block).unwrap();
        Point::text(texts_of(snap, block)[text], offset)
    }

    #[test]
    fn test_typing_extends_the_text_under_the_caret() {
        let snap = paragraph_doc(&[&["helo"]]);
        let at = caret_in(&snap, 0, 0, 3);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            insert_text(tx, "l")
        });
        assert_eq!(next.text_content(NodeKey::ROOT), "hello");
        let range = next.selection().and_then(Selection::as_range).unwrap();
        assert_eq!(range.anchor, Point::text(at.key, 4));
    }

    #[test]
    fn test_typing_with_pending_format_creates_a_new_node() {
        let snap = paragraph_doc(&[&["ab"]]);
        let at = caret_in(&snap, 0, 0, 1);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            format_text(tx, TextFormat::BOLD)?;
            insert_text(tx, "X")
        });
        insta::assert_snapshot!(next.outline(), @r#"
        root
          paragraph
            text "a"
            text "X" [bold]
            text "b"
        "#);
    }

    #[test]
    fn test_forward_delete_between_two_chars() {
        let next = commit(&Snapshot::empty(), |tx| {
            let paragraph = tx.create_paragraph()?;
            tx.append(NodeKey::ROOT, &[paragraph])?;
            tx.set_selection(Some(Selection::caret(Point::element(paragraph, 0))));
            insert_text(tx, "ab")?;
            move_caret(tx, true, false)?;
            delete_character(tx, false)
        });
        assert_eq!(next.text_content(NodeKey::ROOT), "a");
        let range = next.selection().and_then(Selection::as_range).unwrap();
        assert_eq!(range.anchor.offset, 1);
        assert!(range.is_collapsed());
    }

    #[test]
    fn test_backspace_at_block_start_merges_blocks() {
        let snap = paragraph_doc(&[&["one"], &["two"]]);
        let at = caret_in(&snap, 1, 0, 0);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            delete_character(tx, true)
        });
        assert_eq!(next.text_content(NodeKey::ROOT), "onetwo");
        assert_eq!(next.child_keys(NodeKey::ROOT).len(), 1);
        let range = next.selection().and_then(Selection::as_range).unwrap();
        let paragraph = next.child_at(NodeKey::ROOT, 0).unwrap();
        assert_eq!(range.anchor, Point::text(texts_of(&next, paragraph)[0], 3));
    }

    #[test]
    fn test_backspace_at_heading_start_turns_it_into_a_paragraph() {
        let snap = paragraph_doc(&[&["one"], &["two"]]);
        let heading = snap.child_at(NodeKey::ROOT, 1).unwrap();
        let at = caret_in(&snap, 1, 0, 0);
        let next = commit(&snap, |tx| {
            tx.set_element_kind(heading, ElementKind::Heading(crate::editing::HeadingTag::H2))?;
            tx.set_selection(Some(Selection::caret(at)));
            delete_character(tx, true)
        });
        assert_eq!(
            next.get(heading).and_then(Node::element_kind),
            Some(&ElementKind::Paragraph)
        );
        assert_eq!(next.child_keys(NodeKey::ROOT).len(), 2);
    }

    #[test]
    fn test_remove_text_across_blocks() {
        let snap = paragraph_doc(&[&["hello"], &["middle"], &["world"]]);
        let from = caret_in(&snap, 0, 0, 2);
        let to = caret_in(&snap, 2, 0, 3);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::Range(RangeSelection::new(from, to))));
            remove_text(tx)
        });
        assert_eq!(next.text_content(NodeKey::ROOT), "held");
        next.check_invariants().unwrap();
    }

    #[test]
    fn test_select_all_then_delete_leaves_one_empty_block() {
        let snap = paragraph_doc(&[&["a", "b"], &["c"]]);
        let next = commit(&snap, |tx| {
            select_all(tx)?;
            delete_character(tx, true)
        });
        assert_eq!(next.text_content(NodeKey::ROOT), "");
        assert_eq!(next.child_keys(NodeKey::ROOT).len(), 1);
        next.check_invariants().unwrap();
    }

    #[test]
    fn test_enter_splits_the_paragraph() {
        let snap = paragraph_doc(&[&["abcd"]]);
        let at = caret_in(&snap, 0, 0, 2);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            insert_paragraph(tx)
        });
        insta::assert_snapshot!(next.outline(), @r#"
        root
          paragraph
            text "ab"
          paragraph
            text "cd"
        "#);
        let second = next.child_at(NodeKey::ROOT, 1).unwrap();
        let range = next.selection().and_then(Selection::as_range).unwrap();
        assert_eq!(range.anchor, Point::text(texts_of(&next, second)[0], 0));
    }

    #[test]
    fn test_raw_text_newlines_become_line_breaks() {
        let snap = paragraph_doc(&[&[]]);
        let paragraph = snap.child_at(NodeKey::ROOT, 0).unwrap();
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(Point::element(paragraph, 0))));
            insert_raw_text(tx, "one\r\ntwo\nthree")
        });
        assert_eq!(next.text_content(NodeKey::ROOT), "one\ntwo\nthree");
        assert_eq!(next.child_keys(paragraph).len(), 5);
    }

    #[test]
    fn test_format_text_splits_partial_nodes() {
        let snap = paragraph_doc(&[&["abcdef"]]);
        let from = caret_in(&snap, 0, 0, 2);
        let to = caret_in(&snap, 0, 0, 4);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::Range(RangeSelection::new(from, to))));
            format_text(tx, TextFormat::ITALIC)
        });
        insta::assert_snapshot!(next.outline(), @r#"
        root
          paragraph
            text "ab"
            text "cd" [italic]
            text "ef"
        "#);
        let range = next.selection().and_then(Selection::as_range).unwrap();
        assert_eq!(range.format, TextFormat::ITALIC);
        assert_eq!(get_text_content(&next, range), "cd");
    }

    #[test]
    fn test_format_follows_first_node() {
        let snap = paragraph_doc(&[&["plain", "bold"]]);
        let from = caret_in(&snap, 0, 0, 0);
        let to = caret_in(&snap, 0, 1, 4);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::Range(RangeSelection::new(from, to))));
            format_text(tx, TextFormat::BOLD)
        });
        // "plain" was not bold, so everything becomes bold and merges.
        insta::assert_snapshot!(next.outline(), @r#"
        root
          paragraph
            text "plainbold" [bold]
        "#);
    }

    #[test]
    fn test_wrap_blocks_keeps_children_and_formats() {
        let snap = paragraph_doc(&[&["one", "two"], &["three", "four"]]);
        let next = commit(&snap, |tx| {
            select_all(tx)?;
            wrap_blocks(tx, ElementKind::Quote)?;
            Ok(())
        });
        insta::assert_snapshot!(next.outline(), @r#"
        root
          quote
            text "one"
            text "two" [bold]
            text "three"
            text "four" [bold]
        "#);
    }

    #[test]
    fn test_bullet_list_from_blocks_and_back() {
        let snap = paragraph_doc(&[&["a"], &["b"]]);
        let listed = commit(&snap, |tx| {
            select_all(tx)?;
            set_blocks_type(
                tx,
                ElementKind::List {
                    list_type: ListType::Bullet,
                    start: 1,
                },
            )
        });
        insta::assert_snapshot!(listed.outline(), @r#"
        root
          list bullet
            listitem
              text "a"
            listitem
              text "b"
        "#);

        let list = listed.child_at(NodeKey::ROOT, 0).unwrap();
        let first_item = listed.child_at(list, 0).unwrap();
        let at = Point::text(texts_of(&listed, first_item)[0], 0);
        let unlisted = commit(&listed, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            delete_character(tx, true)
        });
        insta::assert_snapshot!(unlisted.outline(), @r#"
        root
          paragraph
            text "a"
          list bullet
            listitem
              text "b"
        "#);
    }

    #[test]
    fn test_indent_and_outdent() {
        let snap = paragraph_doc(&[&["a"]]);
        let at = caret_in(&snap, 0, 0, 0);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            indent(tx)?;
            indent(tx)?;
            outdent(tx)
        });
        let paragraph = next.child_at(NodeKey::ROOT, 0).unwrap();
        assert_eq!(next.get(paragraph).and_then(Node::element).map(|e| e.indent), Some(1));
    }

    #[test]
    fn test_move_caret_crosses_blocks() {
        let snap = paragraph_doc(&[&["ab"], &["cd"]]);
        let at = caret_in(&snap, 0, 0, 2);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            move_caret(tx, false, false)
        });
        let range = next.selection().and_then(Selection::as_range).unwrap();
        assert_eq!(range.anchor, caret_in(&next, 1, 0, 0));

        let extended = commit(&next, |tx| {
            move_caret(tx, false, true)?;
            move_caret(tx, false, true)
        });
        let range = extended.selection().and_then(Selection::as_range).unwrap();
        assert_eq!(get_text_content(&extended, range), "cd");
    }

    #[test]
    fn test_text_content_of_multi_block_selection() {
        let snap = paragraph_doc(&[&["ab"], &["cd"]]);
        let range = RangeSelection::new(caret_in(&snap, 0, 0, 1), caret_in(&snap, 1, 0, 1));
        assert_eq!(get_text_content(&snap, &range), "b\n\nc");
    }

    #[test]
    fn test_insert_block_nodes_splits_the_current_block() {
        let snap = paragraph_doc(&[&["abcd"]]);
        let at = caret_in(&snap, 0, 0, 2);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            let heading = tx.create_element(ElementKind::Heading(crate::editing::HeadingTag::H1))?;
            let title = tx.create_text("Title")?;
            tx.append(heading, &[title])?;
            insert_nodes(tx, &[heading])
        });
        insta::assert_snapshot!(next.outline(), @r#"
        root
          paragraph
            text "ab"
          heading h1
            text "Title"
          paragraph
            text "cd"
        "#);
    }

    #[test]
    fn test_insert_inline_nodes_at_caret() {
        let snap = paragraph_doc(&[&["ad"]]);
        let at = caret_in(&snap, 0, 0, 1);
        let next = commit(&snap, |tx| {
            tx.set_selection(Some(Selection::caret(at)));
            let bc = tx.create_text("bc")?;
            tx.set_format(bc, TextFormat::UNDERLINE)?;
            insert_nodes(tx, &[bc])
        });
        assert_eq!(next.text_content(NodeKey::ROOT), "abcd");
        let range = next.selection().and_then(Selection::as_range).unwrap();
        let paragraph = next.child_at(NodeKey::ROOT, 0).unwrap();
        assert_eq!(range.anchor, Point::text(texts_of(&next, paragraph)[1], 2));
    }
}
