//! Selection model: points anchored to node keys, range and node selections, and the
//! inward point normalization every editing algorithm relies on.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::editing::node::{NodeKey, TextFormat};
use crate::editing::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    /// Offset counts chars inside a text node.
    Text,
    /// Offset counts children of an element (a gap index, `0..=size`).
    Element,
}

/// A position in the document. Holds a key, never a reference to the node itself:
/// it is only meaningful relative to the snapshot it is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    pub kind: PointType,
}

impl Point {
    pub fn text(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointType::Text,
        }
    }

    pub fn element(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointType::Element,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == PointType::Text
    }

    /// Strictly before `other` in document order.
    pub fn is_before(&self, other: &Point, snapshot: &Snapshot) -> bool {
        compare_points(snapshot, self, other) == Ordering::Less
    }
}

/// Child-index path from the root down to the point, with the offset appended.
///
/// Lexicographic order on these paths is document order: an element point `(E, i)`
/// yields `[.., i]`, which sorts before anything inside child `i` (`[.., i, ..]`).
fn point_path(snapshot: &Snapshot, point: &Point) -> Vec<usize> {
    let mut path = vec![point.offset];
    let mut key = point.key;
    while let Some(node) = snapshot.get(key) {
        let Some(parent) = node.parent() else { break };
        path.push(snapshot.index_in_parent(key).unwrap_or(0));
        key = parent;
    }
    path.reverse();
    path
}

pub fn compare_points(snapshot: &Snapshot, a: &Point, b: &Point) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    point_path(snapshot, a).cmp(&point_path(snapshot, b))
}

/// A contiguous selection between two points, plus the format and style that the
/// next typed character will carry when the selection is collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSelection {
    pub anchor: Point,
    pub focus: Point,
    pub format: TextFormat,
    pub style: String,
}

impl RangeSelection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self {
            anchor,
            focus,
            format: TextFormat::empty(),
            style: String::new(),
        }
    }

    pub fn collapsed(point: Point) -> Self {
        Self::new(point, point)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    pub fn is_backward(&self, snapshot: &Snapshot) -> bool {
        self.focus.is_before(&self.anchor, snapshot)
    }

    /// `(start, end)` in document order.
    pub fn ordered(&self, snapshot: &Snapshot) -> (Point, Point) {
        if self.is_backward(snapshot) {
            (self.focus, self.anchor)
        } else {
            (self.anchor, self.focus)
        }
    }

    pub fn points_mut(&mut self) -> [&mut Point; 2] {
        [&mut self.anchor, &mut self.focus]
    }
}

/// Whole-object selection of non-text nodes (images, embeds...).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSelection {
    pub keys: BTreeSet<NodeKey>,
}

impl NodeSelection {
    pub fn new(keys: impl IntoIterator<Item = NodeKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Range(RangeSelection),
    Node(NodeSelection),
}

impl Selection {
    pub fn caret(point: Point) -> Self {
        Selection::Range(RangeSelection::collapsed(point))
    }

    pub fn as_range(&self) -> Option<&RangeSelection> {
        match self {
            Selection::Range(range) => Some(range),
            Selection::Node(_) => None,
        }
    }

    pub fn as_range_mut(&mut self) -> Option<&mut RangeSelection> {
        match self {
            Selection::Range(range) => Some(range),
            Selection::Node(_) => None,
        }
    }
}

/// Walk inward from an element point to the nearest concrete child point.
///
/// `(E, i)` becomes the start of child `i` when it is text or an element; at
/// `i == size` it becomes the end of the last child instead. Stops at line breaks,
/// decorators, and empty elements.
pub fn normalize_point(snapshot: &Snapshot, mut point: Point) -> Point {
    while point.kind == PointType::Element {
        let Some(node) = snapshot.get(point.key) else {
            break;
        };
        let size = node.size();
        if size == 0 {
            break;
        }
        let at_end = point.offset >= size;
        let index = if at_end { size - 1 } else { point.offset };
        let Some(child) = snapshot.child_at(point.key, index).and_then(|k| snapshot.get(k)) else {
            break;
        };
        if let Some(text) = child.text() {
            point = Point::text(child.key(), if at_end { text.len() } else { 0 });
            break;
        }
        if !child.is_element() {
            break;
        }
        point = Point::element(child.key(), if at_end { child.size() } else { 0 });
    }
    point
}

/// Check a point against the snapshot, clamping an out-of-range offset.
/// Returns `None` when the key is missing, detached, or of the wrong kind.
pub(crate) fn validate_point(snapshot: &Snapshot, point: Point) -> Option<Point> {
    let node = snapshot.get(point.key)?;
    if !snapshot.is_attached(point.key) {
        return None;
    }
    match point.kind {
        PointType::Text => {
            let text = node.text()?;
            Some(Point::text(point.key, point.offset.min(text.len())))
        }
        PointType::Element => {
            let data = node.element()?;
            Some(Point::element(point.key, point.offset.min(data.size())))
        }
    }
}

/// Re-resolve a selection against a final node map: drop it if it cannot be
/// anchored, otherwise clamp and normalize both points.
pub fn normalize_selection(snapshot: &Snapshot, selection: &Selection) -> Option<Selection> {
    match selection {
        Selection::Range(range) => {
            let anchor = validate_point(snapshot, range.anchor)?;
            let focus = validate_point(snapshot, range.focus)?;
            Some(Selection::Range(RangeSelection {
                anchor: normalize_point(snapshot, anchor),
                focus: normalize_point(snapshot, focus),
                format: range.format,
                style: range.style.clone(),
            }))
        }
        Selection::Node(nodes) => {
            let keys: BTreeSet<NodeKey> = nodes
                .keys
                .iter()
                .copied()
                .filter(|k| snapshot.is_attached(*k))
                .collect();
            (!keys.is_empty()).then_some(Selection::Node(NodeSelection { keys }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::testing::{paragraph_doc, texts_of};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_element_point_descends_to_text_start() {
        let snap = paragraph_doc(&[&["ab", "cd"]]);
        let paragraph = snap.child_at(NodeKey::ROOT, 0).unwrap();
        let texts = texts_of(&snap, paragraph);

        let point = normalize_point(&snap, Point::element(NodeKey::ROOT, 0));
        assert_eq!(point, Point::text(texts[0], 0));
    }

    #[test]
    fn test_normalize_element_point_at_end_descends_to_text_end() {
        let snap = paragraph_doc(&[&["ab", "cd"]]);
        let paragraph = snap.child_at(NodeKey::ROOT, 0).unwrap();
        let texts = texts_of(&snap, paragraph);

        let point = normalize_point(&snap, Point::element(paragraph, 2));
        assert_eq!(point, Point::text(texts[1], 2));
    }

    #[test]
    fn test_normalize_stops_at_empty_element() {
        let snap = paragraph_doc(&[&[]]);
        let paragraph = snap.child_at(NodeKey::ROOT, 0).unwrap();

        let point = normalize_point(&snap, Point::element(NodeKey::ROOT, 1));
        assert_eq!(point, Point::element(paragraph, 0));
    }

    #[test]
    fn test_document_order_of_points() {
        let snap = paragraph_doc(&[&["ab"], &["cd"]]);
        let first = snap.child_at(NodeKey::ROOT, 0).unwrap();
        let second = snap.child_at(NodeKey::ROOT, 1).unwrap();
        let a = Point::text(texts_of(&snap, first)[0], 2);
        let b = Point::text(texts_of(&snap, second)[0], 0);

        assert!(a.is_before(&b, &snap));
        assert!(!b.is_before(&a, &snap));
        // The gap before the second paragraph sits between both.
        let gap = Point::element(NodeKey::ROOT, 1);
        assert!(a.is_before(&gap, &snap));
        assert!(gap.is_before(&b, &snap));
    }

    #[test]
    fn test_backward_range_orders_points() {
        let snap = paragraph_doc(&[&["abcd"]]);
        let paragraph = snap.child_at(NodeKey::ROOT, 0).unwrap();
        let text = texts_of(&snap, paragraph)[0];
        let range = RangeSelection::new(Point::text(text, 3), Point::text(text, 1));

        assert!(range.is_backward(&snap));
        assert_eq!(
            range.ordered(&snap),
            (Point::text(text, 1), Point::text(text, 3))
        );
    }

    #[test]
    fn test_normalize_selection_drops_missing_keys_and_clamps() {
        let snap = paragraph_doc(&[&["ab"]]);
        let paragraph = snap.child_at(NodeKey::ROOT, 0).unwrap();
        let text = texts_of(&snap, paragraph)[0];

        let clamped = normalize_selection(&snap, &Selection::caret(Point::text(text, 99)));
        assert_eq!(clamped, Some(Selection::caret(Point::text(text, 2))));

        let missing = Selection::caret(Point::text(NodeKey::fresh(), 0));
        assert_eq!(normalize_selection(&snap, &missing), None);
    }
}
