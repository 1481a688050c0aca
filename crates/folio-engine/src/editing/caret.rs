//! Directional carets over the node graph.
//!
//! A [`Caret`] names "the position next to node X, looking in direction D". Unlike a
//! [`Point`] it carries a direction, which is what lets one deletion routine serve
//! both backspace and forward delete, and lets traversal decide at a boundary whether
//! to step into the neighboring inline node or escape to the parent block.
//!
//! ## Tree order
//!
//! Walking forward, every element is visited twice: once on the way in (a
//! [`Caret::Child`] caret positioned before its first child) and once on the way out
//! (a [`Caret::Sibling`] caret positioned right after it). Leaves are visited once,
//! as a sibling caret. A node lies fully inside a [`CaretRange`] when every caret
//! naming it is yielded by the range.

use std::collections::HashSet;

use crate::editing::node::{Node, NodeKey};
use crate::editing::selection::{Point, PointType, compare_points};
use crate::editing::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self {
            Direction::Next => Direction::Previous,
            Direction::Previous => Direction::Next,
        }
    }

    pub fn backward(backward: bool) -> Self {
        if backward {
            Direction::Previous
        } else {
            Direction::Next
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caret {
    /// Right after `origin` (or right before it, going backward).
    Sibling { origin: NodeKey, direction: Direction },
    /// Inside element `origin`, before its first child (after its last, going backward).
    Child { origin: NodeKey, direction: Direction },
    /// Inside text node `origin` at a char offset.
    Text {
        origin: NodeKey,
        direction: Direction,
        offset: usize,
    },
}

impl Caret {
    pub fn sibling(origin: NodeKey, direction: Direction) -> Self {
        Caret::Sibling { origin, direction }
    }

    pub fn child(origin: NodeKey, direction: Direction) -> Self {
        Caret::Child { origin, direction }
    }

    pub fn text(origin: NodeKey, direction: Direction, offset: usize) -> Self {
        Caret::Text {
            origin,
            direction,
            offset,
        }
    }

    pub fn origin(&self) -> NodeKey {
        match *self {
            Caret::Sibling { origin, .. }
            | Caret::Child { origin, .. }
            | Caret::Text { origin, .. } => origin,
        }
    }

    pub fn direction(&self) -> Direction {
        match *self {
            Caret::Sibling { direction, .. }
            | Caret::Child { direction, .. }
            | Caret::Text { direction, .. } => direction,
        }
    }

    /// The element whose child list this caret sits in.
    pub fn container(&self, view: &Snapshot) -> Option<NodeKey> {
        match *self {
            Caret::Child { origin, .. } => Some(origin),
            Caret::Sibling { origin, .. } | Caret::Text { origin, .. } => {
                view.get(origin).and_then(Node::parent)
            }
        }
    }

    /// The node this caret faces.
    pub fn adjacent(&self, view: &Snapshot) -> Option<NodeKey> {
        let forward = self.direction() == Direction::Next;
        match *self {
            Caret::Child { origin, .. } => {
                let data = view.get(origin)?.element()?;
                if forward {
                    data.first_child()
                } else {
                    data.last_child()
                }
            }
            Caret::Sibling { origin, .. } | Caret::Text { origin, .. } => {
                let node = view.get(origin)?;
                if forward {
                    node.next_sibling()
                } else {
                    node.prev_sibling()
                }
            }
        }
    }

    /// The next caret in tree order, or `None` past the root.
    pub fn advance(&self, view: &Snapshot) -> Option<Caret> {
        let direction = self.direction();
        if let Caret::Text { origin, .. } = *self {
            return Some(Caret::sibling(origin, direction));
        }
        match self.adjacent(view) {
            Some(key) => Some(enter(view, key, direction)),
            None => {
                let exit = match *self {
                    Caret::Child { origin, .. } => origin,
                    _ => self.container(view)?,
                };
                if exit.is_root() {
                    None
                } else {
                    Some(Caret::sibling(exit, direction))
                }
            }
        }
    }

    /// The point this caret stands on.
    pub fn to_point(&self, view: &Snapshot) -> Option<Point> {
        match *self {
            Caret::Text { origin, offset, .. } => Some(Point::text(origin, offset)),
            Caret::Child { origin, direction } => {
                let size = view.get(origin)?.size();
                Some(Point::element(
                    origin,
                    if direction == Direction::Next { 0 } else { size },
                ))
            }
            Caret::Sibling { origin, direction } => {
                let node = view.get(origin)?;
                let forward = direction == Direction::Next;
                if let Some(text) = node.text() {
                    return Some(Point::text(origin, if forward { text.len() } else { 0 }));
                }
                let parent = node.parent()?;
                let index = view.index_in_parent(origin)?;
                Some(Point::element(parent, if forward { index + 1 } else { index }))
            }
        }
    }
}

/// The first caret reached when stepping onto `key`: inside it for elements,
/// past it for leaves.
fn enter(view: &Snapshot, key: NodeKey, direction: Direction) -> Caret {
    if view.get(key).is_some_and(Node::is_element) {
        Caret::child(key, direction)
    } else {
        Caret::sibling(key, direction)
    }
}

/// The caret for a point, extending in `direction`.
///
/// At a text boundary the caret leaves the text node so that traversal continues
/// with the neighbor in that direction; element points become the sibling caret of
/// the child on the near side of the gap, or the child caret at either end.
pub fn caret_from_point(view: &Snapshot, point: Point, direction: Direction) -> Option<Caret> {
    let node = view.get(point.key)?;
    match point.kind {
        PointType::Text => {
            let len = node.text()?.len();
            Some(match direction {
                Direction::Previous if point.offset == 0 => Caret::sibling(point.key, direction),
                Direction::Next if point.offset >= len => Caret::sibling(point.key, direction),
                _ => Caret::text(point.key, direction, point.offset.min(len)),
            })
        }
        PointType::Element => {
            let size = node.element()?.size();
            Some(match direction {
                Direction::Next if point.offset == 0 => Caret::child(point.key, direction),
                Direction::Next => {
                    Caret::sibling(view.child_at(point.key, point.offset - 1)?, direction)
                }
                Direction::Previous if point.offset >= size => Caret::child(point.key, direction),
                Direction::Previous => {
                    Caret::sibling(view.child_at(point.key, point.offset)?, direction)
                }
            })
        }
    }
}

/// Step into whatever the caret faces until it rests on text or a non-element.
pub fn normalize_caret(view: &Snapshot, mut caret: Caret) -> Caret {
    loop {
        if let Caret::Text { .. } = caret {
            return caret;
        }
        let direction = caret.direction();
        let Some(node) = caret.adjacent(view).and_then(|k| view.get(k)) else {
            return caret;
        };
        if let Some(text) = node.text() {
            let offset = if direction == Direction::Next { 0 } else { text.len() };
            return Caret::text(node.key(), direction, offset);
        }
        if !node.is_element() {
            return caret;
        }
        caret = Caret::child(node.key(), direction);
    }
}

/// A run of chars inside one text node: `distance` chars from the caret's offset,
/// negative when the slice extends backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSlice {
    pub caret: Caret,
    pub distance: isize,
}

impl TextSlice {
    pub fn key(&self) -> NodeKey {
        self.caret.origin()
    }

    /// Half-open char range `[min(off, off+distance), max(off, off+distance))`.
    pub fn indices(&self) -> (usize, usize) {
        let offset = match self.caret {
            Caret::Text { offset, .. } => offset as isize,
            _ => 0,
        };
        let other = (offset + self.distance).max(0);
        (offset.min(other) as usize, offset.max(other) as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.distance == 0
    }
}

/// The span between two points, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaretRange {
    pub start: Point,
    pub end: Point,
}

impl CaretRange {
    pub fn new(view: &Snapshot, anchor: Point, focus: Point) -> Self {
        if compare_points(view, &focus, &anchor).is_lt() {
            Self {
                start: focus,
                end: anchor,
            }
        } else {
            Self {
                start: anchor,
                end: focus,
            }
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Forward carets strictly after the start, up to and including the end.
    /// Partially covered text nodes at either end are never yielded; see
    /// [`CaretRange::text_slices`].
    pub fn iter<'s>(&self, view: &'s Snapshot) -> CaretIter<'s> {
        let same_text = self.start.is_text() && self.end.is_text() && self.start.key == self.end.key;
        let anchor = start_caret(view, self.start);
        let end = end_caret(view, self.end);
        let done = same_text || anchor.is_none() || end.is_none() || anchor == end;
        CaretIter {
            view,
            current: anchor,
            end,
            done,
        }
    }

    /// Nodes wholly inside the range, children before their parents.
    pub fn contained_nodes(&self, view: &Snapshot) -> Vec<NodeKey> {
        let mut entered = HashSet::new();
        let mut contained = Vec::new();
        for caret in self.iter(view) {
            match caret {
                Caret::Child { origin, .. } => {
                    entered.insert(origin);
                }
                Caret::Sibling { origin, .. } => {
                    let is_element = view.get(origin).is_some_and(Node::is_element);
                    if !is_element || entered.contains(&origin) {
                        contained.push(origin);
                    }
                }
                Caret::Text { .. } => {}
            }
        }
        contained
    }

    /// Contained nodes whose parent is not itself contained, in document order.
    pub fn top_contained(&self, view: &Snapshot) -> Vec<NodeKey> {
        let contained = self.contained_nodes(view);
        let set: HashSet<NodeKey> = contained.iter().copied().collect();
        contained
            .into_iter()
            .filter(|k| {
                view.get(*k)
                    .and_then(Node::parent)
                    .is_none_or(|p| !set.contains(&p))
            })
            .collect()
    }

    /// The partially covered text at the start and the end, empty slices dropped.
    pub fn text_slices(&self, view: &Snapshot) -> Vec<TextSlice> {
        let text_len = |key: NodeKey| view.get(key).and_then(Node::text).map(|t| t.len());
        let mut slices = Vec::new();
        if self.start.is_text() && self.end.is_text() && self.start.key == self.end.key {
            slices.push(TextSlice {
                caret: Caret::text(self.start.key, Direction::Next, self.start.offset),
                distance: self.end.offset as isize - self.start.offset as isize,
            });
        } else {
            if self.start.is_text()
                && let Some(len) = text_len(self.start.key)
            {
                slices.push(TextSlice {
                    caret: Caret::text(self.start.key, Direction::Next, self.start.offset),
                    distance: len as isize - self.start.offset as isize,
                });
            }
            if self.end.is_text() {
                slices.push(TextSlice {
                    caret: Caret::text(self.end.key, Direction::Previous, self.end.offset),
                    distance: -(self.end.offset as isize),
                });
            }
        }
        slices.retain(|s| !s.is_empty());
        slices
    }
}

fn start_caret(view: &Snapshot, point: Point) -> Option<Caret> {
    match point.kind {
        PointType::Text => Some(Caret::sibling(point.key, Direction::Next)),
        PointType::Element => caret_from_point(view, point, Direction::Next),
    }
}

fn end_caret(view: &Snapshot, point: Point) -> Option<Caret> {
    match point.kind {
        PointType::Text => {
            let node = view.get(point.key)?;
            Some(match node.prev_sibling() {
                Some(prev) => Caret::sibling(prev, Direction::Next),
                None => Caret::child(node.parent()?, Direction::Next),
            })
        }
        PointType::Element => caret_from_point(view, point, Direction::Next),
    }
}

pub struct CaretIter<'s> {
    view: &'s Snapshot,
    current: Option<Caret>,
    end: Option<Caret>,
    done: bool,
}

impl Iterator for CaretIter<'_> {
    type Item = Caret;

    fn next(&mut self) -> Option<Caret> {
        if self.done {
            return None;
        }
        let next = self.current?.advance(self.view);
        match next {
            Some(caret) => {
                self.done = Some(caret) == self.end;
                self.current = Some(caret);
                Some(caret)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
