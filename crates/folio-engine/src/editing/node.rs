use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::editing::registry::{self, NodeBehavior};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identifier.
///
/// A key is stable for the logical lifetime of a node: copy-on-write clones keep it,
/// only a fresh `create_*` call allocates a new one. `NodeKey::ROOT` is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(u64);

impl NodeKey {
    pub const ROOT: NodeKey = NodeKey(0);

    pub(crate) fn fresh() -> Self {
        NodeKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_root(self) -> bool {
        self == NodeKey::ROOT
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "root")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

bitflags! {
    /// Inline text marks. Stored as a plain `u32` in serialized documents.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextFormat: u32 {
        const BOLD = 1;
        const ITALIC = 1 << 1;
        const STRIKETHROUGH = 1 << 2;
        const UNDERLINE = 1 << 3;
        const CODE = 1 << 4;
        const SUBSCRIPT = 1 << 5;
        const SUPERSCRIPT = 1 << 6;
        const HIGHLIGHT = 1 << 7;
    }
}

impl TextFormat {
    /// Toggle `flag`, keeping subscript and superscript mutually exclusive.
    pub fn toggled(self, flag: TextFormat) -> TextFormat {
        let mut next = self ^ flag;
        if flag.contains(TextFormat::SUBSCRIPT) && next.contains(TextFormat::SUBSCRIPT) {
            next.remove(TextFormat::SUPERSCRIPT);
        }
        if flag.contains(TextFormat::SUPERSCRIPT) && next.contains(TextFormat::SUPERSCRIPT) {
            next.remove(TextFormat::SUBSCRIPT);
        }
        next
    }

    /// Lowercase names of the set flags, in bit order ("bold", "italic", ...).
    pub fn names(self) -> impl Iterator<Item = String> {
        self.iter_names().map(|(name, _)| name.to_ascii_lowercase())
    }
}

/// How a text node reacts to editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMode {
    #[default]
    Normal,
    /// Atomic: deleting any character removes the whole node, typing never extends it.
    Token,
}

/// Block alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementFormat {
    #[default]
    #[serde(rename = "")]
    Unset,
    Left,
    Start,
    Center,
    Right,
    End,
    Justify,
}

impl ElementFormat {
    pub fn as_css(self) -> Option<&'static str> {
        match self {
            ElementFormat::Unset => None,
            ElementFormat::Left => Some("left"),
            ElementFormat::Start => Some("start"),
            ElementFormat::Center => Some("center"),
            ElementFormat::Right => Some("right"),
            ElementFormat::End => Some("end"),
            ElementFormat::Justify => Some("justify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingTag {
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

impl HeadingTag {
    pub fn as_str(self) -> &'static str {
        match self {
            HeadingTag::H1 => "h1",
            HeadingTag::H2 => "h2",
            HeadingTag::H3 => "h3",
            HeadingTag::H4 => "h4",
            HeadingTag::H5 => "h5",
            HeadingTag::H6 => "h6",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "h1" => Some(HeadingTag::H1),
            "h2" => Some(HeadingTag::H2),
            "h3" => Some(HeadingTag::H3),
            "h4" => Some(HeadingTag::H4),
            "h5" => Some(HeadingTag::H5),
            "h6" => Some(HeadingTag::H6),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    Bullet,
    Number,
    Check,
}

/// The closed set of element variants. Behavior per variant lives in the registry table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Paragraph,
    Heading(HeadingTag),
    Quote,
    Code { language: Option<String> },
    List { list_type: ListType, start: u32 },
    ListItem { value: u32, checked: Option<bool> },
    Link { url: String, title: Option<String> },
}

impl ElementKind {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ElementKind::Paragraph => "paragraph",
            ElementKind::Heading(_) => "heading",
            ElementKind::Quote => "quote",
            ElementKind::Code { .. } => "code",
            ElementKind::List { .. } => "list",
            ElementKind::ListItem { .. } => "listitem",
            ElementKind::Link { .. } => "link",
        }
    }
}

/// Child-list bookkeeping shared by the root and every element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementData {
    pub(crate) first: Option<NodeKey>,
    pub(crate) last: Option<NodeKey>,
    pub(crate) size: usize,
    pub format: ElementFormat,
    pub indent: u32,
    pub direction: Option<TextDirection>,
}

impl ElementData {
    pub fn first_child(&self) -> Option<NodeKey> {
        self.first
    }

    pub fn last_child(&self) -> Option<NodeKey> {
        self.last
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Same presentational fields, ignoring the child links.
    pub(crate) fn same_attributes(&self, other: &ElementData) -> bool {
        self.format == other.format
            && self.indent == other.indent
            && self.direction == other.direction
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextData {
    pub(crate) text: String,
    pub format: TextFormat,
    pub style: String,
    pub mode: TextMode,
}

impl TextData {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in chars, the unit every text offset is measured in.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Two text nodes can merge when nothing but their content differs.
    pub(crate) fn is_compatible(&self, other: &TextData) -> bool {
        self.mode == TextMode::Normal
            && other.mode == TextMode::Normal
            && self.format == other.format
            && self.style == other.style
    }
}

/// Opaque, externally rendered object embedded in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratorData {
    pub kind: String,
    pub payload: serde_json::Value,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root(ElementData),
    Element { kind: ElementKind, data: ElementData },
    Text(TextData),
    LineBreak,
    Decorator(DecoratorData),
}

impl NodeKind {
    pub fn type_tag(&self) -> &'static str {
        match self {
            NodeKind::Root(_) => "root",
            NodeKind::Element { kind, .. } => kind.type_tag(),
            NodeKind::Text(_) => "text",
            NodeKind::LineBreak => "linebreak",
            NodeKind::Decorator(_) => "decorator",
        }
    }

    pub fn behavior(&self) -> &'static NodeBehavior {
        registry::behavior_of(self)
    }
}

/// One vertex of the document graph.
///
/// Siblings form a doubly linked list owned by the parent's [`ElementData`], so a
/// splice at any position only touches the nodes next to the edit point.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) key: NodeKey,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) prev: Option<NodeKey>,
    pub(crate) next: Option<NodeKey>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(key: NodeKey, kind: NodeKind) -> Self {
        Self {
            key,
            parent: None,
            prev: None,
            next: None,
            kind,
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn prev_sibling(&self) -> Option<NodeKey> {
        self.prev
    }

    pub fn next_sibling(&self) -> Option<NodeKey> {
        self.next
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind.type_tag()
    }

    pub fn behavior(&self) -> &'static NodeBehavior {
        self.kind.behavior()
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Root(_))
    }

    /// Root or element: anything that owns a child list.
    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Root(_) | NodeKind::Element { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text(_))
    }

    pub fn is_line_break(&self) -> bool {
        matches!(self.kind, NodeKind::LineBreak)
    }

    pub fn is_decorator(&self) -> bool {
        matches!(self.kind, NodeKind::Decorator(_))
    }

    pub fn is_inline(&self) -> bool {
        match &self.kind {
            NodeKind::Decorator(d) => d.inline,
            kind => kind.behavior().inline,
        }
    }

    /// A non-inline element: paragraph, heading, list item...
    pub fn is_block(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. }) && !self.is_inline()
    }

    pub fn element(&self) -> Option<&ElementData> {
        match &self.kind {
            NodeKind::Root(data) | NodeKind::Element { data, .. } => Some(data),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.kind {
            NodeKind::Root(data) | NodeKind::Element { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn element_kind(&self) -> Option<&ElementKind> {
        match &self.kind {
            NodeKind::Element { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&TextData> {
        match &self.kind {
            NodeKind::Text(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn text_mut(&mut self) -> Option<&mut TextData> {
        match &mut self.kind {
            NodeKind::Text(data) => Some(data),
            _ => None,
        }
    }

    /// Child count for elements, char length for text, zero otherwise.
    pub fn size(&self) -> usize {
        match &self.kind {
            NodeKind::Root(data) | NodeKind::Element { data, .. } => data.size,
            NodeKind::Text(data) => data.len(),
            _ => 0,
        }
    }
}
