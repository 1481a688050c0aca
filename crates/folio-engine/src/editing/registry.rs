//! Type-tag → behavior table, plus the per-editor registry of enabled node types,
//! document transforms and markup conversion rules.

use std::collections::{HashMap, HashSet};

use crate::editing::node::{ElementKind, NodeKind};
use crate::editing::transaction::Transaction;
use crate::error::{EngineError, Result};
use crate::io::markup::{ConversionRule, default_conversion_rules};

/// Static behavior of one node type.
#[derive(Debug, PartialEq, Eq)]
pub struct NodeBehavior {
    pub type_tag: &'static str,
    /// Export format version written into serialized records.
    pub version: u32,
    pub inline: bool,
    /// When false the element is removed as soon as its last child goes away.
    pub can_be_empty: bool,
    pub can_indent: bool,
    /// Backspace at the start converts the block back into a paragraph.
    pub collapse_at_start: bool,
}

const fn leaf(type_tag: &'static str, inline: bool) -> NodeBehavior {
    NodeBehavior {
        type_tag,
        version: 1,
        inline,
        can_be_empty: true,
        can_indent: false,
        collapse_at_start: false,
    }
}

pub static ROOT: NodeBehavior = NodeBehavior {
    type_tag: "root",
    version: 1,
    inline: false,
    can_be_empty: true,
    can_indent: false,
    collapse_at_start: false,
};
pub static PARAGRAPH: NodeBehavior = NodeBehavior {
    type_tag: "paragraph",
    version: 1,
    inline: false,
    can_be_empty: true,
    can_indent: true,
    collapse_at_start: false,
};
pub static HEADING: NodeBehavior = NodeBehavior {
    type_tag: "heading",
    version: 1,
    inline: false,
    can_be_empty: true,
    can_indent: true,
    collapse_at_start: true,
};
pub static QUOTE: NodeBehavior = NodeBehavior {
    type_tag: "quote",
    version: 1,
    inline: false,
    can_be_empty: true,
    can_indent: true,
    collapse_at_start: true,
};
pub static CODE: NodeBehavior = NodeBehavior {
    type_tag: "code",
    version: 1,
    inline: false,
    can_be_empty: true,
    can_indent: false,
    collapse_at_start: true,
};
pub static LIST: NodeBehavior = NodeBehavior {
    type_tag: "list",
    version: 1,
    inline: false,
    can_be_empty: false,
    can_indent: false,
    collapse_at_start: false,
};
pub static LIST_ITEM: NodeBehavior = NodeBehavior {
    type_tag: "listitem",
    version: 1,
    inline: false,
    can_be_empty: true,
    can_indent: true,
    collapse_at_start: true,
};
pub static LINK: NodeBehavior = NodeBehavior {
    type_tag: "link",
    version: 1,
    inline: true,
    can_be_empty: false,
    can_indent: false,
    collapse_at_start: false,
};
pub static TEXT: NodeBehavior = leaf("text", true);
pub static LINE_BREAK: NodeBehavior = leaf("linebreak", true);
pub static DECORATOR: NodeBehavior = leaf("decorator", true);

/// Every built-in behavior, in a stable order.
pub static BUILTIN: [&NodeBehavior; 11] = [
    &ROOT,
    &PARAGRAPH,
    &HEADING,
    &QUOTE,
    &CODE,
    &LIST,
    &LIST_ITEM,
    &LINK,
    &TEXT,
    &LINE_BREAK,
    &DECORATOR,
];

pub(crate) fn behavior_of(kind: &NodeKind) -> &'static NodeBehavior {
    match kind {
        NodeKind::Root(_) => &ROOT,
        NodeKind::Element { kind, .. } => match kind {
            ElementKind::Paragraph => &PARAGRAPH,
            ElementKind::Heading(_) => &HEADING,
            ElementKind::Quote => &QUOTE,
            ElementKind::Code { .. } => &CODE,
            ElementKind::List { .. } => &LIST,
            ElementKind::ListItem { .. } => &LIST_ITEM,
            ElementKind::Link { .. } => &LINK,
        },
        NodeKind::Text(_) => &TEXT,
        NodeKind::LineBreak => &LINE_BREAK,
        NodeKind::Decorator(_) => &DECORATOR,
    }
}

pub fn behavior_for_tag(type_tag: &str) -> Option<&'static NodeBehavior> {
    BUILTIN.iter().copied().find(|b| b.type_tag == type_tag)
}

/// A document transform: runs on every dirty node of its type during commit, may
/// mutate the graph, and is re-run until nothing new becomes dirty.
pub type Transform = Box<dyn Fn(&mut Transaction<'_>, crate::editing::NodeKey) -> Result<()>>;

const ALWAYS_REGISTERED: [&str; 4] = ["root", "paragraph", "text", "linebreak"];

/// Node types, decorator kinds, transforms and conversion rules known to one editor.
pub struct NodeRegistry {
    types: HashSet<&'static str>,
    decorators: HashSet<String>,
    transforms: HashMap<&'static str, Vec<Transform>>,
    conversions: HashMap<String, Vec<ConversionRule>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl NodeRegistry {
    /// Only the node types every document needs.
    pub fn minimal() -> Self {
        let mut registry = Self {
            types: ALWAYS_REGISTERED.into_iter().collect(),
            decorators: HashSet::new(),
            transforms: HashMap::new(),
            conversions: HashMap::new(),
        };
        registry.add_conversion_rules(ALWAYS_REGISTERED);
        registry
    }

    /// Every built-in node type with its default conversion rules.
    pub fn with_builtin() -> Self {
        let mut registry = Self::minimal();
        for behavior in BUILTIN {
            registry.register(behavior.type_tag);
        }
        registry
    }

    /// Enable a built-in node type. Returns false for unknown tags.
    pub fn register(&mut self, type_tag: &str) -> bool {
        let Some(behavior) = behavior_for_tag(type_tag) else {
            return false;
        };
        if self.types.insert(behavior.type_tag) {
            self.add_conversion_rules([behavior.type_tag]);
        }
        true
    }

    pub fn register_decorator(&mut self, kind: impl Into<String>) {
        self.types.insert(DECORATOR.type_tag);
        self.decorators.insert(kind.into());
    }

    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.types.contains(type_tag)
    }

    pub(crate) fn check_kind(&self, kind: &NodeKind) -> Result<()> {
        let tag = kind.type_tag();
        if !self.types.contains(tag) {
            return Err(EngineError::UnregisteredNodeType(tag.to_string()));
        }
        if let NodeKind::Decorator(data) = kind
            && !self.decorators.contains(&data.kind)
        {
            return Err(EngineError::UnregisteredNodeType(format!(
                "decorator:{}",
                data.kind
            )));
        }
        Ok(())
    }

    pub fn register_transform(&mut self, type_tag: &'static str, transform: Transform) {
        self.transforms.entry(type_tag).or_default().push(transform);
    }

    pub(crate) fn transforms_for(&self, type_tag: &str) -> &[Transform] {
        self.transforms
            .get(type_tag)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn has_transforms(&self) -> bool {
        self.transforms.values().any(|t| !t.is_empty())
    }

    pub fn register_conversion(&mut self, rule: ConversionRule) {
        let rules = self.conversions.entry(rule.tag.clone()).or_default();
        rules.push(rule);
        // Highest priority first; registration order breaks ties.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub(crate) fn conversions_for(&self, tag: &str) -> &[ConversionRule] {
        self.conversions
            .get(tag)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn add_conversion_rules<'a>(&mut self, type_tags: impl IntoIterator<Item = &'a str>) {
        for type_tag in type_tags {
            for rule in default_conversion_rules(type_tag) {
                self.register_conversion(rule);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::node::{DecoratorData, ElementData, TextData};

    #[test]
    fn test_every_builtin_tag_resolves() {
        for behavior in BUILTIN {
            assert_eq!(
                behavior_for_tag(behavior.type_tag).map(|b| b.type_tag),
                Some(behavior.type_tag)
            );
        }
        assert!(behavior_for_tag("table").is_none());
    }

    #[test]
    fn test_minimal_registry_rejects_headings() {
        let registry = NodeRegistry::minimal();
        let heading = NodeKind::Element {
            kind: ElementKind::Heading(crate::editing::HeadingTag::H1),
            data: ElementData::default(),
        };
        assert!(matches!(
            registry.check_kind(&heading),
            Err(EngineError::UnregisteredNodeType(tag)) if tag == "heading"
        ));
        assert!(
            registry
                .check_kind(&NodeKind::Text(TextData::new("x")))
                .is_ok()
        );
    }

    #[test]
    fn test_decorators_need_their_kind_registered() {
        let mut registry = NodeRegistry::with_builtin();
        let image = NodeKind::Decorator(DecoratorData {
            kind: "image".into(),
            payload: serde_json::json!({"src": "a.png"}),
            inline: true,
        });
        assert!(registry.check_kind(&image).is_err());

        registry.register_decorator("image");
        assert!(registry.check_kind(&image).is_ok());
    }

    #[test]
    fn test_conversion_rules_sorted_by_priority() {
        let registry = NodeRegistry::with_builtin();
        let priorities: Vec<u8> = registry
            .conversions_for("span")
            .iter()
            .map(|r| r.priority)
            .collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted);
    }
}
