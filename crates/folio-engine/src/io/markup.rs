//! Render-tree import: turns a host markup tree (as produced by a clipboard or a
//! page) into detached document nodes.
//!
//! Conversion is keyed by markup tag. Each registered [`ConversionRule`] for a tag is
//! tried in priority order and the first one that returns a [`Conversion`] decides
//! what the markup node becomes. Tags with no matching rule are unwrapped: their
//! children are converted in their place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::editing::node::{ElementFormat, ElementKind, HeadingTag, ListType, NodeKey, TextFormat};
use crate::editing::transaction::Transaction;
use crate::error::Result;

/// One node of a host render tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MarkupNode {
    Element {
        tag: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<MarkupNode>,
    },
    Text {
        text: String,
    },
}

impl MarkupNode {
    pub fn element(tag: impl Into<String>, children: Vec<MarkupNode>) -> Self {
        MarkupNode::Element {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        MarkupNode::Text { text: text.into() }
    }

    /// Builder-style attribute setter; no-op on text nodes.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let MarkupNode::Element { attributes, .. } = &mut self {
            attributes.insert(name.into(), value.into());
        }
        self
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            MarkupNode::Element { tag, .. } => Some(tag),
            MarkupNode::Text { .. } => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match self {
            MarkupNode::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            MarkupNode::Text { .. } => None,
        }
    }

    pub fn children(&self) -> &[MarkupNode] {
        match self {
            MarkupNode::Element { children, .. } => children,
            MarkupNode::Text { .. } => &[],
        }
    }

    /// Value of one inline CSS property, lowercased and trimmed.
    pub fn style(&self, property: &str) -> Option<String> {
        self.attr("style")?.split(';').find_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case(property)
                .then(|| value.trim().to_ascii_lowercase())
        })
    }
}

/// What a markup element turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Element(ElementKind),
    LineBreak,
    /// Add text formats to every descendant text node.
    Format(TextFormat),
    /// Convert the children in place of the element.
    Unwrap,
    /// Drop the element and everything below it.
    Skip,
}

pub type ConvertFn = fn(&MarkupNode) -> Option<Conversion>;

/// Conversion of one markup tag. Higher priority rules are tried first.
#[derive(Debug, Clone)]
pub struct ConversionRule {
    pub tag: String,
    pub priority: u8,
    pub convert: ConvertFn,
}

impl ConversionRule {
    pub fn new(tag: impl Into<String>, priority: u8, convert: ConvertFn) -> Self {
        Self {
            tag: tag.into(),
            priority,
            convert,
        }
    }
}

pub const PRIORITY_LOW: u8 = 0;
pub const PRIORITY_HIGH: u8 = 2;

fn rules(tags: &[&str], priority: u8, convert: ConvertFn) -> Vec<ConversionRule> {
    tags.iter()
        .map(|tag| ConversionRule::new(*tag, priority, convert))
        .collect()
}

fn heading(node: &MarkupNode) -> Option<Conversion> {
    HeadingTag::from_tag(node.tag()?).map(|tag| Conversion::Element(ElementKind::Heading(tag)))
}

fn list(node: &MarkupNode) -> Option<Conversion> {
    let checked = node
        .children()
        .iter()
        .any(|child| child.attr("aria-checked").is_some());
    let list_type = match node.tag()? {
        _ if checked => ListType::Check,
        "ol" => ListType::Number,
        _ => ListType::Bullet,
    };
    let start = node
        .attr("start")
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(1);
    Some(Conversion::Element(ElementKind::List { list_type, start }))
}

fn list_item(node: &MarkupNode) -> Option<Conversion> {
    let value = node
        .attr("value")
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(1);
    let checked = node.attr("aria-checked").map(|s| s == "true");
    Some(Conversion::Element(ElementKind::ListItem { value, checked }))
}

fn link(node: &MarkupNode) -> Option<Conversion> {
    let url = node.attr("href")?.to_string();
    let title = node.attr("title").map(str::to_string);
    Some(Conversion::Element(ElementKind::Link { url, title }))
}

/// Formats carried by inline CSS, as pasted from word processors.
fn styled_span(node: &MarkupNode) -> Option<Conversion> {
    let mut format = TextFormat::empty();
    if let Some(weight) = node.style("font-weight")
        && (weight == "bold" || weight.parse::<u32>().is_ok_and(|w| w >= 600))
    {
        format |= TextFormat::BOLD;
    }
    if node.style("font-style").as_deref() == Some("italic") {
        format |= TextFormat::ITALIC;
    }
    if let Some(decoration) = node.style("text-decoration") {
        if decoration.contains("underline") {
            format |= TextFormat::UNDERLINE;
        }
        if decoration.contains("line-through") {
            format |= TextFormat::STRIKETHROUGH;
        }
    }
    match node.style("vertical-align").as_deref() {
        Some("sub") => format |= TextFormat::SUBSCRIPT,
        Some("super") => format |= TextFormat::SUPERSCRIPT,
        _ => {}
    }
    Some(Conversion::Format(format))
}

/// `<b style="font-weight: normal">` wraps whole documents pasted from some editors.
fn unbolded(node: &MarkupNode) -> Option<Conversion> {
    (node.style("font-weight").as_deref() == Some("normal")).then_some(Conversion::Unwrap)
}

/// The rules a built-in node type contributes when it is registered.
pub fn default_conversion_rules(type_tag: &str) -> Vec<ConversionRule> {
    match type_tag {
        "paragraph" => rules(&["p"], PRIORITY_LOW, |_| {
            Some(Conversion::Element(ElementKind::Paragraph))
        }),
        "heading" => rules(&["h1", "h2", "h3", "h4", "h5", "h6"], PRIORITY_LOW, heading),
        "quote" => rules(&["blockquote"], PRIORITY_LOW, |_| {
            Some(Conversion::Element(ElementKind::Quote))
        }),
        "code" => rules(&["pre"], PRIORITY_LOW, |node| {
            let language = node.attr("data-language").map(str::to_string);
            Some(Conversion::Element(ElementKind::Code { language }))
        }),
        "list" => rules(&["ul", "ol"], PRIORITY_LOW, list),
        "listitem" => rules(&["li"], PRIORITY_LOW, list_item),
        "link" => rules(&["a"], PRIORITY_LOW, link),
        "linebreak" => rules(&["br"], PRIORITY_LOW, |_| Some(Conversion::LineBreak)),
        "text" => {
            let mut all = rules(&["b"], PRIORITY_HIGH, unbolded);
            all.extend(rules(&["b", "strong"], PRIORITY_LOW, |_| {
                Some(Conversion::Format(TextFormat::BOLD))
            }));
            all.extend(rules(&["em", "i"], PRIORITY_LOW, |_| {
                Some(Conversion::Format(TextFormat::ITALIC))
            }));
            all.extend(rules(&["u"], PRIORITY_LOW, |_| {
                Some(Conversion::Format(TextFormat::UNDERLINE))
            }));
            all.extend(rules(&["s", "del", "strike"], PRIORITY_LOW, |_| {
                Some(Conversion::Format(TextFormat::STRIKETHROUGH))
            }));
            all.extend(rules(&["sub"], PRIORITY_LOW, |_| {
                Some(Conversion::Format(TextFormat::SUBSCRIPT))
            }));
            all.extend(rules(&["sup"], PRIORITY_LOW, |_| {
                Some(Conversion::Format(TextFormat::SUPERSCRIPT))
            }));
            all.extend(rules(&["mark"], PRIORITY_LOW, |_| {
                Some(Conversion::Format(TextFormat::HIGHLIGHT))
            }));
            all.extend(rules(&["code"], PRIORITY_LOW, |_| {
                Some(Conversion::Format(TextFormat::CODE))
            }));
            all.extend(rules(&["span"], PRIORITY_LOW, styled_span));
            all.extend(rules(&["script", "style"], PRIORITY_LOW, |_| {
                Some(Conversion::Skip)
            }));
            all
        }
        _ => Vec::new(),
    }
}

fn alignment(node: &MarkupNode) -> ElementFormat {
    match node.style("text-align").as_deref() {
        Some("left") => ElementFormat::Left,
        Some("start") => ElementFormat::Start,
        Some("center") => ElementFormat::Center,
        Some("right") => ElementFormat::Right,
        Some("end") => ElementFormat::End,
        Some("justify") => ElementFormat::Justify,
        _ => ElementFormat::Unset,
    }
}

/// Convert `nodes` into detached document nodes, ready for `ops::insert_nodes`.
pub fn import(tx: &mut Transaction<'_>, nodes: &[MarkupNode]) -> Result<Vec<NodeKey>> {
    let mut out = Vec::new();
    for node in nodes {
        convert(tx, node, TextFormat::empty(), &mut out)?;
    }
    wrap_orphan_items(tx, out)
}

fn convert(
    tx: &mut Transaction<'_>,
    node: &MarkupNode,
    format: TextFormat,
    out: &mut Vec<NodeKey>,
) -> Result<()> {
    let (tag, children) = match node {
        MarkupNode::Text { text } => {
            // whitespace between block tags
            if text.is_empty() || (text.trim().is_empty() && text.contains('\n')) {
                return Ok(());
            }
            let key = tx.create_text(text.as_str())?;
            if !format.is_empty() {
                tx.set_format(key, format)?;
            }
            out.push(key);
            return Ok(());
        }
        MarkupNode::Element { tag, children, .. } => (tag.to_ascii_lowercase(), children),
    };

    let conversion = tx
        .registry()
        .conversions_for(&tag)
        .iter()
        .find_map(|rule| (rule.convert)(node));
    log::trace!("markup <{tag}> converts to {conversion:?}");

    match conversion {
        Some(Conversion::Skip) => {}
        Some(Conversion::LineBreak) => out.push(tx.create_line_break()?),
        Some(Conversion::Format(flags)) => {
            for child in children {
                convert(tx, child, format | flags, out)?;
            }
        }
        Some(Conversion::Unwrap) | None => {
            for child in children {
                convert(tx, child, format, out)?;
            }
        }
        Some(Conversion::Element(kind)) => {
            let key = tx.create_element(kind)?;
            let align = alignment(node);
            if align != ElementFormat::Unset {
                tx.set_element_format(key, align)?;
            }
            let mut inner = Vec::new();
            for child in children {
                convert(tx, child, format, &mut inner)?;
            }
            let inner = fit_children(tx, key, inner)?;
            tx.append(key, &inner)?;
            out.push(key);
        }
    }
    Ok(())
}

/// Reshape converted children so they can live under `parent`.
fn fit_children(
    tx: &mut Transaction<'_>,
    parent: NodeKey,
    children: Vec<NodeKey>,
) -> Result<Vec<NodeKey>> {
    let kind = tx.get(parent)?.element_kind().cloned();
    match kind {
        Some(ElementKind::List { .. }) => wrap_in_items(tx, children),
        Some(ElementKind::ListItem { .. }) => {
            let mut fitted = Vec::new();
            for child in children {
                if matches!(
                    tx.get(child)?.element_kind(),
                    Some(ElementKind::List { .. })
                ) {
                    fitted.push(child);
                } else {
                    flatten_into(tx, child, &mut fitted)?;
                }
            }
            Ok(fitted)
        }
        _ => {
            let mut fitted = Vec::new();
            for child in children {
                flatten_into(tx, child, &mut fitted)?;
            }
            Ok(fitted)
        }
    }
}

/// Push `key` if it is inline; otherwise push its inline content, separated from
/// what came before by a line break.
fn flatten_into(tx: &mut Transaction<'_>, key: NodeKey, out: &mut Vec<NodeKey>) -> Result<()> {
    if tx.get(key)?.is_inline() {
        out.push(key);
        return Ok(());
    }
    if !out.is_empty() {
        out.push(tx.create_line_break()?);
    }
    for child in tx.view().child_keys(key) {
        flatten_into(tx, child, out)?;
    }
    Ok(())
}

/// Group everything that is not a list item into list items.
fn wrap_in_items(tx: &mut Transaction<'_>, children: Vec<NodeKey>) -> Result<Vec<NodeKey>> {
    let mut items = Vec::new();
    let mut run: Vec<NodeKey> = Vec::new();
    for child in children {
        if matches!(
            tx.get(child)?.element_kind(),
            Some(ElementKind::ListItem { .. })
        ) {
            if !run.is_empty() {
                items.push(item_of(tx, std::mem::take(&mut run))?);
            }
            items.push(child);
        } else {
            run.push(child);
        }
    }
    if !run.is_empty() {
        items.push(item_of(tx, run)?);
    }
    Ok(items)
}

fn item_of(tx: &mut Transaction<'_>, children: Vec<NodeKey>) -> Result<NodeKey> {
    let item = tx.create_element(ElementKind::ListItem {
        value: 1,
        checked: None,
    })?;
    let children = fit_children(tx, item, children)?;
    tx.append(item, &children)?;
    Ok(item)
}

/// Top-level list items without a list get a bullet list around each run.
fn wrap_orphan_items(tx: &mut Transaction<'_>, nodes: Vec<NodeKey>) -> Result<Vec<NodeKey>> {
    let mut out = Vec::new();
    let mut run: Vec<NodeKey> = Vec::new();
    for key in nodes {
        if matches!(tx.get(key)?.element_kind(), Some(ElementKind::ListItem { .. })) {
            run.push(key);
            continue;
        }
        if !run.is_empty() {
            out.push(bullet_list(tx, std::mem::take(&mut run))?);
        }
        out.push(key);
    }
    if !run.is_empty() {
        out.push(bullet_list(tx, run)?);
    }
    Ok(out)
}

fn bullet_list(tx: &mut Transaction<'_>, items: Vec<NodeKey>) -> Result<NodeKey> {
    let list = tx.create_element(ElementKind::List {
        list_type: ListType::Bullet,
        start: 1,
    })?;
    tx.append(list, &items)?;
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::snapshot::Snapshot;
    use crate::editing::testing::commit;
    use pretty_assertions::assert_eq;

    fn imported(nodes: &[MarkupNode]) -> Snapshot {
        commit(&Snapshot::empty(), |tx| {
            let keys = import(tx, nodes)?;
            tx.append(NodeKey::ROOT, &keys)
        })
    }

    #[test]
    fn test_inline_tags_forward_formats_to_text() {
        let snap = imported(&[MarkupNode::element(
            "p",
            vec![
                MarkupNode::element(
                    "b",
                    vec![
                        MarkupNode::text("bold "),
                        MarkupNode::element("em", vec![MarkupNode::text("both")]),
                    ],
                ),
                MarkupNode::text(" plain"),
            ],
        )]);

        assert_eq!(
            snap.outline(),
            "root\n  paragraph\n    text \"bold \" [bold]\n    text \"both\" [bold,italic]\n    text \" plain\"\n"
        );
    }

    #[test]
    fn test_normal_weight_bold_is_unwrapped() {
        let snap = imported(&[MarkupNode::element(
            "b",
            vec![MarkupNode::element("p", vec![MarkupNode::text("docs")])],
        )
        .with_attr("style", "font-weight:normal;")]);

        assert_eq!(snap.outline(), "root\n  paragraph\n    text \"docs\"\n");
    }

    #[test]
    fn test_styled_span_formats() {
        let snap = imported(&[MarkupNode::element(
            "p",
            vec![
                MarkupNode::element("span", vec![MarkupNode::text("x")])
                    .with_attr("style", "font-weight: 700; font-style: italic"),
            ],
        )]);

        assert_eq!(
            snap.outline(),
            "root\n  paragraph\n    text \"x\" [bold,italic]\n"
        );
    }

    #[test]
    fn test_lists_and_orphan_items() {
        let snap = imported(&[
            MarkupNode::element(
                "ol",
                vec![
                    MarkupNode::text("\n  "),
                    MarkupNode::element("li", vec![MarkupNode::text("one")]),
                    MarkupNode::text("stray"),
                ],
            )
            .with_attr("start", "3"),
            MarkupNode::element("li", vec![MarkupNode::text("orphan")]),
        ]);

        assert_eq!(
            snap.outline(),
            "root\n  list number\n    listitem\n      text \"one\"\n    listitem\n      text \"stray\"\n  list bullet\n    listitem\n      text \"orphan\"\n"
        );
        let list = snap.child_at(NodeKey::ROOT, 0).unwrap();
        assert_eq!(
            snap.get(list).and_then(|n| n.element_kind()).cloned(),
            Some(ElementKind::List {
                list_type: ListType::Number,
                start: 3
            })
        );
    }

    #[test]
    fn test_blocks_inside_paragraph_are_flattened() {
        let snap = imported(&[MarkupNode::element(
            "p",
            vec![
                MarkupNode::text("a"),
                MarkupNode::element("h2", vec![MarkupNode::text("b")]),
            ],
        )
        .with_attr("style", "text-align: center")]);

        assert_eq!(
            snap.outline(),
            "root\n  paragraph\n    text \"a\"\n    linebreak\n    text \"b\"\n"
        );
        let paragraph = snap.child_at(NodeKey::ROOT, 0).unwrap();
        assert_eq!(
            snap.get(paragraph).and_then(|n| n.element()).map(|e| e.format),
            Some(ElementFormat::Center)
        );
    }

    #[test]
    fn test_unknown_tags_unwrap_and_scripts_skip() {
        let snap = imported(&[MarkupNode::element(
            "div",
            vec![
                MarkupNode::element("script", vec![MarkupNode::text("alert(1)")]),
                MarkupNode::element(
                    "p",
                    vec![
                        MarkupNode::element("a", vec![MarkupNode::text("link")])
                            .with_attr("href", "https://example.com"),
                    ],
                ),
            ],
        )]);

        assert_eq!(
            snap.outline(),
            "root\n  paragraph\n    link https://example.com\n      text \"link\"\n"
        );
    }

    #[test]
    fn test_markup_json_shape() {
        let nodes: Vec<MarkupNode> = serde_json::from_str(
            r#"[{"kind": "element", "tag": "p", "children": [{"kind": "text", "text": "hi"}]}]"#,
        )
        .unwrap();
        assert_eq!(
            nodes,
            vec![MarkupNode::element("p", vec![MarkupNode::text("hi")])]
        );
    }
}
