//! The portable JSON form of a document.
//!
//! Every node exports as `{"type", "version", ...fields, "children"?}`; elements
//! always carry `children`, leaves never do. Field maps are ordered, so exporting
//! the same tree twice yields the same bytes. Keys are not exported: importing always
//! allocates fresh ones.

use std::collections::{BTreeMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::editing::caret::CaretRange;
use crate::editing::node::{
    DecoratorData, ElementData, ElementFormat, ElementKind, HeadingTag, ListType, NodeKey,
    NodeKind, TextData, TextDirection, TextFormat, TextMode,
};
use crate::editing::selection::RangeSelection;
use crate::editing::snapshot::Snapshot;
use crate::editing::text::slice_chars;
use crate::editing::transaction::Transaction;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub version: u32,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<SerializedNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedDocument {
    pub root: SerializedNode,
}

/// Nodes on the clipboard, tagged with the exporting editor's namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardPayload {
    pub namespace: String,
    pub nodes: Vec<SerializedNode>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ElementFields {
    format: ElementFormat,
    indent: u32,
    direction: Option<TextDirection>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextFields {
    text: String,
    #[serde(default)]
    format: u32,
    #[serde(default)]
    style: String,
    #[serde(default)]
    mode: TextMode,
}

#[derive(Debug, Serialize, Deserialize)]
struct HeadingFields {
    tag: HeadingTag,
}

#[derive(Debug, Serialize, Deserialize)]
struct CodeFields {
    #[serde(default)]
    language: Option<String>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFields {
    list_type: ListType,
    #[serde(default = "one")]
    start: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListItemFields {
    #[serde(default = "one")]
    value: u32,
    #[serde(default)]
    checked: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkFields {
    url: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DecoratorFields {
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    inline: bool,
}

fn merge_fields(fields: &mut Map<String, Value>, value: impl Serialize) -> Result<()> {
    if let Value::Object(map) = serde_json::to_value(value)? {
        fields.extend(map);
    }
    Ok(())
}

fn read_fields<T: DeserializeOwned>(node: &SerializedNode) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(node.fields.clone()))?)
}

fn element_fields(data: &ElementData) -> ElementFields {
    ElementFields {
        format: data.format,
        indent: data.indent,
        direction: data.direction,
    }
}

fn kind_fields(kind: &ElementKind, fields: &mut Map<String, Value>) -> Result<()> {
    match kind {
        ElementKind::Paragraph | ElementKind::Quote => Ok(()),
        ElementKind::Heading(tag) => merge_fields(fields, HeadingFields { tag: *tag }),
        ElementKind::Code { language } => merge_fields(
            fields,
            CodeFields {
                language: language.clone(),
            },
        ),
        ElementKind::List { list_type, start } => merge_fields(
            fields,
            ListFields {
                list_type: *list_type,
                start: *start,
            },
        ),
        ElementKind::ListItem { value, checked } => merge_fields(
            fields,
            ListItemFields {
                value: *value,
                checked: *checked,
            },
        ),
        ElementKind::Link { url, title } => merge_fields(
            fields,
            LinkFields {
                url: url.clone(),
                title: title.clone(),
            },
        ),
    }
}

fn leaf_fields(kind: &NodeKind, fields: &mut Map<String, Value>) -> Result<()> {
    match kind {
        NodeKind::Text(data) => merge_fields(
            fields,
            TextFields {
                text: data.text().to_string(),
                format: data.format.bits(),
                style: data.style.clone(),
                mode: data.mode,
            },
        ),
        NodeKind::Decorator(data) => merge_fields(
            fields,
            DecoratorFields {
                kind: data.kind.clone(),
                payload: data.payload.clone(),
                inline: data.inline,
            },
        ),
        NodeKind::Root(data) | NodeKind::Element { data, .. } => {
            merge_fields(fields, element_fields(data))
        }
        NodeKind::LineBreak => Ok(()),
    }
}

/// Export `key` and its subtree.
pub fn export_node(view: &Snapshot, key: NodeKey) -> Result<SerializedNode> {
    export_filtered(view, key, &|_| true, &|_, text| Some(text.to_string()))
}

fn export_filtered(
    view: &Snapshot,
    key: NodeKey,
    include: &dyn Fn(NodeKey) -> bool,
    text_of: &dyn Fn(NodeKey, &str) -> Option<String>,
) -> Result<SerializedNode> {
    let node = view.node(key)?;
    let mut fields = Map::new();
    leaf_fields(node.kind(), &mut fields)?;
    if let Some(kind) = node.element_kind() {
        kind_fields(kind, &mut fields)?;
    }
    if let Some(data) = node.text()
        && let Some(text) = text_of(key, data.text())
    {
        fields.insert("text".into(), Value::String(text));
    }
    // keys in sorted order whatever map the json crate is built with
    let fields: Map<String, Value> = fields
        .into_iter()
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .collect();

    let children = match node.element() {
        Some(_) => Some(
            view.children(key)
                .filter(|child| include(*child))
                .map(|child| export_filtered(view, child, include, text_of))
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    Ok(SerializedNode {
        type_tag: node.type_tag().to_string(),
        version: node.behavior().version,
        fields,
        children,
    })
}

pub fn export_document(snapshot: &Snapshot) -> Result<SerializedDocument> {
    Ok(SerializedDocument {
        root: export_node(snapshot, NodeKey::ROOT)?,
    })
}

/// Export what `range` covers: fully selected nodes whole, partially selected text
/// trimmed to the selection, and the ancestors needed to hold them.
pub fn export_selection(view: &Snapshot, range: &RangeSelection) -> Result<Vec<SerializedNode>> {
    let span = CaretRange::new(view, range.anchor, range.focus);
    let slices: Vec<(NodeKey, (usize, usize))> = span
        .text_slices(view)
        .iter()
        .map(|slice| (slice.key(), slice.indices()))
        .collect();

    let mut included: HashSet<NodeKey> = span.contained_nodes(view).into_iter().collect();
    included.extend(slices.iter().map(|(key, _)| *key));
    let seeds: Vec<NodeKey> = included.iter().copied().collect();
    for key in seeds {
        included.extend(view.ancestors(key).filter(|a| !a.is_root()));
    }

    let include = |key: NodeKey| included.contains(&key);
    let text_of = |key: NodeKey, text: &str| {
        slices
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, (start, end))| slice_chars(text, *start, *end).to_string())
    };
    view.children(NodeKey::ROOT)
        .filter(|key| include(*key))
        .map(|key| export_filtered(view, key, &include, &text_of))
        .collect()
}

pub fn to_string(document: &SerializedDocument) -> serde_json::Result<String> {
    serde_json::to_string_pretty(document)
}

pub fn from_str(source: &str) -> Result<SerializedDocument> {
    Ok(serde_json::from_str(source)?)
}

/// Create `node` and its subtree as detached nodes; returns the new top key.
pub fn import_node(tx: &mut Transaction<'_>, node: &SerializedNode) -> Result<NodeKey> {
    let element = |kind: ElementKind| -> Result<NodeKind> {
        let fields: ElementFields = read_fields(node)?;
        Ok(NodeKind::Element {
            kind,
            data: ElementData {
                format: fields.format,
                indent: fields.indent,
                direction: fields.direction,
                ..Default::default()
            },
        })
    };
    let kind = match node.type_tag.as_str() {
        "paragraph" => element(ElementKind::Paragraph)?,
        "quote" => element(ElementKind::Quote)?,
        "heading" => {
            let HeadingFields { tag } = read_fields(node)?;
            element(ElementKind::Heading(tag))?
        }
        "code" => {
            let CodeFields { language } = read_fields(node)?;
            element(ElementKind::Code { language })?
        }
        "list" => {
            let ListFields { list_type, start } = read_fields(node)?;
            element(ElementKind::List { list_type, start })?
        }
        "listitem" => {
            let ListItemFields { value, checked } = read_fields(node)?;
            element(ElementKind::ListItem { value, checked })?
        }
        "link" => {
            let LinkFields { url, title } = read_fields(node)?;
            element(ElementKind::Link { url, title })?
        }
        "text" => {
            let fields: TextFields = read_fields(node)?;
            NodeKind::Text(TextData {
                text: fields.text,
                format: TextFormat::from_bits_truncate(fields.format),
                style: fields.style,
                mode: fields.mode,
            })
        }
        "linebreak" => NodeKind::LineBreak,
        "decorator" => {
            let DecoratorFields {
                kind,
                payload,
                inline,
            } = read_fields(node)?;
            NodeKind::Decorator(DecoratorData {
                kind,
                payload,
                inline,
            })
        }
        "root" => {
            return Err(EngineError::InvariantViolation(
                "a root node can only be imported as a document".into(),
            ));
        }
        other => return Err(EngineError::UnregisteredNodeType(other.to_string())),
    };

    let key = tx.create_node(kind)?;
    if let Some(children) = &node.children
        && !children.is_empty()
    {
        let keys = children
            .iter()
            .map(|child| import_node(tx, child))
            .collect::<Result<Vec<_>>>()?;
        tx.append(key, &keys)?;
    }
    Ok(key)
}

/// Replace the transaction's whole document with `document`.
pub fn replace_document(tx: &mut Transaction<'_>, document: &SerializedDocument) -> Result<()> {
    let root = &document.root;
    if root.type_tag != "root" {
        return Err(EngineError::InvariantViolation(format!(
            "document root has type '{}'",
            root.type_tag
        )));
    }
    let fields: ElementFields = read_fields(root)?;
    let children = root
        .children
        .iter()
        .flatten()
        .map(|child| import_node(tx, child))
        .collect::<Result<Vec<_>>>()?;

    tx.set_selection(None);
    let size = tx.get(NodeKey::ROOT)?.size();
    tx.splice(NodeKey::ROOT, 0, size, &children)?;
    tx.set_element_format(NodeKey::ROOT, fields.format)?;
    tx.set_indent(NodeKey::ROOT, fields.indent)?;
    tx.set_direction(NodeKey::ROOT, fields.direction)?;
    Ok(())
}
