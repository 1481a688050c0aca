//! An in-memory render surface: an arena of elements and text nodes that renders to
//! HTML. Used by the tests and the terminal host.

use std::collections::BTreeMap;

use crate::editing::text::{char_len, splice_chars};
use crate::reconciler::surface::{ElementSpec, RenderSurface, SurfaceId, SurfaceSelection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryContent {
    Element {
        tag: &'static str,
        attributes: BTreeMap<&'static str, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    content: MemoryContent,
    parent: Option<SurfaceId>,
    children: Vec<SurfaceId>,
}

#[derive(Debug)]
pub struct MemorySurface {
    nodes: Vec<Option<MemoryNode>>,
    selection: Option<SurfaceSelection>,
    mutations: u64,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySurface {
    pub fn new() -> Self {
        let root = MemoryNode {
            content: MemoryContent::Element {
                tag: "div",
                attributes: BTreeMap::new(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![Some(root)],
            selection: None,
            mutations: 0,
        }
    }

    fn node(&self, id: SurfaceId) -> Option<&MemoryNode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: SurfaceId) -> Option<&mut MemoryNode> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn alloc(&mut self, content: MemoryContent) -> SurfaceId {
        let id = SurfaceId(self.nodes.len() as u64);
        self.nodes.push(Some(MemoryNode {
            content,
            parent: None,
            children: Vec::new(),
        }));
        id
    }

    /// Unlink `id` from its parent's child list, returning the parent and the index it held.
    fn unlink(&mut self, id: SurfaceId) -> Option<(SurfaceId, usize)> {
        let parent = self.node(id)?.parent?;
        let siblings = &mut self.node_mut(parent)?.children;
        let index = siblings.iter().position(|c| *c == id)?;
        siblings.remove(index);
        if let Some(node) = self.node_mut(id) {
            node.parent = None;
        }
        Some((parent, index))
    }

    fn free(&mut self, id: SurfaceId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(id.0 as usize).and_then(Option::take) {
                stack.extend(node.children);
            }
        }
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.node(id).is_some()
    }

    pub fn children(&self, id: SurfaceId) -> &[SurfaceId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn content(&self, id: SurfaceId) -> Option<&MemoryContent> {
        self.node(id).map(|n| &n.content)
    }

    pub fn parent(&self, id: SurfaceId) -> Option<SurfaceId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn selection(&self) -> Option<SurfaceSelection> {
        self.selection
    }

    /// Live nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.children(self.root()).is_empty()
    }

    /// The rendered tree as HTML, without the root element.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root()) {
            self.write_html(*child, &mut out);
        }
        out
    }

    fn write_html(&self, id: SurfaceId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        match &node.content {
            MemoryContent::Text(text) => out.push_str(&html_escape::encode_text(text)),
            MemoryContent::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(value));
                    out.push('"');
                }
                out.push('>');
                if *tag == "br" {
                    return;
                }
                for child in &node.children {
                    self.write_html(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

impl RenderSurface for MemorySurface {
    fn root(&self) -> SurfaceId {
        SurfaceId(0)
    }

    fn create_element(&mut self, spec: &ElementSpec) -> SurfaceId {
        self.mutations += 1;
        self.alloc(MemoryContent::Element {
            tag: spec.tag,
            attributes: spec.attributes.clone(),
        })
    }

    fn create_text(&mut self, text: &str) -> SurfaceId {
        self.mutations += 1;
        self.alloc(MemoryContent::Text(text.to_string()))
    }

    fn insert(&mut self, parent: SurfaceId, child: SurfaceId, before: Option<SurfaceId>) {
        if !self.contains(parent) || !self.contains(child) {
            return;
        }
        self.mutations += 1;
        self.unlink(child);
        let Some(parent_node) = self.node_mut(parent) else {
            return;
        };
        let index = before
            .and_then(|b| parent_node.children.iter().position(|c| *c == b))
            .unwrap_or(parent_node.children.len());
        parent_node.children.insert(index, child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
    }

    fn detach(&mut self, id: SurfaceId) {
        if id == self.root() || !self.contains(id) {
            return;
        }
        self.mutations += 1;
        self.unlink(id);
        self.free(id);
    }

    fn replace(&mut self, old: SurfaceId, new: SurfaceId) {
        if !self.contains(old) || !self.contains(new) || old == self.root() {
            return;
        }
        self.mutations += 1;
        self.unlink(new);
        if let Some((parent, index)) = self.unlink(old) {
            if let Some(parent_node) = self.node_mut(parent) {
                parent_node.children.insert(index, new);
            }
            if let Some(node) = self.node_mut(new) {
                node.parent = Some(parent);
            }
        }
        self.free(old);
    }

    fn splice_text(&mut self, id: SurfaceId, offset: usize, delete: usize, insert: &str) {
        let Some(MemoryNode {
            content: MemoryContent::Text(text),
            ..
        }) = self.node_mut(id)
        else {
            return;
        };
        let offset = offset.min(char_len(text));
        *text = splice_chars(text, offset, delete, insert);
        self.mutations += 1;
    }

    fn update_element(&mut self, id: SurfaceId, spec: &ElementSpec) {
        let Some(MemoryNode {
            content: MemoryContent::Element { tag, attributes },
            ..
        }) = self.node_mut(id)
        else {
            return;
        };
        *tag = spec.tag;
        *attributes = spec.attributes.clone();
        self.mutations += 1;
    }

    fn clear(&mut self) {
        let children = self.children(self.root()).to_vec();
        for child in children {
            self.detach(child);
        }
    }

    fn set_selection(&mut self, selection: Option<SurfaceSelection>) {
        self.selection = selection;
    }

    fn mutation_count(&self) -> u64 {
        self.mutations
    }
}
