use std::collections::BTreeMap;
use std::fmt;

/// Handle to one element or text node of a render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tag and attributes of a rendered element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementSpec {
    pub tag: &'static str,
    pub attributes: BTreeMap<&'static str, String>,
}

impl ElementSpec {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            attributes: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, name: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.attributes.insert(name, value);
        }
        self
    }
}

/// A surface position: a text node and a char offset, or an element and a child index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfacePoint {
    pub node: SurfaceId,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSelection {
    pub anchor: SurfacePoint,
    pub focus: SurfacePoint,
}

/// The host's visual tree. The reconciler is its only writer.
///
/// Handles stay valid until [`RenderSurface::detach`] or [`RenderSurface::replace`]
/// drops them; operations on a dropped handle are ignored.
pub trait RenderSurface {
    fn root(&self) -> SurfaceId;

    fn create_element(&mut self, spec: &ElementSpec) -> SurfaceId;

    fn create_text(&mut self, text: &str) -> SurfaceId;

    /// Insert `child` under `parent` before `before`, or last when `before` is `None`.
    /// A child that is already attached somewhere is moved.
    fn insert(&mut self, parent: SurfaceId, child: SurfaceId, before: Option<SurfaceId>);

    /// Remove `id` from its parent and drop it along with its subtree.
    fn detach(&mut self, id: SurfaceId);

    /// Put `new` where `old` is and drop `old`.
    fn replace(&mut self, old: SurfaceId, new: SurfaceId);

    /// Replace `delete` chars at char `offset` of a text node with `insert`.
    fn splice_text(&mut self, id: SurfaceId, offset: usize, delete: usize, insert: &str);

    fn update_element(&mut self, id: SurfaceId, spec: &ElementSpec);

    /// Drop every child of the root.
    fn clear(&mut self);

    fn set_selection(&mut self, selection: Option<SurfaceSelection>);

    /// Structural and content mutations performed so far; selection changes don't count.
    fn mutation_count(&self) -> u64;
}
