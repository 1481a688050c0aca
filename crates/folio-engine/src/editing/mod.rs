/*!
 * # Editing Core
 *
 * The document model and everything that mutates it.
 *
 * ## Architecture Overview
 *
 * ### 1. Versioned node graph
 * - A document is a [`Snapshot`]: a map from [`NodeKey`] to reference-counted nodes
 *   plus the selection. Snapshots are immutable once committed.
 * - Nodes are a closed tagged union (`NodeKind`); per-type behavior (inline, can be
 *   empty, can indent, export version) lives in the registry table, not in trait
 *   objects.
 * - Writing a node copies it (and its ancestors) on first write, so every untouched
 *   subtree stays pointer-identical to the previous version.
 *
 * ### 2. Transactions
 * - Every mutation happens inside an explicit [`Transaction`] handle passed to
 *   `Editor::update` callbacks and command handlers.
 * - Commit normalizes text, runs document transforms to a fixed point, collects
 *   detached nodes and repairs the selection. A failed callback publishes nothing.
 *
 * ### 3. Caret and range model
 * - Selection points are `(key, offset, kind)` triples resolved through the snapshot.
 * - Directional carets (`caret`) walk the tree for deletion, formatting and export.
 *
 * ### 4. Command bus
 * - External input arrives as [`Command`]s dispatched through priority tiers; the
 *   built-in behavior (`rich_text`) and undo/redo (`history`) are ordinary handlers.
 *
 * ## Module Structure
 *
 * - **`node`**: node kinds, keys and per-variant data
 * - **`registry`**: type-tag behavior table and per-editor registrations
 * - **`snapshot`**: immutable document versions, traversal and invariant checking
 * - **`selection`**: points, range and node selections, normalization
 * - **`caret`**: directional carets and caret ranges
 * - **`transaction`** / **`graph`**: the write handle and its graph primitives
 * - **`ops`**: selection-level editing algorithms
 * - **`editor`**: the update loop, listeners and render flushing
 * - **`commands`**: the command catalog and dispatcher
 * - **`rich_text`** / **`history`**: default command handlers
 *
 * ## Usage Pattern
 *
 * ```rust
 * use folio_engine::editing::*;
 *
 * let mut editor = Editor::headless();
 * register_rich_text(&mut editor);
 *
 * editor
 *     .update(UpdateOptions::default(), |tx| {
 *         let paragraph = tx.create_paragraph()?;
 *         tx.append(NodeKey::ROOT, &[paragraph])?;
 *         tx.set_selection(Some(Selection::caret(Point::element(paragraph, 0))));
 *         Ok(())
 *     })
 *     .unwrap();
 * editor
 *     .dispatch_command(Command::InsertText("Hello".into()))
 *     .unwrap();
 *
 * assert_eq!(editor.surface().to_html(), "<p><span>Hello</span></p>");
 * ```
 */

pub mod caret;
pub mod commands;
pub mod editor;
mod graph;
pub mod history;
pub mod node;
pub mod ops;
pub mod registry;
pub mod rich_text;
pub mod selection;
pub mod snapshot;
pub mod text;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use commands::{
    ClipboardData, Command, CommandHandler, CommandId, CommandPriority, CommandRegistration,
};
pub use editor::{
    CommitEvent, Editor, FlushScheduler, ListenerId, Phase, UpdateEvent, UpdateOptions,
    UpdateQueue,
};
pub use history::{History, register_history};
pub use node::{
    DecoratorData, ElementFormat, ElementKind, HeadingTag, ListType, Node, NodeKey, NodeKind,
    TextDirection, TextFormat, TextMode,
};
pub use registry::NodeRegistry;
pub use rich_text::{clipboard_from_selection, register_rich_text};
pub use selection::{Point, PointType, RangeSelection, Selection};
pub use snapshot::Snapshot;
pub use transaction::{DirtySets, Transaction};
