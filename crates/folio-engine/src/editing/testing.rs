//! Fixtures shared by the unit tests of the editing modules.

use std::collections::HashSet;

use crate::config::EditorConfig;
use crate::editing::commands::CommandRegistry;
use crate::editing::editor::UpdateOptions;
use crate::editing::node::{NodeKey, TextFormat};
use crate::editing::registry::NodeRegistry;
use crate::editing::snapshot::Snapshot;
use crate::editing::transaction::{Transaction, TxContext};
use crate::error::Result;

struct Fixture {
    registry: NodeRegistry,
    commands: CommandRegistry,
    config: EditorConfig,
}

impl Fixture {
    fn new() -> Self {
        Self {
            registry: NodeRegistry::with_builtin(),
            commands: CommandRegistry::new(),
            config: EditorConfig::default(),
        }
    }

    fn context(&self) -> TxContext<'_> {
        TxContext {
            registry: &self.registry,
            commands: &self.commands,
            config: &self.config,
        }
    }
}

/// One paragraph per inner slice, one text node per string. Odd-numbered texts are
/// bold so neighbors never merge on commit.
pub(crate) fn paragraph_doc(paragraphs: &[&[&str]]) -> Snapshot {
    commit(&Snapshot::empty(), |tx| {
        for texts in paragraphs {
            let paragraph = tx.create_paragraph()?;
            let mut children = Vec::new();
            for (i, text) in texts.iter().enumerate() {
                let key = tx.create_text(*text)?;
                if i % 2 == 1 {
                    tx.set_format(key, TextFormat::BOLD)?;
                }
                children.push(key);
            }
            tx.append(paragraph, &children)?;
            tx.append(NodeKey::ROOT, &[paragraph])?;
        }
        Ok(())
    })
}

/// Children of `parent` that are text nodes.
pub(crate) fn texts_of(snap: &Snapshot, parent: NodeKey) -> Vec<NodeKey> {
    snap.children(parent)
        .filter(|key| snap.get(*key).is_some_and(|node| node.is_text()))
        .collect()
}

/// Run `f` in a transaction over `snap` without committing.
pub(crate) fn with_tx<F>(snap: &Snapshot, f: F)
where
    F: for<'t> FnOnce(&mut Transaction<'t>) -> Result<()>,
{
    let fixture = Fixture::new();
    let mut tx = Transaction::new(snap, fixture.context(), HashSet::new());
    f(&mut tx).unwrap();
}

/// Run `f` and commit; the result always passes the invariant checker.
pub(crate) fn commit<F>(snap: &Snapshot, f: F) -> Snapshot
where
    F: for<'t> FnOnce(&mut Transaction<'t>) -> Result<()>,
{
    let fixture = Fixture::new();
    let mut tx = Transaction::new(snap, fixture.context(), HashSet::new());
    f(&mut tx).unwrap();
    let next = tx
        .prepare_commit(&UpdateOptions::default())
        .unwrap()
        .snapshot
        .unwrap_or_else(|| snap.clone());
    next.check_invariants().unwrap();
    next
}
