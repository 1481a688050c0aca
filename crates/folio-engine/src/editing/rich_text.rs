//! Default handlers for the command catalog, registered at the `Editor` tier so any
//! host handler can take precedence.

use crate::editing::commands::{
    ClipboardData, Command, CommandId, CommandPriority, CommandRegistration, FOLIO_MIME,
    MARKUP_MIME, PLAIN_MIME,
};
use crate::editing::editor::Editor;
use crate::editing::node::NodeKey;
use crate::editing::ops;
use crate::editing::selection::Selection;
use crate::editing::snapshot::Snapshot;
use crate::editing::transaction::Transaction;
use crate::error::{EngineError, Result};
use crate::io::json::{self, ClipboardPayload};
use crate::io::markup::{self, MarkupNode};
use crate::reconciler::RenderSurface;

const HANDLED: [CommandId; 17] = [
    CommandId::InsertText,
    CommandId::InsertRawText,
    CommandId::InsertParagraph,
    CommandId::InsertLineBreak,
    CommandId::DeleteCharacter,
    CommandId::RemoveText,
    CommandId::FormatText,
    CommandId::FormatElement,
    CommandId::SetBlockType,
    CommandId::WrapBlocks,
    CommandId::Indent,
    CommandId::Outdent,
    CommandId::MoveCaret,
    CommandId::SelectAll,
    CommandId::SetSelection,
    CommandId::Paste,
    CommandId::InsertNodes,
];

/// Register the built-in editing behavior for every catalog command except the
/// history ones (see `history::register_history`).
pub fn register_rich_text<S: RenderSurface>(editor: &mut Editor<S>) -> Vec<CommandRegistration> {
    HANDLED
        .into_iter()
        .map(|id| editor.register_command(id, CommandPriority::Editor, Box::new(handle)))
        .collect()
}

fn handle(tx: &mut Transaction<'_>, command: &Command) -> Result<bool> {
    let needs_range = !matches!(
        command,
        Command::SelectAll | Command::SetSelection(_) | Command::InsertNodes(_)
    );
    if needs_range && tx.range_selection().is_none() {
        return Ok(false);
    }

    match command {
        Command::InsertText(text) => ops::insert_text(tx, text)?,
        Command::InsertRawText(text) => ops::insert_raw_text(tx, text)?,
        Command::InsertParagraph => ops::insert_paragraph(tx)?,
        Command::InsertLineBreak => ops::insert_line_break(tx)?,
        Command::DeleteCharacter { backward } => ops::delete_character(tx, *backward)?,
        Command::RemoveText => ops::remove_text(tx)?,
        Command::FormatText(flag) => ops::format_text(tx, *flag)?,
        Command::FormatElement(format) => ops::format_element(tx, *format)?,
        Command::SetBlockType(kind) => ops::set_blocks_type(tx, kind.clone())?,
        Command::WrapBlocks(kind) => {
            ops::wrap_blocks(tx, kind.clone())?;
        }
        Command::Indent => ops::indent(tx)?,
        Command::Outdent => ops::outdent(tx)?,
        Command::MoveCaret { backward, extend } => ops::move_caret(tx, *backward, *extend)?,
        Command::SelectAll => ops::select_all(tx)?,
        Command::SetSelection(selection) => tx.set_selection(selection.clone()),
        Command::Paste(clipboard) => paste(tx, clipboard)?,
        Command::InsertNodes(nodes) => {
            let keys = import_all(tx, nodes)?;
            ops::insert_nodes(tx, &keys)?;
        }
        Command::Undo | Command::Redo | Command::ClearHistory | Command::Custom { .. } => {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Insert the richest clipboard format this editor understands. Unreadable rich
/// entries fall through to the next format; plain text is the last resort.
fn paste(tx: &mut Transaction<'_>, clipboard: &ClipboardData) -> Result<()> {
    tx.add_tag("paste");

    if let Some(data) = clipboard.get(FOLIO_MIME) {
        match serde_json::from_str::<ClipboardPayload>(data) {
            Ok(payload) => {
                if payload.namespace != tx.config().namespace {
                    log::debug!("pasting nodes copied from editor '{}'", payload.namespace);
                }
                match import_all(tx, &payload.nodes) {
                    Ok(keys) => return ops::insert_nodes(tx, &keys),
                    Err(EngineError::UnregisteredNodeType(tag)) => {
                        log::warn!("clipboard nodes use unregistered type '{tag}'; trying other formats");
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) => log::warn!("ignoring unreadable {FOLIO_MIME} clipboard entry: {err}"),
        }
    }

    if let Some(data) = clipboard.get(MARKUP_MIME) {
        match serde_json::from_str::<Vec<MarkupNode>>(data) {
            Ok(tree) => {
                let keys = markup::import(tx, &tree)?;
                return ops::insert_nodes(tx, &keys);
            }
            Err(err) => log::warn!("ignoring unreadable {MARKUP_MIME} clipboard entry: {err}"),
        }
    }

    if let Some(text) = clipboard.get(PLAIN_MIME) {
        return ops::insert_raw_text(tx, text);
    }
    match clipboard
        .entries()
        .find(|(mime, _)| *mime != FOLIO_MIME && *mime != MARKUP_MIME)
    {
        Some((mime, data)) => {
            log::warn!("unrecognized clipboard format {mime}; pasting as plain text");
            ops::insert_raw_text(tx, data)
        }
        None => Ok(()),
    }
}

fn import_all(tx: &mut Transaction<'_>, nodes: &[json::SerializedNode]) -> Result<Vec<NodeKey>> {
    nodes.iter().map(|node| json::import_node(tx, node)).collect()
}

/// What a copy of the current selection puts on the clipboard: the selected nodes
/// for folio editors and the plain text for everyone else. `None` when nothing is
/// selected.
pub fn clipboard_from_selection(view: &Snapshot, namespace: &str) -> Result<Option<ClipboardData>> {
    let Some(range) = view.selection().and_then(Selection::as_range) else {
        return Ok(None);
    };
    if range.is_collapsed() {
        return Ok(None);
    }
    let payload = ClipboardPayload {
        namespace: namespace.to_string(),
        nodes: json::export_selection(view, range)?,
    };
    Ok(Some(
        ClipboardData::new()
            .with(FOLIO_MIME, serde_json::to_string(&payload)?)
            .with(PLAIN_MIME, ops::get_text_content(view, range)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::editor::UpdateOptions;
    use crate::editing::node::{ElementKind, TextFormat};
    use crate::editing::selection::Point;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Editor with one paragraph per string and the caret at the end of the last
    /// one. Empty strings make empty paragraphs.
    fn rich_editor(paragraphs: &[&str]) -> (Editor, Vec<NodeKey>) {
        let mut editor = Editor::headless();
        register_rich_text(&mut editor);
        let texts = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&texts);
        let paragraphs: Vec<String> = paragraphs.iter().map(|p| p.to_string()).collect();
        editor
            .update(UpdateOptions::default(), move |tx| {
                let mut caret = Point::element(NodeKey::ROOT, 0);
                for content in paragraphs {
                    let paragraph = tx.create_paragraph()?;
                    tx.append(NodeKey::ROOT, &[paragraph])?;
                    caret = Point::element(paragraph, 0);
                    if content.is_empty() {
                        continue;
                    }
                    let len = content.chars().count();
                    let text = tx.create_text(content)?;
                    tx.append(paragraph, &[text])?;
                    out.borrow_mut().push(text);
                    caret = Point::text(text, len);
                }
                tx.set_selection(Some(Selection::caret(caret)));
                Ok(())
            })
            .unwrap();
        let texts = texts.borrow().clone();
        (editor, texts)
    }

    #[test]
    fn test_typing_and_enter() {
        let (mut editor, _) = rich_editor(&["ab"]);
        assert!(editor.dispatch_command(Command::InsertText("c".into())).unwrap());
        assert!(editor.dispatch_command(Command::InsertParagraph).unwrap());
        assert!(editor.dispatch_command(Command::InsertText("d".into())).unwrap());

        assert_eq!(
            editor.snapshot().outline(),
            "root\n  paragraph\n    text \"abc\"\n  paragraph\n    text \"d\"\n"
        );
        assert_eq!(
            editor.surface().to_html(),
            "<p><span>abc</span></p><p><span>d</span></p>"
        );
    }

    #[test]
    fn test_commands_without_selection_are_not_handled() {
        let (mut editor, _) = rich_editor(&["ab"]);
        editor.dispatch_command(Command::SetSelection(None)).unwrap();

        assert!(!editor.dispatch_command(Command::InsertText("x".into())).unwrap());
        assert!(!editor.dispatch_command(Command::Undo).unwrap());
        assert_eq!(editor.snapshot().text_content(NodeKey::ROOT), "ab");
    }

    #[test]
    fn test_select_all_then_format() {
        let (mut editor, _) = rich_editor(&["one", "two"]);
        editor.dispatch_command(Command::SelectAll).unwrap();
        editor
            .dispatch_command(Command::FormatText(TextFormat::ITALIC))
            .unwrap();

        assert_eq!(
            editor.snapshot().outline(),
            "root\n  paragraph\n    text \"one\" [italic]\n  paragraph\n    text \"two\" [italic]\n"
        );
    }

    #[test]
    fn test_paste_plain_text_with_newlines() {
        let (mut editor, _) = rich_editor(&["x"]);
        editor
            .dispatch_command(Command::Paste(ClipboardData::plain("a\nb")))
            .unwrap();

        assert_eq!(
            editor.snapshot().outline(),
            "root\n  paragraph\n    text \"xa\"\n    linebreak\n    text \"b\"\n"
        );
    }

    #[test]
    fn test_unreadable_rich_entry_falls_back_to_plain_text() {
        let (mut editor, _) = rich_editor(&[""]);
        let clipboard = ClipboardData::new()
            .with(FOLIO_MIME, "{ broken")
            .with(PLAIN_MIME, "plain");
        editor.dispatch_command(Command::Paste(clipboard)).unwrap();

        assert_eq!(editor.snapshot().text_content(NodeKey::ROOT), "plain");
    }

    #[test]
    fn test_unknown_mime_pastes_as_text() {
        let (mut editor, _) = rich_editor(&["a"]);
        let clipboard = ClipboardData::new().with("text/x-unknown", "b");
        editor.dispatch_command(Command::Paste(clipboard)).unwrap();

        assert_eq!(editor.snapshot().text_content(NodeKey::ROOT), "ab");
    }

    #[test]
    fn test_paste_markup_blocks() {
        let (mut editor, _) = rich_editor(&["a"]);
        let tree = vec![MarkupNode::element("h1", vec![MarkupNode::text("Title")])];
        let clipboard =
            ClipboardData::new().with(MARKUP_MIME, serde_json::to_string(&tree).unwrap());
        editor.dispatch_command(Command::Paste(clipboard)).unwrap();

        assert_eq!(
            editor.snapshot().outline(),
            "root\n  paragraph\n    text \"a\"\n  heading h1\n    text \"Title\"\n"
        );
    }

    #[test]
    fn test_copy_then_paste_between_editors() {
        let (mut source, texts) = rich_editor(&["hello", "world"]);
        source
            .dispatch_command(Command::SetSelection(Some(Selection::Range(
                crate::editing::selection::RangeSelection::new(
                    Point::text(texts[0], 3),
                    Point::text(texts[1], 2),
                ),
            ))))
            .unwrap();
        let clipboard = source
            .read(|view| clipboard_from_selection(view, "folio"))
            .unwrap()
            .unwrap();
        assert_eq!(clipboard.get(PLAIN_MIME), Some("lo\n\nwo"));

        let (mut target, _) = rich_editor(&[""]);
        target.dispatch_command(Command::Paste(clipboard)).unwrap();
        let outline = target.snapshot().outline();
        assert!(outline.contains("text \"lo\""), "{outline}");
        assert!(outline.contains("text \"wo\""), "{outline}");
    }

    #[test]
    fn test_block_type_and_wrap() {
        let (mut editor, _) = rich_editor(&["one", "two"]);
        editor.dispatch_command(Command::SelectAll).unwrap();
        editor
            .dispatch_command(Command::WrapBlocks(ElementKind::Quote))
            .unwrap();

        // adjacent plain text from the two blocks merges at commit
        assert_eq!(
            editor.snapshot().outline(),
            "root\n  quote\n    text \"onetwo\"\n"
        );
    }
}
