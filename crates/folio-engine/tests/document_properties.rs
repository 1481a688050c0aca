use std::cell::{Cell, RefCell};
use std::rc::Rc;

use folio_engine::config::ThemeConfig;
use folio_engine::editing::{
    Command, DirtySets, Editor, ElementKind, HeadingTag, ListType, NodeKey, Point, Selection,
    TextFormat, UpdateOptions, register_history, register_rich_text,
};
use folio_engine::io::{read_document, write_document};
use folio_engine::reconciler::{MemorySurface, Reconciler, RenderSurface};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Rich-text editor holding `paragraphs`, caret at the start of the document.
/// Odd-numbered paragraphs are bold.
fn editor_with(paragraphs: &[&str]) -> Editor {
    let mut editor = Editor::headless();
    register_rich_text(&mut editor);
    let paragraphs: Vec<String> = paragraphs.iter().map(|p| p.to_string()).collect();
    editor
        .update(UpdateOptions::default(), move |tx| {
            for (i, content) in paragraphs.into_iter().enumerate() {
                let paragraph = tx.create_paragraph()?;
                tx.append(NodeKey::ROOT, &[paragraph])?;
                if content.is_empty() {
                    continue;
                }
                let text = tx.create_text(content)?;
                if i % 2 == 1 {
                    tx.set_format(text, TextFormat::BOLD)?;
                }
                tx.append(paragraph, &[text])?;
            }
            let first = tx.view().child_at(NodeKey::ROOT, 0).unwrap_or(NodeKey::ROOT);
            tx.set_selection(Some(Selection::caret(Point::element(first, 0))));
            Ok(())
        })
        .unwrap();
    editor
}

fn only_text(editor: &Editor) -> NodeKey {
    let snapshot = editor.snapshot();
    let paragraph = snapshot.child_at(NodeKey::ROOT, 0).unwrap();
    snapshot.child_at(paragraph, 0).unwrap()
}

#[test]
fn delete_forward_between_two_typed_characters() {
    let mut editor = editor_with(&[""]);
    editor
        .dispatch_command(Command::InsertText("ab".into()))
        .unwrap();
    let text = only_text(&editor);
    editor
        .dispatch_command(Command::SetSelection(Some(Selection::caret(Point::text(
            text, 1,
        )))))
        .unwrap();
    editor
        .dispatch_command(Command::DeleteCharacter { backward: false })
        .unwrap();

    let snapshot = editor.snapshot();
    assert_eq!(snapshot.text_content(NodeKey::ROOT), "a");
    let range = snapshot.selection().and_then(Selection::as_range).unwrap();
    assert!(range.is_collapsed());
    assert_eq!(range.anchor, Point::text(text, 1));
}

#[test]
fn select_all_then_wrap_keeps_children_and_formatting() {
    let mut editor = editor_with(&["one", "two"]);
    editor.dispatch_command(Command::SelectAll).unwrap();
    editor
        .dispatch_command(Command::WrapBlocks(ElementKind::Quote))
        .unwrap();

    let snapshot = editor.snapshot();
    let blocks = snapshot.child_keys(NodeKey::ROOT);
    assert_eq!(blocks.len(), 1);
    assert_eq!(snapshot.child_keys(blocks[0]).len(), 2);
    assert_eq!(
        snapshot.outline(),
        "root\n  quote\n    text \"one\"\n    text \"two\" [bold]\n"
    );
    assert_eq!(
        editor.surface().to_html(),
        "<blockquote><span>one</span><span data-format=\"bold\">two</span></blockquote>"
    );
}

#[test]
fn export_import_export_is_identical() {
    let mut editor = editor_with(&["title", "body", "item"]);
    editor
        .dispatch_command(Command::SetBlockType(ElementKind::Heading(HeadingTag::H2)))
        .unwrap();
    editor.dispatch_command(Command::SelectAll).unwrap();
    editor.dispatch_command(Command::Indent).unwrap();
    let exported = editor.export_json().unwrap();

    let mut other = Editor::headless();
    other.import_json(&exported).unwrap();
    assert_eq!(other.export_json().unwrap(), exported);
    assert_eq!(other.surface().to_html(), editor.surface().to_html());

    let original: Vec<NodeKey> = editor.snapshot().keys().collect();
    assert!(original.iter().all(|k| k.is_root() || !other.snapshot().contains(*k)));
}

#[test]
fn list_conversion_survives_a_file_round_trip() {
    let mut editor = editor_with(&["a", "b"]);
    editor.dispatch_command(Command::SelectAll).unwrap();
    editor
        .dispatch_command(Command::SetBlockType(ElementKind::List {
            list_type: ListType::Number,
            start: 1,
        }))
        .unwrap();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("doc.json");
    write_document(&path, editor.snapshot()).unwrap();

    let document = read_document(&path).unwrap();
    let mut other = Editor::headless();
    other
        .update(UpdateOptions::default(), |tx| {
            folio_engine::io::json::replace_document(tx, &document)
        })
        .unwrap();

    assert_eq!(
        other.snapshot().outline(),
        "root\n  list number\n    listitem\n      text \"a\"\n    listitem\n      text \"b\" [bold]\n"
    );
    assert_eq!(
        other.surface().to_html(),
        "<ol><li value=\"1\"><span>a</span></li><li value=\"2\"><span data-format=\"bold\">b</span></li></ol>"
    );
}

#[test]
fn reconciling_a_snapshot_against_itself_mutates_nothing() {
    let editor = editor_with(&["one", "two"]);
    let snapshot = editor.snapshot().clone();
    let mut surface = MemorySurface::new();
    let mut reconciler = Reconciler::new(ThemeConfig::default());
    reconciler.mount(&mut surface, &snapshot).unwrap();
    let before = surface.mutation_count();

    let ledger = reconciler
        .reconcile(&mut surface, &snapshot, &snapshot, &DirtySets::default())
        .unwrap();
    assert!(ledger.is_empty());

    let everything = DirtySets {
        full: true,
        ..DirtySets::default()
    };
    let ledger = reconciler
        .reconcile(&mut surface, &snapshot, &snapshot, &everything)
        .unwrap();
    assert!(ledger.is_empty());
    assert_eq!(surface.mutation_count(), before);
}

#[test]
fn splicing_out_the_only_child_keeps_the_element() {
    let mut editor = editor_with(&["solo"]);
    let paragraph = editor.snapshot().child_at(NodeKey::ROOT, 0).unwrap();
    editor
        .update(UpdateOptions::default(), move |tx| {
            tx.splice(paragraph, 0, 1, &[])?;
            Ok(())
        })
        .unwrap();

    assert!(editor.snapshot().contains(paragraph));
    let id = editor.reconciler().surface_id(paragraph).unwrap();
    assert_eq!(editor.surface().children(id).len(), 0);
}

#[test]
fn splice_shifts_element_points_past_the_splice() {
    let mut editor = editor_with(&["a"]);
    let seen = Rc::new(Cell::new(None));
    let out = Rc::clone(&seen);
    editor
        .update(UpdateOptions::default(), move |tx| {
            let paragraph = tx.view().child_at(NodeKey::ROOT, 0).unwrap();
            let extra = [tx.create_line_break()?, tx.create_line_break()?];
            tx.append(paragraph, &extra)?;
            tx.set_selection(Some(Selection::caret(Point::element(paragraph, 3))));

            tx.splice(paragraph, 0, 1, &[])?;
            out.set(tx.range_selection().map(|r| r.anchor.offset));
            Ok(())
        })
        .unwrap();

    assert_eq!(seen.get(), Some(2));
}

#[test]
fn every_published_snapshot_passes_the_invariant_checker() {
    let mut editor = editor_with(&["first", "second"]);
    register_history(&mut editor);
    let failures = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&failures);
    editor.register_update_listener(Box::new(move |event, _| {
        if let Err(err) = event.next.check_invariants() {
            sink.borrow_mut().push(err.to_string());
        }
    }));

    let script = vec![
        Command::InsertText("x".into()),
        Command::SelectAll,
        Command::FormatText(TextFormat::ITALIC),
        Command::MoveCaret {
            backward: false,
            extend: false,
        },
        Command::InsertParagraph,
        Command::InsertText("new".into()),
        Command::DeleteCharacter { backward: true },
        Command::SelectAll,
        Command::RemoveText,
        Command::Undo,
        Command::Undo,
        Command::Redo,
        Command::SelectAll,
        Command::WrapBlocks(ElementKind::Quote),
        Command::InsertLineBreak,
        Command::Undo,
    ];
    for command in script {
        editor.dispatch_command(command).unwrap();
    }

    assert_eq!(*failures.borrow(), Vec::<String>::new());
    editor.snapshot().check_invariants().unwrap();
}
