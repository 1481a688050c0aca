// Benchmark helper functions - Rust's dead code analysis doesn't understand
// that these are used by benchmark files in the same directory
// See: https://users.rust-lang.org/t/cargo-rustc-benches-awarnings/110111/2
use folio_engine::editing::{
    Editor, ElementKind, HeadingTag, ListType, NodeKey, Point, Selection, TextFormat,
    UpdateOptions, register_rich_text,
};

/// An editor holding `sections` repetitions of heading, paragraphs and a short list,
/// with the caret at the end of the last paragraph.
#[allow(dead_code)]
pub fn generate_document(sections: usize) -> Editor {
    let mut editor = Editor::headless();
    register_rich_text(&mut editor);
    editor
        .update(UpdateOptions::default(), move |tx| {
            let mut caret = None;
            for section in 0..sections {
                let heading = tx.create_element(ElementKind::Heading(HeadingTag::H2))?;
                let title = tx.create_text(format!("Section {section}"))?;
                tx.append(heading, &[title])?;
                tx.append(NodeKey::ROOT, &[heading])?;

                for _ in 0..3 {
                    let paragraph = tx.create_paragraph()?;
                    let plain = tx.create_text("Paragraph with some content and ")?;
                    let bold = tx.create_text("a bold phrase")?;
                    tx.set_format(bold, TextFormat::BOLD)?;
                    let tail = tx.create_text(" to close it.")?;
                    tx.append(paragraph, &[plain, bold, tail])?;
                    tx.append(NodeKey::ROOT, &[paragraph])?;
                    caret = Some(Point::text(tail, 13));
                }

                let list = tx.create_element(ElementKind::List {
                    list_type: ListType::Bullet,
                    start: 1,
                })?;
                for i in 0..3 {
                    let item = tx.create_element(ElementKind::ListItem {
                        value: i + 1,
                        checked: None,
                    })?;
                    let text = tx.create_text(format!("Item {i}"))?;
                    tx.append(item, &[text])?;
                    tx.append(list, &[item])?;
                }
                tx.append(NodeKey::ROOT, &[list])?;
            }
            tx.set_selection(caret.map(Selection::caret));
            Ok(())
        })
        .expect("benchmark document should build");
    editor
}
