//! Turns a snapshot into terminal lines, with the caret drawn inline.

use folio_engine::editing::{
    ElementKind, ListType, NodeKey, NodeKind, Point, Selection, Snapshot, TextFormat,
};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

const CARET: &str = "│";

pub struct Rendered {
    pub lines: Vec<Line<'static>>,
    /// Line holding the caret, for scrolling.
    pub caret_line: Option<usize>,
}

pub fn render_snapshot(snapshot: &Snapshot) -> Rendered {
    let caret = snapshot.selection().and_then(Selection::as_range).map(|r| r.focus);
    let mut renderer = Renderer {
        snapshot,
        caret,
        lines: Vec::new(),
        current: Vec::new(),
        caret_line: None,
    };
    for block in snapshot.children(NodeKey::ROOT) {
        renderer.block(block, "", Style::default());
        renderer.blank_line();
    }
    Rendered {
        lines: renderer.lines,
        caret_line: renderer.caret_line,
    }
}

struct Renderer<'a> {
    snapshot: &'a Snapshot,
    caret: Option<Point>,
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    caret_line: Option<usize>,
}

impl Renderer<'_> {
    fn block(&mut self, key: NodeKey, indent: &str, style: Style) {
        let snapshot = self.snapshot;
        let Some(node) = snapshot.get(key) else {
            return;
        };
        match node.kind() {
            NodeKind::Element { kind, .. } => match kind {
                ElementKind::Heading(tag) => {
                    let level = tag.as_str().trim_start_matches('h').parse().unwrap_or(1);
                    let style = style.add_modifier(Modifier::BOLD).fg(Color::Cyan);
                    self.prefix(indent, format!("{} ", "#".repeat(level)), style);
                    self.inline_children(key, indent, style);
                    self.end_line();
                }
                ElementKind::Quote => {
                    let style = style.fg(Color::Gray).add_modifier(Modifier::ITALIC);
                    let indent = format!("{indent}> ");
                    self.prefix(&indent, String::new(), style);
                    self.inline_children(key, &indent, style);
                    self.end_line();
                }
                ElementKind::Code { language } => {
                    let fence = Style::default().fg(Color::DarkGray);
                    let lang = language.clone().unwrap_or_default();
                    self.lines
                        .push(Line::from(Span::styled(format!("{indent}```{lang}"), fence)));
                    self.prefix(indent, String::new(), style);
                    self.inline_children(key, indent, style.fg(Color::Green));
                    self.end_line();
                    self.lines
                        .push(Line::from(Span::styled(format!("{indent}```"), fence)));
                }
                ElementKind::List { list_type, .. } => {
                    let list_type = *list_type;
                    for item in snapshot.children(key) {
                        self.list_item(item, list_type, indent, style);
                    }
                }
                _ => {
                    self.prefix(indent, String::new(), style);
                    self.inline_children(key, indent, style);
                    self.end_line();
                }
            },
            NodeKind::Decorator(data) => {
                self.prefix(indent, String::new(), style);
                self.current.push(Span::styled(
                    format!("[{}]", data.kind),
                    Style::default().fg(Color::Magenta),
                ));
                self.end_line();
            }
            _ => {
                self.prefix(indent, String::new(), style);
                self.inline(key, indent, style);
                self.end_line();
            }
        }
    }

    fn list_item(&mut self, item: NodeKey, list_type: ListType, indent: &str, style: Style) {
        let Some(ElementKind::ListItem { value, checked }) =
            self.snapshot.get(item).and_then(|n| n.element_kind()).cloned()
        else {
            self.block(item, indent, style);
            return;
        };
        let marker = match list_type {
            ListType::Bullet => "• ".to_string(),
            ListType::Number => format!("{value}. "),
            ListType::Check if checked == Some(true) => "[x] ".to_string(),
            ListType::Check => "[ ] ".to_string(),
        };
        let snapshot = self.snapshot;
        let nested = format!("{indent}  ");
        self.prefix(indent, marker, style.fg(Color::Yellow));
        let mut open = true;
        for (index, child) in snapshot.children(item).enumerate() {
            self.caret_at_gap(item, index);
            if self.is_list(child) {
                if open {
                    self.end_line();
                    open = false;
                }
                self.block(child, &nested, style);
            } else {
                if !open {
                    self.prefix(&nested, String::new(), style);
                    open = true;
                }
                self.inline(child, &nested, style);
            }
        }
        if open {
            self.caret_at_end(item);
            self.end_line();
        }
    }

    fn inline_children(&mut self, key: NodeKey, indent: &str, style: Style) {
        let snapshot = self.snapshot;
        for (index, child) in snapshot.children(key).enumerate() {
            self.caret_at_gap(key, index);
            self.inline(child, indent, style);
        }
        self.caret_at_end(key);
    }

    fn inline(&mut self, key: NodeKey, indent: &str, style: Style) {
        let snapshot = self.snapshot;
        let Some(node) = snapshot.get(key) else {
            return;
        };
        match node.kind() {
            NodeKind::Text(data) => {
                let style = style.patch(format_style(data.format));
                match self.caret.filter(|p| p.is_text() && p.key == key) {
                    Some(point) => {
                        let split = data
                            .text()
                            .char_indices()
                            .nth(point.offset)
                            .map_or(data.text().len(), |(i, _)| i);
                        let (before, after) = data.text().split_at(split);
                        self.text(before, style);
                        self.mark_caret();
                        self.text(after, style);
                    }
                    None => self.text(data.text(), style),
                }
            }
            NodeKind::LineBreak => {
                self.end_line();
                self.prefix(indent, String::new(), style);
            }
            NodeKind::Element {
                kind: ElementKind::Link { .. },
                ..
            } => {
                let style = style.fg(Color::Blue).add_modifier(Modifier::UNDERLINED);
                self.inline_children(key, indent, style);
            }
            NodeKind::Decorator(data) => {
                self.current.push(Span::styled(
                    format!("[{}]", data.kind),
                    Style::default().fg(Color::Magenta),
                ));
            }
            _ => self.inline_children(key, indent, style),
        }
    }

    fn is_list(&self, key: NodeKey) -> bool {
        matches!(
            self.snapshot.get(key).and_then(|n| n.element_kind()),
            Some(ElementKind::List { .. })
        )
    }

    fn caret_at_gap(&mut self, parent: NodeKey, index: usize) {
        if self
            .caret
            .is_some_and(|p| !p.is_text() && p.key == parent && p.offset == index)
        {
            self.mark_caret();
        }
    }

    fn caret_at_end(&mut self, parent: NodeKey) {
        let size = self
            .snapshot
            .get(parent)
            .and_then(|n| n.element())
            .map_or(0, |e| e.size());
        self.caret_at_gap(parent, size);
    }

    fn mark_caret(&mut self) {
        self.current.push(Span::styled(
            CARET,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::SLOW_BLINK),
        ));
        self.caret_line = Some(self.lines.len());
    }

    fn text(&mut self, text: &str, style: Style) {
        if !text.is_empty() {
            self.current.push(Span::styled(text.to_string(), style));
        }
    }

    fn prefix(&mut self, indent: &str, marker: String, style: Style) {
        if !indent.is_empty() {
            self.current.push(Span::raw(indent.to_string()));
        }
        if !marker.is_empty() {
            self.current.push(Span::styled(marker, style));
        }
    }

    fn end_line(&mut self) {
        let spans = std::mem::take(&mut self.current);
        self.lines.push(Line::from(spans));
    }

    fn blank_line(&mut self) {
        self.lines.push(Line::default());
    }
}

fn format_style(format: TextFormat) -> Style {
    let mut style = Style::default();
    if format.contains(TextFormat::BOLD) {
        style = style.add_modifier(Modifier::BOLD);
    }
    if format.contains(TextFormat::ITALIC) {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if format.contains(TextFormat::UNDERLINE) {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if format.contains(TextFormat::STRIKETHROUGH) {
        style = style.add_modifier(Modifier::CROSSED_OUT);
    }
    if format.contains(TextFormat::CODE) {
        style = style.fg(Color::Green);
    }
    if format.contains(TextFormat::HIGHLIGHT) {
        style = style.bg(Color::Yellow).fg(Color::Black);
    }
    style
}
