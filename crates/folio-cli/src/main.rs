mod render;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use folio_config::Config;
use folio_engine::{
    EditorConfig, MemorySurface,
    editing::{
        Command, Editor, History, NodeKey, NodeRegistry, Point, Selection, Snapshot, TextFormat,
        UpdateOptions, history::HISTORIC, register_history, register_rich_text,
    },
    io,
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use std::{
    env,
    fs::File,
    io::{Stdout, stdout},
    path::PathBuf,
    process,
};

const DEFAULT_DOCUMENT: &str = "index.json";

struct App {
    editor: Editor,
    history: History,
    path: PathBuf,
    saved_version: u64,
    status: String,
}

impl App {
    fn open(path: PathBuf, config: EditorConfig) -> Result<Self> {
        let mut editor = Editor::new(config, NodeRegistry::with_builtin(), MemorySurface::new());
        register_rich_text(&mut editor);
        let history = register_history(&mut editor);

        let document = if path.exists() {
            Some(io::read_document(&path)?)
        } else {
            log::info!("{} does not exist yet, starting empty", path.display());
            None
        };
        editor.update(UpdateOptions::tagged(HISTORIC), |tx| {
            if let Some(document) = &document {
                io::json::replace_document(tx, document)?;
            }
            if tx.view().child_keys(NodeKey::ROOT).is_empty() {
                let paragraph = tx.create_paragraph()?;
                tx.append(NodeKey::ROOT, &[paragraph])?;
            }
            let caret = end_of_document(tx.view());
            tx.set_selection(Some(Selection::caret(caret)));
            Ok(())
        })?;

        let saved_version = editor.snapshot().version();
        let mut app = Self {
            editor,
            history,
            path,
            saved_version,
            status: String::new(),
        };
        app.settle();
        Ok(app)
    }

    /// Flush commits held back by deferred mode. The terminal redraws once per key
    /// event, so that is when the surface and update listeners catch up.
    fn settle(&mut self) {
        if !self.editor.has_pending_flush() {
            return;
        }
        if let Err(e) = self.editor.flush_now() {
            log::error!("flush failed: {e}");
            self.status = format!("Error: {e}");
        }
    }

    fn is_modified(&self) -> bool {
        self.editor.snapshot().version() != self.saved_version
    }

    fn save(&mut self) -> Result<()> {
        io::write_document(&self.path, self.editor.snapshot())?;
        self.saved_version = self.editor.snapshot().version();
        self.status = format!("Saved {}", self.path.display());
        log::info!("saved {}", self.path.display());
        Ok(())
    }

    fn dispatch(&mut self, command: Command) {
        let id = command.id();
        match self.editor.dispatch_command(command) {
            Ok(true) => self.status.clear(),
            Ok(false) => self.status = format!("{id:?}: nothing to do"),
            Err(e) => {
                log::error!("{id:?} failed: {e}");
                self.status = format!("Error: {e}");
            }
        }
    }

    /// Returns `false` when the user asked to quit.
    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);
        match key.code {
            KeyCode::Esc => return Ok(false),
            KeyCode::Char('q') if ctrl => return Ok(false),
            KeyCode::Char('s') if ctrl => {
                if let Err(e) = self.save() {
                    log::error!("save failed: {e:#}");
                    self.status = format!("Save failed: {e}");
                }
            }
            KeyCode::Char('z') if ctrl => self.dispatch(Command::Undo),
            KeyCode::Char('y') if ctrl => self.dispatch(Command::Redo),
            KeyCode::Char('a') if ctrl => self.dispatch(Command::SelectAll),
            KeyCode::Char('b') if ctrl => self.dispatch(Command::FormatText(TextFormat::BOLD)),
            KeyCode::Char('i') if ctrl => self.dispatch(Command::FormatText(TextFormat::ITALIC)),
            KeyCode::Char('u') if ctrl => {
                self.dispatch(Command::FormatText(TextFormat::UNDERLINE))
            }
            KeyCode::Char(c) if !ctrl => self.dispatch(Command::InsertText(c.to_string())),
            KeyCode::Enter if shift => self.dispatch(Command::InsertLineBreak),
            KeyCode::Enter => self.dispatch(Command::InsertParagraph),
            KeyCode::Backspace => self.dispatch(Command::DeleteCharacter { backward: true }),
            KeyCode::Delete => self.dispatch(Command::DeleteCharacter { backward: false }),
            KeyCode::Tab => self.dispatch(Command::Indent),
            KeyCode::BackTab => self.dispatch(Command::Outdent),
            KeyCode::Left => self.dispatch(Command::MoveCaret {
                backward: true,
                extend: shift,
            }),
            KeyCode::Right => self.dispatch(Command::MoveCaret {
                backward: false,
                extend: shift,
            }),
            _ => {}
        }
        Ok(true)
    }
}

/// Caret position after the last leaf of the document.
fn end_of_document(snapshot: &Snapshot) -> Point {
    let Some(last) = snapshot.last_descendant(NodeKey::ROOT) else {
        return Point::element(NodeKey::ROOT, 0);
    };
    match snapshot.get(last) {
        Some(node) if node.is_text() => Point::text(last, node.text().map_or(0, |t| t.len())),
        Some(node) if node.is_element() => Point::element(last, 0),
        Some(node) => {
            let parent = node.parent().unwrap_or(NodeKey::ROOT);
            let index = snapshot.index_in_parent(last).map_or(0, |i| i + 1);
            Point::element(parent, index)
        }
        None => Point::element(NodeKey::ROOT, 0),
    }
}

fn init_logging() -> Result<PathBuf> {
    let log_path = env::temp_dir().join("folio.log");
    let file = File::create(&log_path)?;
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(log_path)
}

fn main() -> Result<()> {
    // The terminal is ours, so logs go to a file
    let log_path = init_logging()?;
    log::info!("folio starting up, logging to {}", log_path.display());

    let args: Vec<String> = env::args().collect();
    let config_path = Config::config_path();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: Failed to load config file: {e}");
            process::exit(1);
        }
    };

    let path = match (args.len(), &config) {
        (2, Some(config)) => config.document_path(&args[1]),
        (2, None) => PathBuf::from(&args[1]),
        (1, Some(config)) => config.document_path(DEFAULT_DOCUMENT),
        (1, None) => {
            eprintln!("Error: No document provided and no config file found");
            eprintln!("Usage: {} <document.json>", args[0]);
            eprintln!("Or create a config file at {}", config_path.display());
            process::exit(1);
        }
        _ => {
            eprintln!("Usage: {} [document.json]", args[0]);
            process::exit(1);
        }
    };
    let editor_config = config.map(|c| c.editor).unwrap_or_default();

    let mut app = match App::open(path.clone(), editor_config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: Could not open '{}': {e}", path.display());
            process::exit(1);
        }
    };

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            let keep_going = app.handle_key(key)?;
            app.settle();
            if !keep_going {
                return Ok(());
            }
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Min(0), Constraint::Length(2)].as_ref())
        .split(f.area());

    let rendered = render::render_snapshot(app.editor.snapshot());
    let visible = chunks[0].height.saturating_sub(2) as usize;
    let scroll = rendered
        .caret_line
        .map_or(0, |line| line.saturating_sub(visible.saturating_sub(1)));

    let modified = if app.is_modified() { " [+]" } else { "" };
    let title = format!("{}{}", app.path.display(), modified);
    let content = Paragraph::new(rendered.lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .scroll((u16::try_from(scroll).unwrap_or(u16::MAX), 0));
    f.render_widget(content, chunks[0]);

    let history = format!(
        "undo: {} | redo: {}",
        app.history.undo_depth(),
        if app.history.can_redo() { "yes" } else { "no" }
    );
    let help_text = Line::from(vec![
        Span::raw("Esc: Quit | "),
        Span::raw("^S: Save | "),
        Span::raw("^Z/^Y: Undo/Redo | "),
        Span::raw("^B/^I/^U: Format | "),
        Span::raw("Tab/S-Tab: Indent | "),
        Span::styled(history, Style::default().fg(Color::DarkGray)),
    ]);
    let status = Line::from(Span::styled(
        app.status.clone(),
        Style::default().fg(Color::Yellow),
    ));

    f.render_widget(Paragraph::new(vec![status, help_text]), chunks[1]);
}
