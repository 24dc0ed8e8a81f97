use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use std::io;
use std::time::{Duration, Instant};

use crate::editor::{CommandOutcome, EditorCommand, FragmentSelector, PlanEditor};
use crate::highlight::Highlighter;
use crate::plan::Plan;
use crate::{EntryId, EntryState, FragmentId};

/// How the editing session ended.
#[derive(Debug)]
pub enum EditorExit {
    Execute(Plan),
    Quit,
}

/// Text being typed at the bottom of the screen.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Command(String),
    Rename(EntryId, String),
    NewEntry(String),
    MoveTo(FragmentId, EntryId, String),
}

impl Input {
    fn buffer(&mut self) -> &mut String {
        match self {
            Input::Command(s) | Input::Rename(_, s) | Input::NewEntry(s) | Input::MoveTo(_, _, s) => s,
        }
    }

    fn prompt(&self) -> String {
        match self {
            Input::Command(s) => format!(":{}", s),
            Input::Rename(id, s) => format!("Rename commit {}: {}", id, s),
            Input::NewEntry(s) => format!("New commit message: {}", s),
            Input::MoveTo(frag, from, s) => format!("Move {} from commit {} to commit: {}", frag, from, s),
        }
    }
}

/// State of the plan editor screen.
pub struct App {
    editor: PlanEditor,
    highlighter: Highlighter,
    selected_entry: usize,
    selected_fragment: usize,
    scroll_offset: u16,
    show_help: bool,
    confirm_discard: Option<EntryId>,
    input: Option<Input>,
    status_message: Option<(String, Instant)>,
    exit: Option<EditorExit>,
}

impl App {
    pub fn new(editor: PlanEditor, highlighter: Highlighter) -> Self {
        Self {
            editor,
            highlighter,
            selected_entry: 0,
            selected_fragment: 0,
            scroll_offset: 0,
            show_help: false,
            confirm_discard: None,
            input: None,
            status_message: None,
            exit: None,
        }
    }

    fn plan(&self) -> &Plan {
        self.editor.plan()
    }

    fn current_entry_id(&self) -> Option<EntryId> {
        self.plan().entries().get(self.selected_entry).map(|e| e.id)
    }

    /// Fragments of the selected entry in display order (grouped by file).
    fn current_fragments(&self) -> Vec<FragmentId> {
        let Some(entry) = self.plan().entries().get(self.selected_entry) else {
            return Vec::new();
        };
        self.plan()
            .files_of(entry)
            .into_iter()
            .flat_map(|(_, fragments)| fragments.into_iter().map(|f| f.id).collect::<Vec<_>>())
            .collect()
    }

    fn current_fragment(&self) -> Option<FragmentId> {
        self.current_fragments().get(self.selected_fragment).copied()
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    fn clamp_selection(&mut self) {
        let entries = self.plan().entries().len();
        if self.selected_entry >= entries {
            self.selected_entry = entries.saturating_sub(1);
        }
        let fragments = self.current_fragments().len();
        if self.selected_fragment >= fragments {
            self.selected_fragment = fragments.saturating_sub(1);
        }
    }

    /// Run one editor command and report the result in the status bar.
    fn run_command(&mut self, command: EditorCommand) {
        match self.editor.apply(command) {
            Ok(CommandOutcome::Edited(message)) => self.set_status(message),
            Ok(CommandOutcome::Finalized(plan)) => self.exit = Some(EditorExit::Execute(plan)),
            Ok(CommandOutcome::Quit) => self.exit = Some(EditorExit::Quit),
            Err(e) => self.set_status(format!("✗ {}", e)),
        }
        self.clamp_selection();
    }

    fn handle_input(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.exit = Some(EditorExit::Quit);
            return;
        }

        if let Some(entry) = self.confirm_discard.take() {
            if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                self.run_command(EditorCommand::Discard(entry));
            } else {
                self.set_status("Discard cancelled");
            }
            return;
        }

        if self.show_help {
            self.show_help = false;
            return;
        }

        if self.input.is_some() {
            self.handle_text_input(key);
            return;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.exit = Some(EditorExit::Quit),
            KeyCode::Char('?') => self.show_help = true,
            KeyCode::Char('j') | KeyCode::Down => {
                if self.selected_entry + 1 < self.plan().entries().len() {
                    self.selected_entry += 1;
                    self.selected_fragment = 0;
                    self.scroll_offset = 0;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if self.selected_entry > 0 {
                    self.selected_entry -= 1;
                    self.selected_fragment = 0;
                    self.scroll_offset = 0;
                }
            }
            KeyCode::Tab => {
                if self.selected_fragment + 1 < self.current_fragments().len() {
                    self.selected_fragment += 1;
                    self.scroll_offset = 0;
                }
            }
            KeyCode::BackTab => {
                self.selected_fragment = self.selected_fragment.saturating_sub(1);
                self.scroll_offset = 0;
            }
            KeyCode::PageDown => self.scroll_offset = self.scroll_offset.saturating_add(10),
            KeyCode::PageUp => self.scroll_offset = self.scroll_offset.saturating_sub(10),
            KeyCode::Char('d') => {
                if let Some(id) = self.current_entry_id() {
                    self.confirm_discard = Some(id);
                }
            }
            KeyCode::Char('r') => {
                if let Some(entry) = self.plan().entries().get(self.selected_entry) {
                    self.input = Some(Input::Rename(entry.id, entry.message.clone()));
                }
            }
            KeyCode::Char('n') => self.input = Some(Input::NewEntry(String::new())),
            KeyCode::Char('m') => match (self.current_fragment(), self.current_entry_id()) {
                (Some(fragment), Some(from)) => {
                    self.input = Some(Input::MoveTo(fragment, from, String::new()));
                }
                _ => self.set_status("No fragment selected"),
            },
            KeyCode::Char(':') => self.input = Some(Input::Command(String::new())),
            KeyCode::Char('e') => self.run_command(EditorCommand::Execute),
            _ => {}
        }
    }

    fn handle_text_input(&mut self, key: KeyEvent) {
        let Some(input) = self.input.as_mut() else { return };
        match key.code {
            KeyCode::Esc => self.input = None,
            KeyCode::Backspace => {
                input.buffer().pop();
            }
            KeyCode::Char(c) => input.buffer().push(c),
            KeyCode::Enter => {
                let Some(input) = self.input.take() else { return };
                let command = match input {
                    Input::Command(line) => EditorCommand::parse(&line),
                    Input::Rename(entry, message) => Ok(EditorCommand::Rename { entry, message }),
                    Input::NewEntry(message) => Ok(EditorCommand::New(message)),
                    Input::MoveTo(fragment, from, to) => match to.trim().parse() {
                        Ok(n) => Ok(EditorCommand::Move {
                            from,
                            to: EntryId(n),
                            selector: FragmentSelector::Fragment(fragment),
                        }),
                        Err(_) => {
                            self.set_status(format!("✗ '{}' is not a commit id", to.trim()));
                            return;
                        }
                    },
                };
                match command {
                    Ok(command) => self.run_command(command),
                    Err(e) => self.set_status(format!("✗ {}", e)),
                }
            }
            _ => {}
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        let expired = self
            .status_message
            .as_ref()
            .is_some_and(|(_, time)| time.elapsed() >= Duration::from_secs(4));
        if expired {
            self.status_message = None;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(frame.area());
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(chunks[0]);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(main[1]);

        self.render_entries(frame, main[0]);
        self.render_fragments(frame, right[0]);
        self.render_preview(frame, right[1]);
        self.render_status_bar(frame, chunks[1]);

        if self.show_help {
            render_help(frame);
        }
        if let Some(entry) = self.confirm_discard {
            self.render_confirm(frame, entry);
        }
    }

    fn render_entries(&self, frame: &mut Frame, area: Rect) {
        let plan = self.plan();
        let items: Vec<ListItem> = plan
            .entries()
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let files = plan.files_of(entry).len();
                let color = match entry.state {
                    EntryState::Discarded => Color::DarkGray,
                    _ if entry.fragment_ids.is_empty() => Color::Yellow,
                    _ => Color::Reset,
                };
                let mut style = Style::default().fg(color);
                if idx == self.selected_entry {
                    style = style.add_modifier(Modifier::BOLD | Modifier::REVERSED);
                }
                let marker = if entry.state == EntryState::Discarded { " [discarded]" } else { "" };
                ListItem::new(format!(
                    "[{}] {} ({} frag, {} files){}",
                    entry.id,
                    entry.message,
                    entry.fragment_ids.len(),
                    files,
                    marker
                ))
                .style(style)
            })
            .collect();

        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Commits (j/k)"),
        );
        frame.render_widget(list, area);
    }

    fn render_fragments(&self, frame: &mut Frame, area: Rect) {
        let plan = self.plan();
        let mut lines = Vec::new();
        if let Some(entry) = plan.entries().get(self.selected_entry) {
            let mut position = 0;
            for (path, fragments) in plan.files_of(entry) {
                lines.push(Line::from(Span::styled(
                    path.display().to_string(),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                for fragment in fragments {
                    let selected = position == self.selected_fragment;
                    let style = if selected {
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    };
                    lines.push(Line::from(Span::styled(
                        format!("{} {} {}", if selected { ">" } else { " " }, fragment.id, fragment.header()),
                        style,
                    )));
                    position += 1;
                }
            }
        }
        if lines.is_empty() {
            lines.push(Line::from("No fragments"));
        }

        let paragraph = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::ALL).title("Fragments (Tab/Shift+Tab)"));
        frame.render_widget(paragraph, area);
    }

    fn render_preview(&self, frame: &mut Frame, area: Rect) {
        let fragment = self.current_fragment().and_then(|id| self.plan().fragment(id));
        let (title, text) = match fragment {
            Some(fragment) => (
                format!("{} {}", fragment.id, fragment.file_path.display()),
                Text::from(self.highlighter.fragment_lines(fragment)),
            ),
            None => ("Preview".to_string(), Text::from("Nothing selected")),
        };
        let paragraph = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false })
            .scroll((self.scroll_offset, 0));
        frame.render_widget(paragraph, area);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let text = if let Some(input) = &self.input {
            input.prompt()
        } else if let Some((message, _)) = &self.status_message {
            message.clone()
        } else {
            let unassigned = self.plan().unassigned().count();
            format!(
                "{} unassigned | d=discard n=new r=rename m=move :=command e=execute ?=help q=quit",
                unassigned
            )
        };
        let paragraph = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_confirm(&self, frame: &mut Frame, entry: EntryId) {
        let message = match self.plan().entry(entry) {
            Some(e) => format!(
                "Discard commit {} ({})?\nIts {} fragment(s) will not be applied in this run.\n\n(y)es / (n)o",
                e.id,
                e.message,
                e.fragment_ids.len()
            ),
            None => return,
        };
        let paragraph = Paragraph::new(message)
            .block(Block::default().borders(Borders::ALL).title("Confirm"))
            .wrap(Wrap { trim: false })
            .style(Style::default().fg(Color::Yellow));
        let area = centered_rect(50, 30, frame.area());
        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

fn render_help(frame: &mut Frame) {
    let help_text = [
        "git-split - Plan Editor",
        "",
        "Navigation:",
        "  j / k         - Next / previous commit",
        "  Tab           - Next fragment",
        "  Shift+Tab     - Previous fragment",
        "  PgDn / PgUp   - Scroll preview",
        "",
        "Editing:",
        "  d             - Discard commit (asks first)",
        "  n             - New empty commit",
        "  r             - Rename commit",
        "  m             - Move selected fragment to another commit",
        "  :             - Command line:",
        "                    m <from> <to> <file|#fragment>",
        "                    r <id> <message>   d <id>   n <message>",
        "",
        "  e             - Execute the plan",
        "  q / Esc       - Quit without executing",
        "",
        "Press any key to close this help",
    ];
    let text = Text::from(help_text.iter().map(|&s| Line::from(s)).collect::<Vec<_>>());
    let paragraph = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: false });
    let area = centered_rect(60, 80, frame.area());
    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;
    Terminal::new(CrosstermBackend::new(stdout)).context("Failed to create terminal")
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}

/// Run the interactive plan editor until the user executes or quits.
pub fn run_editor(editor: PlanEditor, highlighter: Highlighter) -> Result<EditorExit> {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    let mut app = App::new(editor, highlighter);
    let mut terminal = setup_terminal()?;

    let result = (|| -> Result<EditorExit> {
        loop {
            terminal
                .draw(|f| app.render(f))
                .context("Failed to draw frame")?;

            if let Some(exit) = app.exit.take() {
                return Ok(exit);
            }
            if crate::interrupt::interrupted() {
                return Ok(EditorExit::Quit);
            }

            if event::poll(Duration::from_millis(200)).context("Failed to poll events")?
                && let Event::Key(key) = event::read().context("Failed to read event")?
                && key.kind == event::KeyEventKind::Press
            {
                app.handle_input(key);
            }
        }
    })();

    restore_terminal(&mut terminal)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::DEFAULT_THEME;
    use crate::parser::parse_diff;
    use crate::plan::build_plan;
    use crate::{Goal, GoalId};

    const DIFF: &str = "diff --git a/a.rs b/a.rs
--- a/a.rs
+++ b/a.rs
@@ -1 +1 @@
-a
+A
@@ -9 +9 @@
-i
+I
diff --git a/b.md b/b.md
--- a/b.md
+++ b/b.md
@@ -1 +1 @@
-b
+B
";

    fn app() -> App {
        let goals = vec![
            Goal { id: GoalId(1), title: "Code".into(), description: String::new() },
            Goal { id: GoalId(2), title: "Docs".into(), description: String::new() },
        ];
        let assignment = [
            (FragmentId(1), GoalId(1)),
            (FragmentId(2), GoalId(1)),
            (FragmentId(3), GoalId(2)),
        ];
        let plan = build_plan(parse_diff(DIFF), &goals, &assignment).unwrap();
        App::new(PlanEditor::new(plan), Highlighter::with_theme(DEFAULT_THEME).0)
    }

    fn press(app: &mut App, code: KeyCode) {
        app.handle_input(KeyEvent::new(code, KeyModifiers::NONE));
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[test]
    fn discard_needs_confirmation() {
        let mut app = app();
        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('n'));
        assert!(app.plan().entry(EntryId(1)).unwrap().is_live());

        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('y'));
        assert!(!app.plan().entry(EntryId(1)).unwrap().is_live());
    }

    #[test]
    fn move_key_moves_the_selected_fragment() {
        let mut app = app();
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.current_fragment(), Some(FragmentId(2)));
        press(&mut app, KeyCode::Char('m'));
        type_text(&mut app, "2");
        press(&mut app, KeyCode::Enter);
        let docs: Vec<_> = app.plan().entry(EntryId(2)).unwrap().fragment_ids.iter().copied().collect();
        assert_eq!(docs, vec![FragmentId(2), FragmentId(3)]);
        assert_eq!(app.current_fragments(), vec![FragmentId(1)]);
    }

    #[test]
    fn command_line_errors_keep_the_session_open() {
        let mut app = app();
        press(&mut app, KeyCode::Char(':'));
        type_text(&mut app, "m 1 2 missing.rs");
        press(&mut app, KeyCode::Enter);
        assert!(app.exit.is_none());
        let status = app.status_message.as_ref().map(|(m, _)| m.clone()).unwrap();
        assert!(status.contains("not found"));
    }

    #[test]
    fn new_and_rename_through_prompts() {
        let mut app = app();
        press(&mut app, KeyCode::Char('n'));
        type_text(&mut app, "Tests");
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.plan().entries().len(), 3);

        press(&mut app, KeyCode::Char('r'));
        for _ in 0.."Code".len() {
            press(&mut app, KeyCode::Backspace);
        }
        type_text(&mut app, "Core");
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.plan().entry(EntryId(1)).unwrap().message, "Core");
    }

    #[test]
    fn execute_finalizes_and_quit_does_not() {
        let mut app = app();
        press(&mut app, KeyCode::Char('e'));
        assert!(matches!(app.exit, Some(EditorExit::Execute(ref plan)) if plan.is_finalized()));

        let mut app = self::app();
        press(&mut app, KeyCode::Char('q'));
        assert!(matches!(app.exit, Some(EditorExit::Quit)));
    }
}
