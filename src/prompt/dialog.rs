//! Dialog-box prompts drawn with ratatui.
//!
//! Each prompt is a small key-driven state machine (`ConfirmState`,
//! `InputState`, `MenuState`, `ChecklistState`) plus a render function. The
//! state machines are pure and tested directly; `DialogPrompter` only loops
//! draw -> read key -> update until a state reports `Done` or `Cancel`.
//!
//! On a real terminal every prompt enters raw mode and the alternate screen and
//! leaves both when it returns, so command output between prompts lands on the
//! normal screen.

use std::collections::{BTreeSet, VecDeque};
use std::io::{self, Stdout};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::{
    Frame, Terminal,
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

use super::Prompter;
use crate::error::{Result, SetupError};
use crate::theme::Styles;

/// Result of feeding one key to a prompt state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow<T> {
    Continue,
    Done(T),
    Cancel,
}

fn is_cancel(key: &KeyEvent) -> bool {
    key.code == KeyCode::Esc || is_interrupt(key)
}

fn is_interrupt(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

// ============================================================================
// Prompt states
// ============================================================================

/// Yes/No buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmState {
    pub yes: bool,
}

impl ConfirmState {
    pub fn new(default: bool) -> Self {
        Self { yes: default }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow<bool> {
        if is_cancel(&key) {
            return Flow::Cancel;
        }
        match key.code {
            KeyCode::Left | KeyCode::Right | KeyCode::Tab | KeyCode::BackTab => {
                self.yes = !self.yes;
                Flow::Continue
            }
            KeyCode::Char('y') | KeyCode::Char('Y') => Flow::Done(true),
            KeyCode::Char('n') | KeyCode::Char('N') => Flow::Done(false),
            KeyCode::Enter => Flow::Done(self.yes),
            _ => Flow::Continue,
        }
    }
}

/// Single-line text field, optionally masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputState {
    pub value: String,
    pub masked: bool,
}

impl InputState {
    pub fn new(initial: &str, masked: bool) -> Self {
        Self {
            value: initial.to_string(),
            masked,
        }
    }

    /// What the field shows on screen.
    pub fn display(&self) -> String {
        if self.masked {
            "*".repeat(self.value.chars().count())
        } else {
            self.value.clone()
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow<String> {
        if is_cancel(&key) {
            return Flow::Cancel;
        }
        match key.code {
            KeyCode::Enter => return Flow::Done(self.value.clone()),
            KeyCode::Backspace => {
                self.value.pop();
            }
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => self.value.clear(),
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => self.value.push(c),
            _ => {}
        }
        Flow::Continue
    }
}

/// Single-selection menu. Up/Down wrap around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuState {
    pub selected: usize,
    len: usize,
}

impl MenuState {
    pub fn new(len: usize, selected: usize) -> Self {
        Self {
            selected: selected.min(len.saturating_sub(1)),
            len,
        }
    }

    fn up(&mut self) {
        if self.len > 0 {
            self.selected = (self.selected + self.len - 1) % self.len;
        }
    }

    fn down(&mut self) {
        if self.len > 0 {
            self.selected = (self.selected + 1) % self.len;
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow<usize> {
        if is_cancel(&key) {
            return Flow::Cancel;
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.up(),
            KeyCode::Down | KeyCode::Char('j') => self.down(),
            KeyCode::Home => self.selected = 0,
            KeyCode::End => self.selected = self.len.saturating_sub(1),
            KeyCode::Char(c) if c.is_ascii_digit() => {
                let n = c.to_digit(10).unwrap_or(0) as usize;
                if (1..=self.len).contains(&n) {
                    self.selected = n - 1;
                }
            }
            KeyCode::Enter => return Flow::Done(self.selected),
            _ => {}
        }
        Flow::Continue
    }
}

/// Multi-selection list. Space toggles the row under the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistState {
    pub cursor: MenuState,
    pub checked: BTreeSet<usize>,
}

impl ChecklistState {
    pub fn new(len: usize, checked: BTreeSet<usize>) -> Self {
        Self {
            cursor: MenuState::new(len, 0),
            checked,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow<BTreeSet<usize>> {
        if is_cancel(&key) {
            return Flow::Cancel;
        }
        match key.code {
            KeyCode::Char(' ') => {
                let row = self.cursor.selected;
                if !self.checked.remove(&row) && row < self.cursor.len {
                    self.checked.insert(row);
                }
                Flow::Continue
            }
            KeyCode::Enter => Flow::Done(self.checked.clone()),
            _ => {
                // Navigation only; Enter is handled above
                let _ = self.cursor.handle_key(key);
                Flow::Continue
            }
        }
    }
}

// ============================================================================
// Key sources
// ============================================================================

/// Where dialog key presses come from.
pub trait KeySource {
    fn next_key(&mut self) -> Result<KeyEvent>;
}

/// Key presses from the real terminal.
#[derive(Debug, Default)]
pub struct CrosstermKeys;

impl KeySource for CrosstermKeys {
    fn next_key(&mut self) -> Result<KeyEvent> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(key);
                }
            }
        }
    }
}

/// A fixed sequence of key presses.
#[derive(Debug, Default)]
pub struct ScriptedKeys(VecDeque<KeyEvent>);

impl ScriptedKeys {
    pub fn new(keys: impl IntoIterator<Item = KeyCode>) -> Self {
        Self(
            keys.into_iter()
                .map(|code| KeyEvent::new(code, KeyModifiers::NONE))
                .collect(),
        )
    }
}

impl KeySource for ScriptedKeys {
    fn next_key(&mut self) -> Result<KeyEvent> {
        self.0
            .pop_front()
            .ok_or_else(|| SetupError::terminal("no more scripted keys"))
    }
}

// ============================================================================
// Screen session
// ============================================================================

/// Raw mode + alternate screen for the duration of one prompt.
struct ScreenSession;

impl ScreenSession {
    fn enter() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for ScreenSession {
    fn drop(&mut self) {
        let _ = crossterm::execute!(io::stdout(), LeaveAlternateScreen);
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect::new(area.x + (area.width - w) / 2, area.y + (area.height - h) / 2, w, h)
}

fn dialog_block(danger: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" archgamer ", Styles::title()))
        .style(Styles::frame(danger))
}

/// Draw the frame and split its inside into prompt, body and hint rows.
fn dialog_layout(f: &mut Frame, height: u16, body: u16, danger: bool) -> [Rect; 3] {
    let area = popup_area(f.area(), 72, height);
    f.render_widget(Clear, area);
    let block = dialog_block(danger);
    let inner = block.inner(area);
    f.render_widget(block, area);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(body), Constraint::Length(1)])
        .split(inner);
    [rows[0], rows[1], rows[2]]
}

fn prompt_paragraph(prompt: &str) -> Paragraph<'_> {
    Paragraph::new(prompt)
        .style(Styles::text())
        .wrap(Wrap { trim: true })
}

fn draw_confirm(f: &mut Frame, prompt: &str, state: &ConfirmState, danger: bool) {
    let [text, body, hint] = dialog_layout(f, 9, 1, danger);
    f.render_widget(prompt_paragraph(prompt), text);

    let button = |label: &'static str, active: bool| {
        Span::styled(label, if active { Styles::selected() } else { Styles::text() })
    };
    let buttons = Line::from(vec![
        button("  < Yes >  ", state.yes),
        Span::raw("    "),
        button("  < No >  ", !state.yes),
    ])
    .centered();
    f.render_widget(Paragraph::new(buttons), body);
    f.render_widget(
        Paragraph::new("←/→ switch · y/n answer · Enter confirm · Esc cancel").style(Styles::hint()),
        hint,
    );
}

fn draw_input(f: &mut Frame, prompt: &str, state: &InputState) {
    let [text, body, hint] = dialog_layout(f, 9, 1, false);
    f.render_widget(prompt_paragraph(prompt), text);
    let field = Line::from(vec![
        Span::styled("> ", Styles::title()),
        Span::styled(state.display(), Styles::text()),
        Span::styled("_", Styles::hint()),
    ]);
    f.render_widget(Paragraph::new(field), body);
    f.render_widget(
        Paragraph::new("Enter accept · Ctrl+U clear · Esc cancel").style(Styles::hint()),
        hint,
    );
}

fn draw_list(f: &mut Frame, prompt: &str, options: &[String], cursor: usize, checked: Option<&BTreeSet<usize>>) {
    let rows = options.len().min(14) as u16;
    let [text, body, hint] = dialog_layout(f, rows + 7, rows, false);
    f.render_widget(prompt_paragraph(prompt), text);

    let items: Vec<ListItem> = options
        .iter()
        .enumerate()
        .map(|(i, option)| {
            let label = match checked {
                Some(set) if set.contains(&i) => format!("[x] {}", option),
                Some(_) => format!("[ ] {}", option),
                None => option.clone(),
            };
            ListItem::new(label)
        })
        .collect();
    let list = List::new(items)
        .style(Styles::text())
        .highlight_style(Styles::selected())
        .highlight_symbol("> ");
    let mut list_state = ListState::default().with_selected(Some(cursor));
    f.render_stateful_widget(list, body, &mut list_state);

    let keys = if checked.is_some() {
        "↑/↓ move · Space toggle · Enter accept · Esc cancel"
    } else {
        "↑/↓ move · Enter select · Esc cancel"
    };
    f.render_widget(Paragraph::new(keys).style(Styles::hint()), hint);
}

fn draw_notice(f: &mut Frame, message: &str) {
    let [text, _, hint] = dialog_layout(f, 8, 0, false);
    f.render_widget(
        Paragraph::new(message)
            .style(Styles::notice())
            .wrap(Wrap { trim: true }),
        text,
    );
    f.render_widget(Paragraph::new("Press any key").style(Styles::hint()), hint);
}

// ============================================================================
// Prompter
// ============================================================================

/// Prompter that shows dialog boxes.
pub struct DialogPrompter<B: Backend, K: KeySource> {
    terminal: Terminal<B>,
    keys: K,
    manage_screen: bool,
}

impl DialogPrompter<CrosstermBackend<Stdout>, CrosstermKeys> {
    /// Dialogs on the controlling terminal.
    pub fn stdout() -> Result<Self> {
        let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
        Ok(Self {
            terminal,
            keys: CrosstermKeys,
            manage_screen: true,
        })
    }
}

impl<B: Backend, K: KeySource> DialogPrompter<B, K> {
    /// Dialogs on an arbitrary backend; the screen mode is left alone.
    pub fn new(backend: B, keys: K) -> Result<Self> {
        Ok(Self {
            terminal: Terminal::new(backend)?,
            keys,
            manage_screen: false,
        })
    }

    pub fn terminal(&self) -> &Terminal<B> {
        &self.terminal
    }

    fn interact<S, T>(
        &mut self,
        mut state: S,
        draw: impl Fn(&mut Frame, &S),
        step: impl Fn(&mut S, KeyEvent) -> Flow<T>,
    ) -> Result<T> {
        let _screen = if self.manage_screen {
            let session = ScreenSession::enter()?;
            self.terminal.clear()?;
            Some(session)
        } else {
            None
        };
        loop {
            self.terminal.draw(|f| draw(f, &state))?;
            let key = self.keys.next_key()?;
            match step(&mut state, key) {
                Flow::Continue => {}
                Flow::Done(value) => return Ok(value),
                Flow::Cancel => {
                    log::info!("Dialog cancelled");
                    return Err(SetupError::Cancelled);
                }
            }
        }
    }
}

impl<B: Backend, K: KeySource> Prompter for DialogPrompter<B, K> {
    /// No-by-default confirmations guard destructive actions and are drawn as warnings.
    fn read_yes_no(&mut self, prompt: &str, default: bool) -> Result<bool> {
        self.interact(
            ConfirmState::new(default),
            |f, s| draw_confirm(f, prompt, s, !default),
            ConfirmState::handle_key,
        )
    }

    fn read_text(&mut self, prompt: &str, default: &str) -> Result<String> {
        let value = self.interact(
            InputState::new(default, false),
            |f, s| draw_input(f, prompt, s),
            InputState::handle_key,
        )?;
        let value = value.trim();
        Ok(if value.is_empty() { default } else { value }.to_string())
    }

    fn read_secret(&mut self, prompt: &str) -> Result<String> {
        self.interact(
            InputState::new("", true),
            |f, s| draw_input(f, prompt, s),
            InputState::handle_key,
        )
    }

    fn read_choice(&mut self, prompt: &str, options: &[String], default: usize) -> Result<Option<usize>> {
        let picked = self.interact(
            MenuState::new(options.len(), default),
            |f, s| draw_list(f, prompt, options, s.selected, None),
            MenuState::handle_key,
        )?;
        Ok(Some(picked))
    }

    fn read_multi_choice(
        &mut self,
        prompt: &str,
        options: &[String],
        defaults: &BTreeSet<usize>,
    ) -> Result<Option<BTreeSet<usize>>> {
        let picked = self.interact(
            ChecklistState::new(options.len(), defaults.clone()),
            |f, s| draw_list(f, prompt, options, s.cursor.selected, Some(&s.checked)),
            ChecklistState::handle_key,
        )?;
        Ok(Some(picked))
    }

    fn notice(&mut self, message: &str) -> Result<()> {
        self.interact(
            (),
            |f, _| draw_notice(f, message),
            |_, key| if is_interrupt(&key) { Flow::Cancel } else { Flow::Done(()) },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn prompter(keys: impl IntoIterator<Item = KeyCode>) -> DialogPrompter<TestBackend, ScriptedKeys> {
        DialogPrompter::new(TestBackend::new(80, 24), ScriptedKeys::new(keys)).unwrap()
    }

    fn screen(p: &DialogPrompter<TestBackend, ScriptedKeys>) -> String {
        p.terminal()
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_confirm_state() {
        let mut state = ConfirmState::new(false);
        assert_eq!(state.handle_key(key(KeyCode::Right)), Flow::Continue);
        assert!(state.yes);
        assert_eq!(state.handle_key(key(KeyCode::Enter)), Flow::Done(true));
        assert_eq!(state.handle_key(key(KeyCode::Char('n'))), Flow::Done(false));
        assert_eq!(state.handle_key(key(KeyCode::Esc)), Flow::Cancel);
        assert_eq!(state.handle_key(ctrl('c')), Flow::Cancel);
    }

    #[test]
    fn test_input_state() {
        let mut state = InputState::new("ab", true);
        state.handle_key(key(KeyCode::Char('c')));
        state.handle_key(key(KeyCode::Backspace));
        state.handle_key(key(KeyCode::Char('d')));
        assert_eq!(state.display(), "***");
        assert_eq!(state.handle_key(ctrl('u')), Flow::Continue);
        assert!(state.value.is_empty());
        assert_eq!(state.handle_key(key(KeyCode::Enter)), Flow::Done(String::new()));
    }

    #[test]
    fn test_menu_wraps() {
        let mut state = MenuState::new(3, 0);
        state.handle_key(key(KeyCode::Up));
        assert_eq!(state.selected, 2);
        state.handle_key(key(KeyCode::Down));
        assert_eq!(state.selected, 0);
        state.handle_key(key(KeyCode::Char('2')));
        assert_eq!(state.handle_key(key(KeyCode::Enter)), Flow::Done(1));
        state.handle_key(key(KeyCode::Char('9')));
        assert_eq!(state.selected, 1);
    }

    #[test]
    fn test_checklist_toggle() {
        let mut state = ChecklistState::new(3, [0].into_iter().collect());
        state.handle_key(key(KeyCode::Char(' ')));
        state.handle_key(key(KeyCode::Down));
        state.handle_key(key(KeyCode::Down));
        state.handle_key(key(KeyCode::Char(' ')));
        assert_eq!(state.handle_key(key(KeyCode::Enter)), Flow::Done([2].into_iter().collect()));
    }

    #[test]
    fn test_dialog_choice() {
        let options: Vec<String> = ["kde", "gnome", "skip"].iter().map(|s| s.to_string()).collect();
        let mut p = prompter([KeyCode::Down, KeyCode::Enter]);
        assert_eq!(p.ask_choice("Desktop environment", &options, 0).unwrap(), 1);
        assert!(screen(&p).contains("Desktop environment"));
    }

    #[test]
    fn test_dialog_escape_cancels() {
        let mut p = prompter([KeyCode::Esc]);
        assert!(matches!(p.ask_yes_no("Continue?", true), Err(SetupError::Cancelled)));
    }

    #[test]
    fn test_dialog_text_default_prefilled() {
        let mut p = prompter([KeyCode::Enter]);
        assert_eq!(p.read_text("Hostname", "archgamer").unwrap(), "archgamer");
    }

    #[test]
    fn test_dialog_secret_is_masked() {
        let mut keys: Vec<KeyCode> = "hunter2".chars().map(KeyCode::Char).collect();
        keys.push(KeyCode::Enter);
        let mut p = prompter(keys);
        assert_eq!(p.read_secret("Root password").unwrap(), "hunter2");
        let shown = screen(&p);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("*******"));
    }

    #[test]
    fn test_dialog_notice_then_multi_choice() {
        let options: Vec<String> = ["steam", "lutris"].iter().map(|s| s.to_string()).collect();
        let mut p = prompter([KeyCode::Char('x'), KeyCode::Down, KeyCode::Char(' '), KeyCode::Enter]);
        p.notice("Multilib is disabled").unwrap();
        let picked = p.ask_multi_choice("Components", &options, &BTreeSet::new()).unwrap();
        assert_eq!(picked, [1].into_iter().collect());
    }
}
