//! Colors and styles for the dialog prompts.
//!
//! Kept in one place so every dialog box looks the same.

use ratatui::style::{Color, Modifier, Style};

pub struct Colors;

impl Colors {
    /// Dialog background
    pub const BG_PRIMARY: Color = Color::Rgb(20, 20, 30);

    /// Background of dialogs that guard destructive actions
    pub const BG_DANGER: Color = Color::Rgb(30, 20, 20);

    pub const FG_PRIMARY: Color = Color::White;
    pub const FG_MUTED: Color = Color::DarkGray;

    /// Borders and titles
    pub const PRIMARY: Color = Color::Cyan;

    pub const WARNING: Color = Color::Yellow;
    pub const ERROR: Color = Color::Red;

    /// Highlighted row or button
    pub const SELECTED_BG: Color = Color::Yellow;
    /// Text on the highlight (contrast on yellow)
    pub const SELECTED_FG: Color = Color::Black;
}

pub struct Styles;

impl Styles {
    pub fn text() -> Style {
        Style::default().fg(Colors::FG_PRIMARY)
    }

    pub fn hint() -> Style {
        Style::default().fg(Colors::FG_MUTED)
    }

    pub fn title() -> Style {
        Style::default()
            .fg(Colors::PRIMARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn selected() -> Style {
        Style::default()
            .fg(Colors::SELECTED_FG)
            .bg(Colors::SELECTED_BG)
            .add_modifier(Modifier::BOLD)
    }

    /// Dialog frame; `danger` for prompts in front of destructive actions
    pub fn frame(danger: bool) -> Style {
        if danger {
            Style::default().fg(Colors::ERROR).bg(Colors::BG_DANGER)
        } else {
            Style::default().fg(Colors::PRIMARY).bg(Colors::BG_PRIMARY)
        }
    }

    pub fn notice() -> Style {
        Style::default().fg(Colors::WARNING)
    }
}
