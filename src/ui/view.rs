//! Frame rendering of the active session's render model

use crate::app::App;
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

/// Prompt drawn before the input line and echoed commands
pub const PROMPT: &str = "user@tabsh> ";

const SEARCH_PROMPT: &str = "Enter search term: ";

pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // tab bar
            Constraint::Min(1),    // scrollback
            Constraint::Length(1), // input line
        ])
        .split(f.area());

    let height = chunks[1].height as usize;
    let model = app.render_model(height);

    let header = Line::from(vec![
        Span::styled(
            " tabsh ",
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" [Tab {}/{}]", model.active_tab, model.tab_count)),
    ]);
    f.render_widget(Paragraph::new(header), chunks[0]);

    let lines: Vec<Line> = model
        .lines
        .iter()
        .map(|l| {
            if l.is_command {
                Line::from(vec![
                    Span::styled(PROMPT, Style::default().fg(Color::Green)),
                    Span::raw(l.text.clone()),
                ])
            } else {
                Line::from(l.text.clone())
            }
        })
        .collect();
    f.render_widget(Paragraph::new(lines), chunks[1]);

    let (prefix, text, cursor) = match &model.search {
        Some((buf, cur)) => (SEARCH_PROMPT, buf.as_str(), *cur),
        None => (PROMPT, model.input.as_str(), model.cursor),
    };
    let input = Line::from(vec![
        Span::styled(
            prefix,
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(text.to_string()),
    ]);
    f.render_widget(Paragraph::new(input), chunks[2]);

    let col = (prefix.chars().count() + cursor) as u16;
    let x = chunks[2].x + col.min(chunks[2].width.saturating_sub(1));
    f.set_cursor_position((x, chunks[2].y));
}
