//! Presentation layer - terminal setup, key mapping, and the control loop

mod view;

pub use view::{render, PROMPT};

use crate::app::App;
use crate::ops::InputOp;
use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::time::Duration;

/// Raw-mode terminal guard, restored on drop
pub struct Tui {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl Tui {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self { terminal })
    }

    pub fn terminal(&mut self) -> &mut Terminal<CrosstermBackend<io::Stdout>> {
        &mut self.terminal
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
        let _ = self.terminal.show_cursor();
    }
}

/// Translate one key event into an input operation.
///
/// `in_search` switches to the search-buffer bindings; `pending_completion`
/// makes bare digits select from the retained match list.
pub fn map_key(key: KeyEvent, in_search: bool, pending_completion: bool) -> Option<InputOp> {
    if in_search {
        return match key.code {
            KeyCode::Esc => Some(InputOp::SearchCancel),
            KeyCode::Enter => Some(InputOp::SearchSubmit),
            KeyCode::Backspace => Some(InputOp::SearchBackspace),
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(InputOp::SearchInput(c.to_string()))
            }
            _ => None,
        };
    }

    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);

    match key.code {
        KeyCode::Char(c) if ctrl => match c.to_ascii_lowercase() {
            't' if shift => Some(InputOp::NewTab),
            'w' if shift => Some(InputOp::CloseTab),
            'a' => Some(InputOp::MoveCursorHome),
            'e' => Some(InputOp::MoveCursorEnd),
            'r' => Some(InputOp::EnterSearchMode),
            'c' => Some(InputOp::Interrupt),
            'z' => Some(InputOp::Suspend),
            _ => None,
        },
        KeyCode::Tab if ctrl => Some(InputOp::NextTab),
        KeyCode::BackTab if ctrl => Some(InputOp::PrevTab),
        KeyCode::Tab => Some(InputOp::RequestCompletion),
        KeyCode::Enter => Some(InputOp::SubmitLine),
        KeyCode::Backspace => Some(InputOp::Backspace),
        KeyCode::Home => Some(InputOp::MoveCursorHome),
        KeyCode::End => Some(InputOp::MoveCursorEnd),
        KeyCode::Up => Some(InputOp::ScrollUp),
        KeyCode::Down => Some(InputOp::ScrollDown),
        KeyCode::Char(c) => {
            if pending_completion && c.is_ascii_digit() {
                Some(InputOp::SelectCompletion(c as u8 - b'0'))
            } else {
                Some(InputOp::InsertText(c.to_string()))
            }
        }
        _ => None,
    }
}

/// Drive the app until it quits: drain pipes, draw, then translate input
/// events for up to one short poll interval per iteration.
pub fn run(app: &mut App) -> Result<()> {
    let mut tui = Tui::new()?;

    while !app.should_quit() {
        app.poll_io()?;
        tui.terminal().draw(|f| render(f, app))?;

        while event::poll(Duration::from_millis(20))? {
            match event::read()? {
                Event::Key(key) if key.kind != KeyEventKind::Release => {
                    let op = map_key(key, app.in_search_mode(), app.has_pending_completion());
                    if let Some(op) = op {
                        app.apply(op);
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::ScrollUp => app.apply(InputOp::ScrollUp),
                    MouseEventKind::ScrollDown => app.apply(InputOp::ScrollDown),
                    _ => {}
                },
                _ => {}
            }
        }
    }
    Ok(())
}
