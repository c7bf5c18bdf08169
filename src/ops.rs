//! Contracts between the engine and the presentation layer
//!
//! The terminal frontend translates key and mouse events into [`InputOp`]s
//! and draws whatever [`RenderModel`] the engine hands back. Nothing else
//! crosses the boundary, so the engine is testable without a terminal.

/// An operation requested by the user, already decoded from raw input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOp {
    /// Printable text typed at the cursor
    InsertText(String),
    Backspace,
    MoveCursorHome,
    MoveCursorEnd,
    SubmitLine,
    /// Tab key: complete the filename prefix before the cursor
    RequestCompletion,
    /// Digit pressed while a completion list is pending
    SelectCompletion(u8),
    ScrollUp,
    ScrollDown,
    NewTab,
    CloseTab,
    NextTab,
    PrevTab,
    EnterSearchMode,
    SearchInput(String),
    SearchBackspace,
    SearchSubmit,
    SearchCancel,
    /// Ctrl-C: cancel the foreground job or multiwatch group
    Interrupt,
    /// Ctrl-Z: detach the foreground job
    Suspend,
    Quit,
}

/// One visible scrollback line with its rendering hint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderLine {
    pub text: String,
    /// Echoed command lines are drawn with the prompt prefix
    pub is_command: bool,
}

/// Everything the frontend needs to draw one frame of the active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderModel {
    /// Already windowed by scroll offset and viewport height, oldest first
    pub lines: Vec<RenderLine>,
    /// Current input line text
    pub input: String,
    /// Cursor column within the input line, in characters
    pub cursor: usize,
    /// Active search buffer and its cursor column, when in search mode
    pub search: Option<(String, usize)>,
    /// 1-based index of the active tab
    pub active_tab: usize,
    pub tab_count: usize,
}
