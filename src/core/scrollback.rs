//! Bounded scrollback ring and line reassembly for raw process output

use std::collections::VecDeque;

/// Default number of retained scrollback lines per session
pub const DEFAULT_SCROLLBACK_LINES: usize = 1000;

/// Longest line the assembler will buffer before force-flushing
pub const MAX_LINE_LEN: usize = 4096;

/// One displayed line: program output or an echoed user command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollbackLine {
    pub text: String,
    /// True when this line echoes a submitted command (rendered with a prompt)
    pub is_command: bool,
}

/// Append-only line log with FIFO eviction at a fixed capacity
#[derive(Debug)]
pub struct Scrollback {
    lines: VecDeque<ScrollbackLine>,
    capacity: usize,
}

impl Scrollback {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_SCROLLBACK_LINES)),
            capacity: capacity.max(1),
        }
    }

    /// Append a program/system output line, evicting the oldest at capacity
    pub fn push(&mut self, text: impl Into<String>) {
        self.push_line(ScrollbackLine {
            text: text.into(),
            is_command: false,
        });
    }

    /// Append an echoed user command line
    pub fn push_command(&mut self, text: impl Into<String>) {
        self.push_line(ScrollbackLine {
            text: text.into(),
            is_command: true,
        });
    }

    fn push_line(&mut self, line: ScrollbackLine) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Drop everything and start over with a single label line
    pub fn reset(&mut self, label: impl Into<String>) {
        self.lines.clear();
        self.push(label);
    }

    /// Rewrite the oldest retained line, used to refresh the tab label
    pub fn relabel(&mut self, label: impl Into<String>) {
        if let Some(first) = self.lines.front_mut() {
            first.text = label.into();
            first.is_command = false;
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScrollbackLine> {
        self.lines.iter()
    }

    /// Visible window for a viewport of `height` rows, `offset` lines
    /// scrolled back from the bottom. The offset is clamped so the window
    /// never runs past the oldest retained line.
    pub fn window(&self, height: usize, offset: usize) -> Vec<&ScrollbackLine> {
        let len = self.lines.len();
        let max_offset = len.saturating_sub(height);
        let offset = offset.min(max_offset);
        let end = len - offset;
        let start = end.saturating_sub(height);
        self.lines.range(start..end).collect()
    }

    /// Largest useful scroll offset for a viewport of `height` rows
    pub fn max_offset(&self, height: usize) -> usize {
        self.lines.len().saturating_sub(height)
    }
}

/// Rebuilds complete lines from arbitrarily chunked reads of one descriptor.
///
/// Carriage returns are dropped, a newline flushes the pending buffer, and a
/// buffer that reaches [`MAX_LINE_LEN`] is force-flushed so memory stays
/// bounded no matter how chatty the producer is.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw bytes, appending every completed line to `out`
    pub fn feed(&mut self, bytes: &[u8], out: &mut Scrollback) {
        for &b in bytes {
            match b {
                b'\r' => {}
                b'\n' => self.flush(out),
                _ => {
                    self.pending.push(b);
                    if self.pending.len() >= MAX_LINE_LEN {
                        self.flush(out);
                    }
                }
            }
        }
    }

    /// Flush whatever is buffered as one line (no-op when empty is flushed
    /// by a newline: an explicit newline always emits a line, even blank)
    fn flush(&mut self, out: &mut Scrollback) {
        out.push(String::from_utf8_lossy(&self.pending).into_owned());
        self.pending.clear();
    }

    /// Flush a partially assembled line, if any. Used at end-of-stream.
    pub fn flush_partial(&mut self, out: &mut Scrollback) {
        if !self.pending.is_empty() {
            self.flush(out);
        }
    }
}
