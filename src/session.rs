//! Per-tab state: scrollback, input line, working directory, jobs

use crate::autocomplete::AutocompleteState;
use crate::core::multiwatch::MultiwatchGroup;
use crate::core::pipeline::{JobStatus, PipelineJob};
use crate::core::scrollback::Scrollback;
use std::path::{Path, PathBuf};

/// Scrollback lines jumped per scroll operation
pub const SCROLL_STEP: usize = 3;

/// The in-progress input line with a byte-offset cursor
#[derive(Debug, Default, Clone)]
pub struct InputLine {
    pub text: String,
    pub cursor: usize,
}

impl InputLine {
    /// Insert text at the cursor, advancing it
    pub fn insert_str(&mut self, s: &str) {
        self.text.insert_str(self.cursor, s);
        self.cursor += s.len();
    }

    /// Remove the character before the cursor. Returns false at line start.
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let mut start = self.cursor - 1;
        while !self.text.is_char_boundary(start) {
            start -= 1;
        }
        self.text.replace_range(start..self.cursor, "");
        self.cursor = start;
        true
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.text.len();
    }

    /// Replace a byte range with `replacement`, leaving the cursor just
    /// past it. Text after the range is preserved.
    pub fn splice(&mut self, start: usize, end: usize, replacement: &str) {
        self.text.replace_range(start..end, replacement);
        self.cursor = start + replacement.len();
    }

    /// Take the line, leaving it empty with the cursor reset
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    /// Cursor position in characters, for rendering
    pub fn cursor_col(&self) -> usize {
        self.text[..self.cursor].chars().count()
    }
}

/// One independent shell context (a "tab")
pub struct Session {
    pub label: String,
    pub cwd: PathBuf,
    pub scrollback: Scrollback,
    pub input: InputLine,
    /// Lines scrolled back from the bottom; 0 means pinned to newest output
    pub scroll_offset: usize,
    pub job: Option<PipelineJob>,
    pub watch: Option<MultiwatchGroup>,
    pub autocomplete: Option<AutocompleteState>,
}

impl Session {
    pub fn new(number: usize, cwd: PathBuf, scrollback_lines: usize) -> Self {
        let label = format!("Tab {}", number);
        let mut scrollback = Scrollback::new(scrollback_lines);
        scrollback.push(label.clone());
        Self {
            label,
            cwd,
            scrollback,
            input: InputLine::default(),
            scroll_offset: 0,
            job: None,
            watch: None,
            autocomplete: None,
        }
    }

    /// Pin the view to the newest output
    pub fn pin_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    pub fn scroll_up(&mut self) {
        // Clamped again against the viewport at render time
        self.scroll_offset = self
            .scroll_offset
            .saturating_add(SCROLL_STEP)
            .min(self.scrollback.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(SCROLL_STEP);
    }

    /// Change the working directory, resolving relative paths against the
    /// current one. On failure the directory is left unchanged and the OS
    /// error text is returned.
    pub fn change_dir(&mut self, path: &Path) -> Result<(), String> {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        };
        match candidate.canonicalize() {
            Ok(resolved) if resolved.is_dir() => {
                self.cwd = resolved;
                Ok(())
            }
            Ok(_) => Err("Not a directory".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Reset the scrollback to the single tab-label line
    pub fn clear(&mut self) {
        self.scrollback.reset(self.label.clone());
        self.scroll_offset = 0;
    }

    /// Drain the foreground job's available output; drops the job once its
    /// output stream ends.
    pub fn pump_job(&mut self) {
        if let Some(job) = self.job.as_mut() {
            if job.pump(&mut self.scrollback) == JobStatus::Finished {
                log::debug!("job pgid={} finished", job.pgid());
                self.job = None;
            }
            self.pin_bottom();
        }
    }

    /// Drain one multiwatch worker; reaps the whole group once every
    /// worker's stream has closed.
    pub fn pump_watch(&mut self, worker: usize) {
        if let Some(group) = self.watch.as_mut() {
            group.pump_worker(worker, &mut self.scrollback);
            if group.all_closed() {
                group.reap();
                self.watch = None;
            }
            self.pin_bottom();
        }
    }

    /// Best-effort teardown on tab close: kill and wait for the job's whole
    /// process group and every multiwatch supervisor.
    pub fn shutdown(&mut self) {
        if let Some(job) = self.job.take() {
            job.terminate();
        }
        if let Some(mut group) = self.watch.take() {
            group.cancel();
        }
        self.autocomplete = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
