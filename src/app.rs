//! Session manager and control hub
//!
//! [`App`] owns every tab, the process-wide history store, and the search
//! buffer. The presentation layer feeds it [`InputOp`]s and draws the
//! [`RenderModel`] it exposes; between input bursts the control loop calls
//! [`App::poll_io`] to drain whatever the live pipes have produced.

use crate::autocomplete::{self, Completion};
use crate::config::Config;
use crate::core::multiwatch::{parse_watch_list, MultiwatchGroup};
use crate::core::parser::parse_line;
use crate::core::pipeline::{plan, PipelineJob};
use crate::core::poller::{poll_ready, PollSource, Source};
use crate::history::{HistoryStore, SearchResult, HISTORY_SHOW};
use crate::ops::{InputOp, RenderLine, RenderModel};
use crate::session::{InputLine, Session};
use anyhow::Result;
use nix::sys::signal::{signal, SigHandler, Signal};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct App {
    config: Config,
    sessions: Vec<Session>,
    active: usize,
    history: HistoryStore,
    /// Present while the user is typing a history search term
    search: Option<InputLine>,
    should_quit: bool,
    /// Working directory new tabs inherit
    base_cwd: PathBuf,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let base_cwd = std::env::current_dir()?;
        Self::with_base(config, base_cwd)
    }

    /// Build the app with an explicit base directory for the first tab
    pub fn with_base(config: Config, base_cwd: PathBuf) -> Result<Self> {
        // A job whose stdin pipe closes underneath a forwarded write must
        // surface EPIPE to us, not kill the whole process.
        unsafe {
            let _ = signal(Signal::SIGPIPE, SigHandler::SigIgn);
        }

        let mut history = HistoryStore::new(config.history_capacity);
        let history_path = config.history_file.clone().or_else(HistoryStore::default_path);
        if let Some(path) = history_path {
            history.load_on_startup(path)?;
        }

        let first = Session::new(1, base_cwd.clone(), config.scrollback_lines);
        Ok(Self {
            config,
            sessions: vec![first],
            active: 0,
            history,
            search: None,
            should_quit: false,
            base_cwd,
        })
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn in_search_mode(&self) -> bool {
        self.search.is_some()
    }

    /// Whether the active tab has a completion list awaiting a digit key
    pub fn has_pending_completion(&self) -> bool {
        self.sessions[self.active].autocomplete.is_some()
    }

    pub fn active_session(&self) -> &Session {
        &self.sessions[self.active]
    }

    fn active_mut(&mut self) -> &mut Session {
        &mut self.sessions[self.active]
    }

    /// Route one input operation
    pub fn apply(&mut self, op: InputOp) {
        match op {
            InputOp::InsertText(text) => self.insert_text(&text),
            InputOp::Backspace => {
                let session = self.active_mut();
                session.autocomplete = None;
                session.input.backspace();
            }
            InputOp::MoveCursorHome => self.active_mut().input.home(),
            InputOp::MoveCursorEnd => self.active_mut().input.end(),
            InputOp::SubmitLine => self.submit_line(),
            InputOp::RequestCompletion => self.request_completion(),
            InputOp::SelectCompletion(digit) => self.select_completion(digit),
            InputOp::ScrollUp => self.active_mut().scroll_up(),
            InputOp::ScrollDown => self.active_mut().scroll_down(),
            InputOp::NewTab => self.new_tab(),
            InputOp::CloseTab => self.close_tab(),
            InputOp::NextTab => self.active = (self.active + 1) % self.sessions.len(),
            InputOp::PrevTab => {
                self.active = (self.active + self.sessions.len() - 1) % self.sessions.len()
            }
            InputOp::EnterSearchMode => self.search = Some(InputLine::default()),
            InputOp::SearchInput(text) => {
                if let Some(buf) = self.search.as_mut() {
                    buf.insert_str(&text);
                }
            }
            InputOp::SearchBackspace => {
                if let Some(buf) = self.search.as_mut() {
                    buf.backspace();
                }
            }
            InputOp::SearchSubmit => self.search_submit(),
            InputOp::SearchCancel => self.search = None,
            InputOp::Interrupt => self.interrupt(),
            InputOp::Suspend => self.suspend(),
            InputOp::Quit => self.should_quit = true,
        }
    }

    fn insert_text(&mut self, text: &str) {
        // Keystrokes go straight to a running job's stdin
        if let Some(job) = self.active_mut().job.as_mut() {
            job.write_input(text.as_bytes());
            return;
        }
        // A digit resolves a pending completion list instead of typing
        if self.has_pending_completion() && text.len() == 1 {
            if let Some(d) = text.chars().next().and_then(|c| c.to_digit(10)) {
                self.select_completion(d as u8);
                return;
            }
        }
        let session = self.active_mut();
        session.autocomplete = None;
        session.input.insert_str(text);
    }

    fn submit_line(&mut self) {
        let session = self.active_mut();
        if let Some(job) = session.job.as_mut() {
            job.write_input(b"\n");
            return;
        }
        session.autocomplete = None;

        // Trailing backslash continues the line instead of submitting
        if session.input.text.ends_with('\\') {
            session.input.end();
            session.input.insert_str("\n");
            return;
        }

        let line = session.input.take();
        session.scrollback.push_command(line.clone());
        session.pin_bottom();
        self.history.add(&line);

        let args = parse_line(&line);
        let Some(head) = args.first() else { return };

        if head.eq_ignore_ascii_case("echo") {
            self.builtin_echo(&line);
        } else if head.eq_ignore_ascii_case("multiwatch") {
            self.builtin_multiwatch(&line);
        } else if head == "cd" {
            self.builtin_cd(args.get(1).map(String::as_str));
        } else if head == "clear" {
            self.active_mut().clear();
        } else if head == "exit" {
            self.should_quit = true;
        } else if head == "history" {
            self.builtin_history();
        } else {
            self.dispatch_pipeline(&args);
        }
        self.active_mut().pin_bottom();
    }

    /// `echo "text"`: requires one double-quoted argument; a literal `\n\`
    /// inside it breaks the line, and every resulting line is stripped of
    /// surrounding spaces.
    fn builtin_echo(&mut self, line: &str) {
        let session = self.active_mut();
        let rest = line
            .trim_start()
            .trim_start_matches(|c: char| !c.is_whitespace())
            .trim_start();
        if !rest.starts_with('"') {
            session.scrollback.push("Error: echo requires a quoted string.");
            return;
        }
        let inner = &rest[1..];
        let Some(endq) = inner.rfind('"') else {
            session.scrollback.push("Error: unclosed quote in echo command.");
            return;
        };
        let content: Vec<char> = inner[..endq].chars().collect();

        let mut out = String::new();
        let mut i = 0;
        while i < content.len() {
            match content[i] {
                '\n' | '\r' => i += 1,
                '\\' if i + 2 < content.len()
                    && content[i + 1] == 'n'
                    && content[i + 2] == '\\' =>
                {
                    if out.ends_with(' ') {
                        out.pop();
                    }
                    out.push('\n');
                    i += 3;
                }
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        for part in out.split('\n') {
            session.scrollback.push(part.trim_matches(' '));
        }
    }

    /// `multiwatch ["cmd1", "cmd2"]`: one active group per tab; a second
    /// submission while a group runs is ignored.
    fn builtin_multiwatch(&mut self, line: &str) {
        let interval = Duration::from_secs(self.config.watch_interval_secs);
        let session = self.active_mut();
        match parse_watch_list(line) {
            Some(commands) if !commands.is_empty() => {
                if session.watch.is_some() {
                    return;
                }
                match MultiwatchGroup::spawn(&commands, interval) {
                    Ok(group) => session.watch = Some(group),
                    Err(e) => {
                        log::warn!("multiwatch start failed: {}", e);
                        session.scrollback.push("Failed to start multiwatch");
                    }
                }
            }
            _ => {
                session
                    .scrollback
                    .push("Usage: multiwatch [\"cmd1\",\"cmd2\",...]");
            }
        }
    }

    fn builtin_cd(&mut self, arg: Option<&str>) {
        let home;
        let target = match arg {
            Some(path) => Some(Path::new(path)),
            None => {
                home = dirs::home_dir();
                home.as_deref()
            }
        };
        let Some(target) = target else { return };
        let announce = arg.is_some();
        let session = self.active_mut();
        match session.change_dir(target) {
            Ok(()) => {
                let label = session.label.clone();
                session.scrollback.relabel(label);
                if announce {
                    session.scrollback.push("Directory changed");
                }
            }
            Err(e) if announce => {
                session
                    .scrollback
                    .push(format!("cd: {}: {}", target.display(), e));
            }
            Err(_) => {}
        }
    }

    fn builtin_history(&mut self) {
        let lines: Vec<String> = self
            .history
            .recent(HISTORY_SHOW)
            .map(str::to_string)
            .collect();
        let session = self.active_mut();
        if lines.is_empty() {
            session.scrollback.push("(no history)");
            return;
        }
        for line in lines {
            session.scrollback.push(line);
        }
    }

    fn dispatch_pipeline(&mut self, args: &[String]) {
        let session = self.active_mut();
        let plan = plan(args, &session.cwd);
        match PipelineJob::spawn(&plan, &session.cwd) {
            Ok(job) => session.job = Some(job),
            Err(e) => {
                log::warn!("pipeline spawn failed: {}", e);
                session.scrollback.push(format!("Failed to start pipeline: {}", e));
            }
        }
    }

    fn request_completion(&mut self) {
        let session = self.active_mut();
        session.autocomplete = None;
        let cwd = session.cwd.clone();
        match autocomplete::request(&mut session.input, &cwd) {
            Completion::NoMatch | Completion::Applied => {}
            Completion::Options(state) => {
                session.scrollback.push("Autocomplete options : ");
                for (i, m) in state.matches.iter().enumerate() {
                    session.scrollback.push(format!("{}. {}", i + 1, m));
                }
                session.pin_bottom();
                session.autocomplete = Some(state);
            }
        }
    }

    fn select_completion(&mut self, digit: u8) {
        let session = self.active_mut();
        let Some(state) = session.autocomplete.take() else {
            return;
        };
        if !autocomplete::select(&mut session.input, &state, digit) {
            // Out-of-range digit falls back to ordinary typing
            session.input.insert_str(&digit.to_string());
        }
    }

    fn search_submit(&mut self) {
        let Some(mut buf) = self.search.take() else { return };
        let term = buf.take();
        let result = if term.is_empty() {
            None
        } else {
            Some(self.history.search(&term))
        };
        let session = self.active_mut();
        match result {
            None => session.scrollback.push("Empty search term"),
            Some(SearchResult::Exact(hit)) => session.scrollback.push(hit),
            Some(SearchResult::Fuzzy(hits)) => {
                for hit in hits {
                    session.scrollback.push(hit);
                }
            }
            Some(SearchResult::NoMatch) => {
                session.scrollback.push("No match for search term in history")
            }
        }
        session.pin_bottom();
    }

    fn interrupt(&mut self) {
        let session = self.active_mut();
        if let Some(job) = session.job.as_ref() {
            job.signal(Signal::SIGINT);
            session.scrollback.push("^C");
            session.pin_bottom();
        } else if let Some(mut group) = session.watch.take() {
            group.cancel();
            session.scrollback.push("^C - multiwatch stopped");
            session.pin_bottom();
        }
    }

    /// Detach the foreground job: it keeps running but the session stops
    /// tracking it.
    fn suspend(&mut self) {
        let session = self.active_mut();
        if let Some(job) = session.job.take() {
            job.signal(Signal::SIGTSTP);
            session.scrollback.push("[stopped]");
            session.pin_bottom();
        }
    }

    fn new_tab(&mut self) {
        let number = self.sessions.len() + 1;
        self.sessions.push(Session::new(
            number,
            self.base_cwd.clone(),
            self.config.scrollback_lines,
        ));
        self.active = self.sessions.len() - 1;
    }

    fn close_tab(&mut self) {
        self.sessions.remove(self.active);
        if self.sessions.is_empty() {
            self.should_quit = true;
            return;
        }
        if self.active >= self.sessions.len() {
            self.active = self.sessions.len() - 1;
        }
    }

    /// One bounded readiness pass over every live pipe in every session.
    ///
    /// Sessions are visited in a fixed order, the foreground job before
    /// multiwatch workers within each. With nothing pollable the loop sleeps
    /// briefly instead of spinning.
    pub fn poll_io(&mut self) -> Result<()> {
        let mut sources = Vec::new();
        for (si, session) in self.sessions.iter().enumerate() {
            if let Some(fd) = session.job.as_ref().and_then(|j| j.output_fd()) {
                sources.push(PollSource {
                    session: si,
                    source: Source::Job,
                    fd,
                });
            }
            if let Some(group) = session.watch.as_ref() {
                for (wi, worker) in group.workers().iter().enumerate() {
                    if let Some(fd) = worker.output_fd() {
                        sources.push(PollSource {
                            session: si,
                            source: Source::Watch(wi),
                            fd,
                        });
                    }
                }
            }
        }

        if sources.is_empty() {
            std::thread::sleep(Duration::from_millis(self.config.idle_sleep_ms));
            return Ok(());
        }

        for ready in poll_ready(&sources, self.config.poll_timeout_ms)? {
            let session = &mut self.sessions[ready.session];
            match ready.source {
                Source::Job => session.pump_job(),
                Source::Watch(i) => session.pump_watch(i),
            }
        }
        Ok(())
    }

    /// Snapshot of the active session for a viewport of `height` rows
    pub fn render_model(&self, height: usize) -> RenderModel {
        let session = &self.sessions[self.active];
        let lines = session
            .scrollback
            .window(height, session.scroll_offset)
            .into_iter()
            .map(|l| RenderLine {
                text: l.text.clone(),
                is_command: l.is_command,
            })
            .collect();
        RenderModel {
            lines,
            input: session.input.text.clone(),
            cursor: session.input.cursor_col(),
            search: self
                .search
                .as_ref()
                .map(|s| (s.text.clone(), s.cursor_col())),
            active_tab: self.active + 1,
            tab_count: self.sessions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_app(dir: &TempDir) -> App {
        let config = Config {
            history_file: Some(dir.path().join("history")),
            ..Config::default()
        };
        App::with_base(config, dir.path().to_path_buf()).unwrap()
    }

    fn type_and_submit(app: &mut App, line: &str) {
        app.apply(InputOp::InsertText(line.to_string()));
        app.apply(InputOp::SubmitLine);
    }

    fn visible_texts(app: &App) -> Vec<String> {
        app.active_session()
            .scrollback
            .iter()
            .map(|l| l.text.clone())
            .collect()
    }

    #[test]
    fn test_echo_builtin_quoted() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "echo \"hello world\"");
        let texts = visible_texts(&app);
        assert_eq!(texts.last().unwrap(), "hello world");
        // The submitted line is echoed as a command line above the output
        assert_eq!(texts[texts.len() - 2], "echo \"hello world\"");
    }

    #[test]
    fn test_echo_requires_quotes() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "echo bare");
        assert_eq!(
            visible_texts(&app).last().unwrap(),
            "Error: echo requires a quoted string."
        );
        type_and_submit(&mut app, "echo \"open");
        assert_eq!(
            visible_texts(&app).last().unwrap(),
            "Error: unclosed quote in echo command."
        );
    }

    #[test]
    fn test_echo_line_break_sequence() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "echo \"one \\n\\ two\"");
        let texts = visible_texts(&app);
        let n = texts.len();
        assert_eq!(texts[n - 2], "one");
        assert_eq!(texts[n - 1], "two");
    }

    #[test]
    fn test_clear_twice_is_same_state() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "echo \"noise\"");
        type_and_submit(&mut app, "clear");
        let after_first = visible_texts(&app);
        assert_eq!(after_first, vec!["Tab 1"]);
        type_and_submit(&mut app, "clear");
        assert_eq!(visible_texts(&app), after_first);
    }

    #[test]
    fn test_history_builtin_lists_recent_first() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "echo \"a\"");
        type_and_submit(&mut app, "echo \"b\"");
        type_and_submit(&mut app, "history");
        let texts = visible_texts(&app);
        let n = texts.len();
        assert_eq!(texts[n - 3], "history");
        assert_eq!(texts[n - 2], "echo \"b\"");
        assert_eq!(texts[n - 1], "echo \"a\"");
    }

    #[test]
    fn test_history_builtin_empty() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "history");
        assert_eq!(visible_texts(&app).last().unwrap(), "(no history)");
    }

    #[test]
    fn test_cd_builtin_and_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut app = test_app(&dir);

        type_and_submit(&mut app, "cd sub");
        assert!(app.active_session().cwd.ends_with("sub"));
        assert_eq!(visible_texts(&app).last().unwrap(), "Directory changed");

        type_and_submit(&mut app, "cd nowhere");
        assert!(visible_texts(&app).last().unwrap().starts_with("cd: nowhere: "));
        assert!(app.active_session().cwd.ends_with("sub"));
    }

    #[test]
    fn test_multiwatch_usage_message() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "multiwatch date");
        assert_eq!(
            visible_texts(&app).last().unwrap(),
            "Usage: multiwatch [\"cmd1\",\"cmd2\",...]"
        );
    }

    #[test]
    fn test_trailing_backslash_continues_line() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.apply(InputOp::InsertText("echo \"a \\".to_string()));
        app.apply(InputOp::SubmitLine);
        // Not submitted: the line grew a literal newline instead
        assert_eq!(app.active_session().input.text, "echo \"a \\\n");
        assert_eq!(visible_texts(&app), vec!["Tab 1"]);
    }

    #[test]
    fn test_tabs_open_switch_close() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        app.apply(InputOp::NewTab);
        assert_eq!(app.render_model(10).active_tab, 2);
        assert_eq!(app.render_model(10).tab_count, 2);

        app.apply(InputOp::PrevTab);
        assert_eq!(app.render_model(10).active_tab, 1);
        app.apply(InputOp::NextTab);
        assert_eq!(app.render_model(10).active_tab, 2);

        app.apply(InputOp::CloseTab);
        assert_eq!(app.render_model(10).tab_count, 1);
        assert!(!app.should_quit());
        app.apply(InputOp::CloseTab);
        assert!(app.should_quit());
    }

    #[test]
    fn test_completion_options_then_digit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("alpha"), "").unwrap();
        std::fs::write(dir.path().join("beta"), "").unwrap();
        let mut app = test_app(&dir);

        app.apply(InputOp::InsertText("cat ".to_string()));
        app.apply(InputOp::RequestCompletion);
        assert!(app.has_pending_completion());
        let texts = visible_texts(&app);
        assert!(texts.contains(&"Autocomplete options : ".to_string()));
        assert!(texts.contains(&"1. alpha".to_string()));
        assert!(texts.contains(&"2. beta".to_string()));

        // Digit keys arrive as ordinary text while a list is pending
        app.apply(InputOp::InsertText("2".to_string()));
        assert!(!app.has_pending_completion());
        assert_eq!(app.active_session().input.text, "cat beta");
    }

    #[test]
    fn test_edit_discards_pending_completion() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("alpha"), "").unwrap();
        std::fs::write(dir.path().join("beta"), "").unwrap();
        let mut app = test_app(&dir);

        app.apply(InputOp::InsertText("cat ".to_string()));
        app.apply(InputOp::RequestCompletion);
        assert!(app.has_pending_completion());
        app.apply(InputOp::InsertText("x".to_string()));
        assert!(!app.has_pending_completion());
        assert_eq!(app.active_session().input.text, "cat x");
    }

    #[test]
    fn test_search_flow() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "echo \"target\"");

        app.apply(InputOp::EnterSearchMode);
        assert!(app.in_search_mode());
        app.apply(InputOp::SearchInput("echo \"target\"".to_string()));
        app.apply(InputOp::SearchSubmit);
        assert!(!app.in_search_mode());
        assert_eq!(visible_texts(&app).last().unwrap(), "echo \"target\"");

        app.apply(InputOp::EnterSearchMode);
        app.apply(InputOp::SearchSubmit);
        assert_eq!(visible_texts(&app).last().unwrap(), "Empty search term");

        app.apply(InputOp::EnterSearchMode);
        app.apply(InputOp::SearchInput("zzqqyy".to_string()));
        app.apply(InputOp::SearchSubmit);
        assert_eq!(
            visible_texts(&app).last().unwrap(),
            "No match for search term in history"
        );
    }

    #[test]
    fn test_search_cancel_keeps_scrollback() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        let before = visible_texts(&app);
        app.apply(InputOp::EnterSearchMode);
        app.apply(InputOp::SearchInput("abc".to_string()));
        app.apply(InputOp::SearchCancel);
        assert!(!app.in_search_mode());
        assert_eq!(visible_texts(&app), before);
    }

    #[test]
    fn test_render_model_windows_scrollback() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        for i in 0..5 {
            type_and_submit(&mut app, &format!("echo \"line{}\"", i));
        }
        let model = app.render_model(3);
        assert_eq!(model.lines.len(), 3);
        assert_eq!(model.lines[2].text, "line4");
        assert!(model.lines[1].is_command);
        assert_eq!(model.input, "");
        assert_eq!(model.cursor, 0);
    }

    #[test]
    fn test_pipeline_job_output_reaches_scrollback() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "printf pipeline-probe | cat");
        assert!(app.active_session().job.is_some());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while app.active_session().job.is_some() {
            app.poll_io().unwrap();
            assert!(std::time::Instant::now() < deadline, "job never finished");
        }
        assert!(visible_texts(&app).contains(&"pipeline-probe".to_string()));
    }

    #[test]
    fn test_interrupt_cancels_job() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "sleep 30");
        assert!(app.active_session().job.is_some());

        app.apply(InputOp::Interrupt);
        assert_eq!(visible_texts(&app).last().unwrap(), "^C");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while app.active_session().job.is_some() {
            app.poll_io().unwrap();
            assert!(std::time::Instant::now() < deadline, "job survived SIGINT");
        }
    }

    #[test]
    fn test_suspend_detaches_job() {
        let dir = TempDir::new().unwrap();
        let mut app = test_app(&dir);
        type_and_submit(&mut app, "sleep 30");
        assert!(app.active_session().job.is_some());

        app.apply(InputOp::Suspend);
        assert!(app.active_session().job.is_none());
        assert_eq!(visible_texts(&app).last().unwrap(), "[stopped]");
    }
}
