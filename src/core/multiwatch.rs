//! Periodic command watching with incremental output capture
//!
//! `multiwatch ["cmd1", "cmd2"]` spawns one long-lived supervisor process
//! per command. Each supervisor re-runs its command on a fixed interval with
//! stdout/stderr piped back to the parent. The parent tees every byte it
//! reads into a per-worker capture file and tracks the byte offset already
//! surfaced, so each poll emits only the delta since the previous one,
//! framed by a header and dividers.

use super::pipeline::{SpawnError, EXEC_FAILURE_STATUS};
use super::poller::{read_chunk, set_nonblocking, ReadOutcome};
use super::scrollback::{LineAssembler, Scrollback};
use chrono::Local;
use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{execvp, fork, pipe, ForkResult, Pid};
use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::time::Duration;

/// Seconds a supervisor sleeps between re-runs of its command
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 2;

const DIVIDER: &str = "----------------------------------------------------";

/// Parse the bracketed list of a `multiwatch` submission.
///
/// Only double/single-quoted entries between `[` and `]` count; anything
/// unquoted is skipped. Returns `None` when the brackets themselves are
/// missing or inverted.
pub fn parse_watch_list(input: &str) -> Option<Vec<String>> {
    let lb = input.find('[')?;
    let rb = input.find(']')?;
    if rb <= lb {
        return None;
    }
    let body = &input[lb + 1..rb];

    let mut commands = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == ',' {
            chars.next();
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            chars.next();
            let mut cmd = String::new();
            for c in chars.by_ref() {
                if c == quote {
                    break;
                }
                cmd.push(c);
            }
            commands.push(cmd);
        } else {
            // Unquoted entry: skip to the next separator
            for c in chars.by_ref() {
                if c == ',' {
                    break;
                }
            }
        }
    }
    Some(commands)
}

/// Lifecycle of one watched command's output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Closed,
}

/// One supervised command: its supervisor pid, output pipe, and capture file
#[derive(Debug)]
pub struct MultiwatchWorker {
    pub command: String,
    pub pid: Pid,
    output: Option<OwnedFd>,
    capture_path: PathBuf,
    assembler: LineAssembler,
    pub state: WorkerState,
}

impl MultiwatchWorker {
    pub fn output_fd(&self) -> Option<RawFd> {
        self.output.as_ref().map(|fd| fd.as_raw_fd())
    }
}

/// The set of watch workers owned by one session
#[derive(Debug)]
pub struct MultiwatchGroup {
    workers: Vec<MultiwatchWorker>,
    /// Bytes of each worker's capture file already surfaced, keyed by the
    /// exact supervisor pid
    offsets: HashMap<i32, u64>,
}

impl MultiwatchGroup {
    /// Spawn one supervisor per command. A pipe or fork failure tears down
    /// the workers already started and reports the error.
    pub fn spawn(commands: &[String], interval: Duration) -> Result<Self, SpawnError> {
        let mut group = Self {
            workers: Vec::with_capacity(commands.len()),
            offsets: HashMap::new(),
        };

        for command in commands {
            match spawn_worker(command, interval) {
                Ok(worker) => group.workers.push(worker),
                Err(e) => {
                    group.cancel();
                    return Err(e);
                }
            }
        }
        Ok(group)
    }

    pub fn workers(&self) -> &[MultiwatchWorker] {
        &self.workers
    }

    pub fn all_closed(&self) -> bool {
        self.workers.iter().all(|w| w.state == WorkerState::Closed)
    }

    /// Drain one worker's pipe: tee the bytes into its capture file, then
    /// surface the file's unseen delta into scrollback. End-of-stream or a
    /// hard error flushes the partial line and closes the worker.
    pub fn pump_worker(&mut self, idx: usize, out: &mut Scrollback) {
        let Self { workers, offsets } = self;
        let Some(worker) = workers.get_mut(idx) else {
            return;
        };
        let mut captured = false;
        loop {
            let Some(fd) = &worker.output else { break };
            match read_chunk(fd) {
                ReadOutcome::Data(bytes) => {
                    if let Err(e) = append_capture(&worker.capture_path, &bytes) {
                        log::warn!(
                            "capture append to {} failed: {}",
                            worker.capture_path.display(),
                            e
                        );
                    }
                    captured = true;
                }
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Eof => {
                    worker.assembler.flush_partial(out);
                    worker.output = None;
                    worker.state = WorkerState::Closed;
                    break;
                }
                ReadOutcome::Failed(e) => {
                    log::debug!("watch worker {} read failed: {}", worker.pid, e);
                    worker.assembler.flush_partial(out);
                    worker.output = None;
                    worker.state = WorkerState::Closed;
                    break;
                }
            }
        }

        if !captured {
            return;
        }
        let offset = offsets.entry(worker.pid.as_raw()).or_insert(0);
        match read_delta(&worker.capture_path, *offset) {
            Ok((delta, end)) => {
                if !delta.is_empty() {
                    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
                    out.push(format!("\"{}\" , {} :", worker.command, stamp));
                    out.push(DIVIDER);
                    worker.assembler.feed(&delta, out);
                    worker.assembler.flush_partial(out);
                    out.push(DIVIDER);
                    *offset = end;
                }
            }
            Err(e) => log::warn!(
                "capture read from {} failed: {}",
                worker.capture_path.display(),
                e
            ),
        }
    }

    /// Signal every supervisor, wait for each to exit, close the pipes,
    /// and delete the capture files.
    pub fn cancel(&mut self) {
        for worker in &self.workers {
            if let Err(e) = kill(worker.pid, Signal::SIGTERM) {
                log::debug!("SIGTERM to watch supervisor {} failed: {}", worker.pid, e);
            }
        }
        for worker in self.workers.drain(..) {
            let _ = waitpid(worker.pid, None);
            let _ = std::fs::remove_file(&worker.capture_path);
        }
        self.offsets.clear();
    }

    /// Reap a group whose workers all closed on their own
    pub fn reap(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = waitpid(worker.pid, None);
            let _ = std::fs::remove_file(&worker.capture_path);
        }
        self.offsets.clear();
    }
}

/// Capture file location for a supervisor pid, deterministic so it can be
/// reopened on every poll
pub fn capture_path(pid: Pid) -> PathBuf {
    std::env::temp_dir().join(format!(".tabsh-watch.{}.txt", pid))
}

fn append_capture(path: &PathBuf, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)
}

/// Re-open the capture file, read everything past `offset`, and report the
/// new end position. Repeated polls with no growth yield an empty delta.
pub fn read_delta(path: &PathBuf, offset: u64) -> std::io::Result<(Vec<u8>, u64)> {
    let mut file = File::open(path)?;
    let end = file.seek(SeekFrom::End(0))?;
    if end <= offset {
        return Ok((Vec::new(), end.max(offset)));
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut delta = Vec::with_capacity((end - offset) as usize);
    file.read_to_end(&mut delta)?;
    Ok((delta, end))
}

fn spawn_worker(command: &str, interval: Duration) -> Result<MultiwatchWorker, SpawnError> {
    // Sub-commands are split on whitespace only, no further quoting
    let argv: Vec<CString> = command
        .split_whitespace()
        .map(|a| CString::new(a))
        .collect::<Result<_, _>>()
        .map_err(|_| SpawnError::BadArgument)?;

    let (r, w) = pipe().map_err(SpawnError::Pipe)?;
    let interval_secs = interval.as_secs().max(1) as u32;

    match unsafe { fork() } {
        Err(e) => Err(SpawnError::Fork(e)),
        Ok(ForkResult::Child) => supervise(&argv, w.as_raw_fd(), r.as_raw_fd(), interval_secs),
        Ok(ForkResult::Parent { child }) => {
            drop(w);
            let _ = set_nonblocking(&r);
            let path = capture_path(child);
            // Fresh capture file per worker start
            if let Err(e) = File::create(&path) {
                log::warn!("capture file {} create failed: {}", path.display(), e);
            }
            log::debug!("watch supervisor {} started for '{}'", child, command);
            Ok(MultiwatchWorker {
                command: command.to_string(),
                pid: child,
                output: Some(r),
                capture_path: path,
                assembler: LineAssembler::new(),
                state: WorkerState::Running,
            })
        }
    }
}

/// Supervisor body: re-run the command forever, sleeping `interval_secs`
/// between exits. Runs in a forked child and never returns.
fn supervise(argv: &[CString], pipe_w: RawFd, pipe_r: RawFd, interval_secs: u32) -> ! {
    unsafe {
        if libc::dup2(pipe_w, 1) < 0 || libc::dup2(pipe_w, 2) < 0 {
            libc::_exit(EXEC_FAILURE_STATUS);
        }
        libc::close(pipe_w);
        libc::close(pipe_r);
    }

    loop {
        if !argv.is_empty() {
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    let _ = execvp(&argv[0], argv);
                    unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
                }
                Ok(ForkResult::Parent { child }) => {
                    let _ = waitpid(child, None);
                }
                Err(_) => unsafe { libc::_exit(1) },
            }
        }
        unsafe { libc::sleep(interval_secs) };
    }
}
