//! Pipeline construction and foreground job supervision
//!
//! A submitted command line becomes a chain of forked processes wired
//! together with pipes. All stages join one process group (keyed by the
//! first stage's pid) so interrupt/suspend signals hit the whole pipeline
//! at once. The parent keeps two non-blocking pipe ends per job: a writer
//! feeding the first stage's stdin and a reader draining the last stage's
//! stdout/stderr, each bypassed when the pipeline redirects to a file.

use super::poller::{read_chunk, set_nonblocking, ReadOutcome};
use super::scrollback::{LineAssembler, Scrollback};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, fork, pipe, setpgid, write, ForkResult, Pid};
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Exit status of a child whose final exec step failed
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Construction failure: the job was never registered and anything already
/// spawned for it has been signalled and reaped.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty command")]
    EmptyCommand,
    #[error("pipe creation failed: {0}")]
    Pipe(Errno),
    #[error("fork failed: {0}")]
    Fork(Errno),
    #[error("argument contains NUL byte")]
    BadArgument,
}

/// One process stage of a planned pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub argv: Vec<String>,
}

/// A parsed pipeline: stages split on `|`, whole-pipeline redirections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan {
    pub stages: Vec<Stage>,
    /// `< file`: bound to the first stage's stdin
    pub input_file: Option<PathBuf>,
    /// `> file`: bound to the last stage's stdout/stderr
    pub output_file: Option<PathBuf>,
}

/// Scan an argument vector into a pipeline plan.
///
/// `<` and `>` each consume the following token as a filename and apply to
/// the pipeline as a whole; `|` starts a new stage; any other token holding
/// a glob metacharacter is expanded against `cwd`, keeping the literal token
/// when nothing matches (shell no-match passthrough).
pub fn plan(args: &[String], cwd: &Path) -> PipelinePlan {
    let mut stages = vec![Stage { argv: Vec::new() }];
    let mut input_file = None;
    let mut output_file = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "<" if i + 1 < args.len() => {
                i += 1;
                input_file = Some(PathBuf::from(&args[i]));
            }
            ">" if i + 1 < args.len() => {
                i += 1;
                output_file = Some(PathBuf::from(&args[i]));
            }
            "|" => stages.push(Stage { argv: Vec::new() }),
            token => {
                let current = stages.last_mut().expect("at least one stage");
                current.argv.extend(expand_token(token, cwd));
            }
        }
        i += 1;
    }

    PipelinePlan {
        stages,
        input_file,
        output_file,
    }
}

fn expand_token(token: &str, cwd: &Path) -> Vec<String> {
    if !token.contains(['*', '?', '[']) {
        return vec![token.to_string()];
    }
    let absolute = Path::new(token).is_absolute();
    let pattern = if absolute {
        token.to_string()
    } else {
        cwd.join(token).to_string_lossy().into_owned()
    };
    let mut matches = Vec::new();
    if let Ok(paths) = glob::glob(&pattern) {
        for path in paths.flatten() {
            let text = if absolute {
                path.to_string_lossy().into_owned()
            } else {
                // Expansion ran against an absolute pattern; hand the stage
                // back a path relative to its working directory.
                path.strip_prefix(cwd)
                    .map(|rel| rel.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| path.to_string_lossy().into_owned())
            };
            matches.push(text);
        }
    }
    matches.sort();
    if matches.is_empty() {
        vec![token.to_string()]
    } else {
        matches
    }
}

/// Whether the job is still producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished,
}

/// A running foreground pipeline owned by one session
#[derive(Debug)]
pub struct PipelineJob {
    pgid: Pid,
    stdin_writer: Option<OwnedFd>,
    output: Option<OwnedFd>,
    assembler: LineAssembler,
}

impl PipelineJob {
    /// Fork and wire every stage of `plan`.
    ///
    /// Each child joins the first child's process group, rewires its stdio,
    /// changes into `cwd`, and execs; a failed exec terminates that child
    /// with [`EXEC_FAILURE_STATUS`]. A pipe or fork failure tears down any
    /// already-forked stages before returning.
    pub fn spawn(plan: &PipelinePlan, cwd: &Path) -> Result<Self, SpawnError> {
        let n = plan.stages.len();
        if n == 0 || plan.stages.iter().any(|s| s.argv.is_empty()) {
            return Err(SpawnError::EmptyCommand);
        }

        // Everything the children need is built before the first fork so the
        // post-fork path stays on plain syscalls.
        let argvs: Vec<Vec<CString>> = plan
            .stages
            .iter()
            .map(|s| {
                s.argv
                    .iter()
                    .map(|a| CString::new(a.as_bytes()))
                    .collect::<Result<_, _>>()
            })
            .collect::<Result<_, _>>()
            .map_err(|_| SpawnError::BadArgument)?;
        let input_c = path_cstring(plan.input_file.as_deref())?;
        let output_c = path_cstring(plan.output_file.as_deref())?;
        let cwd_c = CString::new(cwd.as_os_str().as_bytes()).map_err(|_| SpawnError::BadArgument)?;

        let mut stage_pipes: Vec<(OwnedFd, OwnedFd)> = Vec::with_capacity(n.saturating_sub(1));
        for _ in 1..n {
            stage_pipes.push(pipe().map_err(SpawnError::Pipe)?);
        }
        let (in_r, in_w) = pipe().map_err(SpawnError::Pipe)?;
        let (out_r, out_w) = pipe().map_err(SpawnError::Pipe)?;

        // Every descriptor a child must not keep open past its own dup2s
        let mut all_raw: Vec<RawFd> = Vec::new();
        for (r, w) in &stage_pipes {
            all_raw.push(r.as_raw_fd());
            all_raw.push(w.as_raw_fd());
        }
        all_raw.push(in_r.as_raw_fd());
        all_raw.push(in_w.as_raw_fd());
        all_raw.push(out_r.as_raw_fd());
        all_raw.push(out_w.as_raw_fd());

        let mut pgid: Option<Pid> = None;
        for i in 0..n {
            match unsafe { fork() } {
                Err(e) => {
                    if let Some(g) = pgid {
                        let _ = killpg(g, Signal::SIGKILL);
                        reap_group(g);
                    }
                    return Err(SpawnError::Fork(e));
                }
                Ok(ForkResult::Child) => {
                    let group = pgid.unwrap_or(Pid::from_raw(0));
                    let _ = setpgid(Pid::from_raw(0), group);
                    child_exec(
                        i,
                        n,
                        &argvs[i],
                        &stage_pipes,
                        in_r.as_raw_fd(),
                        out_w.as_raw_fd(),
                        input_c.as_ref(),
                        output_c.as_ref(),
                        &cwd_c,
                        &all_raw,
                    );
                }
                Ok(ForkResult::Parent { child }) => {
                    let g = *pgid.get_or_insert(child);
                    // Raced against the child's own setpgid; either one wins
                    let _ = setpgid(child, g);
                }
            }
        }
        let pgid = pgid.expect("at least one stage forked");

        drop(stage_pipes);
        drop(in_r);
        drop(out_w);
        let _ = set_nonblocking(&out_r);
        let _ = set_nonblocking(&in_w);

        log::debug!("spawned pipeline pgid={} stages={}", pgid, n);
        Ok(Self {
            pgid,
            stdin_writer: Some(in_w),
            output: Some(out_r),
            assembler: LineAssembler::new(),
        })
    }

    /// Process group id, the job's identifier for signal delivery
    pub fn pgid(&self) -> Pid {
        self.pgid
    }

    /// Output descriptor to register with the poller, if still open
    pub fn output_fd(&self) -> Option<RawFd> {
        self.output.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Forward raw bytes to the first stage's stdin
    pub fn write_input(&mut self, bytes: &[u8]) {
        if let Some(fd) = &self.stdin_writer {
            if let Err(e) = write(fd, bytes) {
                if e != Errno::EAGAIN {
                    log::debug!("job stdin write failed: {}", e);
                    self.stdin_writer = None;
                }
            }
        }
    }

    /// Signal every stage at once
    pub fn signal(&self, sig: Signal) {
        if let Err(e) = killpg(self.pgid, sig) {
            log::warn!("killpg({}, {:?}) failed: {}", self.pgid, sig, e);
        }
    }

    /// Drain available output into `out`. On end-of-stream or a hard read
    /// error the partial line is flushed, the descriptor closed, and the
    /// terminated children reaped without blocking.
    pub fn pump(&mut self, out: &mut Scrollback) -> JobStatus {
        loop {
            let Some(fd) = &self.output else {
                return JobStatus::Finished;
            };
            match read_chunk(fd) {
                ReadOutcome::Data(bytes) => self.assembler.feed(&bytes, out),
                ReadOutcome::WouldBlock => return JobStatus::Running,
                ReadOutcome::Eof => break,
                ReadOutcome::Failed(e) => {
                    log::debug!("job output read failed: {}", e);
                    break;
                }
            }
        }
        self.assembler.flush_partial(out);
        self.output = None;
        self.stdin_writer = None;
        reap_group(self.pgid);
        JobStatus::Finished
    }

    /// Drop the parent-held pipe ends without waiting for the group.
    /// Used by suspend: the job keeps running detached.
    pub fn detach(&mut self) {
        self.output = None;
        self.stdin_writer = None;
    }

    /// Kill the whole group and wait for every stage. Tab-close teardown.
    pub fn terminate(self) {
        let _ = killpg(self.pgid, Signal::SIGKILL);
        let group = Pid::from_raw(-self.pgid.as_raw());
        while waitpid(group, None).is_ok() {}
    }
}

/// Collect exited members of a process group without blocking
fn reap_group(pgid: Pid) {
    let group = Pid::from_raw(-pgid.as_raw());
    loop {
        match waitpid(group, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

fn path_cstring(path: Option<&Path>) -> Result<Option<CString>, SpawnError> {
    match path {
        Some(p) => CString::new(p.as_os_str().as_bytes())
            .map(Some)
            .map_err(|_| SpawnError::BadArgument),
        None => Ok(None),
    }
}

/// Post-fork child setup: rewire stdio, close inherited pipe ends, chdir,
/// exec. Only async-signal-safe calls happen here; this never returns.
#[allow(clippy::too_many_arguments)]
fn child_exec(
    i: usize,
    n: usize,
    argv: &[CString],
    stage_pipes: &[(OwnedFd, OwnedFd)],
    in_r: RawFd,
    out_w: RawFd,
    input_c: Option<&CString>,
    output_c: Option<&CString>,
    cwd_c: &CString,
    all_raw: &[RawFd],
) -> ! {
    unsafe {
        if i == 0 {
            match input_c {
                Some(path) => {
                    let fd = libc::open(path.as_ptr(), libc::O_RDONLY);
                    if fd < 0 {
                        libc::_exit(EXEC_FAILURE_STATUS);
                    }
                    libc::dup2(fd, 0);
                    libc::close(fd);
                }
                None => {
                    libc::dup2(in_r, 0);
                }
            }
        } else {
            libc::dup2(stage_pipes[i - 1].0.as_raw_fd(), 0);
        }

        if i == n - 1 {
            match output_c {
                Some(path) => {
                    let fd = libc::open(
                        path.as_ptr(),
                        libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                        0o644 as libc::c_uint,
                    );
                    if fd < 0 {
                        libc::_exit(EXEC_FAILURE_STATUS);
                    }
                    libc::dup2(fd, 1);
                    libc::dup2(fd, 2);
                    libc::close(fd);
                }
                None => {
                    libc::dup2(out_w, 1);
                    libc::dup2(out_w, 2);
                }
            }
        } else {
            libc::dup2(stage_pipes[i].1.as_raw_fd(), 1);
        }

        for &fd in all_raw {
            libc::close(fd);
        }
        libc::chdir(cwd_c.as_ptr());
    }

    let _ = execvp(&argv[0], argv);
    unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::poller::{poll_ready, PollSource, Source};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    /// Drive a job to completion, collecting its scrollback output
    fn run_to_completion(job: &mut PipelineJob, sb: &mut Scrollback) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let Some(fd) = job.output_fd() else { return };
            let sources = [PollSource {
                session: 0,
                source: Source::Job,
                fd,
            }];
            if !poll_ready(&sources, 50).unwrap().is_empty()
                && job.pump(sb) == JobStatus::Finished
            {
                return;
            }
        }
        panic!("job did not finish in time");
    }

    #[test]
    fn test_plan_splits_stages_and_redirections() {
        let cwd = TempDir::new().unwrap();
        let p = plan(&args(&["a", "|", "b", ">", "out.txt"]), cwd.path());
        assert_eq!(p.stages.len(), 2);
        assert_eq!(p.stages[0].argv, vec!["a"]);
        assert_eq!(p.stages[1].argv, vec!["b"]);
        assert_eq!(p.output_file, Some(PathBuf::from("out.txt")));
        assert_eq!(p.input_file, None);

        let p = plan(&args(&["wc", "-l", "<", "in.txt"]), cwd.path());
        assert_eq!(p.stages.len(), 1);
        assert_eq!(p.input_file, Some(PathBuf::from("in.txt")));
    }

    #[test]
    fn test_glob_no_match_keeps_literal() {
        let cwd = TempDir::new().unwrap();
        let p = plan(&args(&["ls", "*.nomatch"]), cwd.path());
        assert_eq!(p.stages[0].argv, vec!["ls", "*.nomatch"]);
    }

    #[test]
    fn test_glob_expands_against_cwd() {
        let cwd = TempDir::new().unwrap();
        std::fs::write(cwd.path().join("a.log"), "").unwrap();
        std::fs::write(cwd.path().join("b.log"), "").unwrap();
        std::fs::write(cwd.path().join("c.txt"), "").unwrap();
        let p = plan(&args(&["ls", "*.log"]), cwd.path());
        assert_eq!(p.stages[0].argv, vec!["ls", "a.log", "b.log"]);
    }

    #[test]
    fn test_empty_stage_is_rejected() {
        let cwd = TempDir::new().unwrap();
        let p = plan(&args(&["a", "|"]), cwd.path());
        assert!(matches!(
            PipelineJob::spawn(&p, cwd.path()),
            Err(SpawnError::EmptyCommand)
        ));
    }

    #[test]
    fn test_two_stage_pipeline_output() {
        let cwd = TempDir::new().unwrap();
        let p = plan(&args(&["echo", "hello", "|", "cat"]), cwd.path());
        let mut job = PipelineJob::spawn(&p, cwd.path()).unwrap();
        let mut sb = Scrollback::new(100);
        run_to_completion(&mut job, &mut sb);
        let texts: Vec<&str> = sb.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["hello"]);
    }

    #[test]
    fn test_output_redirection_writes_file() {
        let cwd = TempDir::new().unwrap();
        let p = plan(&args(&["echo", "redirected", ">", "out.txt"]), cwd.path());
        let mut job = PipelineJob::spawn(&p, cwd.path()).unwrap();
        let mut sb = Scrollback::new(100);
        // With the output redirected, the parent-side reader sees EOF at once
        run_to_completion(&mut job, &mut sb);
        assert_eq!(sb.len(), 0);

        let out = cwd.path().join("out.txt");
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(content) = std::fs::read_to_string(&out) {
                if content == "redirected\n" {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "out.txt never written");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_input_redirection_feeds_first_stage() {
        let cwd = TempDir::new().unwrap();
        std::fs::write(cwd.path().join("in.txt"), "from-file\n").unwrap();
        let p = plan(&args(&["cat", "<", "in.txt"]), cwd.path());
        let mut job = PipelineJob::spawn(&p, cwd.path()).unwrap();
        let mut sb = Scrollback::new(100);
        run_to_completion(&mut job, &mut sb);
        let texts: Vec<&str> = sb.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["from-file"]);
    }

    #[test]
    fn test_group_signal_kills_every_stage() {
        let cwd = TempDir::new().unwrap();
        let p = plan(&args(&["sleep", "30", "|", "sleep", "30"]), cwd.path());
        let mut job = PipelineJob::spawn(&p, cwd.path()).unwrap();
        job.signal(Signal::SIGKILL);
        let mut sb = Scrollback::new(100);
        // Both stages die, their pipe ends close, and the job finishes
        run_to_completion(&mut job, &mut sb);
        assert!(job.output_fd().is_none());
    }

    #[test]
    fn test_exec_failure_finishes_job() {
        let cwd = TempDir::new().unwrap();
        let p = plan(&args(&["definitely-not-a-real-binary-xyz"]), cwd.path());
        let mut job = PipelineJob::spawn(&p, cwd.path()).unwrap();
        let mut sb = Scrollback::new(100);
        run_to_completion(&mut job, &mut sb);
        assert!(job.output_fd().is_none());
    }
}
