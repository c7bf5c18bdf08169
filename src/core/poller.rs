//! Readiness polling over every live pipe in the process
//!
//! One bounded-timeout `poll(2)` pass covers all sessions: each foreground
//! job's output pipe and every multiwatch worker's pipe. Sessions register
//! their descriptors as [`PollSource`]s; the control loop dispatches the
//! ready subset back to them in a fixed order.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::read;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};

/// What a pollable descriptor belongs to, within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The foreground pipeline's output pipe
    Job,
    /// Output pipe of the multiwatch worker at this index
    Watch(usize),
}

/// One registered descriptor: which session and which stream it drains into
#[derive(Debug, Clone, Copy)]
pub struct PollSource {
    pub session: usize,
    pub source: Source,
    pub fd: RawFd,
}

/// Poll every registered descriptor once with a bounded timeout, returning
/// the sources that are readable or have hung up, in registration order.
///
/// Registration order is the ordering guarantee: the caller registers
/// sessions in a fixed order with the foreground job before watch workers,
/// and this function preserves it.
pub fn poll_ready(sources: &[PollSource], timeout_ms: u16) -> Result<Vec<PollSource>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    // Raw fds registered here are owned by live sessions for the duration of
    // this call; borrow_raw is the same pattern used for fds that outlive a
    // single poll pass.
    let mut poll_fds: Vec<PollFd> = sources
        .iter()
        .map(|s| {
            let fd = unsafe { BorrowedFd::borrow_raw(s.fd) };
            PollFd::new(fd, PollFlags::POLLIN)
        })
        .collect();

    let timeout = PollTimeout::from(timeout_ms.min(250) as u8);
    match poll(&mut poll_fds, timeout) {
        Ok(0) => Ok(Vec::new()),
        Ok(_) => {
            let mut ready = Vec::new();
            for (pfd, src) in poll_fds.iter().zip(sources) {
                let revents = pfd.revents().unwrap_or(PollFlags::empty());
                if revents.intersects(
                    PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR,
                ) {
                    ready.push(*src);
                }
            }
            Ok(ready)
        }
        Err(Errno::EINTR) => Ok(Vec::new()),
        Err(e) => Err(e).context("poll failed"),
    }
}

/// Result of one non-blocking read attempt
#[derive(Debug)]
pub enum ReadOutcome {
    /// Some bytes arrived
    Data(Vec<u8>),
    /// End of stream: the writing side closed
    Eof,
    /// Nothing available right now
    WouldBlock,
    /// Hard read error; treat like end of stream
    Failed(Errno),
}

/// Read whatever is available from a non-blocking descriptor, one chunk.
/// Callers loop until [`ReadOutcome::WouldBlock`] or a terminal outcome.
pub fn read_chunk(fd: &OwnedFd) -> ReadOutcome {
    let mut buf = [0u8; 1024];
    match read(fd.as_fd(), &mut buf) {
        Ok(0) => ReadOutcome::Eof,
        Ok(n) => ReadOutcome::Data(buf[..n].to_vec()),
        Err(Errno::EAGAIN) => ReadOutcome::WouldBlock,
        Err(Errno::EINTR) => ReadOutcome::WouldBlock,
        Err(e) => ReadOutcome::Failed(e),
    }
}

/// Switch a descriptor to non-blocking mode
pub fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let flags = fcntl(fd.as_fd(), FcntlArg::F_GETFL).context("fcntl F_GETFL failed")?;
    let flags = OFlag::from_bits_retain(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_fd(), FcntlArg::F_SETFL(flags)).context("fcntl F_SETFL failed")?;
    Ok(())
}
