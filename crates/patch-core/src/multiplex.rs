//! Descriptor-readiness multiplexing
//!
//! The event loop blocks on an abstract wait call rather than a concrete OS
//! primitive, so backends and tests never depend on a specific multiplexer.
//! The default implementation uses `poll(2)`.

use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::debug;

use crate::registry::ManagedFd;

/// Capability interface for the descriptor-readiness wait
pub trait Multiplexer {
    /// Block until at least one descriptor in `set` is ready for reading or
    /// the timeout elapses, returning the ready subset
    fn wait(&mut self, set: &[ManagedFd], timeout: Duration) -> io::Result<Vec<ManagedFd>>;
}

/// `poll(2)`-backed multiplexer
#[derive(Debug, Default)]
pub struct PollMultiplexer;

impl PollMultiplexer {
    /// Create a poll-based multiplexer
    pub fn new() -> Self {
        Self
    }
}

impl Multiplexer for PollMultiplexer {
    fn wait(&mut self, set: &[ManagedFd], timeout: Duration) -> io::Result<Vec<ManagedFd>> {
        let interest = PollFlags::POLLIN;
        let mut poll_fds: Vec<PollFd> = set
            .iter()
            .map(|entry| {
                // Safety: the registry snapshot outlives this wait call and
                // its descriptors stay open for at least that long.
                let fd = unsafe { BorrowedFd::borrow_raw(entry.fd) };
                PollFd::new(fd, interest)
            })
            .collect();

        let poll_timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
        match poll(&mut poll_fds, poll_timeout) {
            Ok(_) => {}
            // a signal interrupting the wait is a normal wake-up; the loop
            // re-checks its shutdown flag
            Err(Errno::EINTR) => {
                debug!("descriptor wait interrupted by signal");
                return Ok(Vec::new());
            }
            Err(errno) => return Err(io::Error::from(errno)),
        }

        let signaled = interest | PollFlags::POLLERR | PollFlags::POLLHUP;
        let ready = poll_fds
            .iter()
            .zip(set.iter())
            .filter(|(poll_fd, _)| {
                poll_fd
                    .revents()
                    .is_some_and(|revents| revents.intersects(signaled))
            })
            .map(|(_, entry)| *entry)
            .collect();
        Ok(ready)
    }
}
