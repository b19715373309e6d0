//! `poll(2)`-backed multiplexer. Scales to large descriptor counts without
//! `select`'s `FD_SETSIZE` ceiling.

use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::os::unix::io::RawFd;

use super::{Interest, Multiplexer, ReadyEvent};

/// A [`Multiplexer`] backed by `poll(2)`.
pub struct PollMultiplexer {
    /// fd -> index into `pollfds`, kept in sync so removal is O(log n).
    index: HashMap<RawFd, usize>,
    pollfds: Vec<libc::pollfd>,
    closed: bool,
}

impl PollMultiplexer {
    /// Creates an empty multiplexer.
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            pollfds: Vec::new(),
            closed: false,
        }
    }

    fn to_poll_events(interest: Interest) -> i16 {
        let mut events = 0;
        if interest.contains(Interest::READ) {
            events |= libc::POLLIN;
        }
        if interest.contains(Interest::WRITE) {
            events |= libc::POLLOUT;
        }
        if interest.contains(Interest::EXCEPT) {
            events |= libc::POLLPRI;
        }
        events as i16
    }

    fn from_poll_revents(revents: i16) -> Interest {
        let revents = revents as i32;
        let mut ready = Interest::none();
        if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
            ready |= Interest::READ;
        }
        if revents & libc::POLLOUT != 0 {
            ready |= Interest::WRITE;
        }
        if revents & (libc::POLLPRI | libc::POLLERR) != 0 {
            ready |= Interest::EXCEPT;
        }
        ready
    }
}

impl Default for PollMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for PollMultiplexer {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        let events = Self::to_poll_events(interest);
        if let Some(&idx) = self.index.get(&fd) {
            self.pollfds[idx].events = events;
            return Ok(());
        }

        self.pollfds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
        self.index.insert(fd, self.pollfds.len() - 1);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) {
        let Some(idx) = self.index.remove(&fd) else {
            return;
        };
        let last = self.pollfds.len() - 1;
        self.pollfds.swap_remove(idx);
        if idx != last {
            let moved_fd = self.pollfds[idx].fd;
            self.index.insert(moved_fd, idx);
        }
    }

    fn poll(&mut self, wait_ms: Option<u64>) -> Result<Vec<ReadyEvent>> {
        if self.closed || self.pollfds.is_empty() {
            return Ok(Vec::new());
        }

        let timeout = wait_ms.map_or(-1, |ms| ms.min(i32::MAX as u64) as i32);

        // Safety: `pollfds` is a valid, densely packed array of `pollfd`.
        let rc = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout,
            )
        };

        if rc < 0 {
            let err = Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut events = Vec::with_capacity(rc.max(0) as usize);
        for pfd in &mut self.pollfds {
            if pfd.revents != 0 {
                events.push(ReadyEvent {
                    fd: pfd.fd,
                    ready: Self::from_poll_revents(pfd.revents),
                });
                pfd.revents = 0;
            }
        }

        Ok(events)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.pollfds.clear();
        self.index.clear();
        self.closed = true;
    }
}

impl Drop for PollMultiplexer {
    fn drop(&mut self) {
        self.close();
    }
}
