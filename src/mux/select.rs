//! `select(2)`-backed multiplexer. Intended for the small-fd-count case
//! (development, or platforms without a scalable poll facility); limited to
//! `FD_SETSIZE` registered descriptors.

use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;

use super::{Interest, Multiplexer, ReadyEvent};

/// A [`Multiplexer`] backed by `select(2)`.
pub struct SelectMultiplexer {
    registered: BTreeMap<RawFd, Interest>,
    closed: bool,
}

impl SelectMultiplexer {
    /// Creates an empty multiplexer.
    pub fn new() -> Self {
        Self {
            registered: BTreeMap::new(),
            closed: false,
        }
    }
}

impl Default for SelectMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for SelectMultiplexer {
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE {
            return Err(Error::new(
                ErrorKind::Other,
                "select backend cannot register a descriptor >= FD_SETSIZE",
            ));
        }
        self.registered.insert(fd, interest);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) {
        self.registered.remove(&fd);
    }

    fn poll(&mut self, wait_ms: Option<u64>) -> Result<Vec<ReadyEvent>> {
        if self.closed || self.registered.is_empty() {
            return Ok(Vec::new());
        }

        // Safety: `fd_set`s are POD bitsets; zero-initializing then calling
        // `FD_ZERO` is the documented way to construct one.
        let mut read_set = unsafe {
            let mut s = MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(s.as_mut_ptr());
            s.assume_init()
        };
        let mut write_set = unsafe {
            let mut s = MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(s.as_mut_ptr());
            s.assume_init()
        };
        let mut except_set = unsafe {
            let mut s = MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(s.as_mut_ptr());
            s.assume_init()
        };

        let mut max_fd = 0;
        for (&fd, &interest) in self.registered.iter() {
            max_fd = max_fd.max(fd);
            // Safety: `fd` is a valid descriptor below `FD_SETSIZE` (checked
            // in `add`), and each `*_set` outlives this loop.
            unsafe {
                if interest.contains(Interest::READ) {
                    libc::FD_SET(fd, &mut read_set);
                }
                if interest.contains(Interest::WRITE) {
                    libc::FD_SET(fd, &mut write_set);
                }
                if interest.contains(Interest::EXCEPT) {
                    libc::FD_SET(fd, &mut except_set);
                }
            }
        }

        let mut timeout = wait_ms.map(|ms| libc::timeval {
            tv_sec: (ms / 1000) as libc::time_t,
            tv_usec: ((ms % 1000) * 1000) as libc::suseconds_t,
        });
        let timeout_ptr = timeout
            .as_mut()
            .map_or(std::ptr::null_mut(), |t| t as *mut _);

        // Safety: all three sets are valid `fd_set`s constructed above, and
        // `max_fd + 1` bounds the descriptors select(2) inspects.
        let rc = unsafe {
            libc::select(
                max_fd + 1,
                &mut read_set,
                &mut write_set,
                &mut except_set,
                timeout_ptr,
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
        for (&fd, _) in self.registered.iter() {
            let mut ready = Interest::none();
            let mut any = false;
            // Safety: `fd` was set in the same descriptor range tested above.
            unsafe {
                if libc::FD_ISSET(fd, &read_set) {
                    ready |= Interest::READ;
                    any = true;
                }
                if libc::FD_ISSET(fd, &write_set) {
                    ready |= Interest::WRITE;
                    any = true;
                }
                if libc::FD_ISSET(fd, &except_set) {
                    ready |= Interest::EXCEPT;
                    any = true;
                }
            }
            if any {
                events.push(ReadyEvent { fd, ready });
            }
        }

        Ok(events)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.registered.clear();
        self.closed = true;
    }
}

impl Drop for SelectMultiplexer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn listener_becomes_readable_on_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let fd = listener.as_raw_fd();

        let mut mux = SelectMultiplexer::new();
        mux.add(fd, Interest::READ).unwrap();

        assert!(mux.poll(Some(0)).unwrap().is_empty());

        let _client = std::net::TcpStream::connect(addr).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let events = mux.poll(Some(200)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].ready.contains(Interest::READ));

        mux.remove(fd);
        assert!(mux.poll(Some(0)).unwrap().is_empty());
    }

    #[test]
    fn double_close_is_a_no_op() {
        let mut mux = SelectMultiplexer::new();
        mux.close();
        mux.close();
    }
}
