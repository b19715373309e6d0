//! Readiness multiplexer abstraction.
//!
//! Mirrors `examples/original_source/include/io/mux.h`'s `IsMultiplexer`
//! concept: a handle/interest registration plus a `poll` that reports
//! readiness within a millisecond timeout. Two backends are provided,
//! [`select::SelectMultiplexer`] and [`poll::PollMultiplexer`]; the event
//! loop (see [`crate::server::Server`]) is generic over [`Multiplexer`] and
//! never hardcodes a raw event-bit value.

pub mod poll;
pub mod select;

use std::io::Result;
use std::os::unix::io::RawFd;

/// A bitset of readiness interests. Only the three bits the spec documents
/// are exposed; each backend maps them onto its own representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    /// Readiness for reading.
    pub const READ: Interest = Interest(0b001);
    /// Readiness for writing.
    pub const WRITE: Interest = Interest(0b010);
    /// Exceptional condition (out-of-band data, socket error).
    pub const EXCEPT: Interest = Interest(0b100);

    /// Whether this set contains `other`.
    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    /// The empty interest set, used to accumulate readiness bits.
    pub(crate) fn none() -> Interest {
        Interest(0)
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

/// One readiness report: a registered handle and which interests fired.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    /// The file descriptor that became ready.
    pub fd: RawFd,
    /// The interests that fired for `fd`.
    pub ready: Interest,
}

/// A readiness-polling backend over a set of registered file descriptors.
///
/// Implementations must not report a handle after [`Multiplexer::remove`]
/// has been called for it, and [`Multiplexer::close`] must be idempotent.
pub trait Multiplexer: Send {
    /// Registers `fd` for the given `interest`. Re-registering an already
    /// registered `fd` replaces its interest set.
    fn add(&mut self, fd: RawFd, interest: Interest) -> Result<()>;

    /// Deregisters `fd`. A no-op if `fd` was not registered.
    fn remove(&mut self, fd: RawFd);

    /// Polls for readiness, blocking up to `wait_ms` milliseconds.
    /// `wait_ms == 0` is a non-blocking probe; `None` blocks indefinitely.
    fn poll(&mut self, wait_ms: Option<u64>) -> Result<Vec<ReadyEvent>>;

    /// Releases backend resources. Safe to call more than once.
    fn close(&mut self);
}
