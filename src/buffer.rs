//! The shared byte pool used to stage request and response bytes.
//!
//! A connection's request/response buffers must survive being handed to a
//! worker thread without being copied, while the owning thread may still be
//! appending to them. `SharedPool` is an `Arc`-counted handle (atomic
//! refcount, no counter mutex) around a single `RwLock`-guarded backing
//! region, plus a few lock-free cursors. Reads take the lock shared; writes
//! and grows take it exclusive.

use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Bytes to grow by when a write overruns capacity and `auto_expand` is set.
const GROW_STEP: u64 = 1024;

/// A single, independently owned region of bytes returned from a read.
#[derive(Debug)]
pub struct FixedHolder {
    bytes: Box<[u8]>,
}

impl FixedHolder {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Borrows the held bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the holder, returning an owned `Vec<u8>`.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec()
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the holder is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Values read/written by the typed accessors must be plain, fixed-width
/// data: fundamental numeric types, `bool`, or fixed-size byte arrays.
///
/// # Safety
/// Implementors must be `Copy`, contain no padding that matters, and be
/// valid for any bit pattern of their size (so reading raw bytes into them
/// is sound).
pub unsafe trait PlainData: Copy + Sized + 'static {}

macro_rules! impl_plain_data {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl PlainData for $t {})*
    };
}

impl_plain_data!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64, bool);

unsafe impl<const N: usize> PlainData for [u8; N] {}

struct Region {
    data: Vec<u8>,
}

/// A reference-counted, growable byte buffer with a position/limit/capacity
/// discipline, shareable across threads without copying.
///
/// Invariant: `0 <= position <= limit <= capacity`. `capacity` only grows.
#[derive(Clone)]
pub struct SharedPool {
    inner: Arc<Inner>,
}

struct Inner {
    region: RwLock<Region>,
    position: AtomicU64,
    limit: AtomicU64,
    eof: AtomicBool,
    auto_expand: AtomicBool,
}

impl std::fmt::Debug for SharedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPool")
            .field("capacity", &self.capacity())
            .field("limit", &self.limit())
            .field("position", &self.position())
            .field("eof", &self.is_eof())
            .finish()
    }
}

impl SharedPool {
    /// Allocates a zeroed pool of the given capacity.
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                region: RwLock::new(Region {
                    data: vec![0u8; capacity as usize],
                }),
                position: AtomicU64::new(0),
                limit: AtomicU64::new(0),
                eof: AtomicBool::new(false),
                auto_expand: AtomicBool::new(false),
            }),
        }
    }

    /// Enables `auto_expand`: writes beyond capacity reallocate instead of
    /// failing.
    pub fn set_auto_expand(&self, enabled: bool) {
        self.inner.auto_expand.store(enabled, Ordering::Relaxed);
    }

    /// Current allocated capacity.
    pub fn capacity(&self) -> u64 {
        self.inner.region.read().unwrap().data.len() as u64
    }

    /// Logical length: highest index ever written + 1.
    pub fn limit(&self) -> u64 {
        self.inner.limit.load(Ordering::Acquire)
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.inner.position.load(Ordering::Acquire)
    }

    /// Moves the cursor to an absolute position. Does not affect `limit`.
    pub fn position_set(&self, pos: u64) {
        self.inner.position.store(pos, Ordering::Release);
    }

    /// Resets the cursor to the start, clearing EOF.
    pub fn rewind(&self) {
        self.inner.position.store(0, Ordering::Release);
        self.inner.eof.store(false, Ordering::Release);
    }

    /// Whether the last read or write observed end-of-buffer.
    pub fn is_eof(&self) -> bool {
        self.inner.eof.load(Ordering::Acquire)
    }

    /// Resets the pool to an empty, zero-length state without shrinking the
    /// backing allocation.
    pub fn close(&self) {
        self.inner.position.store(0, Ordering::Release);
        self.inner.limit.store(0, Ordering::Release);
        self.inner.eof.store(false, Ordering::Release);
    }

    fn grow_to(&self, required: u64) -> Result<()> {
        if !self.inner.auto_expand.load(Ordering::Relaxed) {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                "pool capacity exceeded and auto_expand is disabled",
            ));
        }

        let mut region = self.inner.region.write().unwrap();
        let current = region.data.len() as u64;
        if required <= current {
            return Ok(());
        }
        let deficit = required - current;
        let new_cap = current + deficit.max(GROW_STEP);
        region.data.resize(new_cap as usize, 0);
        Ok(())
    }

    /// Reads `len` bytes starting at absolute offset `off`, independent of
    /// the cursor. Takes the lock shared.
    pub fn read_at(&self, off: u64, len: u64) -> Result<FixedHolder> {
        let region = self.inner.region.read().unwrap();
        let cap = region.data.len() as u64;
        if off.checked_add(len).map_or(true, |end| end > cap) {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "read_at out of bounds",
            ));
        }
        let start = off as usize;
        let end = (off + len) as usize;
        Ok(FixedHolder::new(region.data[start..end].to_vec()))
    }

    /// Reads up to `len` bytes from the cursor, clamped to `limit -
    /// position`. Advances the cursor by the bytes actually read.
    pub fn read_next(&self, len: u64) -> Result<FixedHolder> {
        let position = self.position();
        let limit = self.limit();

        if position >= limit {
            self.inner.eof.store(true, Ordering::Release);
            return Err(Error::new(ErrorKind::UnexpectedEof, "pool exhausted"));
        }

        let clamped = len.min(limit - position);
        let holder = self.read_at(position, clamped)?;
        self.inner
            .position
            .store(position + clamped, Ordering::Release);
        Ok(holder)
    }

    /// Overwrites `len` bytes at absolute offset `off`. Grows the pool first
    /// if the write would overrun capacity and `auto_expand` is set;
    /// otherwise fails without copying.
    pub fn write_at(&self, off: u64, bytes: &[u8]) -> Result<()> {
        let len = bytes.len() as u64;
        let required = off + len;
        if required > self.capacity() {
            self.grow_to(required)?;
        }

        let mut region = self.inner.region.write().unwrap();
        let start = off as usize;
        region.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Appends `bytes` at the cursor, advancing it and raising `limit` to
    /// `position + bytes.len()` if that exceeds the current limit. Sets EOF
    /// when the write fills capacity exactly.
    pub fn write_next(&self, bytes: &[u8]) -> Result<()> {
        let position = self.position();
        self.write_at(position, bytes)?;

        let new_position = position + bytes.len() as u64;
        self.inner.position.store(new_position, Ordering::Release);

        let limit = self.limit();
        if new_position > limit {
            self.inner.limit.store(new_position, Ordering::Release);
        }

        if new_position == self.capacity() {
            self.inner.eof.store(true, Ordering::Release);
        }

        Ok(())
    }

    /// Reads a fixed-width typed value from the cursor. Fails (and raises
    /// EOF) if the read would cross `limit`.
    pub fn read_typed<T: PlainData>(&self) -> Result<T> {
        let width = std::mem::size_of::<T>() as u64;
        let position = self.position();
        let limit = self.limit();

        if position + width > limit {
            self.inner.eof.store(true, Ordering::Release);
            return Err(Error::new(ErrorKind::UnexpectedEof, "typed read past limit"));
        }

        let holder = self.read_at(position, width)?;
        self.inner
            .position
            .store(position + width, Ordering::Release);

        // Safety: `T: PlainData` guarantees `T` is valid for any bit pattern
        // of its size, and `holder` holds exactly `size_of::<T>()` bytes.
        let mut value = std::mem::MaybeUninit::<T>::uninit();
        unsafe {
            std::ptr::copy_nonoverlapping(
                holder.as_slice().as_ptr(),
                value.as_mut_ptr() as *mut u8,
                width as usize,
            );
            Ok(value.assume_init())
        }
    }

    /// Writes a fixed-width typed value at the cursor, following the same
    /// growth rule as [`SharedPool::write_next`].
    pub fn write_typed<T: PlainData>(&self, value: T) -> Result<()> {
        let width = std::mem::size_of::<T>();
        // Safety: `T: PlainData` is `Copy` and we only read its bytes for
        // the duration of this call.
        let bytes =
            unsafe { std::slice::from_raw_parts(&value as *const T as *const u8, width) };
        self.write_next(bytes)
    }
}
