//! Fixed-size block buffer pool.
//!
//! The pool pre-allocates `pool_size` buffers of `buffer_size` bytes and hands
//! them to SSTable blocks. When the pool runs dry, [`BlockBufferPool::borrow`]
//! falls back to a fresh heap buffer that is simply dropped when given back.
//!
//! ```text
//!   init() --> [available] --borrow()--> Block --give_back()--> [available]
//!                  |                                               |
//!   destroy() -----+ release now            borrowed ledger <------+
//!                    grace thread clears the ledger after `grace`
//! ```
//!
//! Pooled buffers can be pinned in RAM through a [`MemoryLocker`]; pinning is
//! best-effort and failures are logged rather than surfaced.

use anyhow::{bail, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Locks and unlocks buffer memory in RAM.
pub trait MemoryLocker: Send + Sync {
    fn lock(&self, buf: &[u8]) -> io::Result<()>;
    fn unlock(&self, buf: &[u8]) -> io::Result<()>;
}

/// Locker that does nothing; used when pinning is disabled or unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocker;

impl MemoryLocker for NoopLocker {
    fn lock(&self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn unlock(&self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// Locker backed by `mlock(2)` / `munlock(2)`.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MlockLocker;

#[cfg(unix)]
impl MemoryLocker for MlockLocker {
    fn lock(&self, buf: &[u8]) -> io::Result<()> {
        // SAFETY: the pointer and length describe a live, initialized slice.
        let rc = unsafe { libc::mlock(buf.as_ptr().cast(), buf.len()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn unlock(&self, buf: &[u8]) -> io::Result<()> {
        // SAFETY: as above.
        let rc = unsafe { libc::munlock(buf.as_ptr().cast(), buf.len()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Picks the platform locker when `pin` is set.
#[cfg(unix)]
pub fn default_locker(pin: bool) -> Arc<dyn MemoryLocker> {
    if pin {
        Arc::new(MlockLocker)
    } else {
        Arc::new(NoopLocker)
    }
}

#[cfg(not(unix))]
pub fn default_locker(pin: bool) -> Arc<dyn MemoryLocker> {
    if pin {
        warn!("buffer pinning is not supported on this platform");
    }
    Arc::new(NoopLocker)
}

/// A fixed-capacity byte buffer with a write cursor.
///
/// Storage never reallocates, so a pooled buffer keeps its address for its
/// whole life; the pool uses that address as the buffer's identity.
pub struct BlockBuffer {
    data: Box<[u8]>,
    pos: usize,
    pooled: bool,
}

impl BlockBuffer {
    fn new(capacity: usize, pooled: bool) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            pooled,
        }
    }

    /// An unpooled buffer; dropped rather than recycled on give-back.
    pub fn heap(capacity: usize) -> Self {
        Self::new(capacity, false)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes written so far.
    #[must_use]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.pos]
    }

    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub fn clear(&mut self) {
        self.pos = 0;
    }

    fn id(&self) -> usize {
        self.data.as_ptr() as usize
    }
}

impl Write for BlockBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        self.data[self.pos..self.pos + n].copy_from_slice(&buf[..n]);
        self.pos += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for BlockBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBuffer")
            .field("capacity", &self.capacity())
            .field("pos", &self.pos)
            .field("pooled", &self.pooled)
            .finish()
    }
}

#[derive(Default)]
struct PoolState {
    available: VecDeque<BlockBuffer>,
    borrowed: HashSet<usize>,
}

/// Shared pool of block-sized buffers.
///
/// Borrow and give-back take the shutdown gate shared; `init` and `destroy`
/// take it exclusively, so no buffer moves while the pool changes state.
pub struct BlockBufferPool {
    pool_size: usize,
    buffer_size: usize,
    gate: RwLock<()>,
    state: Mutex<PoolState>,
    active: AtomicBool,
    locker: Arc<dyn MemoryLocker>,
}

impl BlockBufferPool {
    /// Creates an empty, inactive pool. Call [`init`](Self::init) before use.
    pub fn new(pool_size: usize, buffer_size: usize, locker: Arc<dyn MemoryLocker>) -> Self {
        Self {
            pool_size,
            buffer_size,
            gate: RwLock::new(()),
            state: Mutex::new(PoolState::default()),
            active: AtomicBool::new(false),
            locker,
        }
    }

    /// Allocates (and optionally pins) every pooled buffer and activates the
    /// pool. Calling it on an active pool is a no-op.
    pub fn init(&self) {
        let _gate = self.gate.write();
        if self.active.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock();
        let mut pin_failures = 0usize;
        for _ in 0..self.pool_size {
            let buf = BlockBuffer::new(self.buffer_size, true);
            if self.locker.lock(&buf.data).is_err() {
                pin_failures += 1;
            }
            state.available.push_back(buf);
        }
        if pin_failures > 0 {
            warn!(pin_failures, "could not pin some block buffers in memory");
        }
        self.active.store(true, Ordering::Release);
        info!(
            pool_size = self.pool_size,
            buffer_size = self.buffer_size,
            "block buffer pool initialized"
        );
    }

    /// Takes a buffer from the pool, or allocates an unpooled one when the
    /// pool is empty.
    ///
    /// # Errors
    ///
    /// Returns an error once the pool has been destroyed or before `init`.
    pub fn borrow(&self) -> Result<BlockBuffer> {
        let _gate = self.gate.read();
        if !self.active.load(Ordering::Acquire) {
            bail!("block buffer pool is not active");
        }
        let mut state = self.state.lock();
        match state.available.pop_front() {
            Some(buf) => {
                state.borrowed.insert(buf.id());
                Ok(buf)
            }
            None => {
                debug!(buffer_size = self.buffer_size, "pool exhausted, allocating heap buffer");
                Ok(BlockBuffer::heap(self.buffer_size))
            }
        }
    }

    /// Like [`borrow`](Self::borrow), but guarantees at least `min` bytes of
    /// capacity. Oversized requests are served from the heap.
    ///
    /// # Errors
    ///
    /// Same as [`borrow`](Self::borrow).
    pub fn borrow_at_least(&self, min: usize) -> Result<BlockBuffer> {
        if min <= self.buffer_size {
            return self.borrow();
        }
        if !self.active.load(Ordering::Acquire) {
            bail!("block buffer pool is not active");
        }
        Ok(BlockBuffer::heap(min))
    }

    /// Returns a buffer. Pooled buffers go back to the available queue while
    /// the pool is active and are released otherwise; unpooled buffers and
    /// buffers the pool no longer tracks are dropped.
    pub fn give_back(&self, mut buf: BlockBuffer) {
        if !buf.pooled {
            return;
        }
        let _gate = self.gate.read();
        let mut state = self.state.lock();
        if !state.borrowed.remove(&buf.id()) {
            return;
        }
        if self.active.load(Ordering::Acquire) {
            buf.clear();
            state.available.push_back(buf);
        } else {
            drop(state);
            self.release(buf);
        }
    }

    /// Deactivates the pool and releases every available buffer.
    ///
    /// Buffers still borrowed are released when given back; after `grace` a
    /// helper thread forgets the remaining ones so late returns are dropped.
    /// Repeated calls are no-ops.
    pub fn destroy(self: &Arc<Self>, grace: Duration) {
        let drained: Vec<BlockBuffer> = {
            let _gate = self.gate.write();
            if !self.active.swap(false, Ordering::AcqRel) {
                return;
            }
            let mut state = self.state.lock();
            state.available.drain(..).collect()
        };
        let released = drained.len();
        for buf in drained {
            self.release(buf);
        }
        info!(released, "block buffer pool destroyed");

        let pool = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(grace);
            let _gate = pool.gate.write();
            let mut state = pool.state.lock();
            if !state.borrowed.is_empty() {
                warn!(
                    outstanding = state.borrowed.len(),
                    "forgetting block buffers not returned within grace period"
                );
                state.borrowed.clear();
            }
        });
    }

    fn release(&self, buf: BlockBuffer) {
        if let Err(e) = self.locker.unlock(&buf.data) {
            debug!(error = %e, "failed to unpin block buffer");
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    #[must_use]
    pub fn available_count(&self) -> usize {
        self.state.lock().available.len()
    }

    #[must_use]
    pub fn borrowed_count(&self) -> usize {
        self.state.lock().borrowed.len()
    }
}

impl std::fmt::Debug for BlockBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBufferPool")
            .field("pool_size", &self.pool_size)
            .field("buffer_size", &self.buffer_size)
            .field("active", &self.is_active())
            .field("available", &self.available_count())
            .field("borrowed", &self.borrowed_count())
            .finish()
    }
}
