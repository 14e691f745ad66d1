//! Shared engine in-buffer — single-producer/single-consumer frame hand-off.
//!
//! The orchestrator (producer) fills the buffer with 16-bit PCM frames read
//! from the audio source; the engine processing thread (consumer) drains it
//! in whole blocks. A three-state atomic lock arbitrates:
//!
//! * `free` — nobody touches the region,
//! * `borrowed` — the producer is mid-fill,
//! * `processed` — the consumer is draining.
//!
//! Only the producer may move `free -> borrowed` and only the consumer may
//! move `free -> processed`; each side returns to `free` when done. The
//! consumer only takes the buffer once it holds a full block (`size >=
//! threshold`) or end-of-stream has been latched, so it naturally waits for
//! frame blocks without any extra bookkeeping.
//!
//! RAII guards make the protocol misuse-proof: a [`BorrowedBuf`] is the
//! only way to write, a [`ProcessedBuf`] the only way to read, and dropping
//! either returns the lock to `free`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};

const LOCK_FREE: u8 = 0;
const LOCK_BORROWED: u8 = 1;
const LOCK_PROCESSED: u8 = 2;

/// Bounded sample buffer shared between one producer and one consumer.
///
/// # Safety argument
///
/// `data`, `size`, `sof` and `eof` live in `UnsafeCell`s and are only ever
/// accessed through a guard that holds the corresponding non-`free` lock
/// state. The lock transitions use acquire/release orderings, so everything
/// one side wrote before releasing to `free` is visible to the other side
/// after its successful compare-exchange away from `free`. At most one
/// guard can exist at a time (the lock has a single non-`free` holder), so
/// there is never a concurrent read and write of the cells.
pub struct InBuf {
    data: UnsafeCell<Box<[i16]>>,
    size: UnsafeCell<usize>,
    sof: UnsafeCell<bool>,
    eof: UnsafeCell<bool>,
    lock: AtomicU8,
    /// Samples required before the consumer takes the buffer.
    threshold: usize,
    /// Wakes the consumer after a producer commit (or on shutdown).
    signal: Mutex<bool>,
    wake: Condvar,
}

// SAFETY: all shared mutable state is guarded by the atomic lock protocol
// described on the struct; see the guards below for the access rules.
#[allow(unsafe_code)]
unsafe impl Sync for InBuf {}
#[allow(unsafe_code)]
unsafe impl Send for InBuf {}

impl InBuf {
    /// Create a buffer holding at most `capacity` samples, handed to the
    /// consumer in blocks of at least `threshold` samples.
    #[must_use]
    pub fn new(capacity: usize, threshold: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![0i16; capacity].into_boxed_slice()),
            size: UnsafeCell::new(0),
            sof: UnsafeCell::new(false),
            eof: UnsafeCell::new(false),
            lock: AtomicU8::new(LOCK_FREE),
            threshold,
            signal: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn try_lock(&self, desired: u8) -> bool {
        self.lock
            .compare_exchange(LOCK_FREE, desired, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.lock.store(LOCK_FREE, Ordering::Release);
    }

    /// Producer side: try to take the writable tail of the buffer.
    ///
    /// Returns `None` when the lock is not `free` or the buffer is already
    /// full; in the latter case the lock is released again immediately.
    pub fn borrow(&self) -> Option<BorrowedBuf<'_>> {
        if !self.try_lock(LOCK_BORROWED) {
            return None;
        }

        // SAFETY: we hold `borrowed`, so no other access to the cells exists.
        #[allow(unsafe_code)]
        let start = unsafe { *self.size.get() };

        // SAFETY: as above.
        #[allow(unsafe_code)]
        let capacity = unsafe { (&*self.data.get()).len() };

        if start >= capacity {
            tracing::trace!("in-buf is full");
            self.unlock();
            return None;
        }

        Some(BorrowedBuf {
            buf: self,
            start,
            committed: false,
        })
    }

    /// Consumer side: try to take the buffer for processing.
    ///
    /// Succeeds only when a full block is available (`size >= threshold`)
    /// or end-of-stream has been latched; otherwise the lock is released
    /// and `None` is returned so the consumer can wait for more samples.
    pub fn acquire_for_processing(&self) -> Option<ProcessedBuf<'_>> {
        if !self.try_lock(LOCK_PROCESSED) {
            tracing::trace!("cannot acquire for processing, buf is not free");
            return None;
        }

        // SAFETY: we hold `processed`, so no other access to the cells exists.
        #[allow(unsafe_code)]
        let (size, eof) = unsafe { (*self.size.get(), *self.eof.get()) };

        if !eof && size < self.threshold {
            self.unlock();
            return None;
        }

        Some(ProcessedBuf { buf: self })
    }

    /// Reset size and flags (engine reset after the processing loop ended).
    ///
    /// Takes the consumer side of the lock, so a producer that is still
    /// mid-borrow finishes its commit first.
    pub fn clear(&self) {
        while !self.try_lock(LOCK_PROCESSED) {
            std::thread::yield_now();
        }
        // SAFETY: we hold `processed`, so no other access to the cells exists.
        #[allow(unsafe_code)]
        unsafe {
            *self.size.get() = 0;
            *self.sof.get() = false;
            *self.eof.get() = false;
        }
        self.unlock();
    }

    /// Block the consumer until a producer commit (or shutdown) signals.
    pub fn wait_for_samples(&self) {
        let mut signalled = self
            .signal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while !*signalled {
            signalled = self
                .wake
                .wait(signalled)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *signalled = false;
    }

    /// Wake the consumer regardless of buffer state (used on commit and on
    /// engine shutdown).
    pub fn notify(&self) {
        let mut signalled = self
            .signal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *signalled = true;
        drop(signalled);
        self.wake.notify_all();
    }

    /// Current lock state, for diagnostics and tests.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.lock.load(Ordering::Acquire) == LOCK_FREE
    }
}

// ── Producer guard ─────────────────────────────────────────────────

/// Writable tail region of the buffer, held while the lock is `borrowed`.
pub struct BorrowedBuf<'a> {
    buf: &'a InBuf,
    start: usize,
    committed: bool,
}

impl BorrowedBuf<'_> {
    /// The writable region. Its length is the remaining capacity.
    pub fn frames(&mut self) -> &mut [i16] {
        // SAFETY: this guard holds `borrowed`; no consumer guard can exist
        // concurrently, and the producer is single-threaded.
        #[allow(unsafe_code)]
        unsafe {
            &mut (&mut *self.buf.data.get())[self.start..]
        }
    }

    /// Commit `written` samples, latch the stream flags, release the lock
    /// to `free`, and wake the consumer.
    ///
    /// `sof` is sticky once true; `eof` is stored as given.
    pub fn commit(mut self, written: usize, sof: bool, eof: bool) {
        // SAFETY: still holding `borrowed`.
        #[allow(unsafe_code)]
        unsafe {
            let capacity = (&*self.buf.data.get()).len();
            *self.buf.size.get() = (self.start + written).min(capacity);
            *self.buf.eof.get() = eof;
            if sof {
                *self.buf.sof.get() = true;
            }
        }
        self.committed = true;
        self.buf.unlock();
        self.buf.notify();
    }
}

impl Drop for BorrowedBuf<'_> {
    fn drop(&mut self) {
        if !self.committed {
            // Abandoned borrow: nothing was written, just release.
            self.buf.unlock();
        }
    }
}

// ── Consumer guard ─────────────────────────────────────────────────

/// Readable block of the buffer, held while the lock is `processed`.
///
/// The orchestrator may observe but never mutate the buffer while this
/// guard exists, which is what makes cancellation safe. Dropping the guard
/// clears the buffer (the block has been consumed) and releases the lock.
pub struct ProcessedBuf<'a> {
    buf: &'a InBuf,
}

impl ProcessedBuf<'_> {
    /// The committed samples.
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        // SAFETY: this guard holds `processed`; the producer cannot write
        // concurrently.
        #[allow(unsafe_code)]
        unsafe {
            let size = *self.buf.size.get();
            &(&*self.buf.data.get())[..size]
        }
    }

    /// Whether the start-of-stream flag was latched.
    #[must_use]
    pub fn sof(&self) -> bool {
        // SAFETY: as in `samples`.
        #[allow(unsafe_code)]
        unsafe {
            *self.buf.sof.get()
        }
    }

    /// Whether end-of-stream was reported by the producer.
    #[must_use]
    pub fn eof(&self) -> bool {
        // SAFETY: as in `samples`.
        #[allow(unsafe_code)]
        unsafe {
            *self.buf.eof.get()
        }
    }
}

impl Drop for ProcessedBuf<'_> {
    fn drop(&mut self) {
        // The block has been consumed: reset size and flags, release.
        // SAFETY: still holding `processed`.
        #[allow(unsafe_code)]
        unsafe {
            *self.buf.size.get() = 0;
            *self.buf.sof.get() = false;
            *self.buf.eof.get() = false;
        }
        self.buf.unlock();
    }
}
