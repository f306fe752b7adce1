//! Fixed-size pool of reusable buffers.
//!
//! Buffers leave the pool wrapped in [`Pooled`], which remembers the slot and
//! pool they came from. The pool keeps one checked-out bit per slot so a
//! buffer that is returned twice, or returned to the wrong pool, is caught.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::buffer::DecoderBuffer;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A buffer currently checked out of a [`BufferPool`].
#[derive(Debug)]
pub struct Pooled<T> {
    pool_id: u64,
    slot: usize,
    inner: T,
}

impl<T> Pooled<T> {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
}

impl PoolStats {
    pub fn checked_out(&self) -> usize {
        self.capacity - self.available
    }
}

pub struct BufferPool<T> {
    id: u64,
    available: Vec<Pooled<T>>,
    checked_out: Vec<bool>,
}

impl<T: DecoderBuffer> BufferPool<T> {
    /// Builds a pool of `capacity` buffers, calling `make` once per slot.
    pub fn new(capacity: usize, mut make: impl FnMut() -> T) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let available = (0..capacity)
            .map(|slot| Pooled {
                pool_id: id,
                slot,
                inner: make(),
            })
            .collect();
        Self {
            id,
            available,
            checked_out: vec![false; capacity],
        }
    }

    /// Takes the next free buffer, or `None` when every slot is checked out.
    pub fn acquire(&mut self) -> Option<Pooled<T>> {
        let buffer = self.available.pop()?;
        debug_assert!(!self.checked_out[buffer.slot]);
        self.checked_out[buffer.slot] = true;
        Some(buffer)
    }

    /// Clears `buffer` and makes it available again.
    ///
    /// Returning a buffer that is not checked out from this pool is a caller
    /// bug. Debug builds panic; release builds log and drop the buffer.
    pub fn release(&mut self, mut buffer: Pooled<T>) {
        let owned = buffer.pool_id == self.id
            && self.checked_out.get(buffer.slot).copied().unwrap_or(false);
        debug_assert!(
            owned,
            "buffer slot {} released to pool {} but not checked out from it",
            buffer.slot, self.id
        );
        if !owned {
            log::warn!(
                "ignoring release of slot {} not checked out from pool {}",
                buffer.slot,
                self.id
            );
            return;
        }
        buffer.clear();
        self.checked_out[buffer.slot] = false;
        self.available.push(buffer);
    }

    /// Runs `f` on every buffer currently in the pool.
    pub fn for_each_available(&mut self, mut f: impl FnMut(&mut T)) {
        for buffer in self.available.iter_mut() {
            f(&mut buffer.inner);
        }
    }

    /// Whether `buffer` is checked out from this pool.
    pub fn is_checked_out(&self, buffer: &Pooled<T>) -> bool {
        buffer.pool_id == self.id
            && self.checked_out.get(buffer.slot).copied().unwrap_or(false)
    }

    pub fn capacity(&self) -> usize {
        self.checked_out.len()
    }

    pub fn available(&self) -> usize {
        self.available.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            available: self.available(),
        }
    }
}
