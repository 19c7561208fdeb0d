//! An atomic counter that stays shared with forked worker processes.

use std::ffi::c_void;
use std::fmt;
use std::mem::size_of;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, Ordering};

use nix::errno::Errno;
use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

use crate::errors::TimerError;

/// An `i64` living in an anonymous `MAP_SHARED` mapping.
///
/// A worker forked after the counter is created sees the very same cell, so
/// updates from either side are visible to the other. All access goes through
/// atomic operations.
pub struct SharedCounter {
    cell: NonNull<AtomicI64>,
}

// The mapping is only touched through `AtomicI64`.
unsafe impl Send for SharedCounter {}
unsafe impl Sync for SharedCounter {}

impl SharedCounter {
    /// Maps a new shared cell holding `value`.
    pub fn new(value: i64) -> Result<Self, TimerError> {
        let length = NonZeroUsize::new(size_of::<AtomicI64>()).ok_or(Errno::EINVAL)?;
        let mapping = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )?
        };
        let cell = mapping.cast::<AtomicI64>();
        unsafe { cell.as_ptr().write(AtomicI64::new(value)) };
        Ok(SharedCounter { cell })
    }

    fn atomic(&self) -> &AtomicI64 {
        unsafe { self.cell.as_ref() }
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.atomic().load(Ordering::SeqCst)
    }

    /// Overwrites the value.
    pub fn set(&self, value: i64) {
        self.atomic().store(value, Ordering::SeqCst);
    }

    /// Adds `delta` and returns the previous value.
    pub fn add(&self, delta: i64) -> i64 {
        self.atomic().fetch_add(delta, Ordering::SeqCst)
    }

    /// Applies `f` atomically, retrying on contention. Returns the previous
    /// value, or `None` if `f` declined to update.
    pub fn update<F>(&self, f: F) -> Option<i64>
    where
        F: FnMut(i64) -> Option<i64>,
    {
        self.atomic()
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, f)
            .ok()
    }
}

impl Drop for SharedCounter {
    fn drop(&mut self) {
        let _ = unsafe { munmap(self.cell.cast::<c_void>(), size_of::<AtomicI64>()) };
    }
}

impl fmt::Debug for SharedCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedCounter").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_writes() {
        let counter = SharedCounter::new(5).unwrap();
        assert_eq!(counter.get(), 5);
        counter.set(9);
        assert_eq!(counter.add(-4), 9);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn update_can_decline() {
        let counter = SharedCounter::new(0).unwrap();
        assert_eq!(counter.update(|v| (v > 0).then(|| v - 1)), None);
        counter.set(3);
        assert_eq!(counter.update(|v| Some(v.saturating_sub(1000).max(0))), Some(3));
        assert_eq!(counter.get(), 0);
    }
}
