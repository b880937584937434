//! Counting global allocator.
//!
//! Wraps [`System`] and keeps running totals that the runtime collector turns
//! into heap gauges. Counters stay at zero unless the binary installs it:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOCATOR: pulse::alloc::TrackingAllocator = pulse::alloc::TrackingAllocator::new();
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Bytes currently allocated.
    pub live_bytes: u64,
    /// Bytes allocated since start, never decreasing.
    pub total_bytes: u64,
    /// Number of allocations since start.
    pub allocations: u64,
    /// Number of deallocations since start.
    pub deallocations: u64,
}

impl AllocStats {
    /// Allocations not yet freed.
    pub fn live_objects(&self) -> u64 {
        self.allocations.saturating_sub(self.deallocations)
    }
}

/// [`GlobalAlloc`] wrapper over the system allocator that counts traffic.
#[derive(Debug)]
pub struct TrackingAllocator {
    system: System,
    live: AtomicU64,
    total: AtomicU64,
    allocs: AtomicU64,
    frees: AtomicU64,
}

impl TrackingAllocator {
    pub const fn new() -> Self {
        Self {
            system: System,
            live: AtomicU64::new(0),
            total: AtomicU64::new(0),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            live_bytes: self.live.load(Ordering::Relaxed),
            total_bytes: self.total.load(Ordering::Relaxed),
            allocations: self.allocs.load(Ordering::Relaxed),
            deallocations: self.frees.load(Ordering::Relaxed),
        }
    }

    fn record_alloc(&self, size: usize) {
        let size = size as u64;
        self.live.fetch_add(size, Ordering::Relaxed);
        self.total.fetch_add(size, Ordering::Relaxed);
        self.allocs.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dealloc(&self, size: usize) {
        self.live.fetch_sub(size as u64, Ordering::Relaxed);
        self.frees.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: every call is forwarded unchanged to `System`; the wrapper only
// updates atomics and never touches the returned memory.
unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.system.alloc(layout) };
        if !ptr.is_null() {
            self.record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.system.alloc_zeroed(layout) };
        if !ptr.is_null() {
            self.record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.system.dealloc(ptr, layout) };
        self.record_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { self.system.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            // Counted as a free of the old block plus a fresh allocation.
            self.record_dealloc(layout.size());
            self.record_alloc(new_size);
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_alloc_and_dealloc() {
        let tracker = TrackingAllocator::new();
        let layout = Layout::from_size_align(64, 8).unwrap();

        unsafe {
            let ptr = tracker.alloc(layout);
            assert!(!ptr.is_null());
            let stats = tracker.stats();
            assert_eq!(stats.live_bytes, 64);
            assert_eq!(stats.allocations, 1);
            assert_eq!(stats.live_objects(), 1);

            tracker.dealloc(ptr, layout);
        }

        let stats = tracker.stats();
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.total_bytes, 64);
        assert_eq!(stats.deallocations, 1);
        assert_eq!(stats.live_objects(), 0);
    }

    #[test]
    fn test_realloc_moves_live_bytes() {
        let tracker = TrackingAllocator::new();
        let layout = Layout::from_size_align(16, 8).unwrap();

        unsafe {
            let ptr = tracker.alloc(layout);
            let grown = tracker.realloc(ptr, layout, 128);
            assert!(!grown.is_null());
            assert_eq!(tracker.stats().live_bytes, 128);
            assert_eq!(tracker.stats().total_bytes, 144);
            tracker.dealloc(grown, Layout::from_size_align(128, 8).unwrap());
        }

        assert_eq!(tracker.stats().live_bytes, 0);
    }
}
