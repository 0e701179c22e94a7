//! Heap accounting for `/debug/pprof/heap`.
//!
//! [`CountingAlloc`] forwards to the system allocator and keeps process-wide
//! counters. A binary opts in with
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: reqlens_server::obs::CountingAlloc = reqlens_server::obs::CountingAlloc::new();
//! ```
//!
//! Without it the counters stay at zero and [`HeapStats::installed`] is false.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static DEALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static ALLOCATED_BYTES: AtomicUsize = AtomicUsize::new(0);
static FREED_BYTES: AtomicUsize = AtomicUsize::new(0);
static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
static PEAK_LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Counting wrapper around [`System`].
pub struct CountingAlloc;

impl CountingAlloc {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for CountingAlloc {
    fn default() -> Self {
        Self::new()
    }
}

fn on_alloc(size: usize) {
    INSTALLED.store(true, Ordering::Relaxed);
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    ALLOCATED_BYTES.fetch_add(size, Ordering::Relaxed);
    let live = LIVE_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_LIVE_BYTES.fetch_max(live, Ordering::Relaxed);
}

fn on_dealloc(size: usize) {
    DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    FREED_BYTES.fetch_add(size, Ordering::Relaxed);
    LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
}

// Counters are plain atomics: nothing here allocates.
unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            on_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        on_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new = System.realloc(ptr, layout, new_size);
        if !new.is_null() {
            on_dealloc(layout.size());
            on_alloc(new_size);
        }
        new
    }
}

/// Point-in-time heap counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HeapStats {
    pub installed: bool,
    pub allocations: usize,
    pub deallocations: usize,
    pub allocated_bytes: usize,
    pub freed_bytes: usize,
    pub live_bytes: usize,
    pub peak_live_bytes: usize,
}

impl HeapStats {
    pub fn snapshot() -> Self {
        Self {
            installed: INSTALLED.load(Ordering::Relaxed),
            allocations: ALLOCATIONS.load(Ordering::Relaxed),
            deallocations: DEALLOCATIONS.load(Ordering::Relaxed),
            allocated_bytes: ALLOCATED_BYTES.load(Ordering::Relaxed),
            freed_bytes: FREED_BYTES.load(Ordering::Relaxed),
            live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
            peak_live_bytes: PEAK_LIVE_BYTES.load(Ordering::Relaxed),
        }
    }

    /// Activity between `earlier` and `self`. Live bytes may shrink, so the
    /// delta is signed.
    pub fn since(&self, earlier: &HeapStats) -> HeapDelta {
        HeapDelta {
            allocations: self.allocations.saturating_sub(earlier.allocations),
            deallocations: self.deallocations.saturating_sub(earlier.deallocations),
            allocated_bytes: self.allocated_bytes.saturating_sub(earlier.allocated_bytes),
            freed_bytes: self.freed_bytes.saturating_sub(earlier.freed_bytes),
            live_bytes: self.live_bytes as i64 - earlier.live_bytes as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapDelta {
    pub allocations: usize,
    pub deallocations: usize,
    pub allocated_bytes: usize,
    pub freed_bytes: usize,
    pub live_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_counted_between_snapshots() {
        let earlier = HeapStats {
            installed: true,
            allocations: 10,
            deallocations: 4,
            allocated_bytes: 1000,
            freed_bytes: 300,
            live_bytes: 700,
            peak_live_bytes: 800,
        };
        let later = HeapStats {
            allocations: 15,
            deallocations: 12,
            allocated_bytes: 1200,
            freed_bytes: 900,
            live_bytes: 300,
            ..earlier
        };

        let d = later.since(&earlier);
        assert_eq!(d.allocations, 5);
        assert_eq!(d.deallocations, 8);
        assert_eq!(d.allocated_bytes, 200);
        assert_eq!(d.freed_bytes, 600);
        assert_eq!(d.live_bytes, -400);
    }

    #[test]
    fn counting_hooks_track_live_and_peak() {
        // Drive the hooks directly; the unit-test binary keeps the system allocator.
        let before = HeapStats::snapshot();
        on_alloc(4096);
        let during = HeapStats::snapshot();
        on_dealloc(4096);
        let after = HeapStats::snapshot();

        assert!(during.installed);
        assert!(during.peak_live_bytes >= 4096);
        assert_eq!(during.since(&before).allocated_bytes, 4096);
        assert_eq!(after.since(&during).freed_bytes, 4096);
    }
}
