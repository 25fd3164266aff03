//! Heap-usage overlay
//!
//! An opt-in allocation-hook layer that feeds byte deltas into whichever
//! recorder counter it is handed. It does not replace the global allocator:
//! the application routes its own allocations through a [`HeapTracker`],
//! which forwards to a raw allocator after updating the counters. Tree shape
//! is never altered here; the overlay is purely a counter source.
//!
//! Every tracked block is preceded by an 8-byte header carrying a magic tag
//! and the requested size, so deallocation can tell tracked blocks apart
//! from foreign ones (e.g. blocks allocated before instrumentation was
//! installed). Foreign blocks are counted as bad deallocations and released
//! as-is; deallocation never fails and never leaks.

use std::ops::Add;
use std::ptr::NonNull;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::recorder::CounterAccess;

/// Magic tag written into the header of every tracked block.
const ALLOC_TAG: u32 = 0x4321_cba9;

/// Header bytes preceding each payload: `u32` tag + `u32` size.
const HEADER_BYTES: usize = 8;

/// Heap counters embedded as a node measure.
///
/// `peak >= current` holds at every observation point. Frees may exceed
/// tracked allocations only through `bad_deallocations`; `current` itself
/// saturates rather than wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapUsage {
    /// Bytes allocated while the scope was current, as though nothing were
    /// ever freed.
    pub total: u64,
    /// Bytes currently allocated and attributed to the scope.
    pub current: u64,
    /// High-water mark of `current`.
    pub peak: u64,
    /// Deallocation requests for blocks this overlay never tagged.
    pub bad_deallocations: u64,
}

impl Add for HeapUsage {
    type Output = HeapUsage;

    /// Report combine: byte counters sum; peaks do not add up across
    /// scopes, so the combined peak is the larger of the two.
    fn add(self, rhs: HeapUsage) -> HeapUsage {
        HeapUsage {
            total: self.total + rhs.total,
            current: self.current + rhs.current,
            peak: self.peak.max(rhs.peak),
            bad_deallocations: self.bad_deallocations + rhs.bad_deallocations,
        }
    }
}

/// Raw allocation/deallocation primitives beneath the overlay.
///
/// Shaped like `malloc`/`free`: deallocation needs no size, so the overlay
/// can release foreign pointers it knows nothing about.
pub trait RawAlloc {
    /// Allocates `size` bytes; returns null on exhaustion.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Releases a pointer previously returned by [`allocate`](RawAlloc::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator and must not be used again.
    unsafe fn deallocate(&self, ptr: *mut u8);
}

/// Default raw allocator, backed by the C heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAlloc;

impl RawAlloc for SystemAlloc {
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions; a null return is handled by
        // the caller.
        unsafe { libc::malloc(size).cast::<u8>() }
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        // SAFETY: caller guarantees `ptr` came from `allocate`.
        unsafe { libc::free(ptr.cast::<libc::c_void>()) }
    }
}

/// Allocation tracker feeding a recorder's current counter.
///
/// Counting is skipped while the counter source reports
/// `recorder_internal_running()`, so the recorder's own bookkeeping
/// allocations never pollute application counters. The tracker's own
/// allocate/deallocate paths perform no heap allocation themselves (header
/// writes and pointer arithmetic only), so they cannot recurse.
///
/// Payloads are offset 8 bytes from the raw allocation and are therefore
/// suitably aligned for types with alignment up to 8.
#[derive(Debug, Default)]
pub struct HeapTracker<A: RawAlloc = SystemAlloc> {
    raw: A,
}

impl HeapTracker<SystemAlloc> {
    /// Tracker over the C heap.
    pub fn new() -> Self {
        HeapTracker { raw: SystemAlloc }
    }
}

impl<A: RawAlloc> HeapTracker<A> {
    /// Tracker over a caller-supplied raw allocator.
    pub fn with_alloc(raw: A) -> Self {
        HeapTracker { raw }
    }

    /// Allocates `size` payload bytes, tags the block, and credits the
    /// counter when tracking is active.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] when the underlying allocator fails; the
    /// tracker adds no failure modes of its own.
    pub fn allocate<C>(&self, size: usize, counter: &mut C) -> Result<NonNull<u8>>
    where
        C: CounterAccess<HeapUsage>,
    {
        let full = size.checked_add(HEADER_BYTES).ok_or(Error::OutOfMemory)?;
        let base = self.raw.allocate(full);
        let Some(base) = NonNull::new(base) else {
            return Err(Error::OutOfMemory);
        };

        // Sizes beyond the header's width are recorded saturated.
        let recorded = u32::try_from(size).unwrap_or(u32::MAX);
        // SAFETY: `base` points to at least `HEADER_BYTES` writable bytes.
        unsafe {
            let header = base.as_ptr().cast::<u32>();
            header.write_unaligned(ALLOC_TAG);
            header.add(1).write_unaligned(recorded);
        }

        if !counter.recorder_internal_running() {
            let usage = counter.cnt_mut();
            usage.total += u64::from(recorded);
            usage.current += u64::from(recorded);
            usage.peak = usage.peak.max(usage.current);
        }

        // SAFETY: `full > HEADER_BYTES`, so the payload start is in bounds.
        Ok(unsafe { NonNull::new_unchecked(base.as_ptr().add(HEADER_BYTES)) })
    }

    /// Releases `ptr` and debits the counter when tracking is active.
    ///
    /// If the block carries no valid tag it was not produced by this
    /// tracker; the raw pointer is released as given and
    /// `bad_deallocations` is incremented instead of touching `current`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](HeapTracker::allocate)
    /// on a tracker sharing this raw allocator, or point to a block the raw
    /// allocator can release directly. It must not be used again.
    pub unsafe fn deallocate<C>(&self, ptr: NonNull<u8>, counter: &mut C)
    where
        C: CounterAccess<HeapUsage>,
    {
        // SAFETY: per contract, either `ptr - HEADER_BYTES` is the base of a
        // tracked block (header readable), or the bytes before `ptr` belong
        // to an allocation the raw allocator handed out, so the read stays
        // in bounds even when the tag check then fails.
        let (tag, recorded) = unsafe {
            let header = ptr.as_ptr().sub(HEADER_BYTES).cast::<u32>();
            (header.read_unaligned(), header.add(1).read_unaligned())
        };

        let tracking = !counter.recorder_internal_running();

        if tag == ALLOC_TAG {
            if tracking {
                let usage = counter.cnt_mut();
                usage.current = usage.current.saturating_sub(u64::from(recorded));
            }
            // SAFETY: tag matched, so the base of the raw allocation is
            // `ptr - HEADER_BYTES`.
            unsafe { self.raw.deallocate(ptr.as_ptr().sub(HEADER_BYTES)) };
        } else {
            if tracking {
                counter.cnt_mut().bad_deallocations += 1;
            }
            tracing::warn!("deallocation of an untagged block");
            // SAFETY: foreign block; release the pointer exactly as given.
            unsafe { self.raw.deallocate(ptr.as_ptr()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;

    type HeapRec = Recorder<crate::labels::InternedLabels, HeapUsage>;

    fn recorder() -> HeapRec {
        Recorder::interned(HeapUsage::default(), "root", HeapUsage::default()).unwrap()
    }

    #[test]
    fn test_allocation_conservation() {
        let mut rec = recorder();
        let tracker = HeapTracker::new();

        let blocks: Vec<_> = (0..4)
            .map(|_| tracker.allocate(64, &mut rec).unwrap())
            .collect();
        assert_eq!(rec.cnt().current, 4 * 64);
        assert_eq!(rec.cnt().total, 4 * 64);
        assert!(rec.cnt().peak >= 4 * 64);

        for ptr in blocks.iter().take(3) {
            unsafe { tracker.deallocate(*ptr, &mut rec) };
        }
        assert_eq!(rec.cnt().current, 64);
        assert_eq!(rec.cnt().peak, 4 * 64);
        assert_eq!(rec.cnt().bad_deallocations, 0);

        unsafe { tracker.deallocate(blocks[3], &mut rec) };
        assert_eq!(rec.cnt().current, 0);
    }

    #[test]
    fn test_untagged_block_counts_bad_deallocation() {
        let mut rec = recorder();
        let tracker = HeapTracker::new();

        // A block the tracker never saw: no header, no tag.
        let foreign = SystemAlloc.allocate(32);
        let foreign = NonNull::new(foreign).unwrap();
        unsafe { tracker.deallocate(foreign, &mut rec) };

        assert_eq!(rec.cnt().bad_deallocations, 1);
        assert_eq!(rec.cnt().current, 0);
    }

    #[test]
    fn test_counting_skipped_while_recorder_busy() {
        let mut rec = recorder();
        let tracker = HeapTracker::new();

        rec.set_busy(true);
        let ptr = tracker.allocate(128, &mut rec).unwrap();
        assert_eq!(rec.cnt().total, 0);
        assert_eq!(rec.cnt().current, 0);
        unsafe { tracker.deallocate(ptr, &mut rec) };
        rec.set_busy(false);

        assert_eq!(*rec.cnt(), HeapUsage::default());
    }

    #[test]
    fn test_zero_sized_allocation() {
        let mut rec = recorder();
        let tracker = HeapTracker::new();

        let ptr = tracker.allocate(0, &mut rec).unwrap();
        assert_eq!(rec.cnt().total, 0);
        unsafe { tracker.deallocate(ptr, &mut rec) };
        assert_eq!(rec.cnt().current, 0);
        assert_eq!(rec.cnt().bad_deallocations, 0);
    }

    #[test]
    fn test_counters_attribute_to_current_scope() {
        let mut rec = recorder();
        let tracker = HeapTracker::new();

        rec.begin_scope("worker").unwrap();
        let ptr = tracker.allocate(256, &mut rec).unwrap();
        unsafe { tracker.deallocate(ptr, &mut rec) };
        rec.end_scope().unwrap();

        // Root never saw the traffic.
        assert_eq!(rec.cnt().total, 0);
        rec.begin_scope("worker").unwrap();
        assert_eq!(rec.cnt().total, 256);
        assert_eq!(rec.cnt().current, 0);
        assert_eq!(rec.cnt().peak, 256);
        rec.end_scope().unwrap();
    }

    #[test]
    fn test_usage_combine() {
        let a = HeapUsage {
            total: 10,
            current: 4,
            peak: 8,
            bad_deallocations: 1,
        };
        let b = HeapUsage {
            total: 5,
            current: 1,
            peak: 12,
            bad_deallocations: 0,
        };
        let sum = a + b;
        assert_eq!(sum.total, 15);
        assert_eq!(sum.current, 5);
        assert_eq!(sum.peak, 12);
        assert_eq!(sum.bad_deallocations, 1);
    }
}
