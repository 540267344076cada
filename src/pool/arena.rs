//! Bump allocator with heap-tracked fallback (C3).

use std::alloc::{self, Layout};
use std::ptr::NonNull;

const POINTER_WIDTH: usize = std::mem::align_of::<usize>();
const MAX_FALLBACKS: usize = 128;

/// A linear-offset bump arena over a fixed-size region, with a bounded
/// heap-tracked fallback for allocations that don't fit. Scoped to one
/// fiber/request: `reset()` is called at the top of every connection loop
/// iteration (see [`Connection`](crate::server::connection::Connection)).
#[derive(Debug)]
pub struct Arena {
    region: NonNull<u8>,
    capacity: usize,
    offset: usize,
    fallbacks: Vec<(NonNull<u8>, Layout)>,
}

// SAFETY: `Arena` owns its region and fallback allocations exclusively; it
// is never shared across threads (one per worker, thread-local).
unsafe impl Send for Arena {}

impl Arena {
    pub fn new(capacity: usize) -> Self {
        let layout = Layout::from_size_align(capacity.max(1), POINTER_WIDTH)
            .expect("arena capacity overflows layout limits");
        // SAFETY: layout has non-zero size.
        let region = unsafe { alloc::alloc(layout) };
        let region = NonNull::new(region).unwrap_or_else(|| alloc::handle_alloc_error(layout));

        Self {
            region,
            capacity,
            offset: 0,
            fallbacks: Vec::new(),
        }
    }

    /// Bumps the offset and returns a pointer to `n` bytes, aligned to
    /// pointer width. Falls back to a tracked heap allocation (up to
    /// [`MAX_FALLBACKS`]) when the region has insufficient remaining space.
    ///
    /// # Panics
    /// Panics if the fallback table is full and the region cannot satisfy
    /// the request — this arena is scratch-only and exhausting both tiers
    /// indicates a caller asking for far more than one request/fiber needs.
    #[inline]
    #[track_caller]
    pub fn allocate(&mut self, n: usize) -> NonNull<u8> {
        let aligned = (n + POINTER_WIDTH - 1) & !(POINTER_WIDTH - 1);

        if self.offset + aligned <= self.capacity {
            // SAFETY: offset..offset+aligned is within the allocated region.
            let ptr = unsafe { self.region.as_ptr().add(self.offset) };
            self.offset += aligned;
            return NonNull::new(ptr).expect("arena region pointer is non-null by construction");
        }

        assert!(
            self.fallbacks.len() < MAX_FALLBACKS,
            "Arena fallback table exhausted ({MAX_FALLBACKS} slots)"
        );

        let layout = Layout::from_size_align(n.max(1), POINTER_WIDTH)
            .expect("arena fallback allocation overflows layout limits");
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        self.fallbacks.push((ptr, layout));
        ptr
    }

    /// Zeros the bump offset and frees every tracked fallback allocation.
    #[inline]
    pub fn reset(&mut self) {
        self.offset = 0;
        for (ptr, layout) in self.fallbacks.drain(..) {
            // SAFETY: each (ptr, layout) pair was produced by a matching
            // `alloc::alloc` call above and has not been freed since.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }

    pub fn used(&self) -> usize {
        self.offset
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.reset();
        let layout = Layout::from_size_align(self.capacity.max(1), POINTER_WIDTH).unwrap();
        // SAFETY: `region` was allocated with this exact layout in `new`.
        unsafe { alloc::dealloc(self.region.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocates_within_region() {
        let mut arena = Arena::new(64);
        arena.allocate(16);
        arena.allocate(16);
        assert_eq!(arena.used(), 32);
    }

    #[test]
    fn reset_zeros_offset() {
        let mut arena = Arena::new(64);
        arena.allocate(32);
        arena.reset();
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn overflow_falls_back_to_heap() {
        let mut arena = Arena::new(16);
        let ptr = arena.allocate(64);
        assert!(!ptr.as_ptr().is_null());
        assert_eq!(arena.fallbacks.len(), 1);
        arena.reset();
        assert!(arena.fallbacks.is_empty());
    }
}
