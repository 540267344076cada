//! Size-classed byte-buffer freelists (C1).

/// The five pool classes the contract names, smallest first.
const CLASS_SIZES: [usize; 5] = [1024, 4096, 16384, 65536, 262144];
const CLASS_CAP: usize = 128;

/// Which class a buffer of length `n` belongs to, or `None` if it exceeds
/// the largest class (such buffers are tracked as "external").
#[inline(always)]
fn class_of(n: usize) -> Option<usize> {
    CLASS_SIZES.iter().position(|&size| n <= size)
}

/// A bounded, per-size-class freelist of `Vec<u8>` buffers.
///
/// `acquire`/`release` never touch the managed heap beyond the `Vec<u8>`
/// allocations the buffers themselves already own (no intermediate
/// bookkeeping structure grows on the hot path): every class's freelist is
/// a `Vec<Vec<u8>>` pre-sized to `CLASS_CAP` at construction.
pub struct BufferPool {
    classes: [Vec<Vec<u8>>; 5],
    /// Buffers released with a length that matched no class; tracked so a
    /// double-release can be detected in debug builds (bounded at 256 per
    /// the contract).
    #[cfg(debug_assertions)]
    external: Vec<*const u8>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            classes: [
                Vec::with_capacity(CLASS_CAP),
                Vec::with_capacity(CLASS_CAP),
                Vec::with_capacity(CLASS_CAP),
                Vec::with_capacity(CLASS_CAP),
                Vec::with_capacity(CLASS_CAP),
            ],
            #[cfg(debug_assertions)]
            external: Vec::with_capacity(256),
        }
    }

    /// Returns a buffer with capacity at least `n`, from the smallest class
    /// that fits. Reuses a freed buffer of that class if one is available;
    /// otherwise allocates fresh. O(1).
    #[inline]
    pub fn acquire(&mut self, n: usize) -> Vec<u8> {
        match class_of(n) {
            Some(idx) => match self.classes[idx].pop() {
                Some(mut buf) => {
                    buf.clear();
                    buf
                }
                None => Vec::with_capacity(CLASS_SIZES[idx]),
            },
            None => Vec::with_capacity(n),
        }
    }

    /// Returns a buffer to the pool, keyed by its *capacity* (not length),
    /// so a buffer grown past a class boundary is filed under the class it
    /// actually occupies. Buffers that don't match any class are tracked
    /// as external and dropped (never retained, since there is no class to
    /// retain them under). Excess beyond `CLASS_CAP` per class is dropped.
    ///
    /// Idempotent in effect: a double-release of the same buffer cannot
    /// corrupt the freelist (it is either classed, where a second push is
    /// merely a second entry a future `acquire` may or may not observe, or
    /// external, where it is simply dropped) — but debug builds still
    /// assert against it, since it almost always indicates a caller bug.
    #[inline]
    #[track_caller]
    pub fn release(&mut self, buf: Vec<u8>) {
        #[cfg(debug_assertions)]
        {
            let ptr = buf.as_ptr();
            debug_assert!(
                !self.external.contains(&ptr),
                "double release of external buffer into BufferPool"
            );
        }

        match class_of(buf.capacity()) {
            Some(idx) if self.classes[idx].len() < CLASS_CAP => {
                self.classes[idx].push(buf);
            }
            Some(_) => { /* class full, drop */ }
            None => {
                #[cfg(debug_assertions)]
                {
                    if self.external.len() < 256 {
                        self.external.push(buf.as_ptr());
                    }
                }
            }
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_picks_smallest_fitting_class() {
        let mut pool = BufferPool::new();
        assert_eq!(pool.acquire(10).capacity(), 1024);
        assert_eq!(pool.acquire(1024).capacity(), 1024);
        assert_eq!(pool.acquire(1025).capacity(), 4096);
        assert_eq!(pool.acquire(70_000).capacity(), 262144);
    }

    #[test]
    fn release_then_acquire_reuses_buffer() {
        let mut pool = BufferPool::new();
        let buf = pool.acquire(10);
        let ptr = buf.as_ptr();
        pool.release(buf);

        let reused = pool.acquire(10);
        assert_eq!(reused.as_ptr(), ptr);
    }

    #[test]
    fn class_cap_drops_excess() {
        let mut pool = BufferPool::new();
        for _ in 0..(CLASS_CAP + 10) {
            pool.release(Vec::with_capacity(1024));
        }
        assert_eq!(pool.classes[0].len(), CLASS_CAP);
    }

    #[test]
    fn oversized_buffer_is_external_and_not_pooled() {
        let mut pool = BufferPool::new();
        pool.release(Vec::with_capacity(1_000_000));
        assert!(pool.classes.iter().all(Vec::is_empty));
    }
}
