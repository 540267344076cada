//! Pooled allocation subsystem: buffer pool (C1), object pool (C2), and
//! bump arena (C3). Thread-local to a [`Worker`](crate::server::worker::Worker);
//! no locks are taken on any hot path here.
//!
//! Grounded on the donor's pattern of allocating one fixed buffer per
//! connection slot and reusing it in place (`HttpConnection::new`), and on
//! `armature-core`'s size-class buffer pool (`BufferSize::{Tiny,Small,...}`,
//! `for_bytes`) generalized here to the exact five classes the contract
//! names: 1K, 4K, 16K, 64K, 256K.

pub mod arena;
pub mod buffer_pool;
pub mod object_pool;

pub use arena::Arena;
pub use buffer_pool::BufferPool;
pub use object_pool::ObjectPool;
