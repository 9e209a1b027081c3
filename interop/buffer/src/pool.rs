/*!
    Reference-counted pool of fixed-size frame chunks.
*/

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use interop_types::{Error, Result};

/// Alignment of every chunk allocation, enough for SIMD row access.
pub const CHUNK_ALIGN: usize = 64;

/**
    Stable index of a chunk within its pool.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub usize);

/**
    Snapshot of pool occupancy.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Chunks ever allocated by the pool.
    pub allocated: usize,
    /// Chunks sitting in the free list, ready for reuse.
    pub available: usize,
}

impl PoolStats {
    /// Chunks currently referenced by at least one holder.
    pub fn outstanding(&self) -> usize {
        self.allocated - self.available
    }
}

/**
    An owned, aligned, zeroed allocation.
*/
struct ChunkMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// The allocation is plain bytes with no thread affinity.
unsafe impl Send for ChunkMemory {}
unsafe impl Sync for ChunkMemory {}

impl ChunkMemory {
    fn allocate(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len, CHUNK_ALIGN)
            .map_err(|e| Error::resource(format!("invalid chunk layout: {e}")))?;
        // SAFETY: `len` is non-zero (checked by the pool) so the layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr)
            .map(|ptr| Self { ptr, len })
            .ok_or_else(|| Error::resource(format!("failed to allocate {len} byte chunk")))
    }
}

impl Drop for ChunkMemory {
    fn drop(&mut self) {
        // SAFETY: allocated in `allocate` with this exact layout, which was valid then.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, CHUNK_ALIGN);
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

struct FreeChunk {
    id: ChunkId,
    memory: ChunkMemory,
}

struct PoolState {
    free: Vec<FreeChunk>,
    allocated: usize,
}

struct PoolShared {
    chunk_size: usize,
    max_chunks: Option<usize>,
    state: Mutex<PoolState>,
}

/**
    A pool of fixed-size native memory chunks.

    The chunk size is fixed when the pool is created. Chunks are handed out
    as [`PoolChunk`] handles; cloning a handle takes another reference, and
    the chunk goes back to the free list once every reference is gone. A
    reclaimed chunk is always reused before the pool grows.

    The pool handle itself is cheap to clone. Chunks that are still
    referenced after every pool handle is dropped are freed when their last
    reference goes away.
*/
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    /**
        Create an unbounded pool of `chunk_size` byte chunks.
    */
    pub fn new(chunk_size: usize) -> Result<Self> {
        Self::build(chunk_size, None)
    }

    /**
        Create a pool that never holds more than `max_chunks` chunks at once.

        Once the limit is reached, [`FramePool::acquire`] fails with
        [`Error::PoolExhausted`] until a chunk is released.
    */
    pub fn with_max_chunks(chunk_size: usize, max_chunks: usize) -> Result<Self> {
        Self::build(chunk_size, Some(max_chunks))
    }

    fn build(chunk_size: usize, max_chunks: Option<usize>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::resource("frame pool chunk size must be non-zero"));
        }
        debug!(chunk_size, ?max_chunks, "creating frame pool");
        Ok(Self {
            shared: Arc::new(PoolShared {
                chunk_size,
                max_chunks,
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    allocated: 0,
                }),
            }),
        })
    }

    /// Size in bytes of every chunk this pool hands out.
    pub fn chunk_size(&self) -> usize {
        self.shared.chunk_size
    }

    /**
        Take a chunk from the pool, reusing a reclaimed one when available.
    */
    pub fn acquire(&self) -> Result<PoolChunk> {
        let mut state = self.shared.state.lock();

        let (id, memory) = if let Some(free) = state.free.pop() {
            trace!(id = free.id.0, "reusing pooled chunk");
            (free.id, free.memory)
        } else {
            if let Some(limit) = self.shared.max_chunks {
                if state.allocated >= limit {
                    return Err(Error::PoolExhausted { limit });
                }
            }
            let memory = ChunkMemory::allocate(self.shared.chunk_size)?;
            let id = ChunkId(state.allocated);
            state.allocated += 1;
            debug!(id = id.0, allocated = state.allocated, "frame pool grew");
            (id, memory)
        };
        drop(state);

        Ok(PoolChunk {
            slot: Arc::new(ChunkSlot {
                id,
                ptr: memory.ptr,
                len: memory.len,
                memory: Some(memory),
                pool: Arc::downgrade(&self.shared),
            }),
        })
    }

    /**
        Take a chunk, checking that the caller expects this pool's chunk size.

        A request for any other size is a contract violation and fails
        without touching the pool.
    */
    pub fn acquire_sized(&self, size: usize) -> Result<PoolChunk> {
        if size != self.shared.chunk_size {
            return Err(Error::SizeMismatch {
                expected: self.shared.chunk_size,
                actual: size,
            });
        }
        self.acquire()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            allocated: state.allocated,
            available: state.free.len(),
        }
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("chunk_size", &self.shared.chunk_size)
            .field("max_chunks", &self.shared.max_chunks)
            .field("stats", &self.stats())
            .finish()
    }
}

struct ChunkSlot {
    id: ChunkId,
    ptr: NonNull<u8>,
    len: usize,
    memory: Option<ChunkMemory>,
    pool: Weak<PoolShared>,
}

// `ptr` points into `memory`, which is Send + Sync.
unsafe impl Send for ChunkSlot {}
unsafe impl Sync for ChunkSlot {}

impl Drop for ChunkSlot {
    fn drop(&mut self) {
        let Some(memory) = self.memory.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => {
                trace!(id = self.id.0, "chunk reclaimed");
                pool.state.lock().free.push(FreeChunk {
                    id: self.id,
                    memory,
                });
            }
            // Pool is gone, the memory is freed here.
            None => drop(memory),
        }
    }
}

/**
    A reference to one pooled chunk.

    Cloning takes an additional reference; the reference count is atomic, so
    clones may be dropped on any thread.
*/
#[derive(Clone)]
pub struct PoolChunk {
    slot: Arc<ChunkSlot>,
}

impl PoolChunk {
    pub fn id(&self) -> ChunkId {
        self.slot.id
    }

    pub fn len(&self) -> usize {
        self.slot.len
    }

    pub fn is_empty(&self) -> bool {
        self.slot.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.slot.ptr.as_ptr()
    }

    /**
        Raw write pointer for decoders filling the chunk.

        Writing through it while another holder reads the chunk is a data
        race; writers must finish before the chunk is shared for reading.
    */
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.slot.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the slot keeps the allocation alive for as long as `self`.
        unsafe { std::slice::from_raw_parts(self.slot.ptr.as_ptr(), self.slot.len) }
    }

    /**
        Mutable access, only available while this is the sole reference.
    */
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        let slot = Arc::get_mut(&mut self.slot)?;
        // SAFETY: unique access to the slot means no other reference can observe the bytes.
        Some(unsafe { std::slice::from_raw_parts_mut(slot.ptr.as_ptr(), slot.len) })
    }

    /// Number of live references to this chunk.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.slot)
    }
}

impl std::fmt::Debug for PoolChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolChunk")
            .field("id", &self.slot.id)
            .field("len", &self.slot.len)
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_pool_is_rejected() {
        assert!(matches!(FramePool::new(0), Err(Error::Resource(_))));
    }

    #[test]
    fn released_chunks_become_reclaimable() {
        let pool = FramePool::new(256).unwrap();
        let mut chunks: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();

        // Release two of the five.
        chunks.truncate(3);

        let stats = pool.stats();
        assert_eq!(stats.allocated, 5);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.outstanding(), 3);
    }

    #[test]
    fn acquire_reuses_before_growing() {
        let pool = FramePool::new(64).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let released = a.id();
        drop(a);

        let c = pool.acquire().unwrap();
        assert_eq!(c.id(), released);
        assert_eq!(pool.stats().allocated, 2);
        drop((b, c));
        assert_eq!(pool.stats().available, 2);
    }

    #[test]
    fn chunk_stays_alive_until_last_reference() {
        let pool = FramePool::new(32).unwrap();
        let chunk = pool.acquire().unwrap();
        let extra = chunk.clone();
        assert_eq!(chunk.ref_count(), 2);

        drop(chunk);
        assert_eq!(pool.stats().available, 0);
        assert_eq!(extra.as_slice().len(), 32);

        drop(extra);
        assert_eq!(pool.stats().available, 1);
    }

    #[test]
    fn size_mismatch_is_a_contract_violation() {
        let pool = FramePool::new(100).unwrap();
        let err = pool.acquire_sized(96).unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                expected: 100,
                actual: 96
            }
        ));
        assert_eq!(pool.stats().allocated, 0);
        assert!(pool.acquire_sized(100).is_ok());
    }

    #[test]
    fn bounded_pool_reports_exhaustion() {
        let pool = FramePool::with_max_chunks(16, 2).unwrap();
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(Error::PoolExhausted { limit: 2 })));

        drop(a);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn get_mut_requires_unique_reference() {
        let pool = FramePool::new(8).unwrap();
        let mut chunk = pool.acquire().unwrap();
        chunk.get_mut().unwrap().copy_from_slice(&[7; 8]);

        let shared = chunk.clone();
        assert!(chunk.get_mut().is_none());
        assert_eq!(shared.as_slice(), &[7; 8]);
    }

    #[test]
    fn chunks_are_aligned() {
        let pool = FramePool::new(100).unwrap();
        let chunk = pool.acquire().unwrap();
        assert_eq!(chunk.as_ptr() as usize % CHUNK_ALIGN, 0);
        assert!(chunk.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn chunk_outlives_pool() {
        let pool = FramePool::new(16).unwrap();
        let chunk = pool.acquire().unwrap();
        drop(pool);
        assert_eq!(chunk.as_slice(), &[0; 16]);
    }

    #[test]
    fn references_drop_on_other_threads() {
        let pool = FramePool::new(16).unwrap();
        let chunk = pool.acquire().unwrap();
        let handle = std::thread::spawn(move || {
            assert_eq!(chunk.len(), 16);
            drop(chunk);
        });
        handle.join().unwrap();
        assert_eq!(pool.stats().available, 1);
    }
}
