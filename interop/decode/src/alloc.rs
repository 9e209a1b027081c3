/*!
    Pool-backed frame allocation for decoders that accept external buffers.

    This is the zero-copy path: the decoder asks the allocator for memory
    for each frame, writes pixels straight into a pooled chunk, and the
    resulting frame (and any consumer that later holds it) keeps the chunk
    alive through reference counting.
*/

use parking_lot::Mutex;
use tracing::{debug, trace};

use interop_buffer::{FramePool, NativeBuffer, PoolChunk};
use interop_types::Result;

use crate::frame::{DecodedFrame, FrameInfo, Plane};

/**
    Plane layout of one 4:2:0 frame inside a single chunk.

    Luma stride is the aligned width, each chroma stride half of it, and the
    chroma planes have half the aligned height. Planes are packed back to
    back: luma, then U, then V.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Yuv420Layout {
    pub aligned_width: u32,
    pub aligned_height: u32,
    pub strides: [usize; 3],
    pub rows: [usize; 3],
    pub offsets: [usize; 3],
}

impl Yuv420Layout {
    pub fn new(aligned_width: u32, aligned_height: u32) -> Self {
        let width = aligned_width as usize;
        let height = aligned_height as usize;
        let strides = [width, width / 2, width / 2];
        let rows = [height, height / 2, height / 2];
        let luma = strides[0] * rows[0];
        let chroma = strides[1] * rows[1];

        Self {
            aligned_width,
            aligned_height,
            strides,
            rows,
            offsets: [0, luma, luma + chroma],
        }
    }

    pub fn plane_size(&self, index: usize) -> usize {
        self.strides[index] * self.rows[index]
    }

    /// Bytes for all three planes.
    pub fn total(&self) -> usize {
        (0..3).map(|i| self.plane_size(i)).sum()
    }
}

/**
    Hands out pooled memory for decoder frames.

    The pool is created lazily on the first allocation, sized for exactly one
    frame at that allocation's dimensions. It is created at most once; a
    later request for a different frame size fails rather than
    reallocating.
*/
#[derive(Debug, Default)]
pub struct FrameAllocator {
    pool: Mutex<Option<FramePool>>,
    max_chunks: Option<usize>,
}

impl FrameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Bound the pool to `max_chunks` frames in flight.
    */
    pub fn with_max_chunks(max_chunks: usize) -> Self {
        Self {
            pool: Mutex::new(None),
            max_chunks: Some(max_chunks),
        }
    }

    /// The pool, once the first allocation has created it.
    pub fn pool(&self) -> Option<FramePool> {
        self.pool.lock().clone()
    }

    /**
        Allocate memory for one frame whose dimensions are already aligned
        to the decoder's requirements.

        Fails if the pool is exhausted or sized for a different frame.
    */
    pub fn allocate(&self, aligned_width: u32, aligned_height: u32) -> Result<FrameAllocation> {
        let layout = Yuv420Layout::new(aligned_width, aligned_height);
        let total = layout.total();

        let pool = {
            let mut guard = self.pool.lock();
            match guard.as_ref() {
                Some(pool) => pool.clone(),
                None => {
                    let pool = match self.max_chunks {
                        Some(max) => FramePool::with_max_chunks(total, max)?,
                        None => FramePool::new(total)?,
                    };
                    debug!(
                        width = aligned_width,
                        height = aligned_height,
                        chunk_size = total,
                        "frame pool initialized"
                    );
                    *guard = Some(pool.clone());
                    pool
                }
            }
        };

        let chunk = pool.acquire_sized(total)?;
        trace!(id = chunk.id().0, "allocated frame chunk");

        // The extra reference travels with the decoder's frame.
        let wrapper = NativeBuffer::from_chunk(chunk.clone());

        Ok(FrameAllocation {
            chunk,
            wrapper,
            layout,
        })
    }
}

/**
    Memory for one frame, fresh from the pool.

    Holds the chunk and the wrapper the decoder attaches to its frame. Until
    the allocation is turned into a frame nothing else can reach the chunk,
    so plane access is exclusive.
*/
#[derive(Debug)]
pub struct FrameAllocation {
    chunk: PoolChunk,
    wrapper: NativeBuffer,
    layout: Yuv420Layout,
}

impl FrameAllocation {
    pub fn layout(&self) -> &Yuv420Layout {
        &self.layout
    }

    pub fn chunk(&self) -> &PoolChunk {
        &self.chunk
    }

    /// Pointer to the start of plane `index`.
    pub fn plane_ptr(&self, index: usize) -> Option<*mut u8> {
        let offset = *self.layout.offsets.get(index)?;
        // SAFETY: offsets lie within the chunk, which is `layout.total()` bytes.
        Some(unsafe { self.chunk.as_mut_ptr().add(offset) })
    }

    /**
        Writable view of plane `index`, for decoders filling the frame.
    */
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let ptr = self.plane_ptr(index)?;
        let len = self.layout.plane_size(index);
        // SAFETY: the range is inside the chunk, and `&mut self` is the only way to reach
        // the chunk until the allocation is consumed.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /**
        Give up the allocation's own chunk reference and return the wrapper
        the decoder attaches to its frame.
    */
    pub fn into_wrapper(self) -> NativeBuffer {
        self.wrapper
    }

    /**
        Build a decoded frame over the allocation.

        Each plane holds its own chunk reference, and the whole-chunk wrapper
        becomes the frame's backing buffer.
    */
    pub fn into_frame(self, info: FrameInfo) -> Result<DecodedFrame> {
        let Self {
            chunk,
            wrapper,
            layout,
        } = self;

        let planes = (0..3)
            .map(|i| {
                let data = NativeBuffer::from_chunk_range(
                    chunk.clone(),
                    layout.offsets[i],
                    layout.plane_size(i),
                )?;
                Ok(Plane::new(data, layout.strides[i]))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DecodedFrame::new(info, planes).with_backing(wrapper))
    }
}
