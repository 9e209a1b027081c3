/*!
    Native memory ownership for the decode pipeline.

    Two pieces live here:

    - [`NativeBuffer`], a pointer-and-length handle with a one-shot release,
      which is what crosses from the decoder to a consumer.
    - [`FramePool`], a pool of fixed-size, reference-counted chunks that a
      decoder writes frames into directly. A chunk returns to its pool when
      the last reference, wherever it lives, is dropped.
*/

mod native;
mod pool;

pub use native::NativeBuffer;
pub use pool::{CHUNK_ALIGN, ChunkId, FramePool, PoolChunk, PoolStats};
