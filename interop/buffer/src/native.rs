/*!
    Pointer-and-length handle with a one-shot release.
*/

use std::ptr::NonNull;

use interop_types::{Error, Result};

use crate::pool::PoolChunk;

type Release = Box<dyn FnOnce() + Send + Sync>;

/**
    A consumer-facing handle over native memory.

    The wrapper exposes a pointer and a fixed length. It owns the memory only
    when it carries a release; the release runs exactly once, either through
    [`NativeBuffer::release`] or when the wrapper is dropped, whichever comes
    first. After release the wrapper is empty.
*/
pub struct NativeBuffer {
    ptr: NonNull<u8>,
    len: usize,
    release: Option<Release>,
}

// The wrapper only hands out the pointer; the release closure is Send + Sync.
unsafe impl Send for NativeBuffer {}
unsafe impl Sync for NativeBuffer {}

impl NativeBuffer {
    /**
        Wrap memory the caller keeps ownership of.

        # Safety

        `ptr` must be valid for reads of `len` bytes for the whole lifetime of
        the wrapper. A null pointer yields an empty wrapper.
    */
    pub unsafe fn borrowed(ptr: *mut u8, len: usize) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => Self {
                ptr,
                len,
                release: None,
            },
            None => Self::empty(),
        }
    }

    /**
        Wrap memory whose lifetime is ended by `release`.

        The closure captures whatever context it needs to free or unreference
        the memory, and runs exactly once.

        # Safety

        `ptr` must be valid for reads of `len` bytes until `release` runs.
    */
    pub unsafe fn with_release<F>(ptr: *mut u8, len: usize, release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        match NonNull::new(ptr) {
            Some(ptr) => Self {
                ptr,
                len,
                release: Some(Box::new(release)),
            },
            None => {
                release();
                Self::empty()
            }
        }
    }

    /**
        Take ownership of a heap buffer.
    */
    pub fn from_vec(data: Vec<u8>) -> Self {
        let mut data = data.into_boxed_slice();
        let len = data.len();
        let ptr = NonNull::new(data.as_mut_ptr()).unwrap_or(NonNull::dangling());
        // Moving the box into the closure does not move its heap allocation.
        Self {
            ptr,
            len,
            release: Some(Box::new(move || drop(data))),
        }
    }

    /**
        Hold one reference to a pooled chunk for the lifetime of the wrapper.
    */
    pub fn from_chunk(chunk: PoolChunk) -> Self {
        let len = chunk.len();
        Self::chunk_view(chunk, 0, len)
    }

    /**
        Hold one reference to a pooled chunk, exposing `len` bytes starting
        at `offset`.
    */
    pub fn from_chunk_range(chunk: PoolChunk, offset: usize, len: usize) -> Result<Self> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::invalid_data("chunk range overflows"))?;
        if end > chunk.len() {
            return Err(Error::invalid_data(format!(
                "range {offset}..{end} exceeds {} byte chunk",
                chunk.len()
            )));
        }
        Ok(Self::chunk_view(chunk, offset, len))
    }

    fn chunk_view(chunk: PoolChunk, offset: usize, len: usize) -> Self {
        // SAFETY: callers checked `offset + len <= chunk.len()`.
        let ptr = unsafe { chunk.as_mut_ptr().add(offset) };
        Self {
            ptr: NonNull::new(ptr).unwrap_or(NonNull::dangling()),
            len,
            release: Some(Box::new(move || drop(chunk))),
        }
    }

    fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            release: None,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /**
        Raw write pointer. Writing is only sound while no other holder reads
        the same memory.
    */
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: constructors guarantee `ptr` is valid for `len` bytes until release,
        // and release empties the wrapper.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Capacity equals length: the wrapper never grows.
    pub fn capacity(&self) -> usize {
        self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /**
        The length of a native buffer is fixed at construction.
    */
    pub fn set_len(&mut self, _len: usize) -> Result<()> {
        Err(Error::FixedLength)
    }

    /// True while the wrapper still holds a pending release.
    pub fn owns_memory(&self) -> bool {
        self.release.is_some()
    }

    /**
        Run the release now and empty the wrapper.

        Calling this more than once, or dropping the wrapper afterwards, does
        nothing further.
    */
    pub fn release(&mut self) {
        self.ptr = NonNull::dangling();
        self.len = 0;
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none() && self.len == 0
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl AsRef<[u8]> for NativeBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("owns_memory", &self.owns_memory())
            .finish()
    }
}
