/*!
    Decoded frame representation.
*/

use interop_buffer::NativeBuffer;
use interop_types::{Error, PixelFormat, Pts, Result};

/**
    Timing, geometry and field metadata of a decoded frame.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Timestamp reported for the frame, if known.
    pub pts: Option<Pts>,
    /// Decoder's best guess at the presentation timestamp, if known.
    pub best_effort_pts: Option<Pts>,
    /// Duration in time-base units (zero if unknown).
    pub duration: i64,
    pub interlaced: bool,
    pub top_field_first: bool,
}

impl FrameInfo {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            pts: None,
            best_effort_pts: None,
            duration: 0,
            interlaced: false,
            top_field_first: false,
        }
    }
}

/**
    One plane of pixel data: the bytes and the row stride.
*/
#[derive(Debug)]
pub struct Plane {
    pub data: NativeBuffer,
    pub stride: usize,
}

impl Plane {
    pub fn new(data: NativeBuffer, stride: usize) -> Self {
        Self { data, stride }
    }

    /**
        Plane backed by an owned byte vector.
    */
    pub fn from_vec(data: Vec<u8>, stride: usize) -> Self {
        Self::new(NativeBuffer::from_vec(data), stride)
    }

    /**
        The first `rows` rows of the plane, stride padding included.
    */
    pub fn rows(&self, rows: usize) -> Result<&[u8]> {
        let len = self.stride * rows;
        self.data.as_slice().get(..len).ok_or_else(|| {
            Error::invalid_data(format!(
                "plane holds {} bytes, {rows} rows of stride {} need {len}",
                self.data.len(),
                self.stride
            ))
        })
    }
}

/**
    A decoded video frame.

    Plane memory is kept alive by the planes' [`NativeBuffer`]s, whatever
    owns it underneath (a decoder frame, a pooled chunk or a plain vector).
    Dropping the frame releases every plane. When the decoder wrote into a
    single pooled chunk, the frame also carries the wrapper around that
    whole chunk so it can be handed off without copying.
*/
#[derive(Debug)]
pub struct DecodedFrame {
    pub info: FrameInfo,
    planes: Vec<Plane>,
    backing: Option<NativeBuffer>,
}

impl DecodedFrame {
    pub fn new(info: FrameInfo, planes: Vec<Plane>) -> Self {
        Self {
            info,
            planes,
            backing: None,
        }
    }

    /**
        Attach the wrapper around the contiguous memory all planes live in.
    */
    pub fn with_backing(mut self, backing: NativeBuffer) -> Self {
        self.backing = Some(backing);
        self
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn format(&self) -> PixelFormat {
        self.info.format
    }

    /**
        Best-effort presentation timestamp, falling back to the reported pts.
    */
    pub fn timestamp(&self) -> Option<Pts> {
        self.info.best_effort_pts.or(self.info.pts)
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> Result<&Plane> {
        self.planes.get(index).ok_or_else(|| {
            Error::invalid_data(format!(
                "{:?} frame has no plane {index}",
                self.info.format
            ))
        })
    }

    pub fn is_pool_backed(&self) -> bool {
        self.backing.is_some()
    }

    /**
        Take the whole-frame wrapper, leaving the planes untouched.
    */
    pub fn take_backing(&mut self) -> Option<NativeBuffer> {
        self.backing.take()
    }
}
