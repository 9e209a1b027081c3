/*!
    The decoder contract the driver is written against.
*/

use std::sync::Arc;

use interop_types::{Error, Packet, PixelFormat, Rational, Result, align_up};

use crate::alloc::FrameAllocator;
use crate::frame::DecodedFrame;

/// Dimension alignment used when a decoder has no stricter requirement.
pub const DEFAULT_ALIGN: u32 = 32;

/**
    Outcome of one send or receive call on a decoder that did not succeed.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Send: the decoder still holds unconsumed input.
    /// Receive: the decoder needs more input before it can output a frame.
    Again,
    /// The decoder has been fully drained.
    Eof,
    /// Unrecoverable failure.
    Failed(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Again => f.write_str("resource temporarily unavailable"),
            Self::Eof => f.write_str("end of stream"),
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for CodecError {}

/**
    Stream parameters a decoder reports before the first frame.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    /// Native output pixel format.
    pub format: PixelFormat,
    pub time_base: Rational,
}

/**
    A stateful video decoder driven through a send/receive protocol.

    Decoders carry mutable internal state with no reentrancy guarantee; one
    driver owns one decoder and calls it from one thread at a time.
*/
pub trait Decoder: Send {
    fn params(&self) -> VideoParams;

    /**
        Submit one packet. `Err(CodecError::Again)` means earlier input has
        not been consumed yet.
    */
    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError>;

    /// Signal end of stream so buffered frames can be drained.
    fn send_eof(&mut self) -> std::result::Result<(), CodecError>;

    /**
        Retrieve one frame. `Err(CodecError::Again)` means more input is
        needed, `Err(CodecError::Eof)` that the decoder is drained.
    */
    fn receive_frame(&mut self) -> std::result::Result<DecodedFrame, CodecError>;

    /// Drop all buffered input and output (after a seek).
    fn flush(&mut self);

    /**
        Round frame dimensions up to what the decoder needs for its buffers.
    */
    fn align_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        (
            align_up(width as usize, DEFAULT_ALIGN as usize) as u32,
            align_up(height as usize, DEFAULT_ALIGN as usize) as u32,
        )
    }

    /// True if the decoder can write frames into caller-supplied buffers.
    fn supports_external_buffers(&self) -> bool {
        false
    }

    /**
        Make the decoder allocate frame memory through `allocator`.
    */
    fn install_allocator(&mut self, allocator: Arc<FrameAllocator>) -> Result<()> {
        let _ = allocator;
        Err(Error::unsupported_format(
            "decoder does not accept external frame buffers",
        ))
    }
}

impl<D: Decoder + ?Sized> Decoder for Box<D> {
    fn params(&self) -> VideoParams {
        (**self).params()
    }

    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError> {
        (**self).send_packet(packet)
    }

    fn send_eof(&mut self) -> std::result::Result<(), CodecError> {
        (**self).send_eof()
    }

    fn receive_frame(&mut self) -> std::result::Result<DecodedFrame, CodecError> {
        (**self).receive_frame()
    }

    fn flush(&mut self) {
        (**self).flush()
    }

    fn align_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        (**self).align_dimensions(width, height)
    }

    fn supports_external_buffers(&self) -> bool {
        (**self).supports_external_buffers()
    }

    fn install_allocator(&mut self, allocator: Arc<FrameAllocator>) -> Result<()> {
        (**self).install_allocator(allocator)
    }
}
