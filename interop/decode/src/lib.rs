/*!
    Decoding for the zero-copy pipeline.

    This crate turns compressed packets into [`DecodedFrame`]s. The
    [`DecodeDriver`] owns a stateful [`Decoder`] and tracks the send/receive
    protocol as an explicit state machine, so "the decoder needs more input"
    is a status rather than an error. Decoders that accept externally
    supplied buffers write frames straight into pooled memory handed out by a
    [`FrameAllocator`].

    With the `ffmpeg` feature, [`FfmpegDecoder`] implements [`Decoder`] on top
    of libavcodec and wires its buffer-allocation callback to the allocator.
*/

mod alloc;
mod decoder;
mod driver;
mod frame;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use alloc::{FrameAllocation, FrameAllocator, Yuv420Layout};
pub use decoder::{CodecError, DEFAULT_ALIGN, Decoder, VideoParams};
pub use driver::{DecodeDriver, DecodeStatus, DecodeStep, DriverState};
pub use frame::{DecodedFrame, FrameInfo, Plane};

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegDecoder, pixel_format_to_ffmpeg};
