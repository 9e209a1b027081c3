/*!
    libavcodec-backed [`Decoder`].

    Frames come out of the decoder without copying: every plane is a
    [`NativeBuffer`] over the AVFrame's memory, and the AVFrame itself is
    freed once the last plane is released. When a [`FrameAllocator`] is
    installed, 4:2:0 frames are allocated from its pool through the
    `get_buffer2` callback.
*/

use std::collections::HashSet;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::Arc;

use ffmpeg_next::{
    codec::{self, decoder::Video as VideoDecoderFFmpeg},
    ffi,
    format::Pixel,
    util::frame::video::Video as VideoFrameFFmpeg,
};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use interop_buffer::NativeBuffer;
use interop_types::{Error, Packet, PixelFormat, Pts, Rational, Result};

use crate::alloc::FrameAllocator;
use crate::decoder::{CodecError, Decoder, VideoParams};
use crate::frame::{DecodedFrame, FrameInfo, Plane};

const FRAME_FLAG_INTERLACED: c_int = 1 << 3;
const FRAME_FLAG_TOP_FIELD_FIRST: c_int = 1 << 4;

/**
    State shared between the decoder and its `get_buffer2` callback.

    `live` holds the start address of every frame buffer currently handed
    out from the pool, so received frames can be recognized as pool-backed.
*/
struct HookShared {
    allocator: Arc<FrameAllocator>,
    live: Mutex<HashSet<usize>>,
}

/// Owned by the AVBuffer created in the callback; dropped when it is freed.
struct PooledBuffer {
    _wrapper: NativeBuffer,
    address: usize,
    hook: Arc<HookShared>,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.hook.live.lock().remove(&self.address);
    }
}

/// Keeps a received AVFrame alive while any plane refers to it.
struct FrameHolder(VideoFrameFFmpeg);

// SAFETY: the holder is never used to touch the frame, only to free it once.
unsafe impl Send for FrameHolder {}
unsafe impl Sync for FrameHolder {}

/**
    Video decoder over libavcodec.
*/
pub struct FfmpegDecoder {
    // Declared before `hook` so the codec context, which may still free
    // pooled buffers, goes first.
    decoder: VideoDecoderFFmpeg,
    hook: Option<Arc<HookShared>>,
    params: VideoParams,
}

// SAFETY: the codec context is only reached through `&mut self`.
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    /**
        Open a decoder for a stream.

        # Arguments

        * `parameters` - Codec parameters of the stream, as found by the demuxer
        * `time_base` - Time base of the stream's timestamps
    */
    pub fn new(parameters: codec::Parameters, time_base: Rational) -> Result<Self> {
        ffmpeg_next::init().map_err(|e| Error::decode(e.to_string()))?;

        let decoder = codec::context::Context::from_parameters(parameters)
            .map_err(|e| Error::decode(e.to_string()))?
            .decoder()
            .video()
            .map_err(|e| Error::decode(e.to_string()))?;

        let format = pixel_format_from_ffmpeg(decoder.format()).ok_or_else(|| {
            Error::unsupported_format("decoder reports no pixel format")
        })?;

        let params = VideoParams {
            width: decoder.width(),
            height: decoder.height(),
            format,
            time_base,
        };
        debug!(?params, "opened video decoder");

        Ok(Self {
            decoder,
            hook: None,
            params,
        })
    }

    fn convert_frame(&self, frame: VideoFrameFFmpeg) -> Result<DecodedFrame> {
        let width = frame.width();
        let height = frame.height();
        if width == 0 || height == 0 {
            return Err(Error::invalid_data("frame has zero dimensions"));
        }

        let format = pixel_format_from_ffmpeg(frame.format())
            .ok_or_else(|| Error::invalid_data("decoded frame has no pixel format"))?;

        // SAFETY: the frame was just filled by the decoder.
        let (flags, duration, buf0) = unsafe {
            let ptr = frame.as_ptr();
            ((*ptr).flags, (*ptr).duration, (*ptr).buf[0])
        };

        let info = FrameInfo {
            pts: frame.pts().map(Pts),
            best_effort_pts: frame.timestamp().map(Pts),
            duration,
            interlaced: flags & FRAME_FLAG_INTERLACED != 0,
            top_field_first: flags & FRAME_FLAG_TOP_FIELD_FIRST != 0,
            ..FrameInfo::new(width, height, format)
        };

        // Plane count and heights come from the frame, so layouts without
        // a `PixelFormat` variant keep all their planes.
        let holder = Arc::new(FrameHolder(frame));

        let planes = (0..holder.0.planes())
            .map(|i| {
                let stride = holder.0.stride(i);
                let len = stride * holder.0.plane_height(i) as usize;
                // SAFETY: the plane spans `stride * rows` bytes and the holder keeps it alive.
                let data = unsafe {
                    let ptr = (*holder.0.as_ptr()).data[i];
                    let keep = holder.clone();
                    NativeBuffer::with_release(ptr, len, move || drop(keep))
                };
                Plane::new(data, stride)
            })
            .collect();

        let mut decoded = DecodedFrame::new(info, planes);

        let pooled = !buf0.is_null()
            && self.hook.as_ref().is_some_and(|hook| {
                // SAFETY: buf0 is a live reference owned by the frame.
                let address = unsafe { (*buf0).data } as usize;
                hook.live.lock().contains(&address)
            });
        if pooled {
            // SAFETY: for pooled frames buf[0] covers the whole chunk.
            let backing = unsafe {
                let keep = holder.clone();
                NativeBuffer::with_release((*buf0).data, (*buf0).size as usize, move || {
                    drop(keep)
                })
            };
            decoded = decoded.with_backing(backing);
        }

        Ok(decoded)
    }
}

impl Decoder for FfmpegDecoder {
    fn params(&self) -> VideoParams {
        self.params
    }

    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError> {
        // libavcodec reads a packet without data as end of stream.
        if packet.data.is_empty() {
            trace!("ignoring empty packet");
            return Ok(());
        }

        let mut ffmpeg_pkt = ffmpeg_next::Packet::copy(&packet.data);
        ffmpeg_pkt.set_pts(packet.pts.map(|pts| pts.0));
        ffmpeg_pkt.set_duration(packet.duration);

        self.decoder.send_packet(&ffmpeg_pkt).map_err(codec_error)
    }

    fn send_eof(&mut self) -> std::result::Result<(), CodecError> {
        self.decoder.send_eof().map_err(codec_error)
    }

    fn receive_frame(&mut self) -> std::result::Result<DecodedFrame, CodecError> {
        let mut frame = VideoFrameFFmpeg::empty();
        self.decoder.receive_frame(&mut frame).map_err(codec_error)?;
        self.convert_frame(frame)
            .map_err(|e| CodecError::Failed(e.to_string()))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn align_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let mut w = width as c_int;
        let mut h = height as c_int;
        // SAFETY: the context is open; only reads codec geometry.
        unsafe {
            ffi::avcodec_align_dimensions(self.decoder.as_ptr() as *mut _, &mut w, &mut h);
        }
        (w as u32, h as u32)
    }

    fn supports_external_buffers(&self) -> bool {
        // SAFETY: an opened context always has its codec set.
        unsafe {
            let codec = (*self.decoder.as_ptr()).codec;
            !codec.is_null() && ((*codec).capabilities as u32 & ffi::AV_CODEC_CAP_DR1 as u32) != 0
        }
    }

    fn install_allocator(&mut self, allocator: Arc<FrameAllocator>) -> Result<()> {
        if !self.supports_external_buffers() {
            return Err(Error::unsupported_format(
                "codec cannot decode into caller-supplied buffers",
            ));
        }

        let hook = Arc::new(HookShared {
            allocator,
            live: Mutex::new(HashSet::new()),
        });
        // SAFETY: `hook` is kept in `self` for as long as the context lives.
        unsafe {
            let ctx = self.decoder.as_mut_ptr();
            (*ctx).opaque = Arc::as_ptr(&hook) as *mut c_void;
            (*ctx).get_buffer2 = Some(get_buffer2);
        }
        self.hook = Some(hook);
        debug!("pooled frame allocation installed");
        Ok(())
    }
}

impl std::fmt::Debug for FfmpegDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegDecoder")
            .field("params", &self.params)
            .field("pooled", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

fn codec_error(err: ffmpeg_next::Error) -> CodecError {
    match err {
        ffmpeg_next::Error::Other { errno } if errno == ffi::EAGAIN => CodecError::Again,
        ffmpeg_next::Error::Eof => CodecError::Eof,
        e => CodecError::Failed(e.to_string()),
    }
}

/**
    Buffer callback installed on the codec context.

    Planar 4:2:0 frames get one pooled chunk holding all three planes at the
    codec's aligned dimensions. Everything else falls through to libavcodec's
    default allocator.
*/
unsafe extern "C" fn get_buffer2(
    ctx: *mut ffi::AVCodecContext,
    frame: *mut ffi::AVFrame,
    flags: c_int,
) -> c_int {
    unsafe {
        let format = (*frame).format;
        let pooled_format = format == ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as c_int
            || format == ffi::AVPixelFormat::AV_PIX_FMT_YUVJ420P as c_int;
        let opaque = (*ctx).opaque as *const HookShared;
        if !pooled_format || opaque.is_null() {
            return ffi::avcodec_default_get_buffer2(ctx, frame, flags);
        }

        // Take a reference of our own so the state outlives this buffer.
        Arc::increment_strong_count(opaque);
        let hook = Arc::from_raw(opaque);

        let mut width = (*frame).width;
        let mut height = (*frame).height;
        ffi::avcodec_align_dimensions(ctx, &mut width, &mut height);

        let allocation = match hook.allocator.allocate(width as u32, height as u32) {
            Ok(allocation) => allocation,
            Err(e) => {
                warn!(error = %e, "pooled frame allocation failed");
                return ffi::AVERROR(ffi::ENOMEM);
            }
        };

        let layout = *allocation.layout();
        let planes: [*mut u8; 3] = [
            allocation.plane_ptr(0).unwrap_or(std::ptr::null_mut()),
            allocation.plane_ptr(1).unwrap_or(std::ptr::null_mut()),
            allocation.plane_ptr(2).unwrap_or(std::ptr::null_mut()),
        ];
        let total = layout.total();
        let address = planes[0] as usize;

        hook.live.lock().insert(address);
        let owner = Box::new(PooledBuffer {
            _wrapper: allocation.into_wrapper(),
            address,
            hook,
        });

        let owner = Box::into_raw(owner);
        let buf = ffi::av_buffer_create(
            planes[0],
            total as _,
            Some(release_pooled),
            owner as *mut c_void,
            0,
        );
        if buf.is_null() {
            drop(Box::from_raw(owner));
            return ffi::AVERROR(ffi::ENOMEM);
        }

        (*frame).buf[0] = buf;
        for i in 0..3 {
            (*frame).data[i] = planes[i];
            (*frame).linesize[i] = layout.strides[i] as c_int;
        }
        (*frame).data[3] = std::ptr::null_mut();
        (*frame).linesize[3] = 0;
        (*frame).extended_data = (*frame).data.as_mut_ptr();

        0
    }
}

unsafe extern "C" fn release_pooled(opaque: *mut c_void, _data: *mut u8) {
    // SAFETY: `opaque` is the box leaked in `get_buffer2`, freed exactly once.
    drop(unsafe { Box::from_raw(opaque as *mut PooledBuffer) });
}

/**
    Map a libavcodec pixel format. Layouts without a variant of their own
    become [`PixelFormat::Other`]; only `Pixel::None` has no mapping.
*/
fn pixel_format_from_ffmpeg(format: Pixel) -> Option<PixelFormat> {
    match format {
        Pixel::YUV420P => Some(PixelFormat::Yuv420p),
        Pixel::YUVJ420P => Some(PixelFormat::Yuvj420p),
        Pixel::YUVA420P => Some(PixelFormat::Yuva420p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::BGRA => Some(PixelFormat::Bgra),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::BGR24 => Some(PixelFormat::Bgr24),
        Pixel::YUV422P => Some(PixelFormat::Yuv422p),
        Pixel::YUV444P => Some(PixelFormat::Yuv444p),
        Pixel::YUV420P10LE | Pixel::YUV420P10BE => Some(PixelFormat::Yuv420p10),
        Pixel::P010LE | Pixel::P010BE => Some(PixelFormat::P010le),
        Pixel::GRAY8 => Some(PixelFormat::Gray8),
        Pixel::None => None,
        other => Some(PixelFormat::Other(ffi::AVPixelFormat::from(other) as i32)),
    }
}

/**
    Convert our PixelFormat to the FFmpeg pixel format.
*/
pub fn pixel_format_to_ffmpeg(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Yuvj420p => Pixel::YUVJ420P,
        PixelFormat::Yuva420p => Pixel::YUVA420P,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Bgr24 => Pixel::BGR24,
        PixelFormat::Yuv422p => Pixel::YUV422P,
        PixelFormat::Yuv444p => Pixel::YUV444P,
        PixelFormat::Yuv420p10 => Pixel::YUV420P10LE,
        PixelFormat::P010le => Pixel::P010LE,
        PixelFormat::Gray8 => Pixel::GRAY8,
        PixelFormat::Other(raw) => pixel_from_raw(raw),
        _ => Pixel::None,
    }
}

/// Look a raw format id up among the formats this libavutil knows.
fn pixel_from_raw(raw: i32) -> Pixel {
    let mut desc = std::ptr::null();
    loop {
        // SAFETY: walks libavutil's static descriptor table, starting from null.
        desc = unsafe { ffi::av_pix_fmt_desc_next(desc) };
        if desc.is_null() {
            return Pixel::None;
        }
        // SAFETY: `desc` is a non-null entry of the same table.
        let id = unsafe { ffi::av_pix_fmt_desc_get_id(desc) };
        if id as i32 == raw {
            return Pixel::from(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_layouts_survive_the_round_trip() {
        let format = pixel_format_from_ffmpeg(Pixel::YUV411P).unwrap();
        assert!(matches!(format, PixelFormat::Other(_)));
        assert_eq!(pixel_format_to_ffmpeg(format), Pixel::YUV411P);

        assert_eq!(pixel_format_from_ffmpeg(Pixel::None), None);
        assert_eq!(pixel_format_to_ffmpeg(PixelFormat::Other(-7)), Pixel::None);
    }
}
