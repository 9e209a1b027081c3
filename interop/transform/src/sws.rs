/*!
    libswscale-backed [`Scaler`].
*/

use std::os::raw::c_int;

use ffmpeg_next::{
    ffi,
    software::scaling::{context::Context as ScalerContext, flag::Flags as ScalerFlags},
};

use interop_decode::{DecodedFrame, pixel_format_to_ffmpeg};
use interop_types::{Error, PixelFormat, Result};

use crate::image::ImageBuffer;
use crate::scaler::{Scaler, ScalingAlgorithm};

impl ScalingAlgorithm {
    fn to_ffmpeg_flags(self) -> ScalerFlags {
        match self {
            Self::Nearest => ScalerFlags::POINT,
            Self::Bilinear => ScalerFlags::BILINEAR,
            Self::Bicubic => ScalerFlags::BICUBIC,
            Self::Lanczos => ScalerFlags::LANCZOS,
        }
    }
}

/**
    Converts frames with libswscale, reading the frame planes and writing
    the image planes in place.
*/
pub struct SwsScaler {
    context: ScalerContext,
    src_format: PixelFormat,
    dst_format: PixelFormat,
    width: u32,
    height: u32,
}

// SAFETY: the context is only used through `&mut self`.
unsafe impl Send for SwsScaler {}

impl SwsScaler {
    pub fn new(
        src_format: PixelFormat,
        dst_format: PixelFormat,
        width: u32,
        height: u32,
        algorithm: ScalingAlgorithm,
    ) -> Result<Self> {
        let src_pixel = pixel_format_to_ffmpeg(src_format);
        let dst_pixel = pixel_format_to_ffmpeg(dst_format);
        if src_pixel == ffmpeg_next::format::Pixel::None
            || dst_pixel == ffmpeg_next::format::Pixel::None
        {
            return Err(Error::unsupported_format(format!(
                "no swscale format for {src_format:?} -> {dst_format:?}"
            )));
        }

        let context = ScalerContext::get(
            src_pixel,
            width,
            height,
            dst_pixel,
            width,
            height,
            algorithm.to_ffmpeg_flags(),
        )
        .map_err(|e| Error::resource(format!("failed to create scaler: {}", e)))?;

        Ok(Self {
            context,
            src_format,
            dst_format,
            width,
            height,
        })
    }
}

impl Scaler for SwsScaler {
    fn scale(&mut self, frame: &DecodedFrame, dst: &mut ImageBuffer) -> Result<()> {
        if frame.format() != self.src_format
            || frame.width() != self.width
            || frame.height() != self.height
            || dst.format() != self.dst_format
        {
            return Err(Error::conversion(format!(
                "scaler expects {}x{} {:?}, got {}x{} {:?}",
                self.width,
                self.height,
                self.src_format,
                frame.width(),
                frame.height(),
                frame.format()
            )));
        }

        let mut src_data = [std::ptr::null::<u8>(); 4];
        let mut src_stride = [0 as c_int; 4];
        for (i, plane) in frame.planes().iter().take(4).enumerate() {
            src_data[i] = plane.data.as_ptr();
            src_stride[i] = plane.stride as c_int;
        }

        let strides: Vec<usize> = dst.planes().iter().map(|g| g.stride).collect();
        let mut dst_data = [std::ptr::null_mut::<u8>(); 4];
        let mut dst_stride = [0 as c_int; 4];
        for (i, stride) in strides.iter().take(4).enumerate() {
            if let Some(plane) = dst.plane_mut(i) {
                dst_data[i] = plane.as_mut_ptr();
                dst_stride[i] = *stride as c_int;
            }
        }

        // SAFETY: plane pointers and strides describe live buffers of the
        // configured format and size, checked above.
        let rows = unsafe {
            ffi::sws_scale(
                self.context.as_mut_ptr(),
                src_data.as_ptr(),
                src_stride.as_ptr(),
                0,
                self.height as c_int,
                dst_data.as_ptr(),
                dst_stride.as_ptr(),
            )
        };
        if rows < 0 {
            return Err(Error::conversion(format!("sws_scale failed with {rows}")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SwsScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwsScaler")
            .field("src_format", &self.src_format)
            .field("dst_format", &self.dst_format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
