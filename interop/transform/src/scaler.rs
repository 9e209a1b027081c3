/*!
    Pixel format conversion between a decoded frame and an [`ImageBuffer`].
*/

use interop_decode::DecodedFrame;
use interop_types::{Error, PixelFormat, Result};

use crate::image::ImageBuffer;

/**
    Scaling algorithm for video resizing.

    The adapter converts at the source size, so here the algorithm only
    decides how chroma is resampled. libswscale applies each filter as
    named; [`SoftwareScaler`] point-samples chroma for `Nearest` and
    averages each 2x2 block for every other choice.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScalingAlgorithm {
    /// Nearest neighbor - fastest, lowest quality.
    Nearest,
    /// Bilinear interpolation - fast, acceptable quality.
    Bilinear,
    /// Bicubic interpolation - moderate speed, good quality.
    #[default]
    Bicubic,
    /// Lanczos resampling - slowest, highest quality.
    Lanczos,
}

/**
    Which implementation performs conversions.

    libswscale is the default whenever the `ffmpeg` feature is enabled.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalerBackend {
    /// Built-in converter, no native dependencies.
    Software,
    /// libswscale.
    #[cfg(feature = "ffmpeg")]
    Ffmpeg,
}

impl Default for ScalerBackend {
    #[cfg(feature = "ffmpeg")]
    fn default() -> Self {
        Self::Ffmpeg
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn default() -> Self {
        Self::Software
    }
}

/**
    Converts frames of one fixed format and size into another format.
*/
pub trait Scaler: Send {
    fn scale(&mut self, frame: &DecodedFrame, dst: &mut ImageBuffer) -> Result<()>;
}

/**
    Create a scaler converting `src_format` to `dst_format` at
    `width` x `height`.
*/
pub fn create_scaler(
    backend: ScalerBackend,
    src_format: PixelFormat,
    dst_format: PixelFormat,
    width: u32,
    height: u32,
    algorithm: ScalingAlgorithm,
) -> Result<Box<dyn Scaler>> {
    match backend {
        ScalerBackend::Software => Ok(Box::new(SoftwareScaler::new(
            src_format, dst_format, width, height, algorithm,
        )?)),
        #[cfg(feature = "ffmpeg")]
        ScalerBackend::Ffmpeg => Ok(Box::new(crate::sws::SwsScaler::new(
            src_format, dst_format, width, height, algorithm,
        )?)),
    }
}

/// How the software scaler resamples chroma down to 4:2:0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChromaFilter {
    Point,
    Box,
}

impl From<ScalingAlgorithm> for ChromaFilter {
    fn from(algorithm: ScalingAlgorithm) -> Self {
        match algorithm {
            ScalingAlgorithm::Nearest => Self::Point,
            _ => Self::Box,
        }
    }
}

/**
    Pure Rust converter to `Nv12`, `Yuv420p` or `Bgra`, without resizing.

    Reads 8-bit YUV, 10-bit YUV (`Yuv420p10`, `P010le`, reduced to 8 bits)
    and packed RGB. Colors are converted with BT.601 integer coefficients;
    `Yuvj420p` and `Gray8` are treated as full range, other YUV input as
    video range. RGB input is converted to video-range YUV.
*/
#[derive(Debug)]
pub struct SoftwareScaler {
    src_format: PixelFormat,
    dst_format: PixelFormat,
    width: u32,
    height: u32,
    filter: ChromaFilter,
}

impl SoftwareScaler {
    pub fn new(
        src_format: PixelFormat,
        dst_format: PixelFormat,
        width: u32,
        height: u32,
        algorithm: ScalingAlgorithm,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid_data("scaler dimensions must be non-zero"));
        }
        if !Self::supports_source(src_format) {
            return Err(Error::unsupported_format(format!(
                "software scaler cannot read {src_format:?}"
            )));
        }
        if !matches!(
            dst_format,
            PixelFormat::Nv12 | PixelFormat::Yuv420p | PixelFormat::Bgra
        ) {
            return Err(Error::unsupported_format(format!(
                "software scaler cannot write {dst_format:?}"
            )));
        }

        Ok(Self {
            src_format,
            dst_format,
            width,
            height,
            filter: algorithm.into(),
        })
    }

    /// Every layout with known plane geometry can be read.
    pub fn supports_source(format: PixelFormat) -> bool {
        matches!(
            format,
            PixelFormat::Yuv420p
                | PixelFormat::Yuvj420p
                | PixelFormat::Yuva420p
                | PixelFormat::Yuv422p
                | PixelFormat::Yuv444p
                | PixelFormat::Yuv420p10
                | PixelFormat::Nv12
                | PixelFormat::P010le
                | PixelFormat::Gray8
                | PixelFormat::Rgb24
                | PixelFormat::Bgr24
                | PixelFormat::Rgba
                | PixelFormat::Bgra
        )
    }

    fn check(&self, frame: &DecodedFrame, dst: &ImageBuffer) -> Result<()> {
        if frame.format() != self.src_format
            || frame.width() != self.width
            || frame.height() != self.height
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
        if dst.format() != self.dst_format || dst.width() != self.width || dst.height() != self.height
        {
            return Err(Error::conversion(format!(
                "destination is {}x{} {:?}, scaler writes {}x{} {:?}",
                dst.width(),
                dst.height(),
                dst.format(),
                self.width,
                self.height,
                self.dst_format
            )));
        }
        Ok(())
    }
}

impl Scaler for SoftwareScaler {
    fn scale(&mut self, frame: &DecodedFrame, dst: &mut ImageBuffer) -> Result<()> {
        self.check(frame, dst)?;
        let src = Source::new(frame)?;
        let w = self.width as usize;
        let h = self.height as usize;

        match self.dst_format {
            PixelFormat::Bgra => write_bgra(&src, dst, w, h),
            PixelFormat::Nv12 => {
                write_luma(&src, dst, w, h)?;
                let stride = dst.planes()[1].stride;
                let uv = plane_of(dst, 1)?;
                for cy in 0..h.div_ceil(2) {
                    let row = &mut uv[cy * stride..];
                    for cx in 0..w.div_ceil(2) {
                        let (u, v) = src.chroma_420(cx, cy, w, h, self.filter);
                        row[2 * cx] = u;
                        row[2 * cx + 1] = v;
                    }
                }
                Ok(())
            }
            PixelFormat::Yuv420p => {
                write_luma(&src, dst, w, h)?;
                let stride = dst.planes()[1].stride;
                for (index, pick_v) in [(1, false), (2, true)] {
                    let plane = plane_of(dst, index)?;
                    for cy in 0..h.div_ceil(2) {
                        for cx in 0..w.div_ceil(2) {
                            let (u, v) = src.chroma_420(cx, cy, w, h, self.filter);
                            plane[cy * stride + cx] = if pick_v { v } else { u };
                        }
                    }
                }
                Ok(())
            }
            other => Err(Error::unsupported_format(format!(
                "software scaler cannot write {other:?}"
            ))),
        }
    }
}

fn plane_of(dst: &mut ImageBuffer, index: usize) -> Result<&mut [u8]> {
    let format = dst.format();
    dst.plane_mut(index)
        .ok_or_else(|| Error::conversion(format!("{format:?} image has no plane {index}")))
}

fn write_luma(src: &Source<'_>, dst: &mut ImageBuffer, w: usize, h: usize) -> Result<()> {
    let stride = dst.planes()[0].stride;
    let luma = plane_of(dst, 0)?;
    for y in 0..h {
        let row = &mut luma[y * stride..][..w];
        match src.luma_row(y, w) {
            Some(from) => row.copy_from_slice(from),
            None => {
                for (x, px) in row.iter_mut().enumerate() {
                    *px = src.luma(x, y);
                }
            }
        }
    }
    Ok(())
}

fn write_bgra(src: &Source<'_>, dst: &mut ImageBuffer, w: usize, h: usize) -> Result<()> {
    let stride = dst.planes()[0].stride;
    let out = plane_of(dst, 0)?;
    for y in 0..h {
        let row = &mut out[y * stride..][..4 * w];
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let [b, g, r] = match src.rgb(x, y) {
                Some([r, g, b]) => [b, g, r],
                None => {
                    let (u, v) = src.chroma_for_pixel(x, y);
                    yuv_to_bgr(src.luma(x, y), u, v, src.full_range)
                }
            };
            px.copy_from_slice(&[b, g, r, src.alpha(x, y)]);
        }
    }
    Ok(())
}

/**
    BT.601 YUV to B, G, R.
*/
fn yuv_to_bgr(y: u8, u: u8, v: u8, full_range: bool) -> [u8; 3] {
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let (r, g, b) = if full_range {
        let y = y as i32;
        (
            y + ((359 * e + 128) >> 8),
            y - ((88 * d + 183 * e + 128) >> 8),
            y + ((454 * d + 128) >> 8),
        )
    } else {
        let c = 298 * (y as i32 - 16);
        (
            (c + 409 * e + 128) >> 8,
            (c - 100 * d - 208 * e + 128) >> 8,
            (c + 516 * d + 128) >> 8,
        )
    };
    [clamp(b), clamp(g), clamp(r)]
}

/**
    BT.601 R, G, B to video-range Y, U, V.
*/
fn rgb_to_yuv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    [
        clamp(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16),
        clamp(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128),
        clamp(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128),
    ]
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Width and placement of one sample within a plane row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Depth {
    Eight,
    /// 16-bit little-endian words, 10 significant bits at the bottom.
    Low10,
    /// 16-bit little-endian words, 10 significant bits at the top.
    High10,
}

/// Validated rows of one source plane.
#[derive(Clone, Copy)]
struct Rows<'a> {
    data: &'a [u8],
    stride: usize,
    depth: Depth,
}

impl Rows<'_> {
    /// Sample `x` of row `y`, reduced to 8 bits.
    fn sample(&self, x: usize, y: usize) -> u8 {
        let row = &self.data[y * self.stride..];
        match self.depth {
            Depth::Eight => row[x],
            Depth::Low10 => (u16::from_le_bytes([row[2 * x], row[2 * x + 1]]) >> 2).min(255) as u8,
            Depth::High10 => (u16::from_le_bytes([row[2 * x], row[2 * x + 1]]) >> 8) as u8,
        }
    }
}

enum Chroma<'a> {
    Planar { u: Rows<'a>, v: Rows<'a> },
    Interleaved(Rows<'a>),
    Neutral,
}

impl Chroma<'_> {
    /// Chroma sample at chroma-plane coordinates.
    fn at(&self, cx: usize, cy: usize) -> (u8, u8) {
        match self {
            Self::Planar { u, v } => (u.sample(cx, cy), v.sample(cx, cy)),
            Self::Interleaved(uv) => (uv.sample(2 * cx, cy), uv.sample(2 * cx + 1, cy)),
            Self::Neutral => (128, 128),
        }
    }
}

enum Layout<'a> {
    Yuv {
        luma: Rows<'a>,
        chroma: Chroma<'a>,
        alpha: Option<Rows<'a>>,
        shift: (u32, u32),
    },
    Packed {
        pixels: Rows<'a>,
        bytes_per_pixel: usize,
        /// Byte offsets of red, green and blue within a pixel.
        rgb: [usize; 3],
        alpha: Option<usize>,
    },
}

/// Validated read access to the planes of a source frame.
struct Source<'a> {
    layout: Layout<'a>,
    full_range: bool,
}

/**
    The first `rows` rows of plane `index`, checked to hold `row_bytes` of
    pixel data per row.
*/
fn plane_rows(
    frame: &DecodedFrame,
    index: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(&[u8], usize)> {
    let plane = frame.plane(index)?;
    if plane.stride < row_bytes {
        return Err(Error::invalid_data(format!(
            "plane {index} stride {} is shorter than a {row_bytes} byte row",
            plane.stride
        )));
    }
    Ok((plane.rows(rows)?, plane.stride))
}

impl<'a> Source<'a> {
    fn new(frame: &'a DecodedFrame) -> Result<Self> {
        use PixelFormat::*;

        let format = frame.format();
        let geometry = format.planes(frame.width(), frame.height(), 1);
        let rows = |i: usize, depth: Depth| -> Result<Rows<'a>> {
            let g = geometry.get(i).ok_or_else(|| {
                Error::unsupported_format(format!("{format:?} has no plane {i}"))
            })?;
            let (data, stride) = plane_rows(frame, i, g.row_bytes, g.rows)?;
            Ok(Rows {
                data,
                stride,
                depth,
            })
        };
        let yuv = |chroma: Chroma<'a>, luma_depth: Depth| -> Result<Layout<'a>> {
            Ok(Layout::Yuv {
                luma: rows(0, luma_depth)?,
                chroma,
                alpha: None,
                shift: format.chroma_shift(),
            })
        };
        let packed = |bytes_per_pixel: usize, rgb: [usize; 3], alpha: Option<usize>| {
            Ok::<_, Error>(Layout::Packed {
                pixels: rows(0, Depth::Eight)?,
                bytes_per_pixel,
                rgb,
                alpha,
            })
        };
        let planar = |depth: Depth| -> Result<Chroma<'a>> {
            Ok(Chroma::Planar {
                u: rows(1, depth)?,
                v: rows(2, depth)?,
            })
        };

        let layout = match format {
            Gray8 => yuv(Chroma::Neutral, Depth::Eight)?,
            Nv12 => yuv(Chroma::Interleaved(rows(1, Depth::Eight)?), Depth::Eight)?,
            P010le => yuv(Chroma::Interleaved(rows(1, Depth::High10)?), Depth::High10)?,
            Yuv420p10 => yuv(planar(Depth::Low10)?, Depth::Low10)?,
            Yuv420p | Yuvj420p | Yuv422p | Yuv444p => yuv(planar(Depth::Eight)?, Depth::Eight)?,
            Yuva420p => Layout::Yuv {
                luma: rows(0, Depth::Eight)?,
                chroma: planar(Depth::Eight)?,
                alpha: Some(rows(3, Depth::Eight)?),
                shift: format.chroma_shift(),
            },
            Rgb24 => packed(3, [0, 1, 2], None)?,
            Bgr24 => packed(3, [2, 1, 0], None)?,
            Rgba => packed(4, [0, 1, 2], Some(3))?,
            Bgra => packed(4, [2, 1, 0], Some(3))?,
            other => {
                return Err(Error::unsupported_format(format!(
                    "software scaler cannot read {other:?}"
                )));
            }
        };

        Ok(Self {
            layout,
            full_range: matches!(format, Yuvj420p | Gray8),
        })
    }

    /// Row `y` of 8-bit luma, when it can be copied as is.
    fn luma_row(&self, y: usize, width: usize) -> Option<&'a [u8]> {
        match self.layout {
            Layout::Yuv { luma, .. } if luma.depth == Depth::Eight => {
                Some(&luma.data[y * luma.stride..][..width])
            }
            _ => None,
        }
    }

    /// Red, green and blue of a packed RGB pixel.
    fn rgb(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        match self.layout {
            Layout::Packed {
                pixels,
                bytes_per_pixel,
                rgb,
                ..
            } => {
                let px = &pixels.data[y * pixels.stride + x * bytes_per_pixel..];
                Some([px[rgb[0]], px[rgb[1]], px[rgb[2]]])
            }
            Layout::Yuv { .. } => None,
        }
    }

    fn luma(&self, x: usize, y: usize) -> u8 {
        match &self.layout {
            Layout::Yuv { luma, .. } => luma.sample(x, y),
            Layout::Packed { .. } => self.rgb(x, y).map_or(16, |rgb| rgb_to_yuv(rgb)[0]),
        }
    }

    fn alpha(&self, x: usize, y: usize) -> u8 {
        match &self.layout {
            Layout::Yuv {
                alpha: Some(alpha), ..
            } => alpha.sample(x, y),
            Layout::Packed {
                pixels,
                bytes_per_pixel,
                alpha: Some(offset),
                ..
            } => pixels.data[y * pixels.stride + x * bytes_per_pixel + offset],
            _ => 255,
        }
    }

    /// Chroma sample covering the luma pixel at (x, y).
    fn chroma_for_pixel(&self, x: usize, y: usize) -> (u8, u8) {
        match &self.layout {
            Layout::Yuv { chroma, shift, .. } => chroma.at(x >> shift.0, y >> shift.1),
            Layout::Packed { .. } => {
                let [_, u, v] = self.rgb(x, y).map_or([16, 128, 128], rgb_to_yuv);
                (u, v)
            }
        }
    }

    /**
        Chroma for the 4:2:0 sample at (cx, cy), covering luma pixels
        (2cx, 2cy) to (2cx + 1, 2cy + 1) clipped to the image.
    */
    fn chroma_420(
        &self,
        cx: usize,
        cy: usize,
        width: usize,
        height: usize,
        filter: ChromaFilter,
    ) -> (u8, u8) {
        if let Layout::Yuv {
            chroma,
            shift: (1, 1),
            ..
        } = &self.layout
        {
            return chroma.at(cx, cy);
        }
        let (x0, y0) = (2 * cx, 2 * cy);
        if filter == ChromaFilter::Point {
            return self.chroma_for_pixel(x0, y0);
        }

        let (mut sum_u, mut sum_v, mut n) = (0u32, 0u32, 0u32);
        for y in y0..(y0 + 2).min(height) {
            for x in x0..(x0 + 2).min(width) {
                let (u, v) = self.chroma_for_pixel(x, y);
                sum_u += u as u32;
                sum_v += v as u32;
                n += 1;
            }
        }
        (
            ((sum_u + n / 2) / n) as u8,
            ((sum_v + n / 2) / n) as u8,
        )
    }
}
