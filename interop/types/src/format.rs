/*!
    Pixel formats and plane geometry.
*/

/**
    Video pixel formats.

    This is a subset of formats commonly encountered in media pipelines.
    Not all FFmpeg pixel formats are represented.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp, video range (most common video format)
    Yuv420p,
    /// Planar YUV 4:2:0, 12bpp, full range (JPEG)
    Yuvj420p,
    /// Planar YUV 4:2:0 with a full-resolution alpha plane, 20bpp
    Yuva420p,
    /// Semi-planar YUV 4:2:0, 12bpp (common hardware decoder output)
    Nv12,
    /// Packed BGRA, 32bpp (common for display on macOS/Windows)
    Bgra,
    /// Packed RGBA, 32bpp (common for display)
    Rgba,
    /// Packed RGB, 24bpp
    Rgb24,
    /// Packed BGR, 24bpp
    Bgr24,
    /// Planar YUV 4:2:2, 16bpp
    Yuv422p,
    /// Planar YUV 4:4:4, 24bpp
    Yuv444p,
    /// Planar YUV 4:2:0, 10-bit (HDR content)
    Yuv420p10,
    /// Semi-planar YUV 4:2:0, 10-bit little-endian (HDR hardware decoder output)
    P010le,
    /// Single luma plane, 8bpp
    Gray8,
    /**
        A decoder layout with no variant here, carried by its raw FFmpeg
        pixel format id. Its plane geometry is unknown, so only native
        converters can read it.
    */
    Other(i32),
}

/**
    Size of one plane of an image: bytes of pixel data per row, the stride
    (row pitch including padding) and the number of rows.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub row_bytes: usize,
    pub stride: usize,
    pub rows: usize,
}

impl PlaneGeometry {
    /// Total bytes covered by the plane, padding included.
    pub const fn size(&self) -> usize {
        self.stride * self.rows
    }
}

/**
    Round `value` up to the next multiple of `align`. An alignment of zero or
    one leaves the value untouched.
*/
pub const fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

impl PixelFormat {
    /**
        Returns the number of bits per pixel for this format.

        For planar formats, this is the average bits per pixel.
    */
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Gray8 => 8,
            Self::Yuv420p | Self::Yuvj420p | Self::Nv12 => 12,
            Self::Yuv420p10 | Self::P010le => 15, // 10 bits * 1.5 planes average
            Self::Yuv422p => 16,
            Self::Yuva420p => 20,
            Self::Rgb24 | Self::Bgr24 | Self::Yuv444p => 24,
            Self::Bgra | Self::Rgba => 32,
            Self::Other(_) => 0,
        }
    }

    /**
        Returns true if this is a planar format.
    */
    pub const fn is_planar(self) -> bool {
        match self {
            Self::Yuv420p
            | Self::Yuvj420p
            | Self::Yuva420p
            | Self::Yuv422p
            | Self::Yuv444p
            | Self::Yuv420p10 => true,
            Self::Nv12 | Self::P010le => true, // semi-planar counts as planar
            Self::Bgra | Self::Rgba | Self::Rgb24 | Self::Bgr24 | Self::Gray8 => false,
            Self::Other(_) => false,
        }
    }

    /**
        Returns true if the format carries an alpha channel.
    */
    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::Yuva420p | Self::Bgra | Self::Rgba)
    }

    /**
        Returns true for YUV formats that use the full 0-255 range.
    */
    pub const fn is_full_range(self) -> bool {
        matches!(self, Self::Yuvj420p)
    }

    /**
        Horizontal and vertical chroma subsampling as log2 shifts.
    */
    pub const fn chroma_shift(self) -> (u32, u32) {
        match self {
            Self::Yuv420p
            | Self::Yuvj420p
            | Self::Yuva420p
            | Self::Yuv420p10
            | Self::Nv12
            | Self::P010le => (1, 1),
            Self::Yuv422p => (1, 0),
            Self::Yuv444p
            | Self::Bgra
            | Self::Rgba
            | Self::Rgb24
            | Self::Bgr24
            | Self::Gray8
            | Self::Other(_) => (0, 0),
        }
    }

    /**
        Number of separate memory planes.
    */
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Yuva420p => 4,
            Self::Yuv420p | Self::Yuvj420p | Self::Yuv422p | Self::Yuv444p | Self::Yuv420p10 => 3,
            Self::Nv12 | Self::P010le => 2,
            Self::Bgra | Self::Rgba | Self::Rgb24 | Self::Bgr24 | Self::Gray8 => 1,
            Self::Other(_) => 0,
        }
    }

    /**
        Compute the geometry of every plane for an image of the given size.

        Each stride is the plane's row size rounded up to `align` bytes.
        Subsampled chroma dimensions round up, so odd sizes keep their last
        row and column. [`PixelFormat::Other`] has no known planes.
    */
    pub fn planes(self, width: u32, height: u32, align: usize) -> Vec<PlaneGeometry> {
        let w = width as usize;
        let h = height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);

        let dims: Vec<(usize, usize)> = match self {
            Self::Yuv420p | Self::Yuvj420p => vec![(w, h), (cw, ch), (cw, ch)],
            Self::Yuva420p => vec![(w, h), (cw, ch), (cw, ch), (w, h)],
            Self::Yuv422p => vec![(w, h), (cw, h), (cw, h)],
            Self::Yuv444p => vec![(w, h), (w, h), (w, h)],
            Self::Yuv420p10 => vec![(2 * w, h), (2 * cw, ch), (2 * cw, ch)],
            Self::Nv12 => vec![(w, h), (2 * cw, ch)],
            Self::P010le => vec![(2 * w, h), (4 * cw, ch)],
            Self::Bgra | Self::Rgba => vec![(4 * w, h)],
            Self::Rgb24 | Self::Bgr24 => vec![(3 * w, h)],
            Self::Gray8 => vec![(w, h)],
            Self::Other(_) => Vec::new(),
        };

        dims.iter()
            .map(|&(row_bytes, rows)| PlaneGeometry {
                row_bytes,
                stride: align_up(row_bytes, align),
                rows,
            })
            .collect()
    }

    /**
        Total bytes for one image with the given plane alignment.
    */
    pub fn image_size(self, width: u32, height: u32, align: usize) -> usize {
        self.planes(width, height, align)
            .iter()
            .map(PlaneGeometry::size)
            .sum()
    }
}
