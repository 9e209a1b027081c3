/*!
    Contiguous image storage for converted frames.
*/

use interop_types::{Error, PixelFormat, PlaneGeometry, Result};

/**
    One image held in a single allocation, planes stored back to back.

    Allocated once up front so the per-frame conversion never allocates.
*/
pub struct ImageBuffer {
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: Vec<PlaneGeometry>,
    offsets: Vec<usize>,
    data: Vec<u8>,
}

impl ImageBuffer {
    /**
        Allocate a zeroed image. Rows of each plane are padded to `align`
        bytes; an alignment of 1 packs them tightly.

        Fails with [`Error::Resource`] if the memory cannot be reserved.
    */
    pub fn new(format: PixelFormat, width: u32, height: u32, align: usize) -> Result<Self> {
        let planes = format.planes(width, height, align);

        let mut offsets = Vec::with_capacity(planes.len());
        let mut total = 0;
        for plane in &planes {
            offsets.push(total);
            total += plane.size();
        }

        let mut data = Vec::new();
        data.try_reserve_exact(total).map_err(|e| {
            Error::resource(format!("failed to allocate {total} byte image buffer: {e}"))
        })?;
        data.resize(total, 0);

        Ok(Self {
            format,
            width,
            height,
            planes,
            offsets,
            data,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn planes(&self) -> &[PlaneGeometry] {
        &self.planes
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Total bytes of all planes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let geometry = self.planes.get(index)?;
        let start = self.offsets[index];
        self.data.get(start..start + geometry.size())
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let geometry = self.planes.get(index)?;
        let start = self.offsets[index];
        self.data.get_mut(start..start + geometry.size())
    }
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("planes", &self.planes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planes_are_contiguous() {
        let image = ImageBuffer::new(PixelFormat::Nv12, 6, 5, 1).unwrap();
        assert_eq!(image.plane_count(), 2);
        assert_eq!(image.plane(0).unwrap().len(), 6 * 5);
        // Chroma rows round up for odd heights.
        assert_eq!(image.plane(1).unwrap().len(), 6 * 3);
        assert_eq!(image.len(), 6 * 5 + 6 * 3);
        assert!(image.plane(2).is_none());
    }

    #[test]
    fn alignment_pads_rows() {
        let image = ImageBuffer::new(PixelFormat::Bgra, 3, 2, 16).unwrap();
        assert_eq!(image.planes()[0].row_bytes, 12);
        assert_eq!(image.planes()[0].stride, 16);
        assert_eq!(image.len(), 32);
    }

    #[test]
    fn plane_writes_stay_in_their_plane() {
        let mut image = ImageBuffer::new(PixelFormat::Yuv420p, 4, 4, 1).unwrap();
        image.plane_mut(1).unwrap().fill(7);
        assert!(image.plane(0).unwrap().iter().all(|&b| b == 0));
        assert!(image.plane(1).unwrap().iter().all(|&b| b == 7));
        assert!(image.plane(2).unwrap().iter().all(|&b| b == 0));
    }
}
