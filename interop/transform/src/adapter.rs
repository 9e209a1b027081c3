/*!
    Pixel-format adapter.

    Sits between the decoder and the sample payload. It picks the output
    layout from the decoder's native format, sets up whatever the chosen
    path needs (a scaler and image buffer, or the zero-copy allocation hook)
    and writes each decoded frame into the payload.
*/

use std::sync::Arc;

use bytes::BufMut;
use tracing::{debug, trace, warn};

use interop_buffer::NativeBuffer;
use interop_decode::{DecodedFrame, Decoder, FrameAllocator, VideoParams};
use interop_types::{Error, PixelFormat, Properties, PropertyKey, PropertyValue, Result};

use crate::image::ImageBuffer;
use crate::scaler::{Scaler, ScalerBackend, ScalingAlgorithm, create_scaler};

/**
    Configuration for the adapter.
*/
#[derive(Clone, Debug)]
pub struct AdapterConfig {
    /// Algorithm for the scaler on the conversion path.
    pub algorithm: ScalingAlgorithm,
    /// Let capable decoders write frames into pooled memory.
    pub zero_copy: bool,
    /// Upper bound on pooled frames in flight; unbounded if `None`.
    pub max_pool_chunks: Option<usize>,
    pub backend: ScalerBackend,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            algorithm: ScalingAlgorithm::default(),
            zero_copy: true,
            max_pool_chunks: None,
            backend: ScalerBackend::default(),
        }
    }
}

impl AdapterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(mut self, algorithm: ScalingAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_zero_copy(mut self, zero_copy: bool) -> Self {
        self.zero_copy = zero_copy;
        self
    }

    pub fn with_max_pool_chunks(mut self, max_chunks: usize) -> Self {
        self.max_pool_chunks = Some(max_chunks);
        self
    }

    pub fn with_backend(mut self, backend: ScalerBackend) -> Self {
        self.backend = backend;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    ResourcesAllocated,
    Closed,
}

/**
    Where one plane sits in a sample payload.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneSpan {
    pub offset: usize,
    pub stride: usize,
    pub rows: usize,
}

impl PlaneSpan {
    pub fn len(&self) -> usize {
        self.stride * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/**
    Output layout for a decoder's native format, and whether getting there
    needs a conversion.
*/
pub fn negotiate(input: PixelFormat) -> (PixelFormat, bool) {
    match input {
        PixelFormat::Yuv420p | PixelFormat::Yuvj420p => (PixelFormat::Yuv420p, false),
        PixelFormat::Yuva420p => (PixelFormat::Bgra, true),
        _ => (PixelFormat::Nv12, true),
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct FieldInfo {
    interlaced: bool,
    top_field_first: bool,
}

/**
    Adapts decoded frames to the negotiated output layout.

    Lifecycle: [`VideoAdapter::new`], then [`allocate_resources`] once, then
    any number of [`write_frame`] calls, then [`close`].

    [`allocate_resources`]: VideoAdapter::allocate_resources
    [`write_frame`]: VideoAdapter::write_frame
    [`close`]: VideoAdapter::close
*/
pub struct VideoAdapter {
    config: AdapterConfig,
    width: u32,
    height: u32,
    input_format: PixelFormat,
    output_format: PixelFormat,
    needs_conversion: bool,
    state: AdapterState,
    scaler: Option<Box<dyn Scaler>>,
    image: Option<ImageBuffer>,
    allocator: Option<Arc<FrameAllocator>>,
    fields: FieldInfo,
}

impl VideoAdapter {
    pub fn new(params: &VideoParams, config: AdapterConfig) -> Self {
        let (output_format, needs_conversion) = negotiate(params.format);
        debug!(
            input = ?params.format,
            output = ?output_format,
            needs_conversion,
            "negotiated output format"
        );

        Self {
            config,
            width: params.width,
            height: params.height,
            input_format: params.format,
            output_format,
            needs_conversion,
            state: AdapterState::Uninitialized,
            scaler: None,
            image: None,
            allocator: None,
            fields: FieldInfo::default(),
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn input_format(&self) -> PixelFormat {
        self.input_format
    }

    pub fn output_format(&self) -> PixelFormat {
        self.output_format
    }

    pub fn needs_conversion(&self) -> bool {
        self.needs_conversion
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The allocator installed on the decoder, if zero-copy is active.
    pub fn allocator(&self) -> Option<&Arc<FrameAllocator>> {
        self.allocator.as_ref()
    }

    /**
        Set up the resources the negotiated path needs.

        For conversions a scaler and the output image are created; failing
        that is fatal. Otherwise, if the decoder can write into external
        buffers, the pooled allocator is installed on it. Failing to install
        it only costs the zero-copy path, so it is logged and ignored.
    */
    pub fn allocate_resources<D: Decoder + ?Sized>(&mut self, decoder: &mut D) -> Result<()> {
        match self.state {
            AdapterState::Uninitialized => {}
            AdapterState::ResourcesAllocated => {
                return Err(Error::invalid_state("adapter resources already allocated"));
            }
            AdapterState::Closed => return Err(Error::Closed),
        }

        if self.needs_conversion {
            let scaler = create_scaler(
                self.config.backend,
                self.input_format,
                self.output_format,
                self.width,
                self.height,
                self.config.algorithm,
            )
            .map_err(|e| Error::resource(format!("failed to create scaler: {e}")))?;
            let image = ImageBuffer::new(self.output_format, self.width, self.height, 1)?;
            debug!(bytes = image.len(), "conversion buffer allocated");

            self.scaler = Some(scaler);
            self.image = Some(image);
        } else if self.config.zero_copy && decoder.supports_external_buffers() {
            let allocator = Arc::new(match self.config.max_pool_chunks {
                Some(max) => FrameAllocator::with_max_chunks(max),
                None => FrameAllocator::new(),
            });
            match decoder.install_allocator(allocator.clone()) {
                Ok(()) => {
                    debug!("zero-copy frame allocation enabled");
                    self.allocator = Some(allocator);
                }
                Err(e) => {
                    warn!(error = %e, "zero-copy frame allocation unavailable, copying frames");
                }
            }
        }

        self.state = AdapterState::ResourcesAllocated;
        Ok(())
    }

    /**
        Remember the field flags of the frame just decoded.
    */
    pub fn record_fields(&mut self, frame: &DecodedFrame) {
        self.fields = FieldInfo {
            interlaced: frame.info.interlaced,
            top_field_first: frame.info.top_field_first,
        };
    }

    /**
        Write the recorded field flags into sample properties.
    */
    pub fn apply_properties(&self, properties: &mut Properties) {
        properties.insert(
            PropertyKey::Interlaced,
            PropertyValue::Bool(self.fields.interlaced),
        );
        if self.fields.interlaced {
            properties.insert(
                PropertyKey::BottomFieldFirst,
                PropertyValue::Bool(!self.fields.top_field_first),
            );
            properties.insert(PropertyKey::RepeatFirstField, PropertyValue::Bool(false));
        }
    }

    /**
        Write `frame` into `out` in the output layout and return where each
        plane landed.

        Each plane is written as stride x rows with no other padding. The
        frame is released whether or not writing succeeds. A failed
        conversion only affects this frame.
    */
    pub fn write_frame<W: BufMut>(
        &mut self,
        frame: DecodedFrame,
        out: &mut W,
    ) -> Result<Vec<PlaneSpan>> {
        if self.state == AdapterState::Closed {
            return Err(Error::Closed);
        }

        if !self.needs_conversion {
            return self.copy_planes(&frame, out);
        }

        let (Some(scaler), Some(image)) = (self.scaler.as_mut(), self.image.as_mut()) else {
            return Err(Error::invalid_state("conversion resources not allocated"));
        };
        scaler.scale(&frame, image).map_err(|e| match e {
            Error::Conversion(_) => e,
            other => Error::conversion(other.to_string()),
        })?;
        drop(frame);

        let mut spans = Vec::with_capacity(image.plane_count());
        let mut offset = 0;
        for (index, geometry) in image.planes().iter().enumerate() {
            if let Some(bytes) = image.plane(index) {
                out.put_slice(bytes);
            }
            spans.push(PlaneSpan {
                offset,
                stride: geometry.stride,
                rows: geometry.rows,
            });
            offset += geometry.size();
        }
        trace!(bytes = offset, "converted frame written");
        Ok(spans)
    }

    /**
        Hand the frame's pooled memory over without copying.

        Only frames on the native path that were written into a pooled chunk
        qualify; any other frame is given back so the caller can fall back
        to [`write_frame`](Self::write_frame). The returned spans locate the
        planes inside the buffer.
    */
    pub fn hand_off(
        &self,
        mut frame: DecodedFrame,
    ) -> std::result::Result<(NativeBuffer, Vec<PlaneSpan>), DecodedFrame> {
        if self.needs_conversion || self.state == AdapterState::Closed || !frame.is_pool_backed()
        {
            return Err(frame);
        }
        let Some(backing) = frame.take_backing() else {
            return Err(frame);
        };

        let base = backing.as_ptr() as usize;
        let rows = plane_rows(frame.format(), frame.height());
        let spans: Option<Vec<PlaneSpan>> = frame
            .planes()
            .iter()
            .zip(rows)
            .map(|(plane, rows)| {
                let offset = (plane.data.as_ptr() as usize).checked_sub(base)?;
                let span = PlaneSpan {
                    offset,
                    stride: plane.stride,
                    rows,
                };
                (offset + span.len() <= backing.len()).then_some(span)
            })
            .collect();

        match spans {
            Some(spans) => {
                trace!(bytes = backing.len(), "pooled frame handed off");
                Ok((backing, spans))
            }
            None => Err(frame.with_backing(backing)),
        }
    }

    /**
        Release the scaler, image buffer and allocator. Safe to call more
        than once.
    */
    pub fn close(&mut self) {
        if self.state == AdapterState::Closed {
            return;
        }
        self.scaler.take();
        self.image.take();
        self.allocator.take();
        self.state = AdapterState::Closed;
        debug!("adapter closed");
    }

    fn copy_planes<W: BufMut>(&self, frame: &DecodedFrame, out: &mut W) -> Result<Vec<PlaneSpan>> {
        if !matches!(frame.format(), PixelFormat::Yuv420p | PixelFormat::Yuvj420p) {
            return Err(Error::conversion(format!(
                "expected a 4:2:0 planar frame, got {:?}",
                frame.format()
            )));
        }

        let mut spans = Vec::with_capacity(3);
        let mut offset = 0;
        for (index, rows) in plane_rows(frame.format(), frame.height()).into_iter().enumerate() {
            let plane = frame.plane(index)?;
            let bytes = plane.rows(rows)?;
            out.put_slice(bytes);
            spans.push(PlaneSpan {
                offset,
                stride: plane.stride,
                rows,
            });
            offset += bytes.len();
        }
        trace!(bytes = offset, "frame copied");
        Ok(spans)
    }
}

/// Visible rows of each plane; chroma rows round up.
fn plane_rows(format: PixelFormat, height: u32) -> Vec<usize> {
    format.planes(1, height, 1).iter().map(|g| g.rows).collect()
}

impl std::fmt::Debug for VideoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoAdapter")
            .field("config", &self.config)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("input_format", &self.input_format)
            .field("output_format", &self.output_format)
            .field("state", &self.state)
            .field("zero_copy", &self.allocator.is_some())
            .finish_non_exhaustive()
    }
}
