/*!
    A decoder driven by a script, for tests.

    Each submitted packet consumes one [`Step`] from the script, which
    decides whether the packet is buffered, produces frames, or breaks the
    decoder. Frames are filled with a predictable pattern (see
    [`plane_fill`]) so tests can check where bytes end up.
*/

use std::collections::VecDeque;
use std::sync::Arc;

use interop_types::{Packet, PixelFormat, Pts, Rational, Result};

use crate::alloc::FrameAllocator;
use crate::decoder::{CodecError, DEFAULT_ALIGN, Decoder, VideoParams};
use crate::frame::{DecodedFrame, FrameInfo, Plane};

/**
    Timing and field flags of one scripted output frame.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSpec {
    pub pts: Option<i64>,
    pub duration: i64,
    pub interlaced: bool,
    pub top_field_first: bool,
}

impl FrameSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn interlaced(mut self, top_field_first: bool) -> Self {
        self.interlaced = true;
        self.top_field_first = top_field_first;
        self
    }
}

/**
    How the decoder reacts to one submitted packet.
*/
#[derive(Clone, Debug)]
pub enum Step {
    /// Keep the packet internally, produce nothing yet.
    Buffer,
    /// Make these frames available for receiving.
    Emit(Vec<FrameSpec>),
    /// Reject the packet.
    Reject(String),
    /// Accept the packet, then fail on the next receive.
    Break(String),
    /// Refuse the packet as if earlier input were still pending, then
    /// behave normally for the next one.
    Refuse,
}

/**
    Byte value the scripted decoder writes into `plane` of its `frame`-th
    output frame.
*/
pub fn plane_fill(frame: usize, plane: usize) -> u8 {
    match plane {
        0 => 16 + (frame % 200) as u8,
        1 => 128,
        2 => 128,
        _ => 255,
    }
}

pub struct ScriptedDecoder {
    params: VideoParams,
    script: VecDeque<Step>,
    output: VecDeque<FrameSpec>,
    pending_input: bool,
    hold_input: bool,
    eof: bool,
    failed: Option<String>,
    external_buffers: bool,
    allocator: Option<Arc<FrameAllocator>>,
    frames_emitted: usize,
    packets_received: usize,
}

impl ScriptedDecoder {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            params: VideoParams {
                width,
                height,
                format,
                time_base: Rational::new(1, 90_000),
            },
            script: VecDeque::new(),
            output: VecDeque::new(),
            pending_input: false,
            hold_input: false,
            eof: false,
            failed: None,
            external_buffers: false,
            allocator: None,
            frames_emitted: 0,
            packets_received: 0,
        }
    }

    pub fn with_script(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.extend(steps);
        self
    }

    /// Accept caller-supplied frame buffers.
    pub fn with_external_buffers(mut self) -> Self {
        self.external_buffers = true;
        self
    }

    /**
        Never consume submitted input, so the next submission is refused
        with [`CodecError::Again`].
    */
    pub fn holding_input(mut self) -> Self {
        self.hold_input = true;
        self
    }

    pub fn frames_emitted(&self) -> usize {
        self.frames_emitted
    }

    pub fn packets_received(&self) -> usize {
        self.packets_received
    }

    pub fn has_allocator(&self) -> bool {
        self.allocator.is_some()
    }

    fn build_frame(&mut self, spec: FrameSpec) -> Result<DecodedFrame> {
        let VideoParams {
            width,
            height,
            format,
            ..
        } = self.params;
        let frame_no = self.frames_emitted;

        let info = FrameInfo {
            pts: spec.pts.map(Pts),
            best_effort_pts: spec.pts.map(Pts),
            duration: spec.duration,
            interlaced: spec.interlaced,
            top_field_first: spec.top_field_first,
            ..FrameInfo::new(width, height, format)
        };

        if let Some(allocator) = self.allocator.clone() {
            let (aligned_width, aligned_height) = self.align_dimensions(width, height);
            let mut allocation = allocator.allocate(aligned_width, aligned_height)?;
            for plane in 0..3 {
                if let Some(bytes) = allocation.plane_mut(plane) {
                    bytes.fill(plane_fill(frame_no, plane));
                }
            }
            return allocation.into_frame(info);
        }

        let planes = format
            .planes(width, height, DEFAULT_ALIGN as usize)
            .iter()
            .enumerate()
            .map(|(i, geometry)| {
                Plane::from_vec(vec![plane_fill(frame_no, i); geometry.size()], geometry.stride)
            })
            .collect();
        Ok(DecodedFrame::new(info, planes))
    }
}

impl Decoder for ScriptedDecoder {
    fn params(&self) -> VideoParams {
        self.params
    }

    fn send_packet(&mut self, _packet: &Packet) -> std::result::Result<(), CodecError> {
        if let Some(msg) = &self.failed {
            return Err(CodecError::Failed(msg.clone()));
        }
        if self.eof {
            return Err(CodecError::Eof);
        }
        if self.pending_input {
            return Err(CodecError::Again);
        }
        if self.hold_input {
            self.packets_received += 1;
            self.pending_input = true;
            return Ok(());
        }

        let step = self.script.pop_front().unwrap_or(Step::Buffer);
        if !matches!(step, Step::Refuse) {
            self.packets_received += 1;
        }
        match step {
            Step::Refuse => Err(CodecError::Again),
            Step::Buffer => Ok(()),
            Step::Emit(frames) => {
                self.output.extend(frames);
                Ok(())
            }
            Step::Reject(msg) => {
                self.failed = Some(msg.clone());
                Err(CodecError::Failed(msg))
            }
            Step::Break(msg) => {
                self.failed = Some(msg);
                Ok(())
            }
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), CodecError> {
        if self.eof {
            return Err(CodecError::Eof);
        }
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> std::result::Result<DecodedFrame, CodecError> {
        if let Some(msg) = &self.failed {
            return Err(CodecError::Failed(msg.clone()));
        }
        match self.output.pop_front() {
            Some(spec) => {
                let frame = self
                    .build_frame(spec)
                    .map_err(|e| CodecError::Failed(e.to_string()))?;
                self.frames_emitted += 1;
                Ok(frame)
            }
            None if self.eof => Err(CodecError::Eof),
            None => Err(CodecError::Again),
        }
    }

    fn flush(&mut self) {
        self.output.clear();
        self.pending_input = false;
        self.eof = false;
        self.failed = None;
    }

    fn supports_external_buffers(&self) -> bool {
        self.external_buffers
    }

    fn install_allocator(&mut self, allocator: Arc<FrameAllocator>) -> Result<()> {
        if !self.external_buffers {
            return Err(interop_types::Error::unsupported_format(
                "scripted decoder was built without external buffer support",
            ));
        }
        self.allocator = Some(allocator);
        Ok(())
    }
}
