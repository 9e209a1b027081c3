/*!
    Sample provider: packets in, one sample out per call.
*/

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use interop_decode::{DecodeDriver, DecodeStatus, DecodedFrame, Decoder, DriverState, VideoParams};
use interop_transform::{AdapterConfig, PlaneSpan, VideoAdapter};
use interop_types::{Error, Packet, PixelFormat, Properties, Pts, Result};

use crate::sample::{Sample, SamplePayload};
use crate::source::PacketSource;

/**
    How frame pixels get into a sample.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadMode {
    /// Copy every frame into a fresh payload.
    #[default]
    Copy,
    /// Hand pooled decoder memory to the sample where possible, copying
    /// only frames that need conversion or were not pool-backed.
    HandOff,
}

/**
    Configuration for the sample provider.
*/
#[derive(Clone, Debug, Default)]
pub struct ProviderConfig {
    pub adapter: AdapterConfig,
    pub payload: PayloadMode,
    /// Only packets of this stream are decoded; all are if `None`.
    pub stream_index: Option<usize>,
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: AdapterConfig) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_payload(mut self, payload: PayloadMode) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_stream_index(mut self, stream_index: usize) -> Self {
        self.stream_index = Some(stream_index);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    ResourcesAllocated,
    /// Packets are being fed to the decoder.
    Decoding,
    /// The source is exhausted; buffered frames are being drained.
    Draining,
    /// A fatal error stopped the stream. Only [`flush`] or [`close`] move
    /// it on.
    ///
    /// [`flush`]: VideoSampleProvider::flush
    /// [`close`]: VideoSampleProvider::close
    Failed,
    Closed,
}

/**
    Pulls decoded video samples out of a packet source.

    Decoding is synchronous and single threaded: each call to
    [`get_next_sample`](Self::get_next_sample) runs on the caller's thread.
    Samples may be sent to and dropped on other threads.
*/
pub struct VideoSampleProvider<D, S> {
    driver: DecodeDriver<D>,
    source: S,
    adapter: VideoAdapter,
    config: ProviderConfig,
    params: VideoParams,
    state: StreamState,
}

impl<D: Decoder, S: PacketSource> VideoSampleProvider<D, S> {
    /**
        Create a provider without allocating anything yet.
    */
    pub fn new(decoder: D, source: S, config: ProviderConfig) -> Self {
        let params = decoder.params();
        let adapter = VideoAdapter::new(&params, config.adapter.clone());

        Self {
            driver: DecodeDriver::new(decoder),
            source,
            adapter,
            config,
            params,
            state: StreamState::Uninitialized,
        }
    }

    /**
        Create a provider and allocate its resources.

        On failure everything set up so far is released and the error
        returned.
    */
    pub fn open(decoder: D, source: S, config: ProviderConfig) -> Result<Self> {
        let mut provider = Self::new(decoder, source, config);
        provider.initialize()?;
        Ok(provider)
    }

    /**
        Allocate conversion or zero-copy resources for the negotiated format.
    */
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            StreamState::Uninitialized => {}
            StreamState::Closed => return Err(Error::Closed),
            _ => return Err(Error::invalid_state("provider already initialized")),
        }

        if let Err(e) = self.adapter.allocate_resources(self.driver.decoder_mut()) {
            warn!(error = %e, "sample provider setup failed");
            self.close();
            return Err(e);
        }

        self.state = StreamState::ResourcesAllocated;
        debug!(
            width = self.params.width,
            height = self.params.height,
            format = ?self.adapter.output_format(),
            "sample provider ready"
        );
        Ok(())
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn params(&self) -> VideoParams {
        self.params
    }

    pub fn output_format(&self) -> PixelFormat {
        self.adapter.output_format()
    }

    pub fn adapter(&self) -> &VideoAdapter {
        &self.adapter
    }

    pub fn decoder(&self) -> &D {
        self.driver.decoder()
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /**
        Timestamp and duration of the first frame that had one.
    */
    pub fn first_timing(&self) -> Option<(Pts, i64)> {
        self.driver.first_timing()
    }

    /**
        Decode until the next sample is available.

        Returns `Ok(None)` once the source is exhausted and every buffered
        frame has been returned. A conversion error fails only the current
        frame; the next call carries on with the following one. Any fatal
        error leaves the provider [`StreamState::Failed`], and no further
        packets are read.
    */
    pub fn get_next_sample(&mut self) -> Result<Option<Sample>> {
        match self.state {
            StreamState::Uninitialized => {
                return Err(Error::invalid_state("provider not initialized"));
            }
            StreamState::Failed => {
                return Err(Error::decode("stream failed earlier, flush before decoding again"));
            }
            StreamState::Closed => return Err(Error::Closed),
            _ => {}
        }

        let result = self.next_sample();
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(error = %e, "sample provider failed");
                self.state = StreamState::Failed;
            }
        }
        result
    }

    fn next_sample(&mut self) -> Result<Option<Sample>> {
        loop {
            let needs_input = self.driver.state() == DriverState::AwaitingInput
                && self.state != StreamState::Draining;

            let status = if needs_input {
                match self.next_packet()? {
                    Some(packet) => {
                        self.state = StreamState::Decoding;
                        self.driver
                            .decode_until_frame_or_need_more_input(Some(&packet))?
                    }
                    None => {
                        debug!("packet source exhausted, draining decoder");
                        self.driver.drain()?;
                        self.state = StreamState::Draining;
                        self.driver.decode_until_frame_or_need_more_input(None)?
                    }
                }
            } else {
                self.driver.decode_until_frame_or_need_more_input(None)?
            };

            match status {
                DecodeStatus::Frame(frame) => return self.emit(frame).map(Some),
                DecodeStatus::Incomplete | DecodeStatus::Exhausted => continue,
                DecodeStatus::EndOfStream => {
                    trace!("end of stream");
                    return Ok(None);
                }
            }
        }
    }

    /**
        Discard decoder state, e.g. after seeking the source. This is also
        how a failed stream is restarted.
    */
    pub fn flush(&mut self) -> Result<()> {
        match self.state {
            StreamState::Uninitialized => Err(Error::invalid_state("provider not initialized")),
            StreamState::Closed => Err(Error::Closed),
            _ => {
                self.driver.reset();
                self.state = StreamState::ResourcesAllocated;
                Ok(())
            }
        }
    }

    /**
        Release adapter resources. Further calls fail with [`Error::Closed`].
        Safe to call more than once.
    */
    pub fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.adapter.close();
        self.state = StreamState::Closed;
        debug!("sample provider closed");
    }

    fn next_packet(&mut self) -> Result<Option<Packet>> {
        while let Some(packet) = self.source.read_packet()? {
            match self.config.stream_index {
                Some(index) if packet.stream_index != index => {
                    trace!(stream = packet.stream_index, "skipping packet of other stream");
                }
                _ => return Ok(Some(packet)),
            }
        }
        Ok(None)
    }

    fn emit(&mut self, frame: DecodedFrame) -> Result<Sample> {
        self.adapter.record_fields(&frame);
        let info = frame.info;
        let pts = frame.timestamp();

        let (payload, layout) = match self.config.payload {
            PayloadMode::HandOff => match self.adapter.hand_off(frame) {
                Ok((buffer, layout)) => (SamplePayload::Buffer(buffer), layout),
                Err(frame) => self.copy(frame)?,
            },
            PayloadMode::Copy => self.copy(frame)?,
        };

        let mut properties = Properties::new();
        self.adapter.apply_properties(&mut properties);

        trace!(pts = ?pts, bytes = payload.len(), "sample ready");
        Ok(Sample {
            payload,
            layout,
            format: self.adapter.output_format(),
            width: info.width,
            height: info.height,
            pts,
            duration: info.duration,
            time_base: self.params.time_base,
            properties,
        })
    }

    fn copy(&mut self, frame: DecodedFrame) -> Result<(SamplePayload, Vec<PlaneSpan>)> {
        let hint = self
            .adapter
            .output_format()
            .image_size(frame.width(), frame.height(), 1);
        let mut buf = BytesMut::with_capacity(hint);
        let layout = self.adapter.write_frame(frame, &mut buf)?;
        Ok((SamplePayload::Bytes(buf.freeze()), layout))
    }
}

impl<D, S> std::fmt::Debug for VideoSampleProvider<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSampleProvider")
            .field("state", &self.state)
            .field("params", &self.params)
            .field("adapter", &self.adapter)
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}
