/*!
    Decode driver: feeds packets into a decoder and pulls frames out.
*/

use tracing::{debug, trace, warn};

use interop_types::{Error, Packet, Pts, Result};

use crate::decoder::{CodecError, Decoder};
use crate::frame::DecodedFrame;

/**
    Where the decoder stands in the send/receive protocol.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    /// The decoder has no output left for the input it was given.
    AwaitingInput,
    /// The last receive produced a frame; more output may be buffered, and
    /// it must be drained before the next packet goes in.
    FrameReady,
    /// End of stream was signalled; remaining frames are being drained.
    Draining,
    /// Every buffered frame has been returned.
    Drained,
    /// The decoder failed; it stays unusable until reset.
    Failed,
}

/**
    Result of a single submit-and-receive step.
*/
#[derive(Debug)]
pub enum DecodeStep {
    Frame(DecodedFrame),
    /// The decoder needs another packet before it can output anything.
    Incomplete,
    EndOfStream,
}

/**
    Result of [`DecodeDriver::decode_until_frame_or_need_more_input`].
*/
#[derive(Debug)]
pub enum DecodeStatus {
    Frame(DecodedFrame),
    /// Nothing was produced from the input so far; feed another packet.
    Incomplete,
    /// All output for the input so far has been delivered; feed another
    /// packet. Not a failure.
    Exhausted,
    EndOfStream,
}

/**
    Drives a [`Decoder`] one step at a time.

    The driver never retries a refused submission: a packet offered while
    the decoder still holds unconsumed input or undrained output is a caller
    ordering bug, reported as [`Error::Ordering`]. Like a hard decoder
    failure it leaves the driver [`DriverState::Failed`] until
    [`reset`](Self::reset). Empty packets are dropped before they reach the
    decoder. Needs-more-input is a
    status, never an error, and nothing here blocks.
*/
pub struct DecodeDriver<D> {
    decoder: D,
    state: DriverState,
    frames_since_input: usize,
    first_timing: Option<(Pts, i64)>,
    input_timing: Option<(Pts, i64)>,
}

impl<D: Decoder> DecodeDriver<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            state: DriverState::AwaitingInput,
            frames_since_input: 0,
            first_timing: None,
            input_timing: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut D {
        &mut self.decoder
    }

    pub fn into_decoder(self) -> D {
        self.decoder
    }

    /**
        Timestamp and duration of the first frame that carried a valid
        timestamp since the driver was created or reset.
    */
    pub fn first_timing(&self) -> Option<(Pts, i64)> {
        self.first_timing
    }

    /**
        Timestamp and duration of the first timed frame produced since the
        last packet was submitted. Cleared by every submitted packet.
    */
    pub fn input_timing(&self) -> Option<(Pts, i64)> {
        self.input_timing
    }

    /**
        Submit `packet` (if any), then try to receive one frame.
    */
    pub fn decode_one(&mut self, packet: Option<&Packet>) -> Result<DecodeStep> {
        match self.state {
            DriverState::Failed => {
                return Err(Error::decode("decoder failed earlier, reset before decoding"));
            }
            DriverState::Drained if packet.is_none() => return Ok(DecodeStep::EndOfStream),
            _ => {}
        }

        if let Some(packet) = packet {
            self.submit(packet)?;
        }
        self.receive()
    }

    /**
        Decode until a frame comes out or the decoder wants more input.

        The packet is submitted first; afterwards the decoder is only
        drained. If the decoder asks for input after it already produced a
        frame for the current input, the result is [`DecodeStatus::Exhausted`]
        rather than [`DecodeStatus::Incomplete`]: the caller still feeds the
        next packet, but the input so far did yield output.
    */
    pub fn decode_until_frame_or_need_more_input(
        &mut self,
        packet: Option<&Packet>,
    ) -> Result<DecodeStatus> {
        let delivered = packet.is_none() && self.frames_since_input > 0;

        Ok(match self.decode_one(packet)? {
            DecodeStep::Frame(frame) => DecodeStatus::Frame(frame),
            DecodeStep::Incomplete if delivered => DecodeStatus::Exhausted,
            DecodeStep::Incomplete => DecodeStatus::Incomplete,
            DecodeStep::EndOfStream => DecodeStatus::EndOfStream,
        })
    }

    /**
        Signal end of stream. Buffered frames are then returned by further
        calls without a packet, until [`DecodeStep::EndOfStream`].
    */
    pub fn drain(&mut self) -> Result<()> {
        match self.state {
            DriverState::Draining | DriverState::Drained => Ok(()),
            DriverState::Failed => Err(Error::decode("decoder failed earlier, cannot drain")),
            DriverState::FrameReady => {
                Err(self.violation("drain requested before buffered output was read"))
            }
            DriverState::AwaitingInput => match self.decoder.send_eof() {
                Ok(()) | Err(CodecError::Eof) => {
                    debug!("decoder draining");
                    self.state = DriverState::Draining;
                    Ok(())
                }
                Err(CodecError::Again) => {
                    Err(self.violation("decoder refused end of stream while holding input"))
                }
                Err(CodecError::Failed(msg)) => {
                    self.state = DriverState::Failed;
                    Err(Error::decode(msg))
                }
            },
        }
    }

    /**
        Flush the decoder and start over, e.g. after a seek.
    */
    pub fn reset(&mut self) {
        self.decoder.flush();
        self.state = DriverState::AwaitingInput;
        self.frames_since_input = 0;
        self.first_timing = None;
        self.input_timing = None;
        debug!("decode driver reset");
    }

    fn submit(&mut self, packet: &Packet) -> Result<()> {
        match self.state {
            DriverState::FrameReady => {
                return Err(self.violation("packet submitted before buffered output was drained"));
            }
            DriverState::Draining | DriverState::Drained => {
                return Err(self.violation("packet submitted after end of stream"));
            }
            DriverState::AwaitingInput | DriverState::Failed => {}
        }

        if packet.data.is_empty() {
            trace!(pts = ?packet.pts, "skipping empty packet");
            return Ok(());
        }

        match self.decoder.send_packet(packet) {
            Ok(()) => {
                trace!(size = packet.data.len(), pts = ?packet.pts, "packet submitted");
                self.frames_since_input = 0;
                self.input_timing = None;
                Ok(())
            }
            Err(CodecError::Again) => Err(self.violation("decoder still holds unconsumed input")),
            Err(CodecError::Eof) => Err(self.violation("decoder already received end of stream")),
            Err(CodecError::Failed(msg)) => {
                self.state = DriverState::Failed;
                Err(Error::decode(msg))
            }
        }
    }

    fn receive(&mut self) -> Result<DecodeStep> {
        match self.decoder.receive_frame() {
            Ok(frame) => {
                self.frames_since_input += 1;
                if self.state != DriverState::Draining {
                    self.state = DriverState::FrameReady;
                }
                if let Some(pts) = frame.timestamp() {
                    let timing = Some((pts, frame.info.duration));
                    self.first_timing = self.first_timing.or(timing);
                    self.input_timing = self.input_timing.or(timing);
                }
                trace!(pts = ?frame.timestamp(), "frame decoded");
                Ok(DecodeStep::Frame(frame))
            }
            // A decoder asking for input after end of stream has nothing left.
            Err(CodecError::Again) if self.state == DriverState::Draining => {
                self.state = DriverState::Drained;
                Ok(DecodeStep::EndOfStream)
            }
            Err(CodecError::Again) => {
                self.state = DriverState::AwaitingInput;
                Ok(DecodeStep::Incomplete)
            }
            Err(CodecError::Eof) => {
                debug!("decoder drained");
                self.state = DriverState::Drained;
                Ok(DecodeStep::EndOfStream)
            }
            Err(CodecError::Failed(msg)) => {
                self.state = DriverState::Failed;
                Err(Error::decode(msg))
            }
        }
    }

    fn violation(&mut self, msg: &str) -> Error {
        warn!(state = ?self.state, "{msg}");
        self.state = DriverState::Failed;
        Error::ordering(msg)
    }
}

impl<D> std::fmt::Debug for DecodeDriver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeDriver")
            .field("state", &self.state)
            .field("frames_since_input", &self.frames_since_input)
            .field("first_timing", &self.first_timing)
            .field("input_timing", &self.input_timing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use interop_types::PixelFormat;

    use super::*;
    use crate::scripted::{FrameSpec, ScriptedDecoder, Step};

    fn packet(n: i64) -> Packet {
        Packet::new(0, vec![n as u8; 8]).with_pts(n * 3000)
    }

    fn driver(steps: Vec<Step>) -> DecodeDriver<ScriptedDecoder> {
        DecodeDriver::new(ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).with_script(steps))
    }

    #[test]
    fn incomplete_until_kth_packet() {
        for k in 1..=5usize {
            let mut steps = vec![Step::Buffer; k - 1];
            steps.push(Step::Emit(vec![FrameSpec::new().with_pts(0)]));
            let mut driver = driver(steps);

            for i in 0..k - 1 {
                let status = driver
                    .decode_until_frame_or_need_more_input(Some(&packet(i as i64)))
                    .unwrap();
                assert!(matches!(status, DecodeStatus::Incomplete), "k={k} i={i}");
            }
            let status = driver
                .decode_until_frame_or_need_more_input(Some(&packet(k as i64)))
                .unwrap();
            assert!(matches!(status, DecodeStatus::Frame(_)), "k={k}");
        }
    }

    #[test]
    fn pending_input_is_an_ordering_violation() {
        let mut driver = DecodeDriver::new(
            ScriptedDecoder::new(PixelFormat::Yuv420p, 16, 16).holding_input(),
        );
        assert!(matches!(
            driver.decode_one(Some(&packet(0))).unwrap(),
            DecodeStep::Incomplete
        ));

        let err = driver.decode_one(Some(&packet(1))).unwrap_err();
        assert!(matches!(err, Error::Ordering(_)));
        assert_eq!(driver.state(), DriverState::Failed);

        // Nothing more goes in until the driver is reset.
        assert!(matches!(
            driver.decode_one(Some(&packet(2))),
            Err(Error::Decode(_))
        ));
        assert_eq!(driver.decoder().packets_received(), 1);
    }

    #[test]
    fn refused_packet_fails_the_stream() {
        let mut driver = driver(vec![
            Step::Refuse,
            Step::Emit(vec![FrameSpec::new().with_pts(0)]),
        ]);
        assert!(matches!(
            driver.decode_until_frame_or_need_more_input(Some(&packet(0))),
            Err(Error::Ordering(_))
        ));
        assert!(matches!(
            driver.decode_until_frame_or_need_more_input(Some(&packet(1))),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            driver.decode_until_frame_or_need_more_input(None),
            Err(Error::Decode(_))
        ));
        assert_eq!(driver.decoder().frames_emitted(), 0);

        driver.reset();
        assert!(matches!(
            driver.decode_until_frame_or_need_more_input(Some(&packet(1))).unwrap(),
            DecodeStatus::Frame(_)
        ));
    }

    #[test]
    fn empty_packets_never_reach_the_decoder() {
        let mut driver = driver(vec![Step::Emit(vec![FrameSpec::new().with_pts(0)])]);
        assert!(matches!(
            driver.decode_one(Some(&Packet::new(0, vec![]))).unwrap(),
            DecodeStep::Incomplete
        ));
        assert_eq!(driver.decoder().packets_received(), 0);
        assert_eq!(driver.state(), DriverState::AwaitingInput);

        assert!(matches!(
            driver.decode_one(Some(&packet(1))).unwrap(),
            DecodeStep::Frame(_)
        ));
    }

    #[test]
    fn packet_while_frame_ready_is_refused() {
        let mut driver = driver(vec![Step::Emit(vec![FrameSpec::new(), FrameSpec::new()])]);
        assert!(matches!(
            driver.decode_one(Some(&packet(0))).unwrap(),
            DecodeStep::Frame(_)
        ));
        assert_eq!(driver.state(), DriverState::FrameReady);
        assert!(matches!(
            driver.decode_one(Some(&packet(1))),
            Err(Error::Ordering(_))
        ));
        assert_eq!(driver.state(), DriverState::Failed);
        assert_eq!(driver.decoder().packets_received(), 1);
    }

    #[test]
    fn exhausted_after_delivering_frames() {
        let mut driver = driver(vec![Step::Emit(vec![FrameSpec::new(), FrameSpec::new()])]);

        assert!(matches!(
            driver.decode_until_frame_or_need_more_input(Some(&packet(0))).unwrap(),
            DecodeStatus::Frame(_)
        ));
        assert!(matches!(
            driver.decode_until_frame_or_need_more_input(None).unwrap(),
            DecodeStatus::Frame(_)
        ));
        assert!(matches!(
            driver.decode_until_frame_or_need_more_input(None).unwrap(),
            DecodeStatus::Exhausted
        ));
        assert_eq!(driver.state(), DriverState::AwaitingInput);

        // The suppression only covers output for input already given.
        assert!(matches!(
            driver.decode_until_frame_or_need_more_input(Some(&packet(1))).unwrap(),
            DecodeStatus::Incomplete
        ));
    }

    #[test]
    fn records_first_valid_timing() {
        let mut driver = driver(vec![
            Step::Emit(vec![FrameSpec::new()]),
            Step::Emit(vec![FrameSpec::new().with_pts(9000).with_duration(3000)]),
            Step::Emit(vec![FrameSpec::new().with_pts(12000).with_duration(3000)]),
        ]);

        for n in 0..3 {
            let status = driver
                .decode_until_frame_or_need_more_input(Some(&packet(n)))
                .unwrap();
            assert!(matches!(status, DecodeStatus::Frame(_)));
            driver.decode_until_frame_or_need_more_input(None).unwrap();
        }
        assert_eq!(driver.first_timing(), Some((Pts(9000), 3000)));
    }

    #[test]
    fn input_timing_follows_the_latest_packet() {
        let mut driver = driver(vec![
            Step::Emit(vec![
                FrameSpec::new(),
                FrameSpec::new().with_pts(3000).with_duration(1500),
                FrameSpec::new().with_pts(4500).with_duration(1500),
            ]),
            Step::Buffer,
            Step::Emit(vec![FrameSpec::new().with_pts(9000).with_duration(3000)]),
        ]);

        driver.decode_until_frame_or_need_more_input(Some(&packet(0))).unwrap();
        assert_eq!(driver.input_timing(), None);
        driver.decode_until_frame_or_need_more_input(None).unwrap();
        driver.decode_until_frame_or_need_more_input(None).unwrap();
        assert_eq!(driver.input_timing(), Some((Pts(3000), 1500)));
        driver.decode_until_frame_or_need_more_input(None).unwrap();

        driver.decode_until_frame_or_need_more_input(Some(&packet(1))).unwrap();
        assert_eq!(driver.input_timing(), None);

        driver.decode_until_frame_or_need_more_input(Some(&packet(2))).unwrap();
        assert_eq!(driver.input_timing(), Some((Pts(9000), 3000)));
        assert_eq!(driver.first_timing(), Some((Pts(3000), 1500)));
    }

    #[test]
    fn hard_failure_is_sticky_until_reset() {
        let mut driver = driver(vec![Step::Reject("corrupt".into())]);
        assert!(matches!(
            driver.decode_one(Some(&packet(0))),
            Err(Error::Decode(_))
        ));
        assert_eq!(driver.state(), DriverState::Failed);
        assert!(matches!(driver.decode_one(None), Err(Error::Decode(_))));

        driver.reset();
        assert_eq!(driver.state(), DriverState::AwaitingInput);
        assert!(matches!(
            driver.decode_one(Some(&packet(1))).unwrap(),
            DecodeStep::Incomplete
        ));
    }

    #[test]
    fn receive_failure_fails_the_step() {
        let mut driver = driver(vec![Step::Break("bitstream error".into())]);
        let err = driver.decode_one(Some(&packet(0))).unwrap_err();
        assert!(matches!(err, Error::Decode(msg) if msg == "bitstream error"));
    }

    #[test]
    fn drain_without_output_ends_the_stream() {
        let mut driver = driver(vec![Step::Buffer, Step::Buffer]);
        driver.decode_one(Some(&packet(0))).unwrap();
        driver.decode_one(Some(&packet(1))).unwrap();

        driver.drain().unwrap();
        assert_eq!(driver.state(), DriverState::Draining);
        assert!(matches!(
            driver.decode_one(None).unwrap(),
            DecodeStep::EndOfStream
        ));
        assert_eq!(driver.state(), DriverState::Drained);
        assert!(matches!(
            driver.decode_one(None).unwrap(),
            DecodeStep::EndOfStream
        ));
        assert!(matches!(
            driver.decode_one(Some(&packet(2))),
            Err(Error::Ordering(_))
        ));
    }

    #[test]
    fn drain_before_reading_output_is_refused() {
        let mut driver = driver(vec![Step::Emit(vec![FrameSpec::new(), FrameSpec::new()])]);
        driver.decode_one(Some(&packet(0))).unwrap();
        assert!(matches!(driver.drain(), Err(Error::Ordering(_))));
        assert_eq!(driver.state(), DriverState::Failed);
    }

    #[test]
    fn drain_flushes_pending_output() {
        let mut driver = driver(vec![Step::Emit(vec![
            FrameSpec::new().with_pts(1),
            FrameSpec::new().with_pts(2),
        ])]);
        assert!(matches!(
            driver.decode_one(Some(&packet(0))).unwrap(),
            DecodeStep::Frame(_)
        ));

        let DecodeStep::Frame(second) = driver.decode_one(None).unwrap() else {
            panic!("expected the buffered frame");
        };
        assert_eq!(second.timestamp(), Some(Pts(2)));
        assert!(matches!(
            driver.decode_one(None).unwrap(),
            DecodeStep::Incomplete
        ));
        driver.drain().unwrap();
        assert!(matches!(
            driver.decode_one(None).unwrap(),
            DecodeStep::EndOfStream
        ));
    }
}
