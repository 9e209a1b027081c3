/*!
    Output samples.
*/

use std::time::Duration;

use bytes::Bytes;

use interop_buffer::NativeBuffer;
use interop_transform::PlaneSpan;
use interop_types::{PixelFormat, Properties, Pts, Rational};

/**
    Pixel data of a sample.
*/
#[derive(Debug)]
pub enum SamplePayload {
    /// Frame bytes copied out of the decoder.
    Bytes(Bytes),
    /// Decoder memory handed over without copying. The memory goes back to
    /// its pool when the buffer is dropped.
    Buffer(NativeBuffer),
}

impl SamplePayload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Bytes(bytes) => &bytes[..],
            Self::Buffer(buffer) => buffer.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_zero_copy(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }
}

/**
    One decoded video sample, ready for presentation.
*/
#[derive(Debug)]
pub struct Sample {
    pub payload: SamplePayload,
    /// Where each plane sits in the payload.
    pub layout: Vec<PlaneSpan>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in `time_base` units, if known.
    pub pts: Option<Pts>,
    /// Duration in `time_base` units (zero if unknown).
    pub duration: i64,
    pub time_base: Rational,
    pub properties: Properties,
}

impl Sample {
    pub fn data(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /**
        Bytes of plane `index`, stride padding included.
    */
    pub fn plane(&self, index: usize) -> Option<&[u8]> {
        let span = self.layout.get(index)?;
        self.data().get(span.offset..span.offset + span.len())
    }

    pub fn presentation_time(&self) -> Option<Duration> {
        self.pts.map(|pts| pts.to_duration(self.time_base))
    }

    pub fn duration_time(&self) -> Duration {
        self.time_base.scale(self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pts: Option<i64>) -> Sample {
        Sample {
            payload: SamplePayload::Bytes(Bytes::from_static(&[1, 2, 3, 4, 5, 6])),
            layout: vec![
                PlaneSpan { offset: 0, stride: 2, rows: 2 },
                PlaneSpan { offset: 4, stride: 2, rows: 1 },
            ],
            format: PixelFormat::Nv12,
            width: 2,
            height: 2,
            pts: pts.map(Pts),
            duration: 3000,
            time_base: Rational::new(1, 90_000),
            properties: Properties::new(),
        }
    }

    #[test]
    fn times_use_the_time_base() {
        let sample = sample(Some(45_000));
        assert_eq!(sample.presentation_time(), Some(Duration::from_millis(500)));
        assert_eq!(sample.duration_time().as_micros(), 33_333);
        assert_eq!(self::sample(None).presentation_time(), None);
    }

    #[test]
    fn planes_follow_layout() {
        let sample = sample(None);
        assert_eq!(sample.plane(0), Some(&[1, 2, 3, 4][..]));
        assert_eq!(sample.plane(1), Some(&[5, 6][..]));
        assert_eq!(sample.plane(2), None);
        assert!(!sample.payload.is_zero_copy());
    }

    #[test]
    fn buffer_payload_reads_through() {
        let payload = SamplePayload::Buffer(NativeBuffer::from_vec(vec![9; 3]));
        assert!(payload.is_zero_copy());
        assert_eq!(payload.as_slice(), &[9, 9, 9]);
    }
}
