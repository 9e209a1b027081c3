/*!
    Compressed packets and timing types.
*/

use std::time::Duration;

/**
    Presentation timestamp in stream time-base units.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pts(pub i64);

impl Pts {
    /**
        Convert to wall-clock time using the stream time base.

        Negative timestamps clamp to zero.
    */
    pub fn to_duration(self, time_base: Rational) -> Duration {
        time_base.scale(self.0)
    }
}

/**
    A rational number, used for time bases and frame rates.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Convert to a floating-point value.
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /**
        Scale a tick count in this time base to a [`Duration`].
    */
    pub fn scale(self, ticks: i64) -> Duration {
        if ticks <= 0 || self.den <= 0 || self.num <= 0 {
            return Duration::ZERO;
        }
        let nanos = ticks as i128 * self.num as i128 * 1_000_000_000 / self.den as i128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/**
    One demuxed unit of encoded media data.

    Packets are consumed synchronously by the decoder and are not retained
    past the call that feeds them in.
*/
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    /// Index of the stream this packet belongs to.
    pub stream_index: usize,
    /// Encoded bytes.
    pub data: Vec<u8>,
    /// Presentation timestamp, if the container provided one.
    pub pts: Option<Pts>,
    /// Duration in time-base units (zero if unknown).
    pub duration: i64,
}

impl Packet {
    pub fn new(stream_index: usize, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            data,
            pts: None,
            duration: 0,
        }
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(Pts(pts));
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }
}
