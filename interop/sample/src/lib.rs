/*!
    Pull-based video samples.

    [`VideoSampleProvider`] ties a [`PacketSource`], the decode driver and
    the pixel-format adapter together. Each [`get_next_sample`] call reads
    as many packets as the decoder needs and returns one [`Sample`], or
    `None` once the stream is exhausted and the decoder fully drained.

    [`get_next_sample`]: VideoSampleProvider::get_next_sample
*/

mod provider;
mod sample;
mod source;

pub use provider::{PayloadMode, ProviderConfig, StreamState, VideoSampleProvider};
pub use sample::{Sample, SamplePayload};
pub use source::{IterSource, PacketQueue, PacketSource};
