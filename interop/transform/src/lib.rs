/*!
    Pixel-format adaptation for decoded video frames.

    The [`VideoAdapter`] negotiates the output layout from the decoder's
    native format: 4:2:0 planar frames pass through untouched (and can be
    decoded straight into pooled memory), frames with alpha become `Bgra`,
    anything else becomes `Nv12`. Conversions run through a [`Scaler`],
    either the built-in [`SoftwareScaler`] or, with the `ffmpeg` feature,
    libswscale.
*/

mod adapter;
mod image;
mod scaler;

#[cfg(feature = "ffmpeg")]
mod sws;

pub use adapter::{AdapterConfig, AdapterState, PlaneSpan, VideoAdapter, negotiate};
pub use image::ImageBuffer;
pub use scaler::{Scaler, ScalerBackend, ScalingAlgorithm, SoftwareScaler, create_scaler};

#[cfg(feature = "ffmpeg")]
pub use sws::SwsScaler;
