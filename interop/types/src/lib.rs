/*!
    Shared types for the decode-and-sample pipeline.

    This crate defines the vocabulary of the pipeline: the types that cross crate
    boundaries. It has no dependency on FFmpeg, making it lightweight and enabling
    consumers to depend on it without pulling in FFmpeg bindings.
*/

mod error;
mod format;
mod packet;
mod properties;

pub use error::{Error, Result};
pub use format::{PixelFormat, PlaneGeometry, align_up};
pub use packet::{Packet, Pts, Rational};
pub use properties::{Properties, PropertyKey, PropertyValue};
