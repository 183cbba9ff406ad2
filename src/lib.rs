//! Image rotate node
//!
//! Receives camera frames, rotates them about their center into a canvas that
//! holds the whole rotated image, shifts them down by a per-source offset,
//! paints the black background white, draws three horizontal reference lines
//! and republishes them with the original header.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames and their headers
//! - `wire`: frame message codec (many encodings in, RGB8 out)
//! - `geometry`: affine matrices, rotated bounds, warping, padding
//! - `transform`: the frame pipeline (`FrameTransformer`)
//! - `params`: transform parameters and the live `ParameterStore`
//! - `routing`: source tag -> shift slot and topics
//! - `node`: message dispatch (`RotateNode`, `FrameSink`)
//! - `config`: node configuration (TOML file + environment)
//! - `transport`: MQTT endpoint, TLS and client plumbing

pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod node;
pub mod params;
pub mod routing;
pub mod transform;
pub mod transport;
pub mod wire;

pub use error::DecodeError;
pub use frame::{Frame, FrameHeader, Stamp};
pub use node::{
    Dispatch, FrameSink, NodeStats, RotateNode, DEFAULT_PARAMETER_TOPIC, PUBLISH_HEADROOM_BYTES,
};
pub use params::{ParameterStore, TransformParameters};
pub use routing::{ShiftSlot, SourceRoute, SourceTable};
pub use transform::{FrameTransformer, TransformedFrame, LINE_THICKNESS, REFERENCE_LINE_COLORS};
pub use wire::{decode_frame, encode_frame, encode_raw, Encoding, MAX_MESSAGE_BYTES};
