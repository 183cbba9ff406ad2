//! In-memory frames.
//!
//! - `Frame`: decoded RGB8 pixels plus the header of the message they came in.
//! - `FrameHeader`: sequence number, capture stamp and source tag. Copied
//!   through the pipeline untouched.
//!
//! A `Frame` is created fresh for every inbound message and dropped once the
//! transformed copy has been handed to the sink.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Capture time as carried by the camera driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub secs: u32,
    pub nsecs: u32,
}

/// Header metadata of a camera frame.
///
/// Only `frame_id` is interpreted, and only to pick the source route.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub stamp: Stamp,
    /// Source tag identifying the originating camera (e.g. "quad1").
    pub frame_id: String,
}

impl FrameHeader {
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self {
            seq: 0,
            stamp: Stamp::default(),
            frame_id: frame_id.into(),
        }
    }
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(header: FrameHeader, image: RgbImage) -> Self {
        Self { header, image }
    }

    /// Source tag of this frame.
    pub fn tag(&self) -> &str {
        &self.header.frame_id
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
