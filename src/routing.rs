//! Source routing table.
//!
//! Each camera source is keyed by the tag it stamps into `frame_id`. A route
//! names the topic the node listens on, the topic transformed frames go out on,
//! and which shift parameter applies. Frames whose tag has no route of its own
//! go through the default route.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

use crate::params::TransformParameters;

pub const QUAD1_TAG: &str = "quad1";
pub const QUAD3_TAG: &str = "quad3";

/// Which shift parameter a source uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftSlot {
    A,
    B,
}

impl ShiftSlot {
    pub fn select(&self, params: &TransformParameters) -> u32 {
        match self {
            Self::A => params.shift_a,
            Self::B => params.shift_b,
        }
    }
}

impl fmt::Display for ShiftSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "shift_a"),
            Self::B => write!(f, "shift_b"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRoute {
    pub tag: String,
    pub input_topic: String,
    pub output_topic: String,
    pub shift: ShiftSlot,
}

impl SourceRoute {
    pub fn new(tag: &str, shift: ShiftSlot) -> Self {
        Self {
            tag: tag.to_string(),
            input_topic: format!("camera/{}/image_rect_color", tag),
            output_topic: format!("camera/{}/image_rotated", tag),
            shift,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceTable {
    routes: Vec<SourceRoute>,
    default_index: usize,
}

impl SourceTable {
    /// Build a table. Tags must be unique and `default_tag` must be one of them.
    pub fn new(routes: Vec<SourceRoute>, default_tag: &str) -> Result<Self> {
        if routes.is_empty() {
            return Err(anyhow!("at least one source route is required"));
        }
        let mut seen = HashSet::new();
        for route in &routes {
            if route.tag.trim().is_empty() {
                return Err(anyhow!("source tag must not be empty"));
            }
            if route.input_topic.trim().is_empty() || route.output_topic.trim().is_empty() {
                return Err(anyhow!("source '{}' needs input and output topics", route.tag));
            }
            if !seen.insert(route.tag.as_str()) {
                return Err(anyhow!("duplicate source tag '{}'", route.tag));
            }
        }
        let default_index = routes
            .iter()
            .position(|route| route.tag == default_tag)
            .ok_or_else(|| anyhow!("default source '{}' has no route", default_tag))?;
        Ok(Self {
            routes,
            default_index,
        })
    }

    /// Route for a frame tag, falling back to the default route.
    pub fn route_for_tag(&self, tag: &str) -> &SourceRoute {
        self.routes
            .iter()
            .find(|route| route.tag == tag)
            .unwrap_or(&self.routes[self.default_index])
    }

    pub fn is_input_topic(&self, topic: &str) -> bool {
        self.routes.iter().any(|route| route.input_topic == topic)
    }

    pub fn routes(&self) -> &[SourceRoute] {
        &self.routes
    }

    pub fn default_route(&self) -> &SourceRoute {
        &self.routes[self.default_index]
    }
}

impl Default for SourceTable {
    /// The two-camera rig: quad1 uses `shift_a`, everything else is quad3 with
    /// `shift_b`.
    fn default() -> Self {
        Self {
            routes: vec![
                SourceRoute::new(QUAD1_TAG, ShiftSlot::A),
                SourceRoute::new(QUAD3_TAG, ShiftSlot::B),
            ],
            default_index: 1,
        }
    }
}
