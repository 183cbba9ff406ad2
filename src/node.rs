//! Message dispatch for the rotate node.
//!
//! `RotateNode` owns the transformer and the parameter store and decides what
//! each inbound message means:
//! - on the parameter topic: a full parameter replacement
//! - on a source input topic: a frame to transform and publish
//! - anything else: ignored
//!
//! The node never fails on bad input. Undecodable frames and malformed
//! parameter updates are logged and dropped; the caller keeps dispatching.

use anyhow::Result;

use crate::params::{ParameterStore, TransformParameters};
use crate::transform::FrameTransformer;
use crate::wire;

pub const DEFAULT_PARAMETER_TOPIC: &str = "image_rotate/parameters";

/// Room left in an MQTT packet for the fixed header, topic and properties.
pub const PUBLISH_HEADROOM_BYTES: usize = 64 * 1024;

/// Where transformed frames go.
pub trait FrameSink {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// What the node did with a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Published { topic: String },
    ParametersUpdated,
    Dropped { reason: String },
    Ignored,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub frames_received: u64,
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub parameter_updates: u64,
    pub parameter_rejections: u64,
}

pub struct RotateNode {
    transformer: FrameTransformer,
    params: ParameterStore,
    parameter_topic: String,
    max_payload_bytes: usize,
    stats: NodeStats,
}

impl RotateNode {
    pub fn new(
        transformer: FrameTransformer,
        params: ParameterStore,
        parameter_topic: impl Into<String>,
    ) -> Self {
        Self {
            transformer,
            params,
            parameter_topic: parameter_topic.into(),
            max_payload_bytes: wire::MAX_MESSAGE_BYTES,
            stats: NodeStats::default(),
        }
    }

    /// Cap on encoded output frames. Larger frames are dropped before they
    /// reach the sink. Rotation can grow a frame past the input limit.
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    /// Topics the node must be subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = vec![self.parameter_topic.clone()];
        for route in self.transformer.sources().routes() {
            if !topics.contains(&route.input_topic) {
                topics.push(route.input_topic.clone());
            }
        }
        topics
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.params
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn handle_message<S: FrameSink>(
        &mut self,
        topic: &str,
        payload: &[u8],
        sink: &mut S,
    ) -> Dispatch {
        if topic == self.parameter_topic {
            return self.handle_parameter_update(payload);
        }
        if self.transformer.sources().is_input_topic(topic) {
            return self.handle_frame(topic, payload, sink);
        }
        log::debug!("ignoring message on unrelated topic {}", topic);
        Dispatch::Ignored
    }

    fn handle_parameter_update(&mut self, payload: &[u8]) -> Dispatch {
        match TransformParameters::from_update(payload) {
            Ok(params) => {
                self.params.replace(params);
                self.stats.parameter_updates += 1;
                Dispatch::ParametersUpdated
            }
            Err(e) => {
                log::warn!("keeping previous parameters: {}", e);
                self.stats.parameter_rejections += 1;
                Dispatch::Dropped {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn handle_frame<S: FrameSink>(&mut self, topic: &str, payload: &[u8], sink: &mut S) -> Dispatch {
        self.stats.frames_received += 1;
        let params = self.params.snapshot();

        let transformed = match self.transformer.process(payload, &params) {
            Ok(transformed) => transformed,
            Err(e) => {
                log::error!("dropping frame from {}: {}", topic, e);
                return self.drop_frame(e.to_string());
            }
        };
        let encoded = match wire::encode_frame(&transformed.frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                log::error!("failed to encode frame from {}: {}", topic, e);
                return self.drop_frame(e.to_string());
            }
        };
        if encoded.len() > self.max_payload_bytes {
            log::warn!(
                "dropping {} byte frame for {}: limit is {} bytes",
                encoded.len(),
                transformed.output_topic,
                self.max_payload_bytes
            );
            return self.drop_frame(format!(
                "encoded frame of {} bytes exceeds the {} byte limit",
                encoded.len(),
                self.max_payload_bytes
            ));
        }
        if let Err(e) = sink.publish(&transformed.output_topic, encoded) {
            log::warn!("failed to publish to {}: {}", transformed.output_topic, e);
            return self.drop_frame(e.to_string());
        }

        self.stats.frames_published += 1;
        Dispatch::Published {
            topic: transformed.output_topic,
        }
    }

    fn drop_frame(&mut self, reason: String) -> Dispatch {
        self.stats.frames_dropped += 1;
        Dispatch::Dropped { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingSink(usize);

    impl FrameSink for CountingSink {
        fn publish(&mut self, _topic: &str, _payload: Vec<u8>) -> Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    fn node() -> RotateNode {
        RotateNode::new(
            FrameTransformer::default(),
            ParameterStore::default(),
            DEFAULT_PARAMETER_TOPIC,
        )
    }

    #[test]
    fn subscriptions_cover_parameters_and_sources() {
        assert_eq!(
            node().subscriptions(),
            vec![
                "image_rotate/parameters",
                "camera/quad1/image_rect_color",
                "camera/quad3/image_rect_color",
            ]
        );
    }

    #[test]
    fn unrelated_topic_is_ignored() {
        let mut sink = CountingSink::default();
        let dispatch = node().handle_message("camera/quad1/other", b"x", &mut sink);
        assert_eq!(dispatch, Dispatch::Ignored);
        assert_eq!(sink.0, 0);
    }

    #[test]
    fn rejected_update_is_counted() {
        let mut node = node();
        let mut sink = CountingSink::default();
        let dispatch = node.handle_message(DEFAULT_PARAMETER_TOPIC, b"{}", &mut sink);
        assert!(matches!(dispatch, Dispatch::Dropped { .. }));
        assert_eq!(node.stats().parameter_rejections, 1);
        assert_eq!(node.parameters().snapshot(), TransformParameters::default());
    }
}
