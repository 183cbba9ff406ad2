use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::node::{DEFAULT_PARAMETER_TOPIC, PUBLISH_HEADROOM_BYTES};
use crate::params::TransformParameters;
use crate::routing::{ShiftSlot, SourceRoute, SourceTable, QUAD1_TAG, QUAD3_TAG};
use crate::wire::MAX_MESSAGE_BYTES;

const DEFAULT_MQTT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_CLIENT_ID: &str = "image_rotate";
/// Fits every frame message the decoder accepts.
const DEFAULT_MAX_PACKET_BYTES: u32 = (MAX_MESSAGE_BYTES + PUBLISH_HEADROOM_BYTES) as u32;
const DEFAULT_SOURCE: &str = QUAD3_TAG;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NodeConfigFile {
    parameter_topic: Option<String>,
    default_source: Option<String>,
    mqtt: Option<MqttConfigFile>,
    parameters: Option<ParametersConfigFile>,
    sources: Option<Vec<SourceConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    client_id: Option<String>,
    max_packet_bytes: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ParametersConfigFile {
    angle: Option<f64>,
    shift_a: Option<u32>,
    shift_b: Option<u32>,
    epi_1: Option<i32>,
    epi_2: Option<i32>,
    epi_3: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    tag: String,
    shift: ShiftSlot,
    input_topic: Option<String>,
    output_topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub parameter_topic: String,
    pub mqtt: MqttSettings,
    /// Parameters in effect until the first update arrives.
    pub parameters: TransformParameters,
    pub sources: SourceTable,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub client_id: String,
    pub max_packet_bytes: u32,
}

impl NodeConfig {
    /// Load from the file named by `ROTATE_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ROTATE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => NodeConfigFile::default(),
        };
        let mut draft = ConfigDraft::from_file(file_cfg);
        draft.apply_env();
        draft.build()
    }
}

/// Settings before the source table is built and checked.
struct ConfigDraft {
    parameter_topic: String,
    default_source: String,
    mqtt: MqttSettings,
    parameters: TransformParameters,
    routes: Vec<SourceRoute>,
}

impl ConfigDraft {
    fn from_file(file: NodeConfigFile) -> Self {
        let parameter_topic = file
            .parameter_topic
            .unwrap_or_else(|| DEFAULT_PARAMETER_TOPIC.to_string());
        let default_source = file
            .default_source
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt = MqttSettings {
            broker_addr: mqtt_file
                .broker_addr
                .unwrap_or_else(|| DEFAULT_MQTT_BROKER_ADDR.to_string()),
            client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            max_packet_bytes: mqtt_file
                .max_packet_bytes
                .unwrap_or(DEFAULT_MAX_PACKET_BYTES),
        };

        let defaults = TransformParameters::default();
        let p = file.parameters.unwrap_or_default();
        let parameters = TransformParameters {
            angle: p.angle.unwrap_or(defaults.angle),
            shift_a: p.shift_a.unwrap_or(defaults.shift_a),
            shift_b: p.shift_b.unwrap_or(defaults.shift_b),
            epi_1: p.epi_1.unwrap_or(defaults.epi_1),
            epi_2: p.epi_2.unwrap_or(defaults.epi_2),
            epi_3: p.epi_3.unwrap_or(defaults.epi_3),
        };

        let routes = match file.sources {
            Some(sources) => sources
                .into_iter()
                .map(|source| {
                    let mut route = SourceRoute::new(&source.tag, source.shift);
                    if let Some(topic) = source.input_topic {
                        route.input_topic = topic;
                    }
                    if let Some(topic) = source.output_topic {
                        route.output_topic = topic;
                    }
                    route
                })
                .collect(),
            None => vec![
                SourceRoute::new(QUAD1_TAG, ShiftSlot::A),
                SourceRoute::new(QUAD3_TAG, ShiftSlot::B),
            ],
        };

        Self {
            parameter_topic,
            default_source,
            mqtt,
            parameters,
            routes,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("ROTATE_MQTT_BROKER") {
            if !addr.trim().is_empty() {
                self.mqtt.broker_addr = addr;
            }
        }
        if let Ok(client_id) = std::env::var("ROTATE_MQTT_CLIENT_ID") {
            if !client_id.trim().is_empty() {
                self.mqtt.client_id = client_id;
            }
        }
        if let Ok(topic) = std::env::var("ROTATE_PARAMETER_TOPIC") {
            if !topic.trim().is_empty() {
                self.parameter_topic = topic;
            }
        }
        if let Ok(tag) = std::env::var("ROTATE_DEFAULT_SOURCE") {
            if !tag.trim().is_empty() {
                self.default_source = tag;
            }
        }
    }

    fn build(self) -> Result<NodeConfig> {
        self.parameters.validate()?;
        let sources = SourceTable::new(self.routes, &self.default_source)?;
        if self.parameter_topic.trim().is_empty() {
            return Err(anyhow!("parameter topic must not be empty"));
        }
        if sources.is_input_topic(&self.parameter_topic) {
            return Err(anyhow!(
                "parameter topic '{}' collides with a source input topic",
                self.parameter_topic
            ));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(anyhow!("MQTT client id must not be empty"));
        }
        if self.mqtt.max_packet_bytes as usize <= PUBLISH_HEADROOM_BYTES {
            return Err(anyhow!(
                "MQTT max packet size must exceed {} bytes",
                PUBLISH_HEADROOM_BYTES
            ));
        }
        Ok(NodeConfig {
            parameter_topic: self.parameter_topic,
            mqtt: self.mqtt,
            parameters: self.parameters,
            sources,
        })
    }
}

fn read_config_file(path: &Path) -> Result<NodeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
