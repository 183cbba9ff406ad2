//! Transport layer for the rotate node (MQTT).

mod mqtt;

pub use mqtt::{
    build_transport, connect_mqtt, ClientSettings, MqttEndpoint, MqttSink, TlsMaterials,
};
