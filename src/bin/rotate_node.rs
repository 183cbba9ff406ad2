//! rotate_node - rotate, shift and annotate camera frames over MQTT.
//!
//! The node:
//! 1. Subscribes to one input topic per configured camera source
//! 2. Subscribes to the parameter topic for live parameter replacement
//! 3. Rotates, shifts, recolors and annotates every frame
//! 4. Republishes it on the output topic of the frame's source tag
//!
//! Undecodable frames are logged and dropped. The node runs until Ctrl-C.
//!
//! Settings resolve as: command-line flag, then `ROTATE_*` environment
//! variable, then config file, then built-in default.

use anyhow::Result;
use clap::Parser;
use rumqttc::v5::{mqttbytes::QoS, Client, Event, Incoming};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image_rotate::config::NodeConfig;
use image_rotate::transport::{
    connect_mqtt, ClientSettings, MqttEndpoint, MqttSink, TlsMaterials,
};
use image_rotate::{FrameTransformer, ParameterStore, RotateNode, PUBLISH_HEADROOM_BYTES};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Rotate and annotate camera frames over MQTT")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "ROTATE_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address (overrides the config file).
    #[arg(long, env = "ROTATE_MQTT_BROKER")]
    mqtt_broker_addr: Option<String>,

    /// Allow non-loopback MQTT brokers.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    /// MQTT client identifier (overrides the config file).
    #[arg(long, env = "ROTATE_MQTT_CLIENT_ID")]
    mqtt_client_id: Option<String>,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = NodeConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = &args.mqtt_broker_addr {
        config.mqtt.broker_addr = addr.clone();
    }
    if let Some(client_id) = &args.mqtt_client_id {
        config.mqtt.client_id = client_id.clone();
    }

    let endpoint = MqttEndpoint::parse(&config.mqtt.broker_addr, args.mqtt_use_tls)?;
    if !args.allow_remote_mqtt {
        endpoint.ensure_loopback()?;
    } else {
        log::warn!("Remote MQTT enabled - ensure broker is in a trusted network");
    }
    let tls = TlsMaterials::load(
        args.mqtt_tls_ca_path.as_deref(),
        args.mqtt_tls_client_cert_path.as_deref(),
        args.mqtt_tls_client_key_path.as_deref(),
    )?;
    let settings = ClientSettings {
        client_id: &config.mqtt.client_id,
        username: args.mqtt_username.as_deref(),
        password: args.mqtt_password.as_deref(),
        max_packet_bytes: config.mqtt.max_packet_bytes,
    };

    log::info!("Rotating images");
    log::info!("  MQTT broker: {}", endpoint);
    log::info!("  Parameter topic: {}", config.parameter_topic);
    for route in config.sources.routes() {
        log::info!(
            "  Source {}: {} -> {} ({})",
            route.tag,
            route.input_topic,
            route.output_topic,
            route.shift
        );
    }
    log::info!("  Default source: {}", config.sources.default_route().tag);
    log::info!(
        "  Initial parameters: angle={} shift_a={} shift_b={} epi=({}, {}, {})",
        config.parameters.angle,
        config.parameters.shift_a,
        config.parameters.shift_b,
        config.parameters.epi_1,
        config.parameters.epi_2,
        config.parameters.epi_3
    );

    let mut node = RotateNode::new(
        FrameTransformer::new(config.sources.clone()),
        ParameterStore::new(config.parameters),
        config.parameter_topic.clone(),
    )
    .with_max_payload_bytes(
        (config.mqtt.max_packet_bytes as usize).saturating_sub(PUBLISH_HEADROOM_BYTES),
    );

    let running = Arc::new(AtomicBool::new(true));
    let active_client: Arc<Mutex<Option<Client>>> = Arc::new(Mutex::new(None));
    {
        let running = running.clone();
        let active_client = active_client.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
            if let Ok(guard) = active_client.lock() {
                if let Some(client) = guard.as_ref() {
                    let _ = client.disconnect();
                }
            }
        })
        .expect("error setting Ctrl-C handler");
    }

    while running.load(Ordering::SeqCst) {
        let (client, mut connection) = connect_mqtt(&endpoint, &tls, &settings)?;
        for topic in node.subscriptions() {
            client.subscribe(topic.as_str(), QoS::AtMostOnce)?;
            log::info!("Subscribed to {}", topic);
        }
        if let Ok(mut guard) = active_client.lock() {
            *guard = Some(client.clone());
        }
        let mut sink = MqttSink::new(client);

        for event in connection.iter() {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let topic = match std::str::from_utf8(&publish.topic) {
                        Ok(topic) => topic.to_string(),
                        Err(e) => {
                            log::warn!("Skipping publish with invalid topic: {}", e);
                            continue;
                        }
                    };
                    node.handle_message(&topic, &publish.payload, &mut sink);
                }
                Ok(_) => {}
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        log::error!("MQTT connection error: {}. Reconnecting...", e);
                    }
                    break;
                }
            }
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }
        log::warn!("MQTT connection closed. Reconnecting...");
        std::thread::sleep(RECONNECT_DELAY);
    }

    let stats = node.stats();
    log::info!(
        "shutdown: {} frames received, {} published, {} dropped, {} parameter updates ({} rejected)",
        stats.frames_received,
        stats.frames_published,
        stats.frames_dropped,
        stats.parameter_updates,
        stats.parameter_rejections
    );
    Ok(())
}
