//! MQTT plumbing for the rotate node.
//!
//! - `MqttEndpoint`: broker address parsing and the loopback-only guard
//! - TLS materials (custom CA, optional client certificate pair)
//! - Client construction and the `FrameSink` that publishes over it

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, MqttOptions};
use rumqttc::Transport;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::node::FrameSink;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CHANNEL_CAPACITY: usize = 10;

const PLAIN_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;

/// Broker the node publishes frames to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Parse a broker address: `host:port`, `[v6]:port`, or either behind an
    /// `mqtt://`, `tcp://`, `mqtts://` or `ssl://` scheme.
    ///
    /// With a scheme the port may be left out (1883, or 8883 for TLS). The
    /// TLS schemes turn TLS on whatever `force_tls` says.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let addr = addr.trim();
        let (scheme_tls, authority) = match addr.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (Some(false), rest),
            Some(("mqtts" | "ssl", rest)) => (Some(true), rest),
            Some((scheme, _)) => return Err(anyhow!("unsupported MQTT scheme '{}'", scheme)),
            None => (None, addr),
        };
        let use_tls = force_tls || scheme_tls == Some(true);
        let default_port = scheme_tls.map(|tls| if tls { TLS_PORT } else { PLAIN_PORT });

        let (host, port) = split_authority(authority)
            .with_context(|| format!("invalid MQTT broker address '{}'", addr))?;
        let port = match (port, default_port) {
            (Some(port), _) => port,
            (None, Some(port)) => port,
            (None, None) => return Err(anyhow!("MQTT broker address '{}' needs a port", addr)),
        };
        Ok(Self {
            host: host.to_string(),
            port,
            use_tls,
        })
    }

    pub fn is_loopback(&self) -> bool {
        self.host.eq_ignore_ascii_case("localhost")
            || self
                .host
                .parse::<std::net::IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false)
    }

    /// Refuse brokers off this host unless remote brokers were allowed.
    pub fn ensure_loopback(&self) -> Result<()> {
        if self.is_loopback() {
            return Ok(());
        }
        Err(anyhow!(
            "refusing to send frames to non-loopback MQTT broker {} (pass --allow-remote-mqtt)",
            self
        ))
    }
}

impl fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Split `host[:port]` or `[v6][:port]`.
fn split_authority(authority: &str) -> Result<(&str, Option<u16>)> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("unclosed '[' in IPv6 host"))?;
        match rest {
            "" => (host, None),
            rest => (
                host,
                Some(
                    rest.strip_prefix(':')
                        .ok_or_else(|| anyhow!("unexpected '{}' after IPv6 host", rest))?,
                ),
            ),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };
    if host.is_empty() {
        return Err(anyhow!("missing host"));
    }
    let port = port
        .map(|port| port.parse::<u16>().with_context(|| format!("bad port '{}'", port)))
        .transpose()?;
    Ok((host, port))
}

/// PEM material for MQTT TLS.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// CA certificate. `None` uses the default root store.
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key, always together.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&Path>,
        client_cert_path: Option<&Path>,
        client_key_path: Option<&Path>,
    ) -> Result<Self> {
        let ca = ca_path
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))
            })
            .transpose()?;

        let client_auth = match (client_cert_path, client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = std::fs::read(cert_path).with_context(|| {
                    format!("failed to read MQTT TLS client cert '{}'", cert_path.display())
                })?;
                let key = std::fs::read(key_path).with_context(|| {
                    format!("failed to read MQTT TLS client key '{}'", key_path.display())
                })?;
                Some((cert, key))
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(anyhow!("MQTT TLS client certificate provided without key"))
            }
            (None, Some(_)) => {
                return Err(anyhow!("MQTT TLS client key provided without certificate"))
            }
        };

        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

pub fn build_transport(endpoint: &MqttEndpoint, tls: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        if tls.is_configured() {
            return Err(anyhow!(
                "MQTT TLS materials provided but TLS is disabled (use --mqtt-use-tls or mqtts://)"
            ));
        }
        return Ok(Transport::tcp());
    }
    if !tls.is_configured() {
        return Ok(Transport::tls_with_default_config());
    }
    let ca = tls.ca.clone().ok_or_else(|| {
        anyhow!("MQTT TLS CA certificate is required when providing client certificates")
    })?;
    Ok(Transport::tls(ca, tls.client_auth.clone(), None))
}

#[derive(Clone, Debug)]
pub struct ClientSettings<'a> {
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub max_packet_bytes: u32,
}

pub fn connect_mqtt(
    endpoint: &MqttEndpoint,
    tls: &TlsMaterials,
    settings: &ClientSettings<'_>,
) -> Result<(Client, Connection)> {
    let mut options = MqttOptions::new(settings.client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_start(true);
    options.set_max_packet_size(Some(settings.max_packet_bytes));
    if let Some(user) = settings.username {
        options.set_credentials(user, settings.password.unwrap_or_default());
    }
    options.set_transport(build_transport(endpoint, tls)?);

    let (client, connection) = Client::new(options, REQUEST_CHANNEL_CAPACITY);
    log::info!(
        "MQTT client '{}' set up for {} (auth: {})",
        settings.client_id,
        endpoint,
        settings.username.is_some()
    );
    Ok((client, connection))
}

/// Publishes transformed frames at most once, without retention.
///
/// A full request queue drops the frame instead of blocking the event loop.
pub struct MqttSink {
    client: Client,
}

impl MqttSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl FrameSink for MqttSink {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| anyhow!("MQTT publish to {} failed: {}", topic, e))
    }
}
