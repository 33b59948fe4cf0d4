use std::time::Duration;

use rumqttc::v5::mqttbytes::QoS;
use thiserror::Error;

pub(crate) const DEFAULT_PORT: u16 = 1883;
pub(crate) const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_RECONNECT_PERIOD: Duration = Duration::from_secs(1);

/// Invalid configuration, detected at peer construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    InvalidIdentifier(#[from] mcp_types::topic::InvalidIdentifier),

    #[error("invalid broker url `{url}`: {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
}

/// Connection settings shared by both peers.
///
/// `host` accepts a `mqtt://host:port` URL; a bare `host:port` or `host`
/// is accepted as deprecated input (port defaults to 1883).
#[derive(Debug, Clone, Default)]
pub struct MqttConfig {
    pub host: String,
    /// MQTT client id. Peers that generate their own id leave this unset.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Clean start; defaults to true.
    pub clean: Option<bool>,
    /// Keepalive interval; defaults to 60 s.
    pub keepalive: Option<Duration>,
    /// CONNACK wait bound; defaults to 30 s.
    pub connect_timeout: Option<Duration>,
    /// Sleep between event-loop poll failures; defaults to 1 s.
    pub reconnect_period: Option<Duration>,
    pub will: Option<WillConfig>,
    /// Extra CONNECT user properties, appended after the MCP ones.
    pub properties: Vec<(String, String)>,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub(crate) fn keepalive(&self) -> Duration {
        self.keepalive.unwrap_or(DEFAULT_KEEPALIVE)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub(crate) fn reconnect_period(&self) -> Duration {
        self.reconnect_period.unwrap_or(DEFAULT_RECONNECT_PERIOD)
    }
}

/// Last-will registration applied at CONNECT time.
#[derive(Debug, Clone)]
pub struct WillConfig {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parses `mqtt://host:port`, `host:port`, or `host`.
    pub fn parse(input: &str) -> Result<BrokerAddress, ConfigError> {
        if input.is_empty() {
            return Err(ConfigError::MissingField("host"));
        }
        let rest = match input.split_once("://") {
            Some(("mqtt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(ConfigError::InvalidBrokerUrl {
                    url: input.to_string(),
                    reason: format!("unsupported scheme `{scheme}`"),
                });
            }
            None => input,
        };
        // Drop any path component after the authority.
        let authority = rest.split('/').next().unwrap_or("");
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| ConfigError::InvalidBrokerUrl {
                    url: input.to_string(),
                    reason: format!("invalid port `{port}`"),
                })?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(ConfigError::InvalidBrokerUrl {
                url: input.to_string(),
                reason: "missing host".to_string(),
            });
        }
        Ok(BrokerAddress {
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_url_form() {
        assert_eq!(
            BrokerAddress::parse("mqtt://broker.local:8883").unwrap(),
            BrokerAddress {
                host: "broker.local".to_string(),
                port: 8883,
            }
        );
    }

    #[test]
    fn parses_deprecated_host_port() {
        assert_eq!(
            BrokerAddress::parse("localhost:1884").unwrap(),
            BrokerAddress {
                host: "localhost".to_string(),
                port: 1884,
            }
        );
        assert_eq!(
            BrokerAddress::parse("localhost").unwrap(),
            BrokerAddress {
                host: "localhost".to_string(),
                port: 1883,
            }
        );
    }

    #[test]
    fn rejects_foreign_schemes_and_bad_ports() {
        assert!(BrokerAddress::parse("ws://broker.local").is_err());
        assert!(BrokerAddress::parse("mqtts://broker.local").is_err());
        assert!(BrokerAddress::parse("localhost:notaport").is_err());
        assert!(BrokerAddress::parse("").is_err());
        assert!(BrokerAddress::parse("mqtt://:1883").is_err());
    }

    #[test]
    fn url_path_is_ignored() {
        assert_eq!(
            BrokerAddress::parse("mqtt://broker.local:1883/mqtt").unwrap(),
            BrokerAddress {
                host: "broker.local".to_string(),
                port: 1883,
            }
        );
    }
}
