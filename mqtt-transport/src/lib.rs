//! Thin MQTT 5.0 adapter for the MCP peers.
//!
//! Wraps `rumqttc`'s v5 client behind the small surface the peers need:
//! connect (with CONNACK user-property capture), subscribe with the
//! No-Local option, publish with user properties, and a channel of inbound
//! PUBLISH messages. Protocol version 5.0 is forced by construction and
//! the session expiry interval is pinned to zero.

mod config;
mod transport;

pub use config::BrokerAddress;
pub use config::ConfigError;
pub use config::MqttConfig;
pub use config::WillConfig;
pub use transport::InboundMessage;
pub use transport::MqttTransport;
pub use transport::PublishOptions;
pub use transport::SubscribeOptions;
pub use transport::TransportError;

// Re-export so peers do not take a direct rumqttc dependency.
pub use rumqttc::v5::mqttbytes::QoS;
