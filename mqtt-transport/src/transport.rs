use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::v5::AsyncClient;
use rumqttc::v5::Event;
use rumqttc::v5::EventLoop;
use rumqttc::v5::MqttOptions;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::ConnectProperties;
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use rumqttc::v5::mqttbytes::v5::Filter;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::v5::PublishProperties;
use rumqttc::v5::mqttbytes::v5::RetainForwardRule;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time;
use tracing::debug;
use tracing::warn;

use crate::config::ConfigError;
use crate::config::MqttConfig;

/// Capacity of the bounded channel carrying inbound PUBLISH messages from
/// the event-loop task to the peer.
const CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::v5::ClientError),

    #[error("broker refused connection: {0}")]
    ConnectionRefused(String),

    #[error("timed out waiting for CONNACK after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection closed before CONNACK")]
    ConnectionClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// An MQTT PUBLISH delivered to the peer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub user_properties: Vec<(String, String)>,
}

impl InboundMessage {
    /// Value of a user property, if present.
    pub fn user_property(&self, name: &str) -> Option<&str> {
        self.user_properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
    pub user_properties: Vec<(String, String)>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            retain: false,
            user_properties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    pub no_local: bool,
}

/// Handle to a live MQTT 5.0 session.
///
/// Cloning is cheap; all clones share the same session. The inbound
/// message receiver is returned once, from [`MqttTransport::connect`].
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    client_id: String,
    connack_user_properties: Vec<(String, String)>,
    shutdown: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Opens an MQTT 5.0 session and waits for the broker's CONNACK.
    ///
    /// `user_properties` are carried on the CONNECT packet (the MCP
    /// component properties plus `MCP-META`); `config.properties` are
    /// appended after them.
    pub async fn connect(
        config: &MqttConfig,
        client_id: &str,
        user_properties: Vec<(String, String)>,
    ) -> Result<(MqttTransport, mpsc::Receiver<InboundMessage>), TransportError> {
        let address = crate::config::BrokerAddress::parse(&config.host)?;

        let mut options = MqttOptions::new(client_id, address.host, address.port);
        options.set_clean_start(config.clean.unwrap_or(true));
        options.set_keep_alive(config.keepalive());
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or(""));
        }

        let mut connect_user_properties = user_properties;
        connect_user_properties.extend(config.properties.iter().cloned());
        options.set_connect_properties(ConnectProperties {
            // The dialogue is connection-scoped; nothing survives the session.
            session_expiry_interval: Some(0),
            receive_maximum: None,
            max_packet_size: None,
            topic_alias_max: None,
            request_response_info: None,
            request_problem_info: None,
            user_properties: connect_user_properties,
            authentication_method: None,
            authentication_data: None,
        });

        if let Some(will) = &config.will {
            options.set_last_will(LastWill::new(
                will.topic.clone(),
                will.payload.clone(),
                will.qos,
                will.retain,
                None,
            ));
        }

        let (client, event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_event_loop(
            event_loop,
            inbound_tx,
            connack_tx,
            shutdown.clone(),
            config.reconnect_period(),
        ));

        let connack_user_properties = match time::timeout(config.connect_timeout(), connack_rx).await
        {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(TransportError::ConnectionClosed),
            Err(_) => {
                // Stop the event-loop task from reconnecting for a session
                // nobody owns.
                shutdown.store(true, Ordering::SeqCst);
                return Err(TransportError::ConnectTimeout(config.connect_timeout()));
            }
        };

        Ok((
            MqttTransport {
                client,
                client_id: client_id.to_string(),
                connack_user_properties,
                shutdown,
            },
            inbound_rx,
        ))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// User properties carried on the broker's CONNACK.
    pub fn connack_user_properties(&self) -> &[(String, String)] {
        &self.connack_user_properties
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        let properties = PublishProperties {
            payload_format_indicator: None,
            message_expiry_interval: None,
            topic_alias: None,
            response_topic: None,
            correlation_data: None,
            user_properties: options.user_properties,
            subscription_identifiers: Vec::new(),
            content_type: None,
        };
        self.client
            .publish_with_properties(topic, options.qos, options.retain, payload.into(), properties)
            .await?;
        Ok(())
    }

    pub async fn subscribe(
        &self,
        topic: &str,
        options: SubscribeOptions,
    ) -> Result<(), TransportError> {
        let filter = Filter {
            path: topic.to_string(),
            qos: QoS::AtLeastOnce,
            nolocal: options.no_local,
            preserve_retain: false,
            retain_forward_rule: RetainForwardRule::OnEverySubscribe,
        };
        self.client.subscribe_many([filter]).await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client.unsubscribe(topic).await?;
        Ok(())
    }

    /// Ends the session. The event-loop task exits on the next poll error
    /// instead of scheduling a reconnect.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.client.disconnect().await?;
        Ok(())
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    inbound_tx: mpsc::Sender<InboundMessage>,
    connack_tx: oneshot::Sender<Result<Vec<(String, String)>, TransportError>>,
    shutdown: Arc<AtomicBool>,
    reconnect_period: Duration,
) {
    let mut connack_tx = Some(connack_tx);
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!("broker refused connection: {:?}", ack.code);
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(Err(TransportError::ConnectionRefused(format!(
                            "{:?}",
                            ack.code
                        ))));
                    }
                    break;
                }
                debug!("connected (session_present: {})", ack.session_present);
                if let Some(tx) = connack_tx.take() {
                    let user_properties = ack
                        .properties
                        .map(|p| p.user_properties)
                        .unwrap_or_default();
                    if tx.send(Ok(user_properties)).is_err() {
                        // connect() gave up waiting; nothing owns this session.
                        break;
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload,
                    user_properties: publish
                        .properties
                        .map(|p| p.user_properties)
                        .unwrap_or_default(),
                };
                if inbound_tx.send(message).await.is_err() {
                    // Receiver gone; the peer has shut down.
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect(packet))) => {
                warn!("broker sent DISCONNECT: {packet:?}");
            }
            Ok(_) => {
                // Acks and pings; normal protocol traffic.
            }
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    debug!("event loop stopped after disconnect");
                    break;
                }
                warn!("mqtt event loop error: {e}; reconnecting");
                time::sleep(reconnect_period).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn publish_defaults_are_qos1_unretained() {
        let options = PublishOptions::default();
        assert_eq!(options.qos, QoS::AtLeastOnce);
        assert!(!options.retain);
        assert!(options.user_properties.is_empty());
    }

    #[test]
    fn user_property_lookup_is_by_exact_name() {
        let message = InboundMessage {
            topic: "t".to_string(),
            payload: Bytes::new(),
            user_properties: vec![
                ("MCP-MQTT-CLIENT-ID".to_string(), "C1".to_string()),
                ("MCP-COMPONENT-TYPE".to_string(), "mcp-client".to_string()),
            ],
        };
        assert_eq!(message.user_property("MCP-MQTT-CLIENT-ID"), Some("C1"));
        assert_eq!(message.user_property("mcp-mqtt-client-id"), None);
        assert_eq!(message.user_property("MCP-META"), None);
    }
}
