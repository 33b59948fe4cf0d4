//! The MCP client peer.
//!
//! Discovers servers through retained presence messages, drives the
//! initialize handshake, and correlates RPC responses back to awaiting
//! callers. All broker traffic flows through one ingress task; callers
//! interact with plain async methods.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mcp_mqtt_transport::InboundMessage;
use mcp_mqtt_transport::MqttTransport;
use mcp_mqtt_transport::PublishOptions;
use mcp_mqtt_transport::QoS;
use mcp_mqtt_transport::SubscribeOptions;
use mcp_mqtt_transport::WillConfig;
use mcp_types::COMPONENT_TYPE_CLIENT;
use mcp_types::CallToolResult;
use mcp_types::ClientMeta;
use mcp_types::Implementation;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::ListResourcesResult;
use mcp_types::ListToolsResult;
use mcp_types::MCP_COMPONENT_TYPE;
use mcp_types::MCP_META;
use mcp_types::MCP_MQTT_CLIENT_ID;
use mcp_types::MCP_PROTOCOL_VERSION;
use mcp_types::MCP_RBAC;
use mcp_types::MCP_SERVER_NAME_FILTERS;
use mcp_types::McpRbac;
use mcp_types::ReadResourceResult;
use mcp_types::RequestId;
use mcp_types::Resource;
use mcp_types::ServerCapabilities;
use mcp_types::ServerOnlineParams;
use mcp_types::Tool;
use mcp_types::error_codes;
use mcp_types::methods;
use mcp_types::topic;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::config::McpClientConfig;
use crate::error::ClientError;
use crate::pending::RequestRegistry;

/// Everything the client knows about a discovered server. `display_name`,
/// `version`, and `capabilities` are provisional until the initialize
/// handshake merges the server's own answers in.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub server_id: String,
    pub server_name: String,
    pub description: String,
    pub display_name: String,
    pub version: String,
    pub capabilities: ServerCapabilities,
    pub rbac: Option<McpRbac>,
}

/// Observable client events.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    ServerDiscovered(ServerInfo),
    ServerInitialized(ServerInfo),
    ServerDisconnected { server_id: String },
    ServerCapabilityChanged { server_id: String, method: String },
    ServerNotification {
        server_id: String,
        notification: JSONRPCNotification,
    },
    BrokerRbacInfo(serde_json::Value),
    Error(String),
}

#[derive(Default)]
pub(crate) struct ClientState {
    pub discovered: HashMap<String, ServerInfo>,
    pub connected: HashMap<String, ServerInfo>,
}

pub struct McpClient {
    config: McpClientConfig,
    client_id: String,
    state: Arc<Mutex<ClientState>>,
    registry: Arc<RequestRegistry>,
    transport: Mutex<Option<MqttTransport>>,
    server_name_filter: Mutex<String>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl McpClient {
    pub fn new(config: McpClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client_id = config
            .mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mcp-client-{}", Uuid::now_v7()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            client_id,
            state: Arc::new(Mutex::new(ClientState::default())),
            registry: Arc::new(RequestRegistry::new()),
            transport: Mutex::new(None),
            server_name_filter: Mutex::new("#".to_string()),
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        })
    }

    /// The active discovery filter: `#` unless the broker suggested one.
    pub async fn server_name_filter(&self) -> String {
        self.server_name_filter.lock().await.clone()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The event stream; yields once, `None` on subsequent calls.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events_rx.lock().ok()?.take()
    }

    /// Connects to the broker, applies any broker-suggested server-name
    /// filter from the CONNACK, and subscribes for discovery and RPC
    /// traffic. A second call while connected is a no-op.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut transport_slot = self.transport.lock().await;
        if transport_slot.is_some() {
            return Ok(());
        }

        let mut mqtt = self.config.mqtt.clone();
        let disconnected =
            JSONRPCMessage::notification(methods::NOTIFICATION_DISCONNECTED, None);
        mqtt.will = Some(WillConfig {
            topic: topic::client_presence(&self.client_id),
            payload: serde_json::to_vec(&disconnected)?,
            qos: QoS::AtLeastOnce,
            retain: false,
        });

        let meta = ClientMeta {
            version: MCP_PROTOCOL_VERSION.to_string(),
            implementation: self.implementation(),
            capabilities: self.config.capabilities.clone(),
        };
        let mut user_properties = publish_properties(&self.client_id);
        user_properties.push((MCP_META.to_string(), serde_json::to_string(&meta)?));

        let (transport, inbound_rx) =
            MqttTransport::connect(&mqtt, &self.client_id, user_properties).await?;

        // Broker suggestions are best-effort: malformed values keep the
        // defaults and never fail the connect.
        let mut server_name_filter = self.server_name_filter.lock().await.clone();
        if let Some(raw) = find_property(transport.connack_user_properties(), MCP_SERVER_NAME_FILTERS)
        {
            match serde_json::from_str::<Vec<String>>(raw) {
                Ok(filters) => match filters.into_iter().next() {
                    Some(first) => {
                        info!("broker suggested server name filter: {first}");
                        server_name_filter = first;
                    }
                    None => warn!("broker sent an empty {MCP_SERVER_NAME_FILTERS} list"),
                },
                Err(e) => warn!("ignoring malformed {MCP_SERVER_NAME_FILTERS}: {e}"),
            }
        }
        *self.server_name_filter.lock().await = server_name_filter.clone();
        if let Some(raw) = find_property(transport.connack_user_properties(), MCP_RBAC) {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(value) => {
                    let _ = self.events_tx.send(ClientEvent::BrokerRbacInfo(value));
                }
                Err(e) => warn!("ignoring malformed {MCP_RBAC}: {e}"),
            }
        }

        transport
            .subscribe(
                &topic::presence_discovery_filter(&server_name_filter),
                SubscribeOptions::default(),
            )
            .await?;
        transport
            .subscribe(
                &topic::capability_discovery_filter(&server_name_filter),
                SubscribeOptions::default(),
            )
            .await?;
        transport
            .subscribe(
                &topic::client_rpc_filter(&self.client_id, &server_name_filter),
                SubscribeOptions { no_local: true },
            )
            .await?;

        let processor = ClientProcessor {
            client_id: self.client_id.clone(),
            state: self.state.clone(),
            registry: self.registry.clone(),
            events_tx: self.events_tx.clone(),
        };
        tokio::spawn(processor.run(inbound_rx));

        *transport_slot = Some(transport);
        info!("client {} connected", self.client_id);
        let _ = self.events_tx.send(ClientEvent::Connected);
        Ok(())
    }

    /// Announces the disconnect to every connected server and on the
    /// client presence topic, cancels all pending requests, and ends the
    /// session. A second call is a no-op and never fails.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let transport = self.transport.lock().await.take();
        let Some(transport) = transport else {
            return Ok(());
        };

        let disconnected =
            JSONRPCMessage::notification(methods::NOTIFICATION_DISCONNECTED, None);
        let payload = serde_json::to_vec(&disconnected).unwrap_or_default();
        let connected: Vec<ServerInfo> = {
            let state = self.state.lock().await;
            state.connected.values().cloned().collect()
        };
        for info in &connected {
            let rpc_topic = topic::rpc(&self.client_id, &info.server_id, &info.server_name);
            if let Err(e) = transport
                .publish(&rpc_topic, payload.clone(), self.publish_options())
                .await
            {
                warn!("failed to announce disconnect to {}: {e}", info.server_id);
            }
        }
        if let Err(e) = transport
            .publish(
                &topic::client_presence(&self.client_id),
                payload,
                self.publish_options(),
            )
            .await
        {
            warn!("failed to publish presence disconnect: {e}");
        }

        self.registry.fail_all().await;
        {
            let mut state = self.state.lock().await;
            state.connected.clear();
            state.discovered.clear();
        }
        if let Err(e) = transport.disconnect().await {
            warn!("transport disconnect failed: {e}");
        }
        let _ = self.events_tx.send(ClientEvent::Disconnected);
        Ok(())
    }

    pub async fn discovered_servers(&self) -> Vec<ServerInfo> {
        let state = self.state.lock().await;
        state.discovered.values().cloned().collect()
    }

    pub async fn connected_servers(&self) -> Vec<ServerInfo> {
        let state = self.state.lock().await;
        state.connected.values().cloned().collect()
    }

    pub async fn is_server_connected(&self, server_id: &str) -> bool {
        let state = self.state.lock().await;
        state.connected.contains_key(server_id)
    }

    pub async fn server_info(&self, server_id: &str) -> Option<ServerInfo> {
        let state = self.state.lock().await;
        state
            .connected
            .get(server_id)
            .or_else(|| state.discovered.get(server_id))
            .cloned()
    }

    /// Runs the initialize handshake against a discovered server, merges
    /// its answers into the stored `ServerInfo`, and announces
    /// `notifications/initialized` on the RPC topic.
    pub async fn initialize_server(&self, server_id: &str) -> Result<ServerInfo, ClientError> {
        let discovered = {
            let state = self.state.lock().await;
            state.discovered.get(server_id).cloned()
        };
        let Some(discovered) = discovered else {
            return Err(ClientError::UnknownServer(server_id.to_string()));
        };

        let control_topic = topic::server_control(server_id, &discovered.server_name);
        let params = InitializeRequestParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: self.config.capabilities.clone(),
            client_info: self.implementation(),
        };
        let value = self
            .send_request(
                &control_topic,
                methods::INITIALIZE,
                Some(serde_json::to_value(&params)?),
                None,
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        let info = {
            let mut state = self.state.lock().await;
            let entry = state
                .discovered
                .entry(server_id.to_string())
                .or_insert(discovered);
            entry.display_name = result.server_info.name;
            entry.version = result.server_info.version;
            entry.capabilities = result.capabilities;
            let info = entry.clone();
            state.connected.insert(server_id.to_string(), info.clone());
            info
        };

        // Required once the response has arrived; the server treats it as
        // the end of the handshake.
        let initialized =
            JSONRPCMessage::notification(methods::NOTIFICATION_INITIALIZED, None);
        let rpc_topic = topic::rpc(&self.client_id, server_id, &info.server_name);
        self.transport()
            .await?
            .publish(
                &rpc_topic,
                serde_json::to_vec(&initialized)?,
                self.publish_options(),
            )
            .await?;

        let _ = self
            .events_tx
            .send(ClientEvent::ServerInitialized(info.clone()));
        Ok(info)
    }

    pub async fn list_tools(&self, server_id: &str) -> Result<Vec<Tool>, ClientError> {
        let value = self
            .request(server_id, methods::TOOLS_LIST, None, None)
            .await?;
        let result: ListToolsResult = serde_json::from_value(value)?;
        Ok(result.tools)
    }

    pub async fn call_tool(
        &self,
        server_id: &str,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult, ClientError> {
        let mut params = serde_json::Map::new();
        params.insert("name".to_string(), serde_json::Value::String(name.to_string()));
        if let Some(arguments) = arguments {
            params.insert("arguments".to_string(), arguments);
        }
        let value = self
            .request(
                server_id,
                methods::TOOLS_CALL,
                Some(serde_json::Value::Object(params)),
                None,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn list_resources(&self, server_id: &str) -> Result<Vec<Resource>, ClientError> {
        let value = self
            .request(server_id, methods::RESOURCES_LIST, None, None)
            .await?;
        let result: ListResourcesResult = serde_json::from_value(value)?;
        Ok(result.resources)
    }

    pub async fn read_resource(
        &self,
        server_id: &str,
        uri: &str,
    ) -> Result<ReadResourceResult, ClientError> {
        let value = self
            .request(
                server_id,
                methods::RESOURCES_READ,
                Some(serde_json::json!({ "uri": uri })),
                None,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// True iff the server answered with `{"pong": true}`.
    pub async fn ping(&self, server_id: &str) -> Result<bool, ClientError> {
        let value = self.request(server_id, methods::PING, None, None).await?;
        Ok(value.get("pong").and_then(serde_json::Value::as_bool) == Some(true))
    }

    /// Sends an arbitrary request on the RPC topic of a connected server.
    /// `timeout` overrides the per-method default deadline.
    pub async fn request(
        &self,
        server_id: &str,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, ClientError> {
        let rpc_topic = {
            let state = self.state.lock().await;
            let info = state
                .connected
                .get(server_id)
                .ok_or_else(|| ClientError::NotConnected(server_id.to_string()))?;
            topic::rpc(&self.client_id, server_id, &info.server_name)
        };
        self.send_request(&rpc_topic, method, params, timeout).await
    }

    /// Registers a pending entry, publishes the request, and awaits the
    /// correlated outcome under the method's deadline.
    async fn send_request(
        &self,
        target_topic: &str,
        method: &str,
        params: Option<serde_json::Value>,
        timeout_override: Option<Duration>,
    ) -> Result<serde_json::Value, ClientError> {
        let transport = self.transport().await?;
        let (id, rx) = self.registry.register(method).await;
        let request = JSONRPCMessage::request(RequestId::Integer(id), method, params);
        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => payload,
            Err(e) => {
                self.registry.remove(id).await;
                return Err(e.into());
            }
        };
        if let Err(e) = transport
            .publish(target_topic, payload, self.publish_options())
            .await
        {
            self.registry.remove(id).await;
            let _ = self
                .events_tx
                .send(ClientEvent::Error(format!("publish failed: {e}")));
            return Err(e.into());
        }

        let deadline = timeout_override.unwrap_or_else(|| RequestRegistry::default_timeout(method));
        let started = Instant::now();
        match time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => {
                self.registry.remove(id).await;
                Err(ClientError::RequestTimeout {
                    method: method.to_string(),
                    elapsed_ms: u64::try_from(started.elapsed().as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        }
    }

    async fn transport(&self) -> Result<MqttTransport, ClientError> {
        let transport = self.transport.lock().await;
        transport
            .clone()
            .ok_or_else(|| ClientError::NotConnected("broker".to_string()))
    }

    fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            user_properties: publish_properties(&self.client_id),
            ..Default::default()
        }
    }

    fn implementation(&self) -> Implementation {
        Implementation {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
            title: None,
        }
    }
}

fn find_property<'a>(properties: &'a [(String, String)], name: &str) -> Option<&'a str> {
    properties
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// The two user properties every client PUBLISH carries.
fn publish_properties(client_id: &str) -> Vec<(String, String)> {
    vec![
        (
            MCP_COMPONENT_TYPE.to_string(),
            COMPONENT_TYPE_CLIENT.to_string(),
        ),
        (MCP_MQTT_CLIENT_ID.to_string(), client_id.to_string()),
    ]
}

/// Routes inbound MQTT messages: presence mutates the discovery tables,
/// capability changes and foreign notifications become events, and RPC
/// responses complete pending requests.
pub(crate) struct ClientProcessor {
    pub client_id: String,
    pub state: Arc<Mutex<ClientState>>,
    pub registry: Arc<RequestRegistry>,
    pub events_tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientProcessor {
    pub(crate) async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.process_message(message).await;
        }
        debug!("client ingress loop exited (channel closed)");
    }

    pub(crate) async fn process_message(&self, message: InboundMessage) {
        match topic::McpTopic::parse(&message.topic) {
            Some(topic::McpTopic::ServerPresence { server_id, .. }) => {
                self.handle_presence(server_id, message).await;
            }
            Some(topic::McpTopic::ServerCapability { server_id, .. }) => {
                self.handle_capability_change(server_id, message);
            }
            Some(topic::McpTopic::Rpc {
                client_id,
                server_id,
                ..
            }) if client_id == self.client_id => {
                self.handle_rpc(server_id, message).await;
            }
            other => {
                debug!(
                    "ignoring message on unexpected topic {} ({other:?})",
                    message.topic
                );
            }
        }
    }

    /// An empty retained payload is the offline sentinel; anything else
    /// must parse as `notifications/server/online`.
    async fn handle_presence(&self, server_id: String, message: InboundMessage) {
        if message.payload.is_empty() {
            let removed = {
                let mut state = self.state.lock().await;
                let was_discovered = state.discovered.remove(&server_id).is_some();
                let was_connected = state.connected.remove(&server_id).is_some();
                was_discovered || was_connected
            };
            if removed {
                info!("server {server_id} went offline");
                let _ = self
                    .events_tx
                    .send(ClientEvent::ServerDisconnected { server_id });
            }
            return;
        }

        let params = match serde_json::from_slice::<JSONRPCMessage>(&message.payload) {
            Ok(JSONRPCMessage::Notification(notification))
                if notification.method == methods::NOTIFICATION_SERVER_ONLINE =>
            {
                match serde_json::from_value::<ServerOnlineParams>(
                    notification.params.unwrap_or(serde_json::Value::Null),
                ) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!("invalid server online params from {server_id}: {e}");
                        self.emit_error(format!("invalid presence payload: {e}"));
                        return;
                    }
                }
            }
            Ok(other) => {
                warn!("unexpected presence payload from {server_id}: {other:?}");
                return;
            }
            Err(e) => {
                warn!("unparsable presence payload from {server_id}: {e}");
                self.emit_error(format!("unparsable presence payload: {e}"));
                return;
            }
        };

        let info = ServerInfo {
            server_id: server_id.clone(),
            server_name: params.server_name,
            description: params.description,
            display_name: String::new(),
            version: String::new(),
            capabilities: ServerCapabilities::default(),
            rbac: params.meta.and_then(|meta| meta.rbac),
        };
        {
            let mut state = self.state.lock().await;
            state.discovered.insert(server_id.clone(), info.clone());
        }
        info!("discovered server {server_id} ({})", info.server_name);
        let _ = self.events_tx.send(ClientEvent::ServerDiscovered(info));
    }

    fn handle_capability_change(&self, server_id: String, message: InboundMessage) {
        match serde_json::from_slice::<JSONRPCMessage>(&message.payload) {
            Ok(JSONRPCMessage::Notification(notification)) => {
                let _ = self.events_tx.send(ClientEvent::ServerCapabilityChanged {
                    server_id,
                    method: notification.method,
                });
            }
            Ok(other) => {
                warn!("unexpected capability payload from {server_id}: {other:?}");
            }
            Err(e) => {
                warn!("unparsable capability payload from {server_id}: {e}");
            }
        }
    }

    async fn handle_rpc(&self, server_id: String, message: InboundMessage) {
        match serde_json::from_slice::<JSONRPCMessage>(&message.payload) {
            Ok(JSONRPCMessage::Response(response)) => match response.id {
                RequestId::Integer(id) => {
                    if !self.registry.complete(id, Ok(response.result)).await {
                        warn!("no pending request for response id {id}");
                    }
                }
                RequestId::String(id) => {
                    // Only integer ids are ever generated here.
                    warn!("response with foreign string id `{id}`");
                }
            },
            Ok(JSONRPCMessage::Error(error)) => match error.id {
                RequestId::Integer(id) => {
                    let outcome = Err(ClientError::Mcp {
                        code: error.error.code,
                        message: error.error.message,
                        data: error.error.data,
                    });
                    if !self.registry.complete(id, outcome).await {
                        warn!("no pending request for error id {id}");
                    }
                }
                RequestId::String(id) => {
                    warn!("error with foreign string id `{id}`");
                }
            },
            Ok(JSONRPCMessage::Notification(notification))
                if notification.method == methods::NOTIFICATION_DISCONNECTED =>
            {
                let removed = {
                    let mut state = self.state.lock().await;
                    state.connected.remove(&server_id).is_some()
                };
                if removed {
                    info!("server {server_id} announced disconnect");
                    let _ = self
                        .events_tx
                        .send(ClientEvent::ServerDisconnected { server_id });
                }
            }
            Ok(JSONRPCMessage::Notification(notification)) => {
                let _ = self.events_tx.send(ClientEvent::ServerNotification {
                    server_id,
                    notification,
                });
            }
            Ok(JSONRPCMessage::Request(request)) => {
                debug!(
                    "ignoring server-initiated request `{}` from {server_id}",
                    request.method
                );
            }
            Err(e) => {
                // A malformed payload that still carries a pending id fails
                // that request instead of leaving it to time out.
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&message.payload)
                    && let Some(id) = value.get("id").and_then(serde_json::Value::as_i64)
                {
                    let outcome = Err(ClientError::Mcp {
                        code: error_codes::INVALID_MESSAGE,
                        message: format!("invalid message: {e}"),
                        data: None,
                    });
                    if self.registry.complete(id, outcome).await {
                        return;
                    }
                }
                warn!("unparsable rpc payload from {server_id}: {e}");
                self.emit_error(format!("unparsable rpc payload: {e}"));
            }
        }
    }

    fn emit_error(&self, message: String) {
        let _ = self.events_tx.send(ClientEvent::Error(message));
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn test_processor() -> (
        ClientProcessor,
        mpsc::UnboundedReceiver<ClientEvent>,
        Arc<Mutex<ClientState>>,
        Arc<RequestRegistry>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ClientState::default()));
        let registry = Arc::new(RequestRegistry::new());
        let processor = ClientProcessor {
            client_id: "C1".to_string(),
            state: state.clone(),
            registry: registry.clone(),
            events_tx,
        };
        (processor, events_rx, state, registry)
    }

    fn inbound(topic: &str, payload: &serde_json::Value) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from(serde_json::to_vec(payload).expect("payload must serialize")),
            user_properties: Vec::new(),
        }
    }

    fn online_payload() -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "method": "notifications/server/online",
            "params": { "serverName": "demo/calc", "description": "a calculator" }
        })
    }

    #[tokio::test]
    async fn presence_online_discovers_the_server() {
        let (processor, mut events, state, _) = test_processor();
        processor
            .process_message(inbound("$mcp-server/presence/S1/demo/calc", &online_payload()))
            .await;

        let info = state.lock().await.discovered.get("S1").cloned().expect("must be discovered");
        assert_eq!(info.server_name, "demo/calc");
        assert_eq!(info.description, "a calculator");
        assert_eq!(info.capabilities, ServerCapabilities::default());

        let Ok(ClientEvent::ServerDiscovered(event_info)) = events.try_recv() else {
            panic!("expected ServerDiscovered");
        };
        assert_eq!(event_info, info);
    }

    #[tokio::test]
    async fn empty_presence_payload_disconnects_a_known_server() {
        let (processor, mut events, state, _) = test_processor();
        processor
            .process_message(inbound("$mcp-server/presence/S1/demo/calc", &online_payload()))
            .await;
        {
            // Simulate a completed handshake.
            let mut state = state.lock().await;
            let info = state.discovered.get("S1").cloned().expect("discovered");
            state.connected.insert("S1".to_string(), info);
        }
        let _ = events.try_recv();

        processor
            .process_message(InboundMessage {
                topic: "$mcp-server/presence/S1/demo/calc".to_string(),
                payload: Bytes::new(),
                user_properties: Vec::new(),
            })
            .await;

        let state = state.lock().await;
        assert!(state.discovered.is_empty());
        assert!(state.connected.is_empty());
        drop(state);
        assert_eq!(
            events.try_recv().ok(),
            Some(ClientEvent::ServerDisconnected {
                server_id: "S1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn empty_presence_for_unknown_server_is_silent() {
        let (processor, mut events, _, _) = test_processor();
        processor
            .process_message(InboundMessage {
                topic: "$mcp-server/presence/S9/other/thing".to_string(),
                payload: Bytes::new(),
                user_properties: Vec::new(),
            })
            .await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn rpc_response_completes_the_pending_request() {
        let (processor, _, _, registry) = test_processor();
        let (id, rx) = registry.register("tools/list").await;

        processor
            .process_message(inbound(
                "$mcp-rpc/C1/S1/demo/calc",
                &json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": [] } }),
            ))
            .await;

        let outcome = rx.await.expect("slot must resolve");
        assert_eq!(outcome.expect("must be success"), json!({ "tools": [] }));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn rpc_error_fails_the_pending_request() {
        let (processor, _, _, registry) = test_processor();
        let (id, rx) = registry.register("tools/call").await;

        processor
            .process_message(inbound(
                "$mcp-rpc/C1/S1/demo/calc",
                &json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32001, "message": "tool not found: nope" }
                }),
            ))
            .await;

        let outcome = rx.await.expect("slot must resolve");
        let Err(ClientError::Mcp { code, message, .. }) = outcome else {
            panic!("expected Mcp error, got {outcome:?}");
        };
        assert_eq!(code, error_codes::TOOL_NOT_FOUND);
        assert_eq!(message, "tool not found: nope");
    }

    #[tokio::test]
    async fn malformed_rpc_payload_with_pending_id_becomes_invalid_message() {
        let (processor, _, _, registry) = test_processor();
        let (id, rx) = registry.register("tools/list").await;

        // Valid JSON, but not a JSON-RPC message.
        processor
            .process_message(inbound(
                "$mcp-rpc/C1/S1/demo/calc",
                &json!({ "id": id, "unexpected": true }),
            ))
            .await;

        let outcome = rx.await.expect("slot must resolve");
        let Err(ClientError::Mcp { code, .. }) = outcome else {
            panic!("expected Mcp error, got {outcome:?}");
        };
        assert_eq!(code, error_codes::INVALID_MESSAGE);
    }

    #[tokio::test]
    async fn rpc_disconnect_notification_removes_the_connected_server() {
        let (processor, mut events, state, _) = test_processor();
        {
            let mut state = state.lock().await;
            let info = ServerInfo {
                server_id: "S1".to_string(),
                server_name: "demo/calc".to_string(),
                description: String::new(),
                display_name: "Calc".to_string(),
                version: "1.0.0".to_string(),
                capabilities: ServerCapabilities::default(),
                rbac: None,
            };
            state.discovered.insert("S1".to_string(), info.clone());
            state.connected.insert("S1".to_string(), info);
        }

        processor
            .process_message(inbound(
                "$mcp-rpc/C1/S1/demo/calc",
                &json!({ "jsonrpc": "2.0", "method": "notifications/disconnected" }),
            ))
            .await;

        let state = state.lock().await;
        assert!(state.connected.is_empty());
        // Discovery state is kept; only the session ended.
        assert!(state.discovered.contains_key("S1"));
        drop(state);
        assert_eq!(
            events.try_recv().ok(),
            Some(ClientEvent::ServerDisconnected {
                server_id: "S1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn foreign_notifications_surface_as_events() {
        let (processor, mut events, _, _) = test_processor();
        processor
            .process_message(inbound(
                "$mcp-rpc/C1/S1/demo/calc",
                &json!({ "jsonrpc": "2.0", "method": "notifications/progress", "params": { "progress": 1 } }),
            ))
            .await;

        let Ok(ClientEvent::ServerNotification {
            server_id,
            notification,
        }) = events.try_recv()
        else {
            panic!("expected ServerNotification");
        };
        assert_eq!(server_id, "S1");
        assert_eq!(notification.method, "notifications/progress");
    }

    #[tokio::test]
    async fn capability_changes_surface_as_events() {
        let (processor, mut events, _, _) = test_processor();
        processor
            .process_message(inbound(
                "$mcp-server/capability/S1/demo/calc",
                &json!({ "jsonrpc": "2.0", "method": "notifications/tools/list_changed" }),
            ))
            .await;

        assert_eq!(
            events.try_recv().ok(),
            Some(ClientEvent::ServerCapabilityChanged {
                server_id: "S1".to_string(),
                method: "notifications/tools/list_changed".to_string()
            })
        );
    }

    #[tokio::test]
    async fn rpc_for_another_client_is_ignored() {
        let (processor, _, _, registry) = test_processor();
        let (id, rx) = registry.register("tools/list").await;

        processor
            .process_message(inbound(
                "$mcp-rpc/C2/S1/demo/calc",
                &json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            ))
            .await;

        // Still pending; the response belonged to someone else.
        assert_eq!(registry.len().await, 1);
        drop(rx);
    }

    #[test]
    fn generated_client_ids_are_fresh_per_instance() {
        let config = McpClientConfig {
            mqtt: mcp_mqtt_transport::MqttConfig::new("mqtt://localhost:1883"),
            name: "probe".to_string(),
            version: "0.1.0".to_string(),
            ..Default::default()
        };
        let a = McpClient::new(config.clone()).expect("config must be valid");
        let b = McpClient::new(config).expect("config must be valid");
        assert!(a.client_id().starts_with("mcp-client-"));
        assert_ne!(a.client_id(), b.client_id());
    }

    #[test]
    fn pinned_client_id_is_used_verbatim() {
        let mut config = McpClientConfig {
            mqtt: mcp_mqtt_transport::MqttConfig::new("mqtt://localhost:1883"),
            name: "probe".to_string(),
            version: "0.1.0".to_string(),
            ..Default::default()
        };
        config.mqtt.client_id = Some("C1".to_string());
        let client = McpClient::new(config).expect("config must be valid");
        assert_eq!(client.client_id(), "C1");
    }

    #[tokio::test]
    async fn requests_require_a_connected_server() {
        let config = McpClientConfig {
            mqtt: mcp_mqtt_transport::MqttConfig::new("mqtt://localhost:1883"),
            name: "probe".to_string(),
            version: "0.1.0".to_string(),
            ..Default::default()
        };
        let client = McpClient::new(config).expect("config must be valid");
        let result = client.list_tools("S1").await;
        assert!(matches!(result, Err(ClientError::NotConnected(_))));
    }

    #[tokio::test]
    async fn initialize_requires_a_discovered_server() {
        let config = McpClientConfig {
            mqtt: mcp_mqtt_transport::MqttConfig::new("mqtt://localhost:1883"),
            name: "probe".to_string(),
            version: "0.1.0".to_string(),
            ..Default::default()
        };
        let client = McpClient::new(config).expect("config must be valid");
        let result = client.initialize_server("S1").await;
        assert!(matches!(result, Err(ClientError::UnknownServer(_))));
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_no_op() {
        let config = McpClientConfig {
            mqtt: mcp_mqtt_transport::MqttConfig::new("mqtt://localhost:1883"),
            name: "probe".to_string(),
            version: "0.1.0".to_string(),
            ..Default::default()
        };
        let client = McpClient::new(config).expect("config must be valid");
        client.disconnect().await.expect("must not fail");
        client.disconnect().await.expect("must stay a no-op");
    }
}
