use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use mcp_mqtt_transport::InboundMessage;
use mcp_mqtt_transport::MqttTransport;
use mcp_mqtt_transport::PublishOptions;
use mcp_mqtt_transport::SubscribeOptions;
use mcp_types::Implementation;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCRequest;
use mcp_types::ListResourcesResult;
use mcp_types::ListToolsResult;
use mcp_types::MCP_MQTT_CLIENT_ID;
use mcp_types::MCP_PROTOCOL_VERSION;
use mcp_types::ServerCapabilities;
use mcp_types::error_codes;
use mcp_types::methods;
use mcp_types::topic;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ServerEvent;
use crate::state::ServerState;

#[derive(Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ReadResourceParams {
    uri: String,
}

/// Routes every inbound MQTT message to the matching handler. Owns no peer
/// state of its own; everything shared lives behind the server's mutex.
pub(crate) struct MessageProcessor {
    pub server_id: String,
    pub server_name: String,
    pub implementation: Implementation,
    pub capabilities: ServerCapabilities,
    pub control_topic: String,
    pub state: Arc<Mutex<ServerState>>,
    pub transport: MqttTransport,
    pub events_tx: mpsc::UnboundedSender<ServerEvent>,
}

impl MessageProcessor {
    pub(crate) async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.process_message(message).await;
        }
        debug!("server ingress loop exited (channel closed)");
    }

    async fn process_message(&self, message: InboundMessage) {
        if message.topic == self.control_topic {
            self.handle_initialize(message).await;
            return;
        }
        match topic::McpTopic::parse(&message.topic) {
            Some(topic::McpTopic::Rpc { client_id, .. }) => {
                self.handle_rpc(client_id, message).await;
            }
            Some(topic::McpTopic::ClientCapability { client_id }) => {
                // Observational only; clients announce capability changes here.
                debug!("capability change from client {client_id}");
            }
            Some(topic::McpTopic::ClientPresence { client_id }) => {
                self.handle_client_presence(client_id, message).await;
            }
            other => {
                debug!("ignoring message on unexpected topic {} ({other:?})", message.topic);
            }
        }
    }

    /// The client id is taken from the `MCP-MQTT-CLIENT-ID` user property
    /// of the control message, never from the topic. The response MUST be
    /// published before the per-client subscriptions are added so a topic
    /// subscribed late cannot drop a message the client sent early.
    async fn handle_initialize(&self, message: InboundMessage) {
        let Some(client_id) = message.user_property(MCP_MQTT_CLIENT_ID) else {
            warn!("control message without {MCP_MQTT_CLIENT_ID}; dropping");
            return;
        };
        let client_id = client_id.to_string();

        let JSONRPCRequest { id, params, .. } =
            match serde_json::from_slice::<JSONRPCMessage>(&message.payload) {
                Ok(JSONRPCMessage::Request(request)) if request.method == methods::INITIALIZE => {
                    request
                }
                Ok(other) => {
                    warn!("unexpected message on control topic: {other:?}");
                    return;
                }
                Err(e) => {
                    warn!("unparsable control payload: {e}");
                    self.emit_error(format!("unparsable control payload: {e}"));
                    return;
                }
            };

        let params = params.unwrap_or(serde_json::Value::Null);
        if let Err(e) = serde_json::from_value::<InitializeRequestParams>(params) {
            warn!("invalid initialize params from {client_id}: {e}");
            return;
        }

        {
            let mut state = self.state.lock().await;
            state.initialized = true;
        }

        let result = build_initialize_result(&self.capabilities, &self.implementation);
        let result = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(e) => {
                warn!("failed to serialize initialize result: {e}");
                return;
            }
        };

        let rpc_topic = topic::rpc(&client_id, &self.server_id, &self.server_name);
        let response = JSONRPCMessage::response(id, result);
        if let Err(e) = self.publish(&rpc_topic, &response).await {
            self.emit_error(format!("failed to publish initialize response: {e}"));
            return;
        }

        for per_client_topic in [
            topic::client_capability(&client_id),
            topic::client_presence(&client_id),
        ] {
            if let Err(e) = self
                .transport
                .subscribe(&per_client_topic, SubscribeOptions::default())
                .await
            {
                self.emit_error(format!("failed to subscribe {per_client_topic}: {e}"));
            }
        }

        let mut state = self.state.lock().await;
        state.connected_clients.insert(client_id.clone());
        info!("client {client_id} initialized");
    }

    async fn handle_rpc(&self, client_id: String, message: InboundMessage) {
        let parsed = match serde_json::from_slice::<JSONRPCMessage>(&message.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("unparsable rpc payload from {client_id}: {e}");
                self.emit_error(format!("unparsable rpc payload: {e}"));
                return;
            }
        };

        match parsed {
            JSONRPCMessage::Request(request) => {
                let state = self.state.clone();
                let transport = self.transport.clone();
                let rpc_topic = topic::rpc(&client_id, &self.server_id, &self.server_name);
                let user_properties = publish_properties(&self.server_id);
                // Handlers may suspend or fail; run each request in its own
                // task so the ingress loop keeps draining.
                tokio::spawn(async move {
                    let response = dispatch_request(&state, request).await;
                    match serde_json::to_vec(&response) {
                        Ok(payload) => {
                            let options = PublishOptions {
                                user_properties,
                                ..Default::default()
                            };
                            if let Err(e) = transport.publish(&rpc_topic, payload, options).await {
                                warn!("failed to publish rpc response: {e}");
                            }
                        }
                        Err(e) => warn!("failed to serialize rpc response: {e}"),
                    }
                });
            }
            JSONRPCMessage::Notification(notification) => match notification.method.as_str() {
                methods::NOTIFICATION_INITIALIZED => {
                    debug!("client {client_id} reported initialized");
                }
                methods::NOTIFICATION_DISCONNECTED => {
                    // The presence topic is the authoritative eviction path.
                    debug!("client {client_id} announced disconnect on rpc topic");
                }
                other => debug!("ignoring notification `{other}` from {client_id}"),
            },
            other => {
                debug!("ignoring rpc message from {client_id}: {other:?}");
            }
        }
    }

    /// Empty payload, a parsed `notifications/disconnected`, and an
    /// unparsable payload all evict the client; connected-set membership
    /// and the per-client subscriptions always change together.
    async fn handle_client_presence(&self, client_id: String, message: InboundMessage) {
        if message.payload.is_empty() {
            self.evict_client(&client_id).await;
            return;
        }
        match serde_json::from_slice::<JSONRPCMessage>(&message.payload) {
            Ok(JSONRPCMessage::Notification(notification))
                if notification.method == methods::NOTIFICATION_DISCONNECTED =>
            {
                info!("client {client_id} disconnected");
            }
            Ok(other) => {
                warn!("unexpected client presence payload: {other:?}; evicting {client_id}");
            }
            Err(e) => {
                warn!("unparsable client presence payload ({e}); evicting {client_id}");
            }
        }
        self.evict_client(&client_id).await;
    }

    async fn evict_client(&self, client_id: &str) {
        let was_connected = {
            let mut state = self.state.lock().await;
            state.connected_clients.remove(client_id)
        };
        if !was_connected {
            return;
        }
        for per_client_topic in [
            topic::client_capability(client_id),
            topic::client_presence(client_id),
        ] {
            if let Err(e) = self.transport.unsubscribe(&per_client_topic).await {
                warn!("failed to unsubscribe {per_client_topic}: {e}");
            }
        }
    }

    async fn publish(&self, publish_topic: &str, message: &JSONRPCMessage) -> Result<(), String> {
        let payload =
            serde_json::to_vec(message).map_err(|e| format!("failed to serialize message: {e}"))?;
        let options = PublishOptions {
            user_properties: publish_properties(&self.server_id),
            ..Default::default()
        };
        self.transport
            .publish(publish_topic, payload, options)
            .await
            .map_err(|e| e.to_string())
    }

    fn emit_error(&self, message: String) {
        let _ = self.events_tx.send(ServerEvent::Error(message));
    }
}

/// The two user properties every server PUBLISH carries.
pub(crate) fn publish_properties(server_id: &str) -> Vec<(String, String)> {
    vec![
        (
            mcp_types::MCP_COMPONENT_TYPE.to_string(),
            mcp_types::COMPONENT_TYPE_SERVER.to_string(),
        ),
        (
            mcp_types::MCP_MQTT_CLIENT_ID.to_string(),
            server_id.to_string(),
        ),
    ]
}

pub(crate) fn build_initialize_result(
    capabilities: &ServerCapabilities,
    implementation: &Implementation,
) -> InitializeResult {
    InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: capabilities.defaulted(),
        server_info: implementation.clone(),
        instructions: None,
    }
}

/// Resolves one JSON-RPC request against the tool and resource tables.
/// Handler panics and errors surface as `INTERNAL_ERROR` responses; a tool
/// result with `is_error = true` is a successful response.
pub(crate) async fn dispatch_request(
    state: &Mutex<ServerState>,
    request: JSONRPCRequest,
) -> JSONRPCMessage {
    let JSONRPCRequest {
        id, method, params, ..
    } = request;

    match method.as_str() {
        methods::TOOLS_LIST => {
            let tools = {
                let state = state.lock().await;
                state.tools.values().map(|entry| entry.tool.clone()).collect()
            };
            respond(id, ListToolsResult {
                tools,
                next_cursor: None,
            })
        }
        methods::TOOLS_CALL => {
            let params = match parse_params::<CallToolParams>(params) {
                Ok(params) => params,
                Err(e) => {
                    return JSONRPCMessage::error(id, error_codes::INVALID_PARAMS, e);
                }
            };
            let handler = {
                let state = state.lock().await;
                state.tools.get(&params.name).map(|entry| entry.handler.clone())
            };
            let Some(handler) = handler else {
                return JSONRPCMessage::error(
                    id,
                    error_codes::TOOL_NOT_FOUND,
                    format!("tool not found: {}", params.name),
                );
            };
            let arguments = params
                .arguments
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
            match AssertUnwindSafe(handler(arguments)).catch_unwind().await {
                Ok(Ok(result)) => respond(id, result),
                Ok(Err(e)) => JSONRPCMessage::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
                Err(_) => JSONRPCMessage::error(
                    id,
                    error_codes::INTERNAL_ERROR,
                    format!("tool handler panicked: {}", params.name),
                ),
            }
        }
        methods::RESOURCES_LIST => {
            let resources = {
                let state = state.lock().await;
                state
                    .resources
                    .values()
                    .map(|entry| entry.resource.clone())
                    .collect()
            };
            respond(id, ListResourcesResult {
                resources,
                next_cursor: None,
            })
        }
        methods::RESOURCES_READ => {
            let params = match parse_params::<ReadResourceParams>(params) {
                Ok(params) => params,
                Err(e) => {
                    return JSONRPCMessage::error(id, error_codes::INVALID_PARAMS, e);
                }
            };
            let handler = {
                let state = state.lock().await;
                state
                    .resources
                    .get(&params.uri)
                    .map(|entry| entry.handler.clone())
            };
            let Some(handler) = handler else {
                return JSONRPCMessage::error(
                    id,
                    error_codes::RESOURCE_NOT_FOUND,
                    format!("resource not found: {}", params.uri),
                );
            };
            match AssertUnwindSafe(handler(params.uri.clone())).catch_unwind().await {
                Ok(Ok(result)) => respond(id, result),
                Ok(Err(e)) => JSONRPCMessage::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
                Err(_) => JSONRPCMessage::error(
                    id,
                    error_codes::INTERNAL_ERROR,
                    format!("resource handler panicked: {}", params.uri),
                ),
            }
        }
        methods::PING => JSONRPCMessage::response(id, serde_json::json!({ "pong": true })),
        other => JSONRPCMessage::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        ),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<serde_json::Value>,
) -> Result<T, String> {
    let params = params.ok_or_else(|| "missing params".to_string())?;
    serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))
}

fn respond<T: serde::Serialize>(id: mcp_types::RequestId, result: T) -> JSONRPCMessage {
    match serde_json::to_value(result) {
        Ok(value) => JSONRPCMessage::response(id, value),
        Err(e) => JSONRPCMessage::error(
            id,
            error_codes::INTERNAL_ERROR,
            format!("failed to serialize result: {e}"),
        ),
    }
}
