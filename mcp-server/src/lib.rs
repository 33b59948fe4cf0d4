//! MCP server peer over MQTT.
//!
//! The server publishes its presence as a retained message, answers
//! `initialize` on its control topic, and serves tool and resource calls
//! on a per-client RPC topic. See `McpServer` for the lifecycle.

mod config;
mod message_processor;
mod state;

use std::future::Future;
use std::sync::Arc;

use mcp_mqtt_transport::MqttTransport;
use mcp_mqtt_transport::PublishOptions;
use mcp_mqtt_transport::QoS;
use mcp_mqtt_transport::SubscribeOptions;
use mcp_mqtt_transport::WillConfig;
use mcp_types::CallToolResult;
use mcp_types::Implementation;
use mcp_types::JSONRPCMessage;
use mcp_types::MCP_PROTOCOL_VERSION;
use mcp_types::ReadResourceResult;
use mcp_types::Resource;
use mcp_types::ServerMeta;
use mcp_types::ServerOnlineMeta;
use mcp_types::ServerOnlineParams;
use mcp_types::Tool;
use mcp_types::methods;
use mcp_types::topic;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

pub use config::McpServerConfig;
pub use mcp_mqtt_transport::ConfigError;
pub use mcp_mqtt_transport::MqttConfig;
pub use mcp_mqtt_transport::TransportError;
pub use state::ResourceHandler;
pub use state::ToolHandler;

use crate::message_processor::MessageProcessor;
use crate::message_processor::publish_properties;
use crate::state::ResourceEntry;
use crate::state::ServerState;
use crate::state::ToolEntry;
use crate::state::resource_handler;
use crate::state::tool_handler;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("server already started")]
    AlreadyStarted,
}

/// Observable server lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Ready,
    Error(String),
    Closed,
}

/// The four topics a running server owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTopics {
    pub control: String,
    pub capability: String,
    pub presence: String,
    pub rpc_pattern: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceOptions {
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

pub struct McpServer {
    config: McpServerConfig,
    topics: ServerTopics,
    state: Arc<Mutex<ServerState>>,
    transport: Mutex<Option<MqttTransport>>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
}

impl McpServer {
    pub fn new(config: McpServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let topics = ServerTopics {
            control: topic::server_control(&config.server_id, &config.server_name),
            capability: topic::server_capability(&config.server_id, &config.server_name),
            presence: topic::server_presence(&config.server_id, &config.server_name),
            rpc_pattern: topic::server_rpc_filter(&config.server_id, &config.server_name),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            topics,
            state: Arc::new(Mutex::new(ServerState::default())),
            transport: Mutex::new(None),
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        })
    }

    pub fn topics(&self) -> &ServerTopics {
        &self.topics
    }

    /// The event stream; yields once, `None` on subsequent calls.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.events_rx.lock().ok()?.take()
    }

    pub async fn connected_clients(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut clients: Vec<String> = state.connected_clients.iter().cloned().collect();
        clients.sort();
        clients
    }

    /// Connects to the broker and brings the server online.
    ///
    /// The order is load-bearing: the last will (retained empty presence)
    /// is registered before connecting, the control and RPC subscriptions
    /// are active before the retained online notification is published,
    /// and `Ready` is emitted last.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut transport_slot = self.transport.lock().await;
        if transport_slot.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let mut mqtt = self.config.mqtt.clone();
        mqtt.will = Some(WillConfig {
            topic: self.topics.presence.clone(),
            payload: Vec::new(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let meta = ServerMeta {
            version: MCP_PROTOCOL_VERSION.to_string(),
            implementation: self.implementation(),
            server_name: self.config.server_name.clone(),
            description: self.config.description.clone(),
            rbac: self.config.rbac.clone(),
        };
        let mut user_properties = publish_properties(&self.config.server_id);
        user_properties.push((
            mcp_types::MCP_META.to_string(),
            serde_json::to_string(&meta)?,
        ));

        let (transport, inbound_rx) = match MqttTransport::connect(
            &mqtt,
            &self.config.server_id,
            user_properties,
        )
        .await
        {
            Ok(connected) => connected,
            Err(e) => {
                self.emit_error(format!("connect failed: {e}"));
                return Err(e.into());
            }
        };

        transport
            .subscribe(&self.topics.control, SubscribeOptions::default())
            .await
            .map_err(|e| self.fail(e))?;
        transport
            .subscribe(&self.topics.rpc_pattern, SubscribeOptions { no_local: true })
            .await
            .map_err(|e| self.fail(e))?;

        let online_params = ServerOnlineParams {
            server_name: self.config.server_name.clone(),
            description: self.config.description.clone(),
            meta: self
                .config
                .rbac
                .clone()
                .map(|rbac| ServerOnlineMeta { rbac: Some(rbac) }),
        };
        let online = JSONRPCMessage::notification(
            methods::NOTIFICATION_SERVER_ONLINE,
            Some(serde_json::to_value(&online_params)?),
        );
        transport
            .publish(
                &self.topics.presence,
                serde_json::to_vec(&online)?,
                PublishOptions {
                    retain: true,
                    user_properties: publish_properties(&self.config.server_id),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| self.fail(e))?;

        let processor = MessageProcessor {
            server_id: self.config.server_id.clone(),
            server_name: self.config.server_name.clone(),
            implementation: self.implementation(),
            capabilities: self.config.capabilities.clone(),
            control_topic: self.topics.control.clone(),
            state: self.state.clone(),
            transport: transport.clone(),
            events_tx: self.events_tx.clone(),
        };
        tokio::spawn(processor.run(inbound_rx));

        *transport_slot = Some(transport);
        info!(
            "server {} online as {}",
            self.config.server_id, self.config.server_name
        );
        let _ = self.events_tx.send(ServerEvent::Ready);
        Ok(())
    }

    /// Clears the retained presence and ends the session. Calling `stop`
    /// on a server that is not running is a no-op.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let transport = self.transport.lock().await.take();
        let Some(transport) = transport else {
            return Ok(());
        };

        if let Err(e) = transport
            .publish(
                &self.topics.presence,
                Vec::new(),
                PublishOptions {
                    retain: true,
                    user_properties: publish_properties(&self.config.server_id),
                    ..Default::default()
                },
            )
            .await
        {
            warn!("failed to clear retained presence: {e}");
        }
        if let Err(e) = transport.disconnect().await {
            warn!("disconnect failed: {e}");
        }
        let _ = self.events_tx.send(ServerEvent::Closed);
        Ok(())
    }

    /// Adds a tool. When registration happens after the first `initialize`
    /// and `tools.list_changed` is declared, a
    /// `notifications/tools/list_changed` is published on the capability
    /// topic.
    pub async fn register_tool<F, Fut>(
        &self,
        name: &str,
        description: Option<&str>,
        input_schema: serde_json::Value,
        handler: F,
    ) -> Result<(), ServerError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CallToolResult>> + Send + 'static,
    {
        let tool = Tool {
            name: name.to_string(),
            description: description.map(str::to_string),
            input_schema,
        };
        let notify = {
            let mut state = self.state.lock().await;
            state.tools.insert(
                name.to_string(),
                ToolEntry {
                    tool,
                    handler: tool_handler(handler),
                },
            );
            state.initialized && self.config.capabilities.tools_list_changed()
        };
        if notify {
            self.publish_list_changed(methods::NOTIFICATION_TOOLS_LIST_CHANGED)
                .await?;
        }
        Ok(())
    }

    pub async fn register_resource<F, Fut>(
        &self,
        uri: &str,
        name: &str,
        handler: F,
        options: ResourceOptions,
    ) -> Result<(), ServerError>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ReadResourceResult>> + Send + 'static,
    {
        let resource = Resource {
            uri: uri.to_string(),
            name: name.to_string(),
            description: options.description,
            mime_type: options.mime_type,
        };
        let notify = {
            let mut state = self.state.lock().await;
            state.resources.insert(
                uri.to_string(),
                ResourceEntry {
                    resource,
                    handler: resource_handler(handler),
                },
            );
            state.initialized && self.config.capabilities.resources_list_changed()
        };
        if notify {
            self.publish_list_changed(methods::NOTIFICATION_RESOURCES_LIST_CHANGED)
                .await?;
        }
        Ok(())
    }

    async fn publish_list_changed(&self, method: &str) -> Result<(), ServerError> {
        let transport = { self.transport.lock().await.clone() };
        let Some(transport) = transport else {
            // Not started yet; the initial listing covers it.
            return Ok(());
        };
        let notification = JSONRPCMessage::notification(method, None);
        transport
            .publish(
                &self.topics.capability,
                serde_json::to_vec(&notification)?,
                PublishOptions {
                    user_properties: publish_properties(&self.config.server_id),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| self.fail(e))?;
        Ok(())
    }

    fn implementation(&self) -> Implementation {
        Implementation {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
            title: None,
        }
    }

    fn emit_error(&self, message: String) {
        let _ = self.events_tx.send(ServerEvent::Error(message));
    }

    /// Transport failures surface to the caller and on the event stream.
    fn fail(&self, e: TransportError) -> ServerError {
        self.emit_error(e.to_string());
        ServerError::Transport(e)
    }
}
