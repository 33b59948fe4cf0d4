use mcp_mqtt_transport::BrokerAddress;
use mcp_mqtt_transport::ConfigError;
use mcp_mqtt_transport::MqttConfig;
use mcp_types::ClientCapabilities;
use mcp_types::topic;

/// Client peer configuration. Leaving `mqtt.client_id` unset makes the
/// client generate a fresh id per run, which is the recommended default: a
/// client re-initializing against the same server needs a new identity.
#[derive(Debug, Clone, Default)]
pub struct McpClientConfig {
    pub mqtt: MqttConfig,
    /// Implementation name sent in the initialize request.
    pub name: String,
    /// Implementation version sent in the initialize request.
    pub version: String,
    pub capabilities: ClientCapabilities,
}

impl McpClientConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        BrokerAddress::parse(&self.mqtt.host)?;
        if let Some(client_id) = &self.mqtt.client_id {
            topic::validate_id("client_id", client_id)?;
        }
        Ok(())
    }
}
