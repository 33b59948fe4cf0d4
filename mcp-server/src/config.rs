use mcp_mqtt_transport::BrokerAddress;
use mcp_mqtt_transport::ConfigError;
use mcp_mqtt_transport::MqttConfig;
use mcp_types::McpRbac;
use mcp_types::ServerCapabilities;
use mcp_types::topic;

/// Server peer configuration. `server_id` doubles as the MQTT client id of
/// the server's session; any `client_id` set on `mqtt` is ignored.
#[derive(Debug, Clone, Default)]
pub struct McpServerConfig {
    pub mqtt: MqttConfig,
    pub server_id: String,
    /// Hierarchical slash-separated path, e.g. `vendor/product/role`.
    pub server_name: String,
    /// Implementation name returned in the initialize response.
    pub name: String,
    /// Implementation version returned in the initialize response.
    pub version: String,
    /// Human-readable description advertised in the presence payload.
    pub description: String,
    pub capabilities: ServerCapabilities,
    pub rbac: Option<McpRbac>,
}

impl McpServerConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        topic::validate_id("server_id", &self.server_id)?;
        topic::validate_server_name(&self.server_name)?;
        BrokerAddress::parse(&self.mqtt.host)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> McpServerConfig {
        McpServerConfig {
            mqtt: MqttConfig::new("mqtt://localhost:1883"),
            server_id: "S1".to_string(),
            server_name: "demo/calc".to_string(),
            name: "Calc".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_wildcards_in_server_name() {
        let mut config = base_config();
        config.server_name = "demo/#".to_string();
        assert!(config.validate().is_err());

        config.server_name = "demo/+/calc".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_identifiers_and_host() {
        let mut config = base_config();
        config.server_id = String::new();
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.server_name = String::new();
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.mqtt.host = String::new();
        assert!(config.validate().is_err());
    }
}
