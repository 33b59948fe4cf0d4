use mcp_mqtt_transport::ConfigError;
use mcp_mqtt_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Envelope parse or shape failure on a payload the caller waited for.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC level failure returned by the server.
    #[error("server returned JSON-RPC error {code}: {message}")]
    Mcp {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("request `{method}` timed out after {elapsed_ms} ms")]
    RequestTimeout { method: String, elapsed_ms: u64 },

    /// RPC invoked before `connect`, or against a server that is not in
    /// the connected set.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// `initialize_server` called for a server id that was never
    /// discovered.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("request cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(e.to_string())
    }
}
