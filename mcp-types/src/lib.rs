//! Wire-level types for MCP over MQTT.
//!
//! This crate defines the JSON-RPC 2.0 envelopes, the MCP data model
//! (tools, resources, capabilities, initialize payloads), the MQTT topic
//! scheme, and the user-property vocabulary shared by the client and
//! server peers. Everything here is plain data: no I/O, no runtime.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as _;

pub mod error_codes;
pub mod methods;
pub mod topic;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision returned by the server in its initialize response and
/// sent by the client in its initialize request.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// User property identifying the publishing peer kind. Carried on every
/// PUBLISH issued by either peer.
pub const MCP_COMPONENT_TYPE: &str = "MCP-COMPONENT-TYPE";
/// User property carrying the publisher's MQTT client id. Carried on every
/// PUBLISH issued by either peer.
pub const MCP_MQTT_CLIENT_ID: &str = "MCP-MQTT-CLIENT-ID";
/// CONNECT user property carrying a JSON description of the connecting peer.
pub const MCP_META: &str = "MCP-META";
/// CONNACK user property through which a broker suggests a server-name
/// filter to the client (JSON array of strings).
pub const MCP_SERVER_NAME_FILTERS: &str = "MCP-SERVER-NAME-FILTERS";
/// CONNACK user property through which a broker publishes RBAC information.
pub const MCP_RBAC: &str = "MCP-RBAC";

pub const COMPONENT_TYPE_SERVER: &str = "mcp-server";
pub const COMPONENT_TYPE_CLIENT: &str = "mcp-client";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JSONRPCNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JSONRPCResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JSONRPCError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JSONRPCErrorError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JSONRPCMessage {
    pub fn request(id: RequestId, method: &str, params: Option<serde_json::Value>) -> Self {
        JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        })
    }

    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        JSONRPCMessage::Notification(JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        })
    }

    pub fn response(id: RequestId, result: serde_json::Value) -> Self {
        JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        })
    }

    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        JSONRPCMessage::Error(JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JSONRPCErrorError {
                code,
                message: message.into(),
                data: None,
            },
        })
    }
}

/// A named remote procedure exposed by a server. `input_schema` is an
/// opaque JSON Schema value passed through verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// A read-only datum exposed by a server, addressed by URI.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Implementation {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TextContent {
    pub r#type: String,
    pub text: String,
}

impl TextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            r#type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// A single entry of a tool result's `content` array. Only text content is
/// modeled; other MCP content kinds round-trip through `Other`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ContentBlock {
    TextContent(TextContent),
    Other(serde_json::Value),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<serde_json::Value>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::TextContent(TextContent::new(text))],
            is_error: None,
            structured_content: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ServerCapabilitiesPrompts {
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ServerCapabilitiesResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ServerCapabilitiesTools {
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ServerCapabilitiesPrompts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ServerCapabilitiesResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ServerCapabilitiesTools>,
}

impl ServerCapabilities {
    /// True iff `tools.list_changed` is declared.
    pub fn tools_list_changed(&self) -> bool {
        self.tools
            .as_ref()
            .and_then(|t| t.list_changed)
            .unwrap_or(false)
    }

    /// True iff `resources.list_changed` is declared.
    pub fn resources_list_changed(&self) -> bool {
        self.resources
            .as_ref()
            .and_then(|r| r.list_changed)
            .unwrap_or(false)
    }

    /// Copy with every optional boolean of a present sub-record pinned to a
    /// concrete value, as published in the initialize response.
    pub fn defaulted(&self) -> Self {
        Self {
            logging: self.logging.clone(),
            prompts: self.prompts.as_ref().map(|p| ServerCapabilitiesPrompts {
                list_changed: Some(p.list_changed.unwrap_or(false)),
            }),
            resources: self
                .resources
                .as_ref()
                .map(|r| ServerCapabilitiesResources {
                    subscribe: Some(r.subscribe.unwrap_or(false)),
                    list_changed: Some(r.list_changed.unwrap_or(false)),
                }),
            tools: self.tools.as_ref().map(|t| ServerCapabilitiesTools {
                list_changed: Some(t.list_changed.unwrap_or(false)),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ClientCapabilitiesRoots {
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<ClientCapabilitiesRoots>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Scope of an RBAC grant: either the literal string `"all"` or an explicit
/// list of names.
#[derive(Debug, Clone, PartialEq)]
pub enum RbacScope {
    All,
    List(Vec<String>),
}

impl Serialize for RbacScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RbacScope::All => serializer.serialize_str("all"),
            RbacScope::List(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for RbacScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) if s == "all" => Ok(RbacScope::All),
            serde_json::Value::Array(entries) => {
                let names = entries
                    .into_iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => Ok(s),
                        other => Err(D::Error::custom(format!(
                            "expected string in scope list, got {other}"
                        ))),
                    })
                    .collect::<Result<Vec<String>, D::Error>>()?;
                Ok(RbacScope::List(names))
            }
            other => Err(D::Error::custom(format!(
                "expected \"all\" or a list of names, got {other}"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RbacRole {
    pub allowed_methods: Vec<String>,
    pub allowed_tools: RbacScope,
    pub allowed_resources: RbacScope,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct McpRbac {
    pub roles: BTreeMap<String, RbacRole>,
}

/// Params of the retained `notifications/server/online` presence payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerOnlineParams {
    pub server_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ServerOnlineMeta>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerOnlineMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac: Option<McpRbac>,
}

/// JSON body of the server's `MCP-META` CONNECT user property.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMeta {
    pub version: String,
    pub implementation: Implementation,
    pub server_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac: Option<McpRbac>,
}

/// JSON body of the client's `MCP-META` CONNECT user property.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientMeta {
    pub version: String,
    pub implementation: Implementation,
    pub capabilities: ClientCapabilities,
}
