//! Canonical MQTT topic scheme for the MCP dialogue.
//!
//! All MCP traffic lives under three reserved prefixes. Builders produce
//! the exact topic strings; [`McpTopic::parse`] classifies an arriving
//! topic in one pass and hands the parsed segments to the caller so
//! handlers never re-split.

use std::fmt;

pub const SERVER_PREFIX: &str = "$mcp-server";
pub const CLIENT_PREFIX: &str = "$mcp-client";
pub const RPC_PREFIX: &str = "$mcp-rpc";

const CAPABILITY_SEGMENT: &str = "capability";
const PRESENCE_SEGMENT: &str = "presence";

/// An identifier contained a character the topic scheme reserves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidIdentifier {
    pub field: &'static str,
    pub reason: &'static str,
}

impl fmt::Display for InvalidIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.reason)
    }
}

impl std::error::Error for InvalidIdentifier {}

/// `server_id` and `client_id` become single topic segments; `+`, `#` and
/// `/` would change the topic structure.
pub fn validate_id(field: &'static str, value: &str) -> Result<(), InvalidIdentifier> {
    if value.is_empty() {
        return Err(InvalidIdentifier {
            field,
            reason: "must not be empty",
        });
    }
    if value.contains(['+', '#', '/']) {
        return Err(InvalidIdentifier {
            field,
            reason: "must not contain '+', '#' or '/'",
        });
    }
    Ok(())
}

/// `server_name` is a slash-separated path; only the wildcard characters
/// are reserved.
pub fn validate_server_name(value: &str) -> Result<(), InvalidIdentifier> {
    if value.is_empty() {
        return Err(InvalidIdentifier {
            field: "server_name",
            reason: "must not be empty",
        });
    }
    if value.contains(['+', '#']) {
        return Err(InvalidIdentifier {
            field: "server_name",
            reason: "must not contain '+' or '#'",
        });
    }
    Ok(())
}

pub fn server_control(server_id: &str, server_name: &str) -> String {
    format!("{SERVER_PREFIX}/{server_id}/{server_name}")
}

pub fn server_capability(server_id: &str, server_name: &str) -> String {
    format!("{SERVER_PREFIX}/{CAPABILITY_SEGMENT}/{server_id}/{server_name}")
}

pub fn server_presence(server_id: &str, server_name: &str) -> String {
    format!("{SERVER_PREFIX}/{PRESENCE_SEGMENT}/{server_id}/{server_name}")
}

pub fn client_capability(client_id: &str) -> String {
    format!("{CLIENT_PREFIX}/{CAPABILITY_SEGMENT}/{client_id}")
}

pub fn client_presence(client_id: &str) -> String {
    format!("{CLIENT_PREFIX}/{PRESENCE_SEGMENT}/{client_id}")
}

pub fn rpc(client_id: &str, server_id: &str, server_name: &str) -> String {
    format!("{RPC_PREFIX}/{client_id}/{server_id}/{server_name}")
}

/// Filter a server subscribes to receive RPC traffic from any client.
pub fn server_rpc_filter(server_id: &str, server_name: &str) -> String {
    format!("{RPC_PREFIX}/+/{server_id}/{server_name}")
}

/// Filter a client subscribes to discover server presence.
pub fn presence_discovery_filter(name_filter: &str) -> String {
    format!("{SERVER_PREFIX}/{PRESENCE_SEGMENT}/+/{name_filter}")
}

/// Filter a client subscribes to observe server capability changes.
pub fn capability_discovery_filter(name_filter: &str) -> String {
    format!("{SERVER_PREFIX}/{CAPABILITY_SEGMENT}/+/{name_filter}")
}

/// Filter a client subscribes to receive its own RPC traffic.
pub fn client_rpc_filter(client_id: &str, name_filter: &str) -> String {
    format!("{RPC_PREFIX}/{client_id}/+/{name_filter}")
}

/// A classified MCP topic with its parsed segment fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpTopic {
    ServerControl {
        server_id: String,
        server_name: String,
    },
    ServerCapability {
        server_id: String,
        server_name: String,
    },
    ServerPresence {
        server_id: String,
        server_name: String,
    },
    ClientCapability {
        client_id: String,
    },
    ClientPresence {
        client_id: String,
    },
    Rpc {
        client_id: String,
        server_id: String,
        server_name: String,
    },
}

impl McpTopic {
    pub fn parse(topic: &str) -> Option<McpTopic> {
        let mut segments = topic.split('/');
        match segments.next()? {
            SERVER_PREFIX => {
                let second = segments.next()?;
                match second {
                    CAPABILITY_SEGMENT | PRESENCE_SEGMENT => {
                        let server_id = non_empty(segments.next()?)?.to_string();
                        let server_name = join_rest(segments)?;
                        if second == CAPABILITY_SEGMENT {
                            Some(McpTopic::ServerCapability {
                                server_id,
                                server_name,
                            })
                        } else {
                            Some(McpTopic::ServerPresence {
                                server_id,
                                server_name,
                            })
                        }
                    }
                    server_id => {
                        let server_id = non_empty(server_id)?.to_string();
                        let server_name = join_rest(segments)?;
                        Some(McpTopic::ServerControl {
                            server_id,
                            server_name,
                        })
                    }
                }
            }
            CLIENT_PREFIX => {
                let kind = segments.next()?;
                let client_id = non_empty(segments.next()?)?.to_string();
                if segments.next().is_some() {
                    return None;
                }
                match kind {
                    CAPABILITY_SEGMENT => Some(McpTopic::ClientCapability { client_id }),
                    PRESENCE_SEGMENT => Some(McpTopic::ClientPresence { client_id }),
                    _ => None,
                }
            }
            RPC_PREFIX => {
                let client_id = non_empty(segments.next()?)?.to_string();
                let server_id = non_empty(segments.next()?)?.to_string();
                let server_name = join_rest(segments)?;
                Some(McpTopic::Rpc {
                    client_id,
                    server_id,
                    server_name,
                })
            }
            _ => None,
        }
    }
}

fn non_empty(segment: &str) -> Option<&str> {
    if segment.is_empty() { None } else { Some(segment) }
}

fn join_rest<'a>(segments: impl Iterator<Item = &'a str>) -> Option<String> {
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() || rest.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(rest.join("/"))
}
