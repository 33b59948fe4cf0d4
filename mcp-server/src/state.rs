use std::collections::BTreeMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use mcp_types::CallToolResult;
use mcp_types::ReadResourceResult;
use mcp_types::Resource;
use mcp_types::Tool;

/// User-supplied tool callback. Receives the request's `arguments` object
/// (an empty map when the caller sent none). A returned error becomes an
/// `INTERNAL_ERROR` response; a returned result with `is_error = true` is
/// a successful response carrying a negative application outcome.
pub type ToolHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, anyhow::Result<CallToolResult>> + Send + Sync>;

/// User-supplied resource callback, invoked with the requested URI.
pub type ResourceHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<ReadResourceResult>> + Send + Sync>;

pub(crate) fn tool_handler<F, Fut>(handler: F) -> ToolHandler
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<CallToolResult>> + Send + 'static,
{
    Arc::new(move |arguments| handler(arguments).boxed())
}

pub(crate) fn resource_handler<F, Fut>(handler: F) -> ResourceHandler
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ReadResourceResult>> + Send + 'static,
{
    Arc::new(move |uri| handler(uri).boxed())
}

pub(crate) struct ToolEntry {
    pub tool: Tool,
    pub handler: ToolHandler,
}

pub(crate) struct ResourceEntry {
    pub resource: Resource,
    pub handler: ResourceHandler,
}

#[derive(Default)]
pub(crate) struct ServerState {
    pub tools: BTreeMap<String, ToolEntry>,
    pub resources: BTreeMap<String, ResourceEntry>,
    pub connected_clients: HashSet<String>,
    pub initialized: bool,
}
