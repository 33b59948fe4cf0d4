//! JSON-RPC error codes used on the wire.

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

pub const INVALID_MESSAGE: i64 = -32000;
pub const TOOL_NOT_FOUND: i64 = -32001;
pub const RESOURCE_NOT_FOUND: i64 = -32002;
