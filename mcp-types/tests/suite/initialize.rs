use mcp_types::ClientCapabilities;
use mcp_types::Implementation;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCRequest;
use mcp_types::MCP_PROTOCOL_VERSION;
use mcp_types::RequestId;
use mcp_types::ServerCapabilities;
use mcp_types::ServerCapabilitiesTools;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn deserialize_initialize_request() {
    let raw = r#"{
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "capabilities": {},
            "clientInfo": { "name": "acme-client", "version": "1.2.3" },
            "protocolVersion": "2024-11-05"
        }
    }"#;

    // Deserialize full JSONRPCMessage first.
    let msg: JSONRPCMessage =
        serde_json::from_str(raw).expect("failed to deserialize JSONRPCMessage");

    // Extract the request variant.
    let JSONRPCMessage::Request(json_req) = msg else {
        unreachable!()
    };

    let expected_req = JSONRPCRequest {
        jsonrpc: JSONRPC_VERSION.into(),
        id: RequestId::Integer(1),
        method: "initialize".into(),
        params: Some(json!({
            "capabilities": {},
            "clientInfo": { "name": "acme-client", "version": "1.2.3" },
            "protocolVersion": "2024-11-05"
        })),
    };

    assert_eq!(json_req, expected_req);

    let params: InitializeRequestParams =
        serde_json::from_value(json_req.params.expect("params must be present"))
            .expect("params must parse");

    assert_eq!(
        params,
        InitializeRequestParams {
            capabilities: ClientCapabilities {
                roots: None,
                sampling: None,
            },
            client_info: Implementation {
                name: "acme-client".into(),
                version: "1.2.3".into(),
                title: None,
            },
            protocol_version: MCP_PROTOCOL_VERSION.into(),
        }
    );
}

#[test]
fn serialize_initialize_result_uses_camel_case() {
    let result = InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.into(),
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(true),
            }),
            ..Default::default()
        },
        server_info: Implementation {
            name: "Calc".into(),
            version: "1.0.0".into(),
            title: None,
        },
        instructions: None,
    };

    assert_eq!(
        serde_json::to_value(&result).expect("result must serialize"),
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": { "name": "Calc", "version": "1.0.0" }
        })
    );
}

#[test]
fn defaulted_capabilities_pin_declared_flags() {
    let declared = ServerCapabilities {
        tools: Some(ServerCapabilitiesTools { list_changed: None }),
        ..Default::default()
    };
    let defaulted = declared.defaulted();
    assert_eq!(
        defaulted.tools,
        Some(ServerCapabilitiesTools {
            list_changed: Some(false)
        })
    );
    // Absent sub-records stay absent.
    assert_eq!(defaulted.resources, None);
    assert_eq!(defaulted.prompts, None);
}
