use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCMessage;
use mcp_types::RequestId;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn request_round_trips_id_method_params() {
    let msg = JSONRPCMessage::request(
        RequestId::Integer(7),
        "tools/call",
        Some(json!({"name": "add", "arguments": {"a": 1, "b": 2}})),
    );

    let encoded = serde_json::to_string(&msg).expect("must serialize");
    let decoded: JSONRPCMessage = serde_json::from_str(&encoded).expect("must deserialize");
    assert_eq!(decoded, msg);

    let JSONRPCMessage::Request(req) = decoded else {
        unreachable!()
    };
    assert_eq!(req.jsonrpc, JSONRPC_VERSION);
    assert_eq!(req.id, RequestId::Integer(7));
    assert_eq!(req.method, "tools/call");
}

#[test]
fn string_ids_are_preserved() {
    let raw = r#"{"jsonrpc":"2.0","id":"req-1","result":{"pong":true}}"#;
    let msg: JSONRPCMessage = serde_json::from_str(raw).expect("must deserialize");
    let JSONRPCMessage::Response(resp) = msg else {
        unreachable!()
    };
    assert_eq!(resp.id, RequestId::String("req-1".to_string()));
    assert_eq!(resp.result, json!({"pong": true}));
}

#[test]
fn notification_has_no_id() {
    let msg = JSONRPCMessage::notification("notifications/disconnected", None);
    let encoded = serde_json::to_value(&msg).expect("must serialize");
    assert_eq!(
        encoded,
        json!({"jsonrpc": "2.0", "method": "notifications/disconnected"})
    );

    let decoded: JSONRPCMessage = serde_json::from_value(encoded).expect("must deserialize");
    assert!(matches!(decoded, JSONRPCMessage::Notification(_)));
}

#[test]
fn error_variant_wins_over_response() {
    let raw = r#"{
        "jsonrpc": "2.0",
        "id": 3,
        "error": { "code": -32001, "message": "tool not found" }
    }"#;
    let msg: JSONRPCMessage = serde_json::from_str(raw).expect("must deserialize");
    let JSONRPCMessage::Error(err) = msg else {
        unreachable!()
    };
    assert_eq!(err.error.code, mcp_types::error_codes::TOOL_NOT_FOUND);
    assert_eq!(err.error.message, "tool not found");
    assert_eq!(err.error.data, None);
}

#[test]
fn empty_payload_is_not_a_message() {
    assert!(serde_json::from_str::<JSONRPCMessage>("").is_err());
}
