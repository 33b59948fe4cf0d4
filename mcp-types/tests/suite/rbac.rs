use std::collections::BTreeMap;

use mcp_types::McpRbac;
use mcp_types::RbacRole;
use mcp_types::RbacScope;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn scope_serializes_all_as_literal() {
    let rbac = McpRbac {
        roles: BTreeMap::from([(
            "admin".to_string(),
            RbacRole {
                allowed_methods: vec!["tools/call".to_string()],
                allowed_tools: RbacScope::All,
                allowed_resources: RbacScope::List(vec!["file://a".to_string()]),
            },
        )]),
    };

    assert_eq!(
        serde_json::to_value(&rbac).expect("must serialize"),
        json!({
            "roles": {
                "admin": {
                    "allowedMethods": ["tools/call"],
                    "allowedTools": "all",
                    "allowedResources": ["file://a"]
                }
            }
        })
    );
}

#[test]
fn scope_parses_both_shapes() {
    let role: RbacRole = serde_json::from_value(json!({
        "allowedMethods": [],
        "allowedTools": ["add", "sub"],
        "allowedResources": "all"
    }))
    .expect("must deserialize");

    assert_eq!(
        role.allowed_tools,
        RbacScope::List(vec!["add".to_string(), "sub".to_string()])
    );
    assert_eq!(role.allowed_resources, RbacScope::All);
}

#[test]
fn scope_rejects_other_strings() {
    assert!(serde_json::from_value::<RbacScope>(json!("everything")).is_err());
    assert!(serde_json::from_value::<RbacScope>(json!(42)).is_err());
}
