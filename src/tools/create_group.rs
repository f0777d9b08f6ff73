/// create_group Tool
///
/// Creates a group and hands back its id plus the secret that authorizes
/// every later call. The secret is shown exactly once.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_args;
use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::ledger::Ledger;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct CreateGroupArgs {
    name: String,
    members: Vec<String>,
}

/// Register the `create_group` tool.
///
/// # Arguments
/// * `registry` - Registry to add the tool to
/// * `ledger` - Ledger the new group is written to
///
/// The generated secret is returned once and only its hash is stored.
pub fn register(registry: &mut ToolRegistry, ledger: Arc<Ledger>) {
    let tool = MCPTool {
        name: "create_group".to_string(),
        description: "Create a group and return {group_id, secret} to share privately.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Display name of the group"
                },
                "members": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "Member names; payers and participants must come from this list"
                }
            },
            "required": ["name", "members"],
            "additionalProperties": false
        }),
    };

    // Unknown fields are rejected by CreateGroupArgs before touching the ledger
    let handler: ToolHandler = Box::new(move |args: Value| {
        let args: CreateGroupArgs = parse_args(args)?;
        let credentials = ledger.create_group(&args.name, &args.members)?;
        Ok(json!({
            "group_id": credentials.group_id,
            "secret": credentials.secret
        }))
    });

    registry.register(tool, handler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_fresh_credentials() {
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let mut registry = ToolRegistry::new();
        register(&mut registry, ledger.clone());

        let handler = &registry.handlers["create_group"];
        let first = handler(json!({ "name": "Flat", "members": ["ann", "bo"] })).unwrap();
        let second = handler(json!({ "name": "Flat", "members": ["ann", "bo"] })).unwrap();
        assert_ne!(first["group_id"], second["group_id"]);
        assert_ne!(first["secret"], second["secret"]);

        let summary = ledger
            .group_summary(first["group_id"].as_str().unwrap(), first["secret"].as_str().unwrap())
            .unwrap();
        assert_eq!(summary.members, ["ann", "bo"]);
    }

    #[test]
    fn rejects_malformed_arguments() {
        let mut registry = ToolRegistry::new();
        register(&mut registry, Arc::new(Ledger::open_in_memory().unwrap()));
        let handler = &registry.handlers["create_group"];

        assert!(handler(json!({ "name": "Flat" })).is_err());
        assert!(handler(json!({ "name": "Flat", "members": "ann" })).is_err());
        assert!(handler(json!({ "name": "Flat", "members": [], "extra": 1 })).is_err());
        assert!(handler(json!({ "name": "Flat", "members": [] })).is_err());
    }
}
