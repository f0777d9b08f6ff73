/// Tools Module
///
/// This module contains all MCP tool implementations. Each tool lives in its
/// own module and exports a `register` function that binds the tool to the
/// shared ledger and adds it to the registry during server initialization.

pub mod add_expense;
pub mod balances;
pub mod create_group;
pub mod expenses;
pub mod group;

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::core::error::ToolError;
use crate::core::server::ToolRegistry;
use crate::ledger::Ledger;

/// Register every SplitFast tool, in the order clients will list them.
pub fn register_all(registry: &mut ToolRegistry, ledger: Arc<Ledger>) {
    create_group::register(registry, ledger.clone());
    add_expense::register(registry, ledger.clone());
    balances::register(registry, ledger.clone());
    expenses::register(registry, ledger.clone());
    group::register(registry, ledger);
}

/// Deserialize a tool's arguments object into its typed form.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    Ok(serde_json::from_value(args)?)
}

/// Arguments shared by every tool that operates on an existing group.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub(crate) struct GroupAuth {
    pub group_id: String,
    pub secret: String,
}

/// JSON schema properties for `GroupAuth`.
pub(crate) fn group_auth_properties() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "group_id".to_string(),
        json!({ "type": "string", "description": "Group id returned by create_group" }),
    );
    properties.insert(
        "secret".to_string(),
        json!({ "type": "string", "description": "Group secret returned by create_group" }),
    );
    properties
}

/// Input schema for tools that take only `group_id` and `secret`.
pub(crate) fn group_auth_schema() -> Value {
    json!({
        "type": "object",
        "properties": group_auth_properties(),
        "required": ["group_id", "secret"],
        "additionalProperties": false
    })
}
