/// get_group Tool
///
/// Group overview: members, totals and each member's net position
/// (positive means the member is owed money).

use std::sync::Arc;

use serde_json::{Value, json};

use super::{GroupAuth, group_auth_schema, parse_args};
use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::ledger::{GroupSummary, Ledger, money};

fn summary_json(summary: &GroupSummary) -> Value {
    json!({
        "group_id": summary.group_id,
        "name": summary.name,
        "members": summary.members,
        "created_at": summary.created_at,
        "expense_count": summary.expense_count,
        "total_spent": money::to_amount(summary.total_cents),
        "net_balances": summary
            .balances
            .iter()
            .map(|b| json!({ "member": b.member, "net": money::to_amount(b.cents) }))
            .collect::<Vec<_>>()
    })
}

/// Register the `get_group` tool.
///
/// # Arguments
/// * `registry` - Registry to add the tool to
/// * `ledger` - Ledger the group summary is read from
pub fn register(registry: &mut ToolRegistry, ledger: Arc<Ledger>) {
    let tool = MCPTool {
        name: "get_group".to_string(),
        description: "Show a group's members, total spent and each member's net balance.".to_string(),
        input_schema: group_auth_schema(),
    };

    // Wrong secret and unknown group fail the same way inside the ledger
    let handler: ToolHandler = Box::new(move |args: Value| {
        let auth: GroupAuth = parse_args(args)?;
        let summary = ledger.group_summary(&auth.group_id, &auth.secret)?;
        Ok(summary_json(&summary))
    });

    registry.register(tool, handler);
}
