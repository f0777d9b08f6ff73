/// balances Tool
///
/// Returns the min-cash-flow transfers that settle a group: each entry says
/// who pays whom how much.

use std::sync::Arc;

use serde_json::{Value, json};

use super::{GroupAuth, group_auth_schema, parse_args};
use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::ledger::{Ledger, Transfer, money};

pub(crate) fn transfer_json(transfer: &Transfer) -> Value {
    json!({
        "from": transfer.from,
        "to": transfer.to,
        "amount": money::to_amount(transfer.cents)
    })
}

/// Register the `balances` tool.
///
/// # Arguments
/// * `registry` - Registry to add the tool to
/// * `ledger` - Ledger the settlement is computed from
pub fn register(registry: &mut ToolRegistry, ledger: Arc<Ledger>) {
    let tool = MCPTool {
        name: "balances".to_string(),
        description: "Return min-cash-flow settlement transfers.".to_string(),
        input_schema: group_auth_schema(),
    };

    // Transfers come back in settlement order, amounts converted from cents
    let handler: ToolHandler = Box::new(move |args: Value| {
        let auth: GroupAuth = parse_args(args)?;
        let transfers = ledger.balances(&auth.group_id, &auth.secret)?;
        Ok(json!({
            "transfers": transfers.iter().map(transfer_json).collect::<Vec<_>>()
        }))
    });

    registry.register(tool, handler);
}
