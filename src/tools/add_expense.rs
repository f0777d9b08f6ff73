/// add_expense Tool
///
/// Records an expense paid by one member and split evenly among the listed
/// participants. Amounts are decimal currency units and are stored as cents.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use super::{group_auth_properties, parse_args};
use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::ledger::{Ledger, NewExpense};

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct AddExpenseArgs {
    group_id: String,
    secret: String,
    payer: String,
    amount: f64,
    participants: Vec<String>,
    #[serde(default)]
    note: String,
}

/// Register the `add_expense` tool.
///
/// # Arguments
/// * `registry` - Registry to add the tool to
/// * `ledger` - Ledger the expense is recorded in
pub fn register(registry: &mut ToolRegistry, ledger: Arc<Ledger>) {
    let mut properties = group_auth_properties();
    if let Value::Object(expense_fields) = json!({
        "payer": {
            "type": "string",
            "description": "Member who paid"
        },
        "amount": {
            "type": "number",
            "exclusiveMinimum": 0,
            "description": "Total amount paid, e.g. 42.50"
        },
        "participants": {
            "type": "array",
            "items": { "type": "string" },
            "minItems": 1,
            "description": "Members sharing the expense evenly (may include the payer)"
        },
        "note": {
            "type": "string",
            "description": "Optional description",
            "default": ""
        }
    }) {
        properties.extend(expense_fields);
    }

    let tool = MCPTool {
        name: "add_expense".to_string(),
        description: "Record an expense split among participants.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": ["group_id", "secret", "payer", "amount", "participants"],
            "additionalProperties": false
        }),
    };

    // Amount validation, membership checks and the split happen in the ledger
    let handler: ToolHandler = Box::new(move |args: Value| {
        let args: AddExpenseArgs = parse_args(args)?;
        let expense_id = ledger.add_expense(
            &args.group_id,
            &args.secret,
            NewExpense {
                payer: args.payer,
                amount: args.amount,
                participants: args.participants,
                note: args.note,
            },
        )?;
        Ok(json!({ "expense_id": expense_id }))
    });

    registry.register(tool, handler);
}
