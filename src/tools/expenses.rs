/// list_expenses Tool
///
/// Lists every expense of a group in the order it was recorded.

use std::sync::Arc;

use serde_json::{Value, json};

use super::{GroupAuth, group_auth_schema, parse_args};
use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::ledger::{Expense, Ledger, money};

fn expense_json(expense: &Expense) -> Value {
    json!({
        "expense_id": expense.id,
        "payer": expense.payer,
        "amount": money::to_amount(expense.amount_cents),
        "participants": expense.participants,
        "note": expense.note,
        "ts": expense.ts
    })
}

/// Register the `list_expenses` tool.
pub fn register(registry: &mut ToolRegistry, ledger: Arc<Ledger>) {
    let tool = MCPTool {
        name: "list_expenses".to_string(),
        description: "List all expenses recorded for a group, oldest first.".to_string(),
        input_schema: group_auth_schema(),
    };

    let handler: ToolHandler = Box::new(move |args: Value| {
        let auth: GroupAuth = parse_args(args)?;
        let expenses = ledger.list_expenses(&auth.group_id, &auth.secret)?;
        Ok(json!({
            "expenses": expenses.iter().map(expense_json).collect::<Vec<_>>()
        }))
    });

    registry.register(tool, handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewExpense;

    #[test]
    fn lists_recorded_expenses() {
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let creds = ledger.create_group("Flat", &["ann".to_string(), "bo".to_string()]).unwrap();
        ledger
            .add_expense(
                &creds.group_id,
                &creds.secret,
                NewExpense {
                    payer: "ann".into(),
                    amount: 7.5,
                    participants: vec!["ann".into(), "bo".into()],
                    note: "milk".into(),
                },
            )
            .unwrap();
        let mut registry = ToolRegistry::new();
        register(&mut registry, ledger);

        let result = registry.handlers["list_expenses"](json!({
            "group_id": creds.group_id,
            "secret": creds.secret
        }))
        .unwrap();
        let expenses = result["expenses"].as_array().unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0]["amount"], 7.5);
        assert_eq!(expenses[0]["participants"], json!(["ann", "bo"]));
        assert_eq!(expenses[0]["note"], "milk");
    }
}
