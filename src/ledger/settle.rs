/// Settlement
///
/// Net balances and min-cash-flow transfers. Pure functions over cents so
/// they can be tested without a database.

use std::collections::HashMap;

use super::error::{LedgerError, LedgerResult};
use super::money::{checked_add, split_cents};
use super::Expense;

/// One member's net position: positive is owed money, negative owes money.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetBalance {
    pub member: String,
    pub cents: i64,
}

/// Debtor `from` pays creditor `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub cents: i64,
}

/// Net balance per member, ordered by first appearance across `expenses`.
///
/// The payer is credited the full amount and each participant is debited
/// their share. Balances always sum to zero.
///
/// # Errors
/// `InvalidInput` when a running balance would leave the i64 range. Every
/// balance is kept strictly above `i64::MIN` so it can be negated.
pub fn net_balances<'a>(expenses: impl IntoIterator<Item = &'a Expense>) -> LedgerResult<Vec<NetBalance>> {
    let mut order: Vec<NetBalance> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut credit = |member: &str, cents: i64| -> LedgerResult<()> {
        let slot = *index.entry(member.to_string()).or_insert_with(|| {
            order.push(NetBalance { member: member.to_string(), cents: 0 });
            order.len() - 1
        });
        let updated = checked_add(order[slot].cents, cents)?;
        if updated == i64::MIN {
            return Err(LedgerError::invalid("amounts exceed the supported range"));
        }
        order[slot].cents = updated;
        Ok(())
    };

    for expense in expenses {
        credit(&expense.payer, expense.amount_cents)?;
        let shares = split_cents(expense.amount_cents, expense.participants.len());
        for (participant, share) in expense.participants.iter().zip(shares) {
            let debit = share
                .checked_neg()
                .ok_or_else(|| LedgerError::invalid("amounts exceed the supported range"))?;
            credit(participant, debit)?;
        }
    }

    Ok(order)
}

/// Greedy min-cash-flow settlement.
///
/// Largest debtor pays largest creditor until one side is cleared. Ties keep
/// the input order.
pub fn settle(balances: &[NetBalance]) -> Vec<Transfer> {
    let mut creditors: Vec<(&str, i64)> = balances
        .iter()
        .filter(|b| b.cents > 0)
        .map(|b| (b.member.as_str(), b.cents))
        .collect();
    let mut debtors: Vec<(&str, i64)> = balances
        .iter()
        .filter(|b| b.cents < 0)
        .map(|b| (b.member.as_str(), -b.cents))
        .collect();
    creditors.sort_by(|a, b| b.1.cmp(&a.1));
    debtors.sort_by(|a, b| b.1.cmp(&a.1));

    let mut transfers = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < debtors.len() && j < creditors.len() {
        let amount = debtors[i].1.min(creditors[j].1);
        if amount > 0 {
            transfers.push(Transfer {
                from: debtors[i].0.to_string(),
                to: creditors[j].0.to_string(),
                cents: amount,
            });
        }
        debtors[i].1 -= amount;
        creditors[j].1 -= amount;
        if debtors[i].1 == 0 {
            i += 1;
        }
        if creditors[j].1 == 0 {
            j += 1;
        }
    }

    transfers
}
