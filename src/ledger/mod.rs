/// Expense Ledger
///
/// SQLite-backed store for groups and their shared expenses. A group is
/// protected by a secret handed out once at creation; only its SHA-256 hash
/// is persisted. All operations serialise on a single connection.
///
/// - error.rs: `LedgerError` and `LedgerResult`
/// - migrations/: schema versioning via `PRAGMA user_version`
/// - money.rs: decimal amount <-> cents conversion and exact splitting
/// - settle.rs: net balances and min-cash-flow transfers

pub mod error;
pub mod migrations;
pub mod money;
pub mod settle;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub use error::{LedgerError, LedgerResult};
pub use settle::{NetBalance, Transfer};

/// Credentials returned once when a group is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCredentials {
    pub group_id: String,
    pub secret: String,
}

/// Input for recording an expense.
#[derive(Debug, Clone, Default)]
pub struct NewExpense {
    pub payer: String,
    /// Decimal amount in currency units.
    pub amount: f64,
    pub participants: Vec<String>,
    pub note: String,
}

/// A stored expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expense {
    pub id: String,
    pub payer: String,
    pub amount_cents: i64,
    pub participants: Vec<String>,
    pub note: String,
    /// Unix seconds.
    pub ts: i64,
}

/// Group overview including every member's net position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub group_id: String,
    pub name: String,
    pub members: Vec<String>,
    pub created_at: i64,
    pub expense_count: usize,
    pub total_cents: i64,
    /// One entry per member in member order, then any non-members that
    /// appear in older expenses.
    pub balances: Vec<NetBalance>,
}

struct GroupRow {
    name: String,
    members: Vec<String>,
    created_at: i64,
}

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) the ledger database at `path` and migrate it.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to open ledger database");
        })?;
        let ledger = Self::bootstrap(conn)?;
        tracing::info!(path = %path.display(), "ledger database ready");
        Ok(ledger)
    }

    /// Open a private in-memory ledger.
    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(mut conn: Connection) -> LedgerResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::apply_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Acquire the connection. A poisoned lock reports `Unavailable`.
    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::Unavailable)
    }

    /// Create a group and return its id plus the secret to share privately.
    ///
    /// # Arguments
    /// * `name` - Display name, trimmed; must not be empty
    /// * `members` - Member names; trimmed, empties and duplicates dropped
    ///
    /// # Returns
    /// Fresh `GroupCredentials`. Only the SHA-256 hash of the secret is
    /// stored, so the secret cannot be recovered later.
    pub fn create_group(&self, name: &str, members: &[String]) -> LedgerResult<GroupCredentials> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::invalid("group name must not be empty"));
        }
        let members = normalize_names(members);
        if members.is_empty() {
            return Err(LedgerError::invalid("a group needs at least one member"));
        }

        let credentials = GroupCredentials {
            group_id: Uuid::new_v4().to_string(),
            secret: Uuid::new_v4().to_string(),
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO groups (id, name, members, secret_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                credentials.group_id,
                name,
                serde_json::to_string(&members)?,
                hash_secret(&credentials.secret),
                unix_now(),
            ],
        )?;

        tracing::info!(group_id = %credentials.group_id, members = members.len(), "group created");
        Ok(credentials)
    }

    /// Record an expense split among participants.
    ///
    /// # Arguments
    /// * `group_id` - Group id returned by `create_group`
    /// * `secret` - Group secret returned by `create_group`
    /// * `expense` - Payer, decimal amount, participants and note
    ///
    /// # Returns
    /// The new expense id. Fails with `InvalidInput` when the amount rounds
    /// to less than one cent, when payer or a participant is not a member, or
    /// when the group total would pass `money::MAX_CENTS`.
    pub fn add_expense(&self, group_id: &str, secret: &str, expense: NewExpense) -> LedgerResult<String> {
        let conn = self.lock()?;
        let group = authenticate(&conn, group_id, secret)?;

        let amount_cents = money::to_cents(expense.amount)?;
        if amount_cents <= 0 {
            return Err(LedgerError::invalid("amount must be at least 0.01"));
        }
        let payer = expense.payer.trim();
        if !group.members.iter().any(|m| m == payer) {
            return Err(LedgerError::invalid(format!("payer '{payer}' is not a member of this group")));
        }
        let participants = normalize_names(&expense.participants);
        if participants.is_empty() {
            return Err(LedgerError::invalid("an expense needs at least one participant"));
        }
        if let Some(outsider) = participants.iter().find(|p| !group.members.contains(*p)) {
            return Err(LedgerError::invalid(format!(
                "participant '{outsider}' is not a member of this group"
            )));
        }

        // Bounding the group total bounds every member's net balance too
        let spent: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM expenses WHERE group_id = ?1",
            params![group_id],
            |row| row.get(0),
        )?;
        if money::checked_add(spent, amount_cents)? > money::MAX_CENTS {
            return Err(LedgerError::invalid(format!(
                "group total would exceed {}",
                money::to_amount(money::MAX_CENTS)
            )));
        }

        let expense_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO expenses (id, group_id, payer, amount_cents, participants, note, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                expense_id,
                group_id,
                payer,
                amount_cents,
                serde_json::to_string(&participants)?,
                expense.note,
                unix_now(),
            ],
        )?;

        tracing::info!(group_id, expense_id = %expense_id, amount_cents, "expense recorded");
        Ok(expense_id)
    }

    /// Min-cash-flow transfers that settle the group.
    ///
    /// # Returns
    /// Transfers in settlement order; empty when everyone is square.
    pub fn balances(&self, group_id: &str, secret: &str) -> LedgerResult<Vec<Transfer>> {
        let conn = self.lock()?;
        authenticate(&conn, group_id, secret)?;
        let expenses = load_expenses(&conn, group_id)?;
        Ok(settle::settle(&settle::net_balances(&expenses)?))
    }

    /// All expenses of the group in the order they were recorded.
    pub fn list_expenses(&self, group_id: &str, secret: &str) -> LedgerResult<Vec<Expense>> {
        let conn = self.lock()?;
        authenticate(&conn, group_id, secret)?;
        load_expenses(&conn, group_id)
    }

    /// Overview of a group: members, expense count, total spent and the net
    /// balance of every member.
    ///
    /// # Arguments
    /// * `group_id` - Group id returned by `create_group`
    /// * `secret` - Group secret returned by `create_group`
    ///
    /// # Returns
    /// A `GroupSummary` whose balances list every member in member order,
    /// followed by any non-member found in expenses imported from older
    /// databases. Fails with `Unauthorized` on bad credentials.
    pub fn group_summary(&self, group_id: &str, secret: &str) -> LedgerResult<GroupSummary> {
        let conn = self.lock()?;
        let group = authenticate(&conn, group_id, secret)?;
        let expenses = load_expenses(&conn, group_id)?;

        let net = settle::net_balances(&expenses)?;
        let mut balances: Vec<NetBalance> = group
            .members
            .iter()
            .map(|member| NetBalance {
                member: member.clone(),
                cents: net.iter().find(|b| &b.member == member).map_or(0, |b| b.cents),
            })
            .collect();
        balances.extend(net.into_iter().filter(|b| !group.members.contains(&b.member)));

        Ok(GroupSummary {
            group_id: group_id.to_string(),
            name: group.name,
            members: group.members,
            created_at: group.created_at,
            expense_count: expenses.len(),
            total_cents: expenses
                .iter()
                .try_fold(0_i64, |total, e| money::checked_add(total, e.amount_cents))?,
            balances,
        })
    }
}

/// Load the group row if `secret` matches its stored hash.
///
/// Unknown group ids and wrong secrets both yield `Unauthorized`.
fn authenticate(conn: &Connection, group_id: &str, secret: &str) -> LedgerResult<GroupRow> {
    let row = conn
        .query_row(
            "SELECT name, members, secret_hash, created_at FROM groups WHERE id = ?1",
            params![group_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((name, members, secret_hash, created_at)) if secret_hash == hash_secret(secret) => Ok(GroupRow {
            name,
            members: serde_json::from_str(&members)?,
            created_at,
        }),
        _ => {
            tracing::warn!(group_id, "rejected group credentials");
            Err(LedgerError::Unauthorized)
        }
    }
}

/// All expenses of a group, oldest first (ties broken by insertion order).
fn load_expenses(conn: &Connection, group_id: &str) -> LedgerResult<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "SELECT id, payer, amount_cents, participants, note, ts
         FROM expenses
         WHERE group_id = ?1
         ORDER BY ts ASC, rowid ASC",
    )?;
    let mut rows = stmt.query(params![group_id])?;

    let mut expenses = Vec::new();
    while let Some(row) = rows.next()? {
        let participants: String = row.get(3)?;
        expenses.push(Expense {
            id: row.get(0)?,
            payer: row.get(1)?,
            amount_cents: row.get(2)?,
            participants: serde_json::from_str(&participants)?,
            note: row.get(4)?,
            ts: row.get(5)?,
        });
    }
    Ok(expenses)
}

/// Trim, drop empty names and duplicates, keep first-seen order.
fn normalize_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty() && seen.insert(*n))
        .map(str::to_string)
        .collect()
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn trip() -> (Ledger, GroupCredentials) {
        let ledger = Ledger::open_in_memory().unwrap();
        let creds = ledger
            .create_group("Trip", &names(&["alice", "bob", "carol"]))
            .unwrap();
        (ledger, creds)
    }

    fn spend(payer: &str, amount: f64, participants: &[&str]) -> NewExpense {
        NewExpense {
            payer: payer.to_string(),
            amount,
            participants: names(participants),
            note: String::new(),
        }
    }

    #[test]
    fn secret_is_stored_hashed() {
        let (ledger, creds) = trip();
        let conn = ledger.lock().unwrap();
        let stored: String = conn
            .query_row("SELECT secret_hash FROM groups WHERE id = ?1", [&creds.group_id], |r| r.get(0))
            .unwrap();
        assert_ne!(stored, creds.secret);
        assert_eq!(stored, hash_secret(&creds.secret));
        assert_eq!(stored.len(), 64);
    }

    #[test]
    fn wrong_secret_and_unknown_group_look_the_same() {
        let (ledger, creds) = trip();
        let wrong = ledger.balances(&creds.group_id, "nope").unwrap_err();
        let unknown = ledger.balances("no-such-group", &creds.secret).unwrap_err();
        assert!(matches!(wrong, LedgerError::Unauthorized));
        assert!(matches!(unknown, LedgerError::Unauthorized));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[test]
    fn records_expenses_and_settles() {
        let (ledger, creds) = trip();
        ledger
            .add_expense(&creds.group_id, &creds.secret, spend("alice", 90.0, &["alice", "bob", "carol"]))
            .unwrap();
        ledger
            .add_expense(&creds.group_id, &creds.secret, spend("bob", 30.0, &["carol"]))
            .unwrap();

        // alice +60, bob -30+30 = 0, carol -30-30 = -60
        let transfers = ledger.balances(&creds.group_id, &creds.secret).unwrap();
        assert_eq!(
            transfers,
            vec![Transfer { from: "carol".into(), to: "alice".into(), cents: 6000 }]
        );
    }

    #[test]
    fn expenses_are_listed_in_recording_order() {
        let (ledger, creds) = trip();
        let mut note = spend("carol", 12.5, &["alice", "bob"]);
        note.note = "taxi".to_string();
        let first = ledger.add_expense(&creds.group_id, &creds.secret, note).unwrap();
        let second = ledger
            .add_expense(&creds.group_id, &creds.secret, spend("bob", 3.0, &["bob"]))
            .unwrap();

        let listed = ledger.list_expenses(&creds.group_id, &creds.secret).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first);
        assert_eq!(listed[0].amount_cents, 1250);
        assert_eq!(listed[0].note, "taxi");
        assert_eq!(listed[0].participants, names(&["alice", "bob"]));
        assert_eq!(listed[1].id, second);
    }

    #[test]
    fn rejects_invalid_expenses() {
        let (ledger, creds) = trip();
        let attempts = [
            spend("mallory", 10.0, &["alice"]),
            spend("alice", 10.0, &["alice", "mallory"]),
            spend("alice", 10.0, &[]),
            spend("alice", 10.0, &["  ", ""]),
            spend("alice", 0.0, &["bob"]),
            spend("alice", -4.0, &["bob"]),
            spend("alice", 0.004, &["bob"]),
            spend("alice", f64::NAN, &["bob"]),
        ];
        for attempt in attempts {
            let err = ledger
                .add_expense(&creds.group_id, &creds.secret, attempt.clone())
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidInput(_)), "{attempt:?} gave {err:?}");
        }
        assert!(ledger.list_expenses(&creds.group_id, &creds.secret).unwrap().is_empty());
    }

    #[test]
    fn group_creation_normalizes_members() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert!(matches!(
            ledger.create_group("  ", &names(&["a"])),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            ledger.create_group("Flat", &names(&[" ", ""])),
            Err(LedgerError::InvalidInput(_))
        ));

        let creds = ledger
            .create_group(" Flat ", &names(&[" bob", "amy", "bob ", ""]))
            .unwrap();
        let summary = ledger.group_summary(&creds.group_id, &creds.secret).unwrap();
        assert_eq!(summary.name, "Flat");
        assert_eq!(summary.members, names(&["bob", "amy"]));
    }

    #[test]
    fn summary_reports_net_per_member() {
        let (ledger, creds) = trip();
        ledger
            .add_expense(&creds.group_id, &creds.secret, spend("bob", 10.0, &["alice", "bob", "carol"]))
            .unwrap();

        let summary = ledger.group_summary(&creds.group_id, &creds.secret).unwrap();
        assert_eq!(summary.expense_count, 1);
        assert_eq!(summary.total_cents, 1000);
        assert_eq!(
            summary.balances,
            vec![
                NetBalance { member: "alice".into(), cents: -334 },
                NetBalance { member: "bob".into(), cents: 667 },
                NetBalance { member: "carol".into(), cents: -333 },
            ]
        );
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splitfast.db");

        let creds = {
            let ledger = Ledger::open(&path).unwrap();
            let creds = ledger.create_group("Home", &names(&["x", "y"])).unwrap();
            ledger
                .add_expense(&creds.group_id, &creds.secret, spend("x", 8.0, &["y"]))
                .unwrap();
            creds
        };

        let ledger = Ledger::open(&path).unwrap();
        let transfers = ledger.balances(&creds.group_id, &creds.secret).unwrap();
        assert_eq!(transfers, vec![Transfer { from: "y".into(), to: "x".into(), cents: 800 }]);
    }

    #[test]
    fn opens_database_written_by_earlier_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splitfast.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE groups
                   (id TEXT PRIMARY KEY, name TEXT, members TEXT, secret_hash TEXT, created_at INTEGER);
                 CREATE TABLE expenses
                   (id TEXT PRIMARY KEY, group_id TEXT, payer TEXT, amount_cents INTEGER,
                    participants TEXT, note TEXT, ts INTEGER);",
            )
            .unwrap();
            conn.execute(
                "INSERT INTO groups VALUES ('g1', 'Trip', 'alice,bob', ?1, 0)",
                [hash_secret("s")],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO expenses VALUES ('e1', 'g1', 'alice', 1000, 'alice,bob', '', 1)",
                [],
            )
            .unwrap();
        }

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(
            ledger.balances("g1", "s").unwrap(),
            vec![Transfer { from: "bob".into(), to: "alice".into(), cents: 500 }]
        );
        ledger.add_expense("g1", "s", spend("bob", 5.0, &["alice"])).unwrap();
        assert!(ledger.balances("g1", "s").unwrap().is_empty());
        assert_eq!(ledger.group_summary("g1", "s").unwrap().members, names(&["alice", "bob"]));
    }

    #[test]
    fn group_total_is_capped() {
        let (ledger, creds) = trip();
        let max_amount = money::to_amount(money::MAX_CENTS);
        ledger
            .add_expense(&creds.group_id, &creds.secret, spend("alice", max_amount, &["bob"]))
            .unwrap();

        let err = ledger
            .add_expense(&creds.group_id, &creds.secret, spend("alice", 0.01, &["bob"]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)), "{err:?}");

        // the ledger stays usable after the rejection
        let summary = ledger.group_summary(&creds.group_id, &creds.secret).unwrap();
        assert_eq!(summary.total_cents, money::MAX_CENTS);
        assert_eq!(
            ledger.balances(&creds.group_id, &creds.secret).unwrap(),
            vec![Transfer { from: "bob".into(), to: "alice".into(), cents: money::MAX_CENTS }]
        );
    }

    #[test]
    fn oversized_stored_totals_are_errors_not_panics() {
        let (ledger, creds) = trip();
        {
            let conn = ledger.lock().unwrap();
            for i in 0..3 {
                conn.execute(
                    "INSERT INTO expenses (id, group_id, payer, amount_cents, participants, note, ts)
                     VALUES (?1, ?2, 'alice', ?3, '[\"bob\"]', '', 0)",
                    params![format!("big-{i}"), creds.group_id, i64::MAX / 2],
                )
                .unwrap();
            }
        }

        assert!(matches!(
            ledger.balances(&creds.group_id, &creds.secret),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            ledger.group_summary(&creds.group_id, &creds.secret),
            Err(LedgerError::InvalidInput(_))
        ));
        // lock was not poisoned
        assert!(ledger.list_expenses(&creds.group_id, &creds.secret).is_ok());
    }
}
