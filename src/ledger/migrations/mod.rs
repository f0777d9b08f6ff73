/// Schema Migrations
///
/// Migrations are applied in order inside one transaction and the applied
/// version is mirrored to `PRAGMA user_version`.
///
/// Databases written by the earlier SplitFast server carry the same tables
/// at `user_version` 0, with member and participant lists stored as
/// comma-joined text. Migration 1 adopts those tables as they are and
/// migration 2 rewrites the lists as JSON arrays.

use rusqlite::{Connection, Transaction, params};

use super::error::{LedgerError, LedgerResult};

struct Migration {
    version: u32,
    sql: &'static str,
    /// Data rewrite run after `sql`, inside the same transaction.
    upgrade: Option<fn(&Transaction<'_>) -> LedgerResult<()>>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_init.sql"),
        upgrade: None,
    },
    Migration {
        version: 2,
        sql: include_str!("0002_json_name_lists.sql"),
        upgrade: Some(convert_comma_lists),
    },
];

/// Latest schema version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Apply all pending migrations on the connection.
pub fn apply_migrations(conn: &mut Connection) -> LedgerResult<()> {
    let current = current_version(conn)?;
    let latest = latest_version();

    if current > latest {
        return Err(LedgerError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        if let Some(upgrade) = migration.upgrade {
            upgrade(&tx)?;
        }
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        tracing::info!(version = migration.version, "applied schema migration");
    }
    tx.commit()?;

    Ok(())
}

pub fn current_version(conn: &Connection) -> LedgerResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

/// Rewrite comma-joined `members` and `participants` values as JSON arrays.
///
/// Values that already parse as JSON string arrays are left alone. Empty
/// names are dropped, matching how the lists were read before.
fn convert_comma_lists(tx: &Transaction<'_>) -> LedgerResult<()> {
    let groups = rewrite_list_column(tx, "groups", "members")?;
    let expenses = rewrite_list_column(tx, "expenses", "participants")?;
    if groups + expenses > 0 {
        tracing::info!(groups, expenses, "converted comma-separated name lists");
    }
    Ok(())
}

fn rewrite_list_column(tx: &Transaction<'_>, table: &str, column: &str) -> LedgerResult<usize> {
    let rows: Vec<(String, Option<String>)> = {
        let mut stmt = tx.prepare(&format!("SELECT id, {column} FROM {table}"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut converted = 0;
    for (id, raw) in rows {
        let raw = raw.unwrap_or_default();
        if serde_json::from_str::<Vec<String>>(&raw).is_ok() {
            continue;
        }
        let names: Vec<&str> = raw.split(',').filter(|name| !name.is_empty()).collect();
        tx.execute(
            &format!("UPDATE {table} SET {column} = ?1 WHERE id = ?2"),
            params![serde_json::to_string(&names)?, id],
        )?;
        converted += 1;
    }
    Ok(converted)
}
