//! Schema migrations for the membership database.
//!
//! Migrations are embedded with [`include_str!`] and applied in version order,
//! each in its own transaction. `schema_version` records what has run, so the
//! migrator is idempotent.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{RegistryError, Result};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "rooms and memberships",
    sql: include_str!("v001_membership.sql"),
}];

/// Apply pending migrations. Returns how many ran.
pub fn run_migrations(conn: &mut Connection) -> Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;
    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    let mut applied = 0;
    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied, skipping");
            continue;
        }
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            RegistryError::Migration(format!("v{:03} failed: {e}", migration.version))
        })?;
        let _ = tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;
        tx.commit()?;
        applied += 1;
    }
    Ok(applied)
}
