//! Queue schema migrations, embedded and applied in version order.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: "CREATE TABLE IF NOT EXISTS jobs (
                queue_type    TEXT    NOT NULL,
                id            INTEGER NOT NULL,
                state         TEXT    NOT NULL,
                payload       TEXT    NOT NULL,
                progress      INTEGER NOT NULL DEFAULT 0,
                result        TEXT,
                failed_reason TEXT,
                delay_until   TEXT,
                created_at    TEXT    NOT NULL,
                started_at    TEXT,
                finished_at   TEXT,
                PRIMARY KEY (queue_type, id)
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_queue_state ON jobs (queue_type, state, id);",
    },
    Migration {
        version: 2,
        description: "create_queue_sequences_table",
        sql: "CREATE TABLE IF NOT EXISTS queue_sequences (
                queue_type TEXT    PRIMARY KEY,
                last_id    INTEGER NOT NULL
            );",
    },
];

/// Applies every migration newer than the recorded version. Each migration
/// commits together with its `_migrations` row, so a failure leaves the
/// database at the previous version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT    NOT NULL,
            applied_at  TEXT    NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT IFNULL(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        log::info!(
            "Applying queue schema v{} ({})",
            migration.version,
            migration.description
        );
        apply(conn, migration).map_err(|e| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        params![migration.version, migration.description],
    )?;
    tx.commit()
}

pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT IFNULL(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}
