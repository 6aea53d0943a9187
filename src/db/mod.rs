pub mod bootstrap;
pub mod models;
mod seed;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;

use crate::config::DatabaseConfig;
use crate::error::AppResult;
use crate::state::DbPool;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    (
        "002_lookup_indexes",
        include_str!("../../migrations/002_lookup_indexes.sql"),
    ),
];

/// Tables owned by the application, children before parents.
pub const TABLES: &[&str] = &[
    "attendance",
    "notifications",
    "students",
    "teachers",
    "classes",
    "users",
];

pub fn create_pool(db_path: &Path, settings: &DatabaseConfig) -> anyhow::Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let busy_timeout = settings.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
        conn.execute_batch(&format!(
            "
            PRAGMA busy_timeout = {busy_timeout};
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "
        ))
    });
    let pool = Pool::builder()
        .max_size(settings.pool_size.max(1))
        .build(manager)?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> AppResult<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    apply_migrations(&tx)?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn apply_migrations(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::debug!("Database migrations complete");
    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> AppResult<bool> {
    let exists = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Live column names for `table`, read from the catalog. Empty if the table
/// does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map(params![table], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(columns)
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    Ok(table_columns(conn, table)?
        .iter()
        .any(|c| c.eq_ignore_ascii_case(column)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool() -> (DbPool, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = create_pool(&tmp.path().join("test.db"), &DatabaseConfig::default()).unwrap();
        (pool, tmp)
    }

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path, &DatabaseConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        assert!(db_path.exists());
    }

    #[test]
    fn every_connection_enforces_foreign_keys() {
        let (pool, _tmp) = test_pool();
        let conn = pool.get().unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);
    }

    #[test]
    fn migrations_create_all_tables() {
        let (pool, _tmp) = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        for table in TABLES {
            assert!(table_exists(&conn, table).unwrap(), "missing {table}");
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn migrations_are_idempotent() {
        let (pool, _tmp) = test_pool();
        run_migrations(&pool).unwrap();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn table_columns_reads_catalog() {
        let (pool, _tmp) = test_pool();
        run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();

        let columns = table_columns(&conn, "students").unwrap();
        for expected in ["middle_name", "department", "class_id", "user_id"] {
            assert!(columns.iter().any(|c| c == expected), "missing {expected}");
        }
        assert!(table_columns(&conn, "no_such_table").unwrap().is_empty());
        assert!(table_has_column(&conn, "users", "EMAIL").unwrap());
    }

    #[test]
    fn attendance_rows_need_an_existing_student() {
        let (pool, _tmp) = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO attendance (student_id, date, status) VALUES (?1, ?2, ?3)",
            params![999, "2024-01-15", "PRESENT"],
        );
        assert!(result.is_err());
    }
}
