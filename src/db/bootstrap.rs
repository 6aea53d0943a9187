//! Brings an absent or outdated database file into the shape the rest of the
//! application expects.
//!
//! Older deployments created `students` without `middle_name`, `department`
//! and `class_id`, `users` without `created_at`, and no `schema_version`
//! table, so those columns are repaired from the live catalog before the
//! versioned migrations run.
//! Default accounts are only seeded while the `users` table is empty.

use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;

use crate::auth::password::PasswordHash;
use crate::config::Config;
use crate::db::models::Role;
use crate::db::{self, seed, TABLES};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;
use crate::store::users::{self, NewUser};
use crate::tasks::{spawn_blocking_task, BackgroundTask};

/// Columns later versions added to existing tables: (table, name, type,
/// fallback type). `ADD COLUMN` rejects non-constant defaults, so
/// `users.created_at` stays nullable on repaired files.
const OPTIONAL_COLUMNS: &[(&str, &str, &str, &str)] = &[
    ("students", "middle_name", "TEXT", "VARCHAR(50)"),
    ("students", "department", "TEXT", "VARCHAR(100)"),
    (
        "students",
        "class_id",
        "INTEGER REFERENCES classes(id) ON DELETE SET NULL",
        "INTEGER",
    ),
    ("users", "created_at", "TEXT", "VARCHAR(32)"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub repaired_columns: Vec<&'static str>,
    pub seeded: bool,
    pub admin_recreated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// (student_id, user id) for students linked to an account found by email.
    pub linked: Vec<(String, i64)>,
    /// (student_id, username) for accounts created from scratch.
    pub created: Vec<(String, String)>,
}

impl BackfillReport {
    pub fn total(&self) -> usize {
        self.linked.len() + self.created.len()
    }
}

#[derive(Clone)]
pub struct Bootstrapper {
    pool: DbPool,
    bcrypt_cost: u32,
    backfill_password: String,
    sample_data: bool,
}

impl Bootstrapper {
    pub fn new(pool: DbPool, config: &Config) -> Self {
        Self {
            pool,
            bcrypt_cost: config.auth.bcrypt_cost,
            backfill_password: config.auth.backfill_password.clone(),
            sample_data: config.seed.sample_data,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Repair, migrate, then seed an empty store or restore a missing admin.
    pub fn initialize(&self) -> AppResult<InitReport> {
        self.try_initialize()
            .inspect_err(|e| tracing::error!("Database initialization failed: {}", e))
    }

    fn try_initialize(&self) -> AppResult<InitReport> {
        let mut conn = self.pool.get()?;
        // Concurrent initializers serialize on the write lock here.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let repaired_columns = repair_columns(&tx)?;
        db::apply_migrations(&tx)?;

        let user_count: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let mut report = InitReport {
            repaired_columns,
            ..Default::default()
        };
        if user_count == 0 {
            tracing::info!("Empty database, seeding default data");
            seed::seed_defaults(&tx, self.bcrypt_cost, self.sample_data)?;
            report.seeded = true;
        } else {
            report.admin_recreated = seed::ensure_admin(&tx, self.bcrypt_cost)?;
        }
        tx.commit()?;

        tracing::info!(
            seeded = report.seeded,
            admin_recreated = report.admin_recreated,
            "Database ready"
        );
        Ok(report)
    }

    /// Add any optional column an existing table lacks. Returns the names of
    /// the columns added; empty when nothing was missing or the tables do not
    /// exist yet.
    pub fn repair_schema(&self) -> AppResult<Vec<&'static str>> {
        let conn = self.pool.get()?;
        repair_columns(&conn)
    }

    /// Run `initialize` on a worker thread.
    pub fn initialize_in_background(&self) -> BackgroundTask<InitReport> {
        let this = self.clone();
        spawn_blocking_task("initialize", move || this.initialize())
    }

    /// Drop every table and initialize from scratch. Destroys all data.
    pub fn reset_all(&self) -> AppResult<InitReport> {
        {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for table in TABLES.iter().chain(std::iter::once(&"schema_version")) {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
            }
            tx.commit()?;
            tracing::warn!("Dropped all tables");
        }
        self.initialize()
    }

    /// Give every student without a valid `user_id` an account, reusing a
    /// STUDENT account with the same email when it exists. All or nothing.
    pub fn backfill_missing_user_accounts(&self) -> AppResult<BackfillReport> {
        self.try_backfill()
            .inspect_err(|e| tracing::error!("Account backfill rolled back: {}", e))
    }

    fn try_backfill(&self) -> AppResult<BackfillReport> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = BackfillReport::default();

        for orphan in orphaned_students(&tx)? {
            let mut email = orphan.email.as_deref().map(str::trim).filter(|e| !e.is_empty());

            let existing = match email {
                Some(address) => match users::user_by_email(&tx, address)? {
                    Some((user_id, Role::Student)) => Some(user_id),
                    Some((user_id, role)) => {
                        // Email is unique on users, so the new account goes without it.
                        tracing::warn!(
                            student_id = %orphan.student_id,
                            user_id,
                            %role,
                            "Email belongs to a non-student account, not linking"
                        );
                        email = None;
                        None
                    }
                    None => None,
                },
                None => None,
            };
            let user_id = match existing {
                Some(user_id) => {
                    report.linked.push((orphan.student_id.clone(), user_id));
                    user_id
                }
                None => {
                    let base = username_base(&orphan.first_name, &orphan.last_name);
                    let username = unique_username(&tx, &base)?;
                    let hash = PasswordHash::new(&self.backfill_password, self.bcrypt_cost)?;
                    let user_id = users::insert_user(
                        &tx,
                        &NewUser {
                            username: username.clone(),
                            role: Role::Student,
                            first_name: Some(orphan.first_name.clone()),
                            last_name: Some(orphan.last_name.clone()),
                            email: email.map(str::to_string),
                        },
                        &hash,
                    )?;
                    tracing::info!(student_id = %orphan.student_id, %username, "Created student account");
                    report.created.push((orphan.student_id.clone(), username));
                    user_id
                }
            };

            tx.execute(
                "UPDATE students SET user_id = ?1 WHERE id = ?2",
                params![user_id, orphan.id],
            )?;
        }

        tx.commit()?;
        tracing::info!(
            linked = report.linked.len(),
            created = report.created.len(),
            "Account backfill complete"
        );
        Ok(report)
    }

    /// Run the backfill on a worker thread.
    pub fn backfill_in_background(&self) -> BackgroundTask<BackfillReport> {
        let this = self.clone();
        spawn_blocking_task("backfill", move || this.backfill_missing_user_accounts())
    }

    /// Run a full reset on a worker thread.
    pub fn reset_in_background(&self) -> BackgroundTask<InitReport> {
        let this = self.clone();
        spawn_blocking_task("reset", move || this.reset_all())
    }
}

pub(crate) fn repair_columns(conn: &Connection) -> AppResult<Vec<&'static str>> {
    let mut added = Vec::new();
    for &(table, column, column_type, fallback_type) in OPTIONAL_COLUMNS {
        // No table yet: the migrations create it in full.
        let existing = db::table_columns(conn, table)?;
        if existing.is_empty() || existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            continue;
        }
        add_column(conn, table, column, column_type, fallback_type)?;
        added.push(column);
    }
    Ok(added)
}

fn add_column(
    conn: &Connection,
    table: &str,
    column: &str,
    column_type: &str,
    fallback_type: &str,
) -> AppResult<()> {
    let alter =
        |ty: &str| conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {ty}"));

    if let Err(first) = alter(column_type) {
        tracing::warn!(
            table,
            column,
            error = %first,
            "ALTER TABLE rejected, retrying with type {}",
            fallback_type
        );
        alter(fallback_type).map_err(|source| AppError::Schema {
            table: table.to_string(),
            column: column.to_string(),
            source,
        })?;
    }
    tracing::info!("Added column {}.{}", table, column);
    Ok(())
}

struct OrphanStudent {
    id: i64,
    student_id: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
}

/// Students whose `user_id` is NULL, 0 or points at no user.
fn orphaned_students(conn: &Connection) -> AppResult<Vec<OrphanStudent>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.student_id, s.first_name, s.last_name, s.email
         FROM students s
         LEFT JOIN users u ON u.id = s.user_id
         WHERE s.user_id IS NULL OR s.user_id = 0 OR u.id IS NULL
         ORDER BY s.id",
    )?;
    let orphans = stmt
        .query_map([], |row| {
            Ok(OrphanStudent {
                id: row.get(0)?,
                student_id: row.get(1)?,
                first_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                last_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                email: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(orphans)
}

/// First initial plus last name, lowercased, letters and digits only.
pub fn username_base(first_name: &str, last_name: &str) -> String {
    let initial = first_name.chars().find(|c| c.is_alphanumeric());
    let base: String = initial
        .into_iter()
        .chain(last_name.chars())
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    if base.is_empty() {
        "student".to_string()
    } else {
        base
    }
}

/// `base`, then `base1`, `base2`, ... until one is free.
pub(crate) fn unique_username(conn: &Connection, base: &str) -> AppResult<String> {
    if !users::username_taken(conn, base)? {
        return Ok(base.to_string());
    }
    let mut n: u32 = 1;
    loop {
        let candidate = format!("{base}{n}");
        if !users::username_taken(conn, &candidate)? {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{empty_pool, test_config};

    #[test]
    fn username_base_uses_initial_and_surname() {
        assert_eq!(username_base("Jane", "Doe"), "jdoe");
        assert_eq!(username_base("J.", "Doe"), "jdoe");
        assert_eq!(username_base("Mary", "O'Neil-Smith"), "moneilsmith");
        assert_eq!(username_base("", ""), "student");
    }

    #[test]
    fn probe_skips_taken_names() {
        let (pool, _tmp) = empty_pool();
        let conn = pool.get().unwrap();
        for name in ["jdoe", "jdoe1"] {
            conn.execute(
                "INSERT INTO users (username, password, role) VALUES (?1, 'x', 'STUDENT')",
                params![name],
            )
            .unwrap();
        }
        assert_eq!(unique_username(&conn, "jdoe").unwrap(), "jdoe2");
        assert_eq!(unique_username(&conn, "asmith").unwrap(), "asmith");
    }

    #[test]
    fn repair_is_noop_without_students_table() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config();
        let pool = db::create_pool(&tmp.path().join("fresh.db"), &config.database).unwrap();
        let bootstrapper = Bootstrapper::new(pool, &config);
        assert!(bootstrapper.repair_schema().unwrap().is_empty());
    }

    #[test]
    fn fallback_type_is_used_when_primary_is_rejected() {
        let (pool, _tmp) = empty_pool();
        // A NOT NULL column without a default cannot be added to a table; the
        // fallback type string can.
        let conn = pool.get().unwrap();
        conn.execute_batch("DROP TABLE students").unwrap();
        conn.execute_batch(
            "CREATE TABLE students (id INTEGER PRIMARY KEY, student_id TEXT, first_name TEXT,
                                    last_name TEXT, email TEXT, class_name TEXT, user_id INTEGER)",
        )
        .unwrap();
        add_column(&conn, "students", "middle_name", "TEXT NOT NULL", "TEXT").unwrap();
        assert!(db::table_has_column(&conn, "students", "middle_name").unwrap());

        let err = add_column(
            &conn,
            "students",
            "department",
            "TEXT NOT NULL",
            "ALSO NOT NULL",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Schema { .. }));
    }
}
