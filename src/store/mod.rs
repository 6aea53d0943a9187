//! Entity services. Each function checks a connection out of the pool for the
//! duration of one operation; multi-statement writes run in a transaction.

pub mod attendance;
pub mod classes;
pub mod notifications;
pub mod students;
pub mod teachers;
pub mod users;

use serde::Serialize;

/// Per-item result of a batch operation that does not abort on the first
/// failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )
    }
}

/// Trim and drop empty strings so optional text columns store NULL.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::Config;
    use crate::db;
    use crate::state::DbPool;
    use tempfile::TempDir;

    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.auth.bcrypt_cost = crate::auth::password::MIN_COST;
        config.seed.sample_data = false;
        config
    }

    /// Migrated, empty store.
    pub fn empty_pool() -> (DbPool, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config = test_config();
        let pool = db::create_pool(&tmp.path().join("test.db"), &config.database).unwrap();
        db::run_migrations(&pool).unwrap();
        (pool, tmp)
    }
}
