use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::db::bootstrap::Bootstrapper;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Everything a front end needs to talk to the store.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
}

impl AppState {
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let db = crate::db::create_pool(&config.db_path(), &config.database)?;
        Ok(Self { db, config })
    }

    pub fn bootstrapper(&self) -> Bootstrapper {
        Bootstrapper::new(self.db.clone(), &self.config)
    }
}
