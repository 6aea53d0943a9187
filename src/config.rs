use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "Student attendance store")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Path to the database file
    #[arg(long)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create or upgrade the database and seed it if empty
    Init,
    /// Add missing columns to an older students table
    Repair,
    /// Drop every table and start over with the default data
    Reset {
        /// Confirm that all existing data should be destroyed
        #[arg(long)]
        yes: bool,
    },
    /// Create or link user accounts for students that have none
    Backfill,
    /// Check a username/password pair (password read from ROLLCALL_PASSWORD)
    Login { username: String },
    /// Print the attendance summary for one student
    Report { student_id: String },
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub seed: SeedConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
    pub backfill_password: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SeedConfig {
    pub sample_data: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 8,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
            backfill_password: "Student@123".to_string(),
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self { sample_data: true }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli)?;
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        if let Some(ref db) = cli.db {
            config.database.path = Some(db.clone());
        }
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("rollcall.db"));
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
        match cli.data_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => dirs::home_dir()
                .map(|home| home.join(".rollcall"))
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory")),
        }
    }

    /// Database file location. `load` always fills this in; a bare default
    /// config falls back to a relative `rollcall.db`.
    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("rollcall.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(data_dir: Option<PathBuf>) -> Cli {
        Cli {
            config: None,
            data_dir,
            db: None,
            command: None,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.auth.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.auth.backfill_password, "Student@123");
        assert!(config.seed.sample_data);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli_with(Some(PathBuf::from("/tmp/test-rollcall")));
        assert_eq!(
            Config::data_dir(&cli).unwrap(),
            PathBuf::from("/tmp/test-rollcall")
        );
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = cli_with(Some(tmp.path().to_path_buf()));
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.db_path(), tmp.path().join("rollcall.db"));
        assert_eq!(config.database.pool_size, 8);
    }

    #[test]
    fn db_flag_beats_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cli = cli_with(Some(tmp.path().to_path_buf()));
        cli.db = Some(PathBuf::from("/srv/school/attendance.db"));
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/srv/school/attendance.db"));
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[database]
busy_timeout_ms = 250

[auth]
bcrypt_cost = 4
backfill_password = "Welcome1"

[seed]
sample_data = false
"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(config_path),
            data_dir: Some(tmp.path().to_path_buf()),
            db: None,
            command: None,
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.auth.bcrypt_cost, 4);
        assert_eq!(config.auth.backfill_password, "Welcome1");
        assert!(!config.seed.sample_data);
    }

    #[test]
    fn reset_subcommand_parses_confirmation() {
        let cli = Cli::try_parse_from(["rollcall", "reset", "--yes"]).unwrap();
        assert_eq!(cli.command, Some(Command::Reset { yes: true }));
    }
}
