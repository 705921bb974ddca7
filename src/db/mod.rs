pub mod last_success;
pub mod migrations;
pub mod settings_repo;

pub use last_success::{LastSuccessStore, SqliteLastSuccessStore};

use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::utils::AppResult;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn new(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let mut db = Self { conn };
        migrations::run_migrations(&mut db)?;
        Ok(db)
    }
}

/// Default database location under the platform data directory.
pub fn default_db_path() -> PathBuf {
    agent_data_dir().join("pos-agent.db")
}

pub fn agent_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("pos-agent")
}
