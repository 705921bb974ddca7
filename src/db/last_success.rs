use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::utils::{format_last_sync, from_epoch_millis, AppError, AppResult};

const LAST_SUCCESS_KEY: &str = "last_successful_send";

/// Durable record of the last successful check-in.
///
/// Reads never fail: a storage error is logged and reads as "never reported",
/// which at worst raises an alert early rather than hiding a stale terminal.
pub trait LastSuccessStore: Send + Sync {
    fn get(&self) -> Option<DateTime<Utc>>;
    fn set(&self, ts: DateTime<Utc>) -> AppResult<()>;
}

/// SQLite-backed store sharing the agent database.
///
/// The connection sits behind a blocking mutex: reads happen once per monitor
/// tick and the lock is never held across an await.
pub struct SqliteLastSuccessStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteLastSuccessStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    fn read_millis(&self) -> AppResult<Option<i64>> {
        let db = self
            .db
            .lock()
            .map_err(|_| AppError::Custom("database lock poisoned".into()))?;
        let raw = db.get_setting(LAST_SUCCESS_KEY)?;
        match raw {
            Some(v) => v
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|e| AppError::Custom(format!("corrupt {} value '{}': {}", LAST_SUCCESS_KEY, v, e))),
            None => Ok(None),
        }
    }
}

impl LastSuccessStore for SqliteLastSuccessStore {
    fn get(&self) -> Option<DateTime<Utc>> {
        match self.read_millis() {
            Ok(millis) => millis.and_then(from_epoch_millis),
            Err(e) => {
                log::warn!("Last-success read failed, treating as never reported: {}", e);
                None
            }
        }
    }

    fn set(&self, ts: DateTime<Utc>) -> AppResult<()> {
        let db = self
            .db
            .lock()
            .map_err(|_| AppError::Custom("database lock poisoned".into()))?;
        db.put_setting(LAST_SUCCESS_KEY, &ts.timestamp_millis().to_string())?;
        log::debug!("Saved last successful send: {}", format_last_sync(Some(ts)));
        Ok(())
    }
}
