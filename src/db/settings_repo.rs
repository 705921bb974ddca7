use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::models::AgentSettings;
use crate::utils::AppResult;

const AGENT_SETTINGS_KEY: &str = "agent_settings";

impl Database {
    pub fn get_setting(&self, key: &str) -> AppResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put_setting(&self, key: &str, value: &str) -> AppResult<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            [key, value],
        )?;
        Ok(())
    }

    /// Load provisioned settings, falling back to defaults when the row is
    /// missing or unreadable.
    pub fn load_agent_settings(&self) -> AgentSettings {
        let json = match self.get_setting(AGENT_SETTINGS_KEY) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Settings: failed to read provisioned settings: {}", e);
                None
            }
        };

        match json {
            Some(j) => serde_json::from_str(&j).unwrap_or_else(|e| {
                log::warn!("Settings: ignoring unparsable provisioned settings: {}", e);
                AgentSettings::default()
            }),
            None => AgentSettings::default(),
        }
    }

    pub fn save_agent_settings(&self, settings: &AgentSettings) -> AppResult<()> {
        let json = serde_json::to_string(settings)?;
        self.put_setting(AGENT_SETTINGS_KEY, &json)
    }
}
