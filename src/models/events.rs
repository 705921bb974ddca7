use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Check-in freshness, derived on every evaluation and never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Ok,
    InitialSyncOverdue,
    CheckinStale,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Ok => "ok",
            AlertState::InitialSyncOverdue => "initial_sync_overdue",
            AlertState::CheckinStale => "checkin_stale",
        }
    }

    pub fn is_stale(&self) -> bool {
        !matches!(self, AlertState::Ok)
    }
}

/// Snapshot pushed to observers after every monitor evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Evaluation counter for this monitor lifecycle, starting at 1.
    pub sequence: u64,
    pub state: AlertState,
    pub is_stale: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub message: String,
}
