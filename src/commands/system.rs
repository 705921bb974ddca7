use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::LastSuccessStore;
use crate::models::{AgentSettings, AlertState};
use crate::platform::device_info::{format_uptime, uptime_info};
use crate::scheduler::staleness;
use crate::utils::{format_timestamp, Clock};

// ---------------------------------------------------------------------------
// Uptime
// ---------------------------------------------------------------------------

/// Operator-facing uptime summary, one fact per line.
pub fn uptime_report(clock: &dyn Clock, settings: &AgentSettings) -> String {
    let info = uptime_info(clock, settings.suggested_restart_hours);
    format!(
        "Device uptime: {}\nLast reboot: {}\nSuggested restart interval: {} hours\nNext suggested restart: {}",
        format_uptime(info.uptime),
        format_timestamp(&info.last_reboot),
        info.suggested_interval.as_secs() / 3600,
        format_timestamp(&info.next_suggested_reboot),
    )
}

// ---------------------------------------------------------------------------
// Check-in status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: AlertState,
    pub is_stale: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub message: String,
}

/// One-off evaluation outside the running service. The service is assumed to
/// have started at boot, so the initial-sync grace period counts from the
/// last reboot.
pub fn status_snapshot(
    store: &dyn LastSuccessStore,
    clock: &dyn Clock,
    settings: &AgentSettings,
) -> StatusSnapshot {
    let last_success = store.get();
    let last_reboot = clock.last_reboot();
    let threshold = settings.condition_duration();
    let state = staleness::evaluate(last_success, last_reboot, clock.now(), threshold);
    let rendered = staleness::render(state, last_success, last_reboot, threshold);
    StatusSnapshot {
        state,
        is_stale: state.is_stale(),
        last_sync_time: last_success,
        message: rendered.message,
    }
}
