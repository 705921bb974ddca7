use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::AlertState;
use crate::utils::{format_last_sync, format_timestamp};

pub const STATUS_TITLE: &str = "POS usage monitoring";
pub const OVERDUE_ALERT_TITLE: &str = "Device restart notice";
pub const STALE_ALERT_TITLE: &str = "POS restart warning";

/// Classify check-in freshness. Exactly at the threshold is still fresh.
///
/// A last-success timestamp in the future (clock moved backwards) counts as
/// fresh.
pub fn evaluate(
    last_success: Option<DateTime<Utc>>,
    service_start: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> AlertState {
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
    match last_success {
        None if now - service_start > threshold => AlertState::InitialSyncOverdue,
        None => AlertState::Ok,
        Some(last) if now - last > threshold => AlertState::CheckinStale,
        Some(_) => AlertState::Ok,
    }
}

/// Operator-facing text for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Status event message.
    pub message: String,
    /// Always-on indicator text.
    pub status_text: String,
    /// Title of the high-visibility alert, for stale states only.
    pub alert_title: Option<&'static str>,
}

pub fn render(
    state: AlertState,
    last_success: Option<DateTime<Utc>>,
    last_reboot: DateTime<Utc>,
    threshold: Duration,
) -> Rendered {
    match state {
        AlertState::InitialSyncOverdue => Rendered {
            message: format!(
                "Initial device sync has not occurred after {} min.",
                threshold.as_secs() / 60
            ),
            status_text: "Initial sync overdue. Please check.".to_string(),
            alert_title: Some(OVERDUE_ALERT_TITLE),
        },
        AlertState::CheckinStale => Rendered {
            message: format!("Device has been running since {}.", format_timestamp(&last_reboot)),
            status_text: format!("Check-in stale. Last sync: {}", format_last_sync(last_success)),
            alert_title: Some(STALE_ALERT_TITLE),
        },
        AlertState::Ok => {
            let message = match last_success {
                None => "Checking for device check-in... (initial sync pending)".to_string(),
                Some(_) => format!("Last sync: {}", format_last_sync(last_success)),
            };
            Rendered {
                status_text: message.clone(),
                message,
                alert_title: None,
            }
        }
    }
}
