/// Which alert surface a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// Always-on, low-priority status indicator.
    Status,
    /// High-visibility alert for an overdue or stale check-in.
    StaleCheckin,
}

/// Presentation sink for monitor alerts. Implementations must not block.
pub trait AlertPresenter: Send + Sync {
    fn raise(&self, kind: AlertKind, title: &str, message: &str);
    fn clear(&self, kind: AlertKind);
}

/// Presenter for hosts without a notification service: alerts go to the log,
/// where the terminal's log shipper picks them up.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl AlertPresenter for LogPresenter {
    fn raise(&self, kind: AlertKind, title: &str, message: &str) {
        match kind {
            AlertKind::Status => log::info!("[status] {}: {}", title, message),
            AlertKind::StaleCheckin => log::warn!("[ALERT] {}: {}", title, message),
        }
    }

    fn clear(&self, kind: AlertKind) {
        if kind == AlertKind::StaleCheckin {
            log::info!("[ALERT] cleared");
        }
    }
}
