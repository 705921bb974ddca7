use chrono::{DateTime, Utc};
use std::time::Duration;

/// Wall-clock and uptime source. The monitor and the report client read time
/// only through this so evaluations can be replayed deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Time elapsed since the device booted.
    fn uptime(&self) -> Duration;

    /// Estimated boot time: `now - uptime`. Drifts when the wall clock is
    /// adjusted after boot.
    fn last_reboot(&self) -> DateTime<Utc> {
        let uptime = chrono::Duration::from_std(self.uptime()).unwrap_or(chrono::Duration::zero());
        self.now() - uptime
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn uptime(&self) -> Duration {
        Duration::from_secs(sysinfo::System::uptime())
    }
}
