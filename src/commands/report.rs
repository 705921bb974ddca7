use std::sync::Arc;

use crate::collector::Collector;
use crate::db::LastSuccessStore;
use crate::models::{DeviceIdentity, DeviceReport};
use crate::scheduler::MonitorHandle;
use crate::utils::{format_timestamp, AppResult, Clock};

/// Sends the device check-in and records it as the last successful send.
pub struct ReportClient {
    collector: Arc<dyn Collector>,
    store: Arc<dyn LastSuccessStore>,
    clock: Arc<dyn Clock>,
    monitor: Option<MonitorHandle>,
}

impl ReportClient {
    pub fn new(
        collector: Arc<dyn Collector>,
        store: Arc<dyn LastSuccessStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            collector,
            store,
            clock,
            monitor: None,
        }
    }

    /// Re-evaluate this monitor after every successful check-in.
    pub fn with_monitor(mut self, monitor: MonitorHandle) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn build_report(&self, identity: &DeviceIdentity) -> DeviceReport {
        DeviceReport {
            device_name: identity.device_name.clone(),
            ip_address: identity.ip_address.clone(),
            last_reboot: format_timestamp(&self.clock.last_reboot()),
        }
    }

    /// One check-in attempt. Failures are returned after logging and leave
    /// the last-success record untouched; nothing is retried.
    pub async fn report(&self, identity: &DeviceIdentity) -> AppResult<()> {
        let report = self.build_report(identity);
        log::info!(
            "Reporting device {} ({}), last reboot {}",
            report.device_name,
            report.ip_address,
            report.last_reboot
        );

        let body = match self.collector.save_device(&report).await {
            Ok(body) => body,
            Err(e) => {
                log::error!("Device check-in failed: {}", e);
                return Err(e);
            }
        };
        log::info!("Check-in accepted: {}", body.trim());

        let now = self.clock.now();
        if let Err(e) = self.store.set(now) {
            log::warn!("Check-in succeeded but could not be recorded: {}", e);
        }
        if let Some(monitor) = &self.monitor {
            monitor.re_evaluate();
        }
        Ok(())
    }
}
