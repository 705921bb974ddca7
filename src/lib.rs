pub mod collector;
pub mod commands;
pub mod db;
pub mod executor;
pub mod models;
pub mod platform;
pub mod scheduler;
pub mod utils;

#[cfg(test)]
pub mod test_support;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use collector::HttpCollector;
use commands::{control, ReportClient};
use db::{Database, SqliteLastSuccessStore};
use executor::{
    CommandInstaller, DownloadCompletions, HttpDownloadService, UpdateCollaborators, UpdateConfig,
    UpdatePipeline,
};
use models::{AgentSettings, DeviceIdentity};
use platform::alerts::LogPresenter;
use platform::device_info;
use platform::permissions::HostPermissionGate;
use scheduler::{StalenessMonitor, StatusBroadcaster};
use utils::{http_client, AppResult, SystemClock};

/// Wired-up agent: database, settings and the production collaborators.
pub struct Agent {
    pub settings: AgentSettings,
    pub db: Arc<Mutex<Database>>,
    pub store: Arc<SqliteLastSuccessStore>,
    pub clock: Arc<SystemClock>,
    pub collector: Arc<HttpCollector>,
    /// Directory holding the database and the install-grant marker.
    pub data_dir: PathBuf,
}

impl Agent {
    pub fn open(db_path: &Path) -> AppResult<Self> {
        let database = Database::new(db_path)?;
        let settings = database.load_agent_settings();
        let db = Arc::new(Mutex::new(database));

        let client = http_client::create_http_client()?;
        let collector = Arc::new(HttpCollector::new(client, &settings));
        let data_dir = db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(db::agent_data_dir);

        log::debug!("Agent opened with database {:?}", db_path);
        Ok(Self {
            settings,
            store: Arc::new(SqliteLastSuccessStore::new(db.clone())),
            db,
            clock: Arc::new(SystemClock),
            collector,
            data_dir,
        })
    }

    pub fn identity(&self) -> DeviceIdentity {
        device_info::discover_identity(&self.settings.collector_base_url)
    }

    pub fn report_client(&self) -> ReportClient {
        ReportClient::new(self.collector.clone(), self.store.clone(), self.clock.clone())
    }

    pub fn permission_gate(&self) -> HostPermissionGate {
        HostPermissionGate::new(self.settings.resolved_download_dir(), &self.data_dir)
    }

    pub fn update_pipeline(&self) -> AppResult<UpdatePipeline> {
        let completions = Arc::new(DownloadCompletions::new());
        let downloads = HttpDownloadService::new(
            http_client::create_download_client()?,
            completions.clone(),
        );
        let installer = CommandInstaller::new(
            self.settings.installer_program.clone(),
            self.settings.installer_args.clone(),
        );
        Ok(UpdatePipeline::new(
            UpdateConfig::from_settings(&self.settings),
            self.identity(),
            UpdateCollaborators {
                collector: self.collector.clone(),
                gate: Arc::new(self.permission_gate()),
                downloads: Arc::new(downloads),
                completions,
                installer: Arc::new(installer),
                clock: self.clock.clone(),
            },
        ))
    }

    /// Run the staleness monitor, check in once, and keep going until Ctrl-C.
    /// Control lines on stdin reach the monitor while it runs.
    pub async fn run_service(&self) -> AppResult<()> {
        let broadcaster = StatusBroadcaster::new();
        let monitor = StalenessMonitor::new(
            &self.settings,
            self.store.clone(),
            Arc::new(LogPresenter),
            broadcaster.clone(),
            self.clock.clone(),
        )
        .start();

        let reporter = self.report_client().with_monitor(monitor.handle());
        // Failure is already logged; the monitor keeps watching.
        let _ = reporter.report(&self.identity()).await;

        let handle = monitor.handle();
        let mut control = control::spawn_stdin_lines();
        let mut control_open = true;
        let mut status = broadcaster.subscribe();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = &mut shutdown => {
                    if let Err(e) = result {
                        log::error!("Failed to listen for Ctrl-C: {}", e);
                    }
                    log::info!("Shutting down");
                    break;
                }
                line = control.recv(), if control_open => match line {
                    Some(line) => {
                        if let Err(e) = control::apply_control_line(&handle, self.clock.as_ref(), &line) {
                            log::warn!("Ignoring control input: {}", e);
                        }
                    }
                    None => {
                        log::debug!("Control input closed");
                        control_open = false;
                    }
                },
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(event) = status.borrow_and_update().as_ref() {
                        log::debug!(
                            "Status #{}: {} (stale: {})",
                            event.sequence,
                            event.message,
                            event.is_stale
                        );
                    }
                }
            }
        }

        monitor.shutdown().await;
        Ok(())
    }
}
