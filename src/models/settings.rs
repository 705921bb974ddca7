use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHECK_INTERVAL_MILLIS: u64 = 60 * 1000;
pub const DEFAULT_CONDITION_DURATION_MILLIS: u64 = 5 * 3600 * 1000;
pub const DEFAULT_COLLECTOR_BASE_URL: &str = "http://10.234.202.219:81";
pub const DEFAULT_UPDATE_FILE_NAME: &str = "pos-update.apk";
pub const DEFAULT_SUGGESTED_RESTART_HOURS: u64 = 8;
pub const DEFAULT_ALERT_REPEAT_MILLIS: u64 = 30 * 60 * 1000;

const REPORT_PATH: &str = "save_device.php";
const DOWNLOAD_LOG_PATH: &str = "log_http_download.php";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub check_interval_millis: u64,
    pub condition_duration_millis: u64,
    /// How often a stale alert is raised again while the device stays stale.
    pub alert_repeat_millis: u64,
    pub collector_base_url: String,
    /// Empty until provisioned; an empty URL fails validation before any
    /// network traffic.
    pub update_package_url: String,
    pub update_file_name: String,
    pub download_dir: Option<PathBuf>,
    pub installer_program: String,
    pub installer_args: Vec<String>,
    pub suggested_restart_hours: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            check_interval_millis: DEFAULT_CHECK_INTERVAL_MILLIS,
            condition_duration_millis: DEFAULT_CONDITION_DURATION_MILLIS,
            alert_repeat_millis: DEFAULT_ALERT_REPEAT_MILLIS,
            collector_base_url: DEFAULT_COLLECTOR_BASE_URL.into(),
            update_package_url: String::new(),
            update_file_name: DEFAULT_UPDATE_FILE_NAME.into(),
            download_dir: None,
            installer_program: "xdg-open".into(),
            installer_args: Vec::new(),
            suggested_restart_hours: DEFAULT_SUGGESTED_RESTART_HOURS,
        }
    }
}

impl AgentSettings {
    pub fn check_interval(&self) -> Duration {
        // A zero interval would spin the monitor loop.
        Duration::from_millis(self.check_interval_millis.max(1000))
    }

    pub fn condition_duration(&self) -> Duration {
        Duration::from_millis(self.condition_duration_millis)
    }

    pub fn alert_repeat(&self) -> Duration {
        Duration::from_millis(self.alert_repeat_millis.max(self.check_interval().as_millis() as u64))
    }

    pub fn report_url(&self) -> String {
        collector_endpoint(&self.collector_base_url, REPORT_PATH)
    }

    pub fn download_log_url(&self) -> String {
        collector_endpoint(&self.collector_base_url, DOWNLOAD_LOG_PATH)
    }

    /// Directory the update package is written to.
    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .or_else(|| dirs::data_local_dir().map(|d| d.join("pos-agent").join("downloads")))
            .unwrap_or_else(|| std::env::temp_dir().join("pos-agent-downloads"))
    }

    pub fn download_destination(&self) -> PathBuf {
        self.resolved_download_dir().join(&self.update_file_name)
    }
}

fn collector_endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}
