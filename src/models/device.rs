use serde::{Deserialize, Serialize};

/// Who this terminal is and where the collector can reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_name: String,
    pub ip_address: String,
}

/// Body of the check-in call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceReport {
    pub device_name: String,
    pub ip_address: String,
    /// `YYYY-MM-DD HH:MM:SS`, local time.
    pub last_reboot: String,
}

/// Body of the download-outcome call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadLog {
    pub file_name: String,
    pub download_status: String,
    pub timestamp: String,
    pub details: String,
    pub device_name: String,
    pub ip_address: String,
}
