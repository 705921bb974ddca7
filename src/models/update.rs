use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Download-manager style status codes delivered with a terminal notification.
pub const STATUS_SUCCESSFUL: i32 = 8;
pub const STATUS_FAILED: i32 = 16;

/// Reason codes for failures that are not an HTTP status.
pub const ERROR_UNKNOWN: i32 = 1000;
pub const ERROR_FILE_ERROR: i32 = 1001;

/// Opaque identifier handed out by the download service per enqueued transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(pub u64);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Terminal notification payload from the download service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    pub status: i32,
    pub reason: i32,
}

impl TransferStatus {
    pub fn successful() -> Self {
        Self { status: STATUS_SUCCESSFUL, reason: 0 }
    }

    pub fn failed(reason: i32) -> Self {
        Self { status: STATUS_FAILED, reason }
    }
}

/// Reference to a fetched package that the installer can open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    /// Plain filesystem path.
    File(PathBuf),
    /// Shareable URI handed out by a content provider.
    Content(String),
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRef::File(path) => write!(f, "file://{}", path.display()),
            ArtifactRef::Content(uri) => f.write_str(uri),
        }
    }
}

/// Terminal classification of a single update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadOutcome {
    Success,
    Failed,
    InvalidUrl,
    FailedToStart,
    InstallFailedToStart,
    UnknownStatus(i32),
    SuccessButUnreadable,
    PermissionDenied,
    InstallPermissionDenied,
    Cancelled,
}

impl DownloadOutcome {
    /// Wire value of `download_status`.
    pub fn code(&self) -> String {
        match self {
            DownloadOutcome::Success => "SUCCESS".into(),
            DownloadOutcome::Failed => "FAILED".into(),
            DownloadOutcome::InvalidUrl => "FAILED_INVALID_URL".into(),
            DownloadOutcome::FailedToStart => "FAILED_TO_START".into(),
            DownloadOutcome::InstallFailedToStart => "INSTALL_FAILED_TO_START".into(),
            DownloadOutcome::UnknownStatus(code) => format!("UNKNOWN_STATUS_{}", code),
            DownloadOutcome::SuccessButUnreadable => "SUCCESS_BUT_UNREADABLE".into(),
            DownloadOutcome::PermissionDenied => "FAILED_PERMISSION_DENIED".into(),
            DownloadOutcome::InstallPermissionDenied => "FAILED_INSTALL_PERMISSION_DENIED".into(),
            DownloadOutcome::Cancelled => "FAILED_CANCELLED".into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success)
    }
}

/// Pipeline position of the current attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    #[default]
    Idle,
    PermissionCheck,
    Fetching,
    Classifying,
    InstallPrompt,
    Installing,
    Reported,
}

impl UpdateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStage::Idle => "idle",
            UpdateStage::PermissionCheck => "permission_check",
            UpdateStage::Fetching => "fetching",
            UpdateStage::Classifying => "classifying",
            UpdateStage::InstallPrompt => "install_prompt",
            UpdateStage::Installing => "installing",
            UpdateStage::Reported => "reported",
        }
    }

    /// Whether a new attempt may start from this stage.
    pub fn accepts_new_attempt(&self) -> bool {
        matches!(self, UpdateStage::Idle | UpdateStage::Reported)
    }
}

/// Bookkeeping for one update attempt; discarded once reported.
#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub file_name: String,
    pub target_url: String,
    pub started_at: DateTime<Utc>,
    pub download_id: Option<DownloadId>,
}

/// What the caller of the pipeline sees after each step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStatus {
    /// Waiting for the operator; call `resume` once they return.
    Suspended(UpdateStage),
    Finished { outcome: DownloadOutcome, details: String },
}
