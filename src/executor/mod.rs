pub mod download;
pub mod installer;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::collector::Collector;
use crate::models::{
    AgentSettings, ArtifactRef, AttemptStatus, DeviceIdentity, DownloadAttempt, DownloadId,
    DownloadLog, DownloadOutcome, TransferStatus, UpdateStage, STATUS_FAILED, STATUS_SUCCESSFUL,
};
use crate::platform::permissions::PermissionGate;
use crate::utils::{format_timestamp, AppError, AppResult, Clock};

pub use download::{DownloadCompletions, DownloadRequest, DownloadService, HttpDownloadService};
pub use installer::{CommandInstaller, PackageInstaller};

/// What to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub package_url: String,
    pub file_name: String,
    pub destination: PathBuf,
}

impl UpdateConfig {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            package_url: settings.update_package_url.clone(),
            file_name: settings.update_file_name.clone(),
            destination: settings.download_destination(),
        }
    }
}

/// Platform collaborators the pipeline drives.
pub struct UpdateCollaborators {
    pub collector: Arc<dyn Collector>,
    pub gate: Arc<dyn PermissionGate>,
    pub downloads: Arc<dyn DownloadService>,
    pub completions: Arc<DownloadCompletions>,
    pub installer: Arc<dyn PackageInstaller>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct PipelineState {
    stage: UpdateStage,
    attempt: Option<DownloadAttempt>,
    /// Artifact waiting for the operator's install grant.
    pending_install: Option<ArtifactRef>,
    cancel: Option<CancellationToken>,
}

/// Self-update pipeline: permission check, fetch, classify, install, report.
///
/// Every attempt that leaves `Idle` ends with exactly one download-log call
/// to the collector. Stages that wait on the operator return
/// [`AttemptStatus::Suspended`]; the host calls [`resume`](Self::resume) once
/// the operator is back.
pub struct UpdatePipeline {
    config: UpdateConfig,
    identity: DeviceIdentity,
    collector: Arc<dyn Collector>,
    gate: Arc<dyn PermissionGate>,
    downloads: Arc<dyn DownloadService>,
    completions: Arc<DownloadCompletions>,
    installer: Arc<dyn PackageInstaller>,
    clock: Arc<dyn Clock>,
    state: Mutex<PipelineState>,
}

impl UpdatePipeline {
    pub fn new(config: UpdateConfig, identity: DeviceIdentity, deps: UpdateCollaborators) -> Self {
        Self {
            config,
            identity,
            collector: deps.collector,
            gate: deps.gate,
            downloads: deps.downloads,
            completions: deps.completions,
            installer: deps.installer,
            clock: deps.clock,
            state: Mutex::new(PipelineState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advance the current attempt. A stage driven past `finish` (after an
    /// external cancel) leaves the state alone.
    fn set_stage(&self, stage: UpdateStage) {
        let mut st = self.state();
        if st.attempt.is_none() {
            log::debug!("No active attempt; ignoring stage {}", stage.as_str());
            return;
        }
        log::debug!("Update pipeline -> {}", stage.as_str());
        st.stage = stage;
    }

    pub fn stage(&self) -> UpdateStage {
        self.state().stage
    }

    /// Begin a new attempt. Fails without side effects while another attempt
    /// is active.
    pub async fn start(&self) -> AppResult<AttemptStatus> {
        {
            let mut st = self.state();
            if !st.stage.accepts_new_attempt() {
                return Err(AppError::AttemptInProgress(st.stage.as_str().to_string()));
            }
            st.stage = UpdateStage::PermissionCheck;
            st.attempt = Some(DownloadAttempt {
                file_name: self.config.file_name.clone(),
                target_url: self.config.package_url.clone(),
                started_at: self.clock.now(),
                download_id: None,
            });
            st.pending_install = None;
            st.cancel = Some(CancellationToken::new());
        }
        log::info!("Update attempt started for {}", self.config.file_name);

        let missing = self.gate.missing_permissions();
        if missing.is_empty() {
            return Ok(self.fetch().await);
        }
        let names: Vec<&str> = missing.iter().map(|p| p.as_str()).collect();
        log::info!("Requesting permissions: {}", names.join(", "));
        self.gate.request_permissions(&missing);
        Ok(AttemptStatus::Suspended(UpdateStage::PermissionCheck))
    }

    /// Continue a suspended attempt after the operator returns.
    pub async fn resume(&self) -> AppResult<AttemptStatus> {
        let stage = self.stage();
        match stage {
            UpdateStage::PermissionCheck => {
                let missing = self.gate.missing_permissions();
                if missing.is_empty() {
                    return Ok(self.fetch().await);
                }
                let names: Vec<&str> = missing.iter().map(|p| p.as_str()).collect();
                Ok(self
                    .finish(
                        DownloadOutcome::PermissionDenied,
                        format!("Permissions denied: {}", names.join(", ")),
                    )
                    .await)
            }
            UpdateStage::InstallPrompt => {
                if !self.gate.can_install_packages() {
                    return Ok(self
                        .finish(
                            DownloadOutcome::InstallPermissionDenied,
                            "Install from this source not permitted".to_string(),
                        )
                        .await);
                }
                let pending = self.state().pending_install.take();
                match pending {
                    Some(artifact) => Ok(self.install(artifact).await),
                    None => Err(AppError::NotSuspended("no package awaiting install".into())),
                }
            }
            other => Err(AppError::NotSuspended(other.as_str().to_string())),
        }
    }

    /// Abandon the current attempt. Returns whether there was one.
    ///
    /// The attempt is reported here whatever its stage, so the report does not
    /// depend on the driving future still being polled. A stage that later
    /// observes the token finds the attempt already finished.
    pub async fn cancel(&self) -> bool {
        let (stage, download_id) = {
            let mut st = self.state();
            if !st.stage.accepts_new_attempt() {
                if let Some(token) = st.cancel.take() {
                    token.cancel();
                }
            }
            (st.stage, st.attempt.as_ref().and_then(|a| a.download_id))
        };
        if stage.accepts_new_attempt() {
            return false;
        }

        log::info!("Cancelling update attempt during {}", stage.as_str());
        if let Some(id) = download_id {
            self.downloads.cancel(id);
            self.completions.forget(id);
        }
        self.finish(
            DownloadOutcome::Cancelled,
            format!("Cancelled during {}", stage.as_str()),
        )
        .await;
        true
    }

    fn validate_url(raw: &str) -> Option<Url> {
        let url = Url::parse(raw.trim()).ok()?;
        let web = matches!(url.scheme(), "http" | "https");
        let has_host = url.host_str().map_or(false, |h| !h.is_empty());
        (web && has_host).then_some(url)
    }

    async fn fetch(&self) -> AttemptStatus {
        self.set_stage(UpdateStage::Fetching);

        let url = match Self::validate_url(&self.config.package_url) {
            Some(url) => url,
            None => {
                log::warn!("Invalid update URL: '{}'", self.config.package_url);
                return self
                    .finish(
                        DownloadOutcome::InvalidUrl,
                        format!("Invalid URL: '{}'", self.config.package_url),
                    )
                    .await;
            }
        };

        let destination = &self.config.destination;
        match tokio::fs::remove_file(destination).await {
            Ok(()) => log::info!("Removed previous package at {:?}", destination),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove previous package {:?}: {}", destination, e),
        }

        let request = DownloadRequest {
            url,
            destination: destination.clone(),
            title: self.config.file_name.clone(),
        };
        let registered = self
            .completions
            .register_with(|| self.downloads.enqueue(request));
        let (id, completion) = match registered {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("Failed to enqueue download: {}", e);
                return self
                    .finish(DownloadOutcome::FailedToStart, e.to_string())
                    .await;
            }
        };

        // Recorded under the lock so either `cancel` sees the id or this
        // stage sees the cancellation, never neither.
        let token = {
            let mut guard = self.state();
            let st = &mut *guard;
            match (st.attempt.as_mut(), st.cancel.clone()) {
                (Some(attempt), Some(token)) if !token.is_cancelled() => {
                    attempt.download_id = Some(id);
                    Some(token)
                }
                _ => None,
            }
        };
        let Some(token) = token else {
            self.downloads.cancel(id);
            self.completions.forget(id);
            return self
                .finish(DownloadOutcome::Cancelled, format!("Download {} cancelled", id))
                .await;
        };
        log::info!("Download {} enqueued, waiting for completion", id);

        let status = tokio::select! {
            status = completion => status,
            _ = token.cancelled() => {
                return self
                    .finish(DownloadOutcome::Cancelled, format!("Download {} cancelled", id))
                    .await;
            }
        };

        match status {
            Ok(status) => self.classify(id, status).await,
            Err(_) => {
                self.finish(
                    DownloadOutcome::Failed,
                    format!("Download {} ended without a status", id),
                )
                .await
            }
        }
    }

    async fn classify(&self, id: DownloadId, status: TransferStatus) -> AttemptStatus {
        self.set_stage(UpdateStage::Classifying);
        log::info!("Download {} finished: status {}, reason {}", id, status.status, status.reason);

        match status.status {
            STATUS_SUCCESSFUL => match self.downloads.content_ref(id) {
                Some(artifact) => self.install_prompt(artifact).await,
                None => {
                    self.finish(
                        DownloadOutcome::SuccessButUnreadable,
                        format!("Download {} completed but its content is unreadable", id),
                    )
                    .await
                }
            },
            STATUS_FAILED => {
                self.finish(
                    DownloadOutcome::Failed,
                    format!("Reason Code: {}", status.reason),
                )
                .await
            }
            other => {
                self.finish(
                    DownloadOutcome::UnknownStatus(other),
                    format!("Status: {}, Reason Code: {}", other, status.reason),
                )
                .await
            }
        }
    }

    async fn install_prompt(&self, artifact: ArtifactRef) -> AttemptStatus {
        self.set_stage(UpdateStage::InstallPrompt);
        let cancelled = {
            let st = self.state();
            st.attempt.is_none() || st.cancel.as_ref().map_or(true, |t| t.is_cancelled())
        };
        if cancelled {
            return self
                .finish(DownloadOutcome::Cancelled, "Cancelled before install".to_string())
                .await;
        }
        if self.gate.can_install_packages() {
            return self.install(artifact).await;
        }
        log::info!("Install grant missing; waiting for the operator");
        {
            let mut st = self.state();
            if st.attempt.is_none() {
                return AttemptStatus::Finished {
                    outcome: DownloadOutcome::Cancelled,
                    details: "Cancelled before install".to_string(),
                };
            }
            st.pending_install = Some(artifact);
        }
        self.gate.request_install_grant();
        AttemptStatus::Suspended(UpdateStage::InstallPrompt)
    }

    async fn install(&self, artifact: ArtifactRef) -> AttemptStatus {
        self.set_stage(UpdateStage::Installing);

        let artifact = match artifact {
            ArtifactRef::File(path) if self.installer.requires_content_uri() => {
                match self.installer.share(&path) {
                    Ok(shared) => shared,
                    Err(e) => {
                        return self
                            .finish(DownloadOutcome::InstallFailedToStart, e.to_string())
                            .await
                    }
                }
            }
            other => other,
        };

        let cancel = self.state().cancel.clone();
        let token = match cancel {
            Some(token) => token,
            None => {
                return self
                    .finish(DownloadOutcome::Cancelled, "Cancelled before install".to_string())
                    .await
            }
        };
        let launched = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.installer.launch(&artifact) => Some(result),
        };

        match launched {
            None => {
                self.finish(DownloadOutcome::Cancelled, "Cancelled before install".to_string())
                    .await
            }
            Some(Ok(())) => {
                self.finish(
                    DownloadOutcome::Success,
                    format!("Installer launched for {}", artifact),
                )
                .await
            }
            Some(Err(e)) => {
                log::error!("Installer failed to start: {}", e);
                self.finish(DownloadOutcome::InstallFailedToStart, e.to_string())
                    .await
            }
        }
    }

    /// Report the attempt's outcome to the collector and return to `Idle`.
    /// Only the first call per attempt reports.
    async fn finish(&self, outcome: DownloadOutcome, details: String) -> AttemptStatus {
        let attempt = {
            let mut st = self.state();
            let attempt = st.attempt.take();
            if attempt.is_some() {
                st.stage = UpdateStage::Reported;
                st.pending_install = None;
                st.cancel = None;
            }
            attempt
        };

        if let Some(attempt) = attempt {
            let elapsed = self.clock.now() - attempt.started_at;
            log::info!(
                "Update attempt for {} finished: {} ({}) after {}s",
                attempt.target_url,
                outcome.code(),
                details,
                elapsed.num_seconds()
            );
            let entry = DownloadLog {
                file_name: attempt.file_name,
                download_status: outcome.code(),
                timestamp: format_timestamp(&self.clock.now()),
                details: details.clone(),
                device_name: self.identity.device_name.clone(),
                ip_address: self.identity.ip_address.clone(),
            };
            match self.collector.log_download(&entry).await {
                Ok(body) => log::info!("Download outcome logged: {}", body.trim()),
                Err(e) => log::warn!("Failed to log download outcome: {}", e),
            }

            let mut st = self.state();
            if st.stage == UpdateStage::Reported {
                st.stage = UpdateStage::Idle;
            }
        } else {
            log::debug!("Attempt already reported; dropping {}", outcome.code());
        }

        AttemptStatus::Finished { outcome, details }
    }
}
