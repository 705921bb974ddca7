use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use url::Url;

use crate::models::{
    ArtifactRef, DownloadId, TransferStatus, ERROR_FILE_ERROR, ERROR_UNKNOWN,
};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: Url,
    pub destination: PathBuf,
    pub title: String,
}

/// Platform download collaborator. Terminal results are delivered through the
/// shared [`DownloadCompletions`] registry, keyed by the returned id.
pub trait DownloadService: Send + Sync {
    fn enqueue(&self, request: DownloadRequest) -> AppResult<DownloadId>;
    /// Readable reference to a completed download, if one can be produced.
    fn content_ref(&self, id: DownloadId) -> Option<ArtifactRef>;
    fn cancel(&self, id: DownloadId);
}

/// One-shot continuations for in-flight downloads.
///
/// Each id resolves at most once; notifications for ids nobody is waiting on
/// (stale, duplicate, or another client's transfer) are dropped.
#[derive(Default)]
pub struct DownloadCompletions {
    waiters: Mutex<HashMap<DownloadId, oneshot::Sender<TransferStatus>>>,
}

impl DownloadCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue via `enqueue` and register a waiter for the resulting id while
    /// holding the registry lock, so a completion racing the registration
    /// cannot be lost.
    pub fn register_with<F>(
        &self,
        enqueue: F,
    ) -> AppResult<(DownloadId, oneshot::Receiver<TransferStatus>)>
    where
        F: FnOnce() -> AppResult<DownloadId>,
    {
        let mut waiters = self
            .waiters
            .lock()
            .map_err(|_| AppError::Custom("download registry lock poisoned".into()))?;
        let id = enqueue()?;
        let (tx, rx) = oneshot::channel();
        waiters.insert(id, tx);
        Ok((id, rx))
    }

    /// Deliver a terminal status. Returns whether a waiter consumed it.
    pub fn notify(&self, id: DownloadId, status: TransferStatus) -> bool {
        let waiter = match self.waiters.lock() {
            Ok(mut waiters) => waiters.remove(&id),
            Err(poisoned) => poisoned.into_inner().remove(&id),
        };
        match waiter {
            Some(tx) => tx.send(status).is_ok(),
            None => {
                log::debug!("Ignoring completion for unknown download {}", id);
                false
            }
        }
    }

    pub fn forget(&self, id: DownloadId) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&id);
        }
    }
}

struct HttpDownloadShared {
    completions: Arc<DownloadCompletions>,
    finished: Mutex<HashMap<DownloadId, PathBuf>>,
    /// Running transfers and the destination each one writes towards.
    active: Mutex<HashMap<DownloadId, (AbortHandle, PathBuf)>>,
}

/// Download service that streams packages over HTTP(S) to local disk.
pub struct HttpDownloadService {
    client: reqwest::Client,
    next_id: AtomicU64,
    shared: Arc<HttpDownloadShared>,
}

impl HttpDownloadService {
    pub fn new(client: reqwest::Client, completions: Arc<DownloadCompletions>) -> Self {
        Self {
            client,
            next_id: AtomicU64::new(1),
            shared: Arc::new(HttpDownloadShared {
                completions,
                finished: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl DownloadService for HttpDownloadService {
    fn enqueue(&self, request: DownloadRequest) -> AppResult<DownloadId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::CommandFailed(format!("no async runtime for download: {}", e)))?;
        if let Some(parent) = request.destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let id = DownloadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let client = self.client.clone();
        let shared = self.shared.clone();
        let destination = request.destination.clone();
        log::info!("Download {} started: {} -> {:?}", id, request.url, request.destination);

        let task = runtime.spawn(async move {
            let status = transfer(&client, &request).await;
            if status.status == crate::models::STATUS_SUCCESSFUL {
                if let Ok(mut finished) = shared.finished.lock() {
                    finished.insert(id, request.destination.clone());
                }
            }
            if let Ok(mut active) = shared.active.lock() {
                active.remove(&id);
            }
            shared.completions.notify(id, status);
        });

        if let Ok(mut active) = self.shared.active.lock() {
            // The task may already have finished and removed itself.
            if !task.is_finished() {
                active.insert(id, (task.abort_handle(), destination));
            }
        }
        Ok(id)
    }

    /// Hands the finished file over once; later calls for the same id see
    /// nothing.
    fn content_ref(&self, id: DownloadId) -> Option<ArtifactRef> {
        let path = self.shared.finished.lock().ok()?.remove(&id)?;
        path.is_file().then_some(ArtifactRef::File(path))
    }

    fn cancel(&self, id: DownloadId) {
        let entry = self.shared.active.lock().ok().and_then(|mut a| a.remove(&id));
        let Some((handle, destination)) = entry else {
            return;
        };
        handle.abort();
        let part = partial_path(&destination);
        match std::fs::remove_file(&part) {
            Ok(()) => log::debug!("Removed partial download {:?}", part),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove partial download {:?}: {}", part, e),
        }
        log::info!("Download {} cancelled", id);
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Stream `request.url` into the destination, writing to a `.part` file
/// first so a half-written package never sits at the final path.
async fn transfer(client: &reqwest::Client, request: &DownloadRequest) -> TransferStatus {
    let response = match client.get(request.url.clone()).send().await {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Download of {} failed: {}", request.title, e);
            return TransferStatus::failed(ERROR_UNKNOWN);
        }
    };

    if !response.status().is_success() {
        log::warn!("Download of {} returned HTTP {}", request.title, response.status());
        return TransferStatus::failed(i32::from(response.status().as_u16()));
    }

    let part = partial_path(&request.destination);
    let mut file = match tokio::fs::File::create(&part).await {
        Ok(f) => f,
        Err(e) => {
            log::warn!("Cannot create {:?}: {}", part, e);
            return TransferStatus::failed(ERROR_FILE_ERROR);
        }
    };

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Download stream error for {}: {}", request.title, e);
                let _ = tokio::fs::remove_file(&part).await;
                return TransferStatus::failed(ERROR_UNKNOWN);
            }
        };
        if let Err(e) = file.write_all(&chunk).await {
            log::warn!("Failed to write chunk to {:?}: {}", part, e);
            let _ = tokio::fs::remove_file(&part).await;
            return TransferStatus::failed(ERROR_FILE_ERROR);
        }
        downloaded += chunk.len() as u64;
    }

    if let Err(e) = file.flush().await {
        log::warn!("Failed to flush {:?}: {}", part, e);
        return TransferStatus::failed(ERROR_FILE_ERROR);
    }
    drop(file);

    if let Err(e) = tokio::fs::rename(&part, &request.destination).await {
        log::warn!("Failed to move {:?} into place: {}", part, e);
        return TransferStatus::failed(ERROR_FILE_ERROR);
    }

    log::info!("Download of {} complete ({} bytes)", request.title, downloaded);
    TransferStatus::successful()
}
