//! Doubles and helpers shared by the unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::collector::Collector;
use crate::db::LastSuccessStore;
use crate::executor::{DownloadCompletions, DownloadRequest, DownloadService, PackageInstaller};
use crate::models::{ArtifactRef, DeviceReport, DownloadId, DownloadLog, TransferStatus};
use crate::platform::alerts::{AlertKind, AlertPresenter};
use crate::platform::permissions::{Permission, PermissionGate};
use crate::utils::{AppError, AppResult, Clock};

fn parse(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
}

/// Let spawned tasks run until they block again.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Frozen clock moved only by the test.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    uptime: Mutex<Duration>,
}

impl ManualClock {
    pub fn at(ts: &str) -> Self {
        Self {
            now: Mutex::new(parse(ts)),
            uptime: Mutex::new(Duration::from_secs(3600)),
        }
    }

    pub fn set_uptime(&self, uptime: Duration) {
        *self.uptime.lock().unwrap() = uptime;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += chrono::Duration::from_std(by).unwrap();
        *self.uptime.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn uptime(&self) -> Duration {
        *self.uptime.lock().unwrap()
    }
}

/// Wall clock that follows tokio's (paused) time, so `tokio::time::advance`
/// moves timers and timestamps together.
pub struct PausedClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
    boot_uptime: Duration,
}

impl PausedClock {
    pub fn at(ts: &str) -> Self {
        Self {
            base: parse(ts),
            origin: tokio::time::Instant::now(),
            boot_uptime: Duration::from_secs(2 * 3600),
        }
    }

    fn elapsed(&self) -> Duration {
        tokio::time::Instant::now() - self.origin
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.elapsed()).unwrap()
    }

    fn uptime(&self) -> Duration {
        self.boot_uptime + self.elapsed()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    value: Mutex<Option<DateTime<Utc>>>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    /// Make reads behave like an unreadable backing store.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl LastSuccessStore for MemoryStore {
    fn get(&self) -> Option<DateTime<Utc>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return None;
        }
        *self.value.lock().unwrap()
    }

    fn set(&self, ts: DateTime<Utc>) -> AppResult<()> {
        *self.value.lock().unwrap() = Some(ts);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterCall {
    Raise(AlertKind, String, String),
    Clear(AlertKind),
}

#[derive(Default)]
pub struct RecordingPresenter {
    calls: Mutex<Vec<PresenterCall>>,
}

impl RecordingPresenter {
    pub fn calls(&self) -> Vec<PresenterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn raises(&self, kind: AlertKind) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, PresenterCall::Raise(k, _, _) if *k == kind))
            .count()
    }

    pub fn clears(&self, kind: AlertKind) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, PresenterCall::Clear(k) if *k == kind))
            .count()
    }

    /// Title and message of the most recent raise of `kind`.
    pub fn last_raise(&self, kind: AlertKind) -> Option<(String, String)> {
        self.calls().into_iter().rev().find_map(|c| match c {
            PresenterCall::Raise(k, title, message) if k == kind => Some((title, message)),
            _ => None,
        })
    }
}

impl AlertPresenter for RecordingPresenter {
    fn raise(&self, kind: AlertKind, title: &str, message: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(PresenterCall::Raise(kind, title.to_string(), message.to_string()));
    }

    fn clear(&self, kind: AlertKind) {
        self.calls.lock().unwrap().push(PresenterCall::Clear(kind));
    }
}

#[derive(Default)]
pub struct ScriptedCollector {
    reports: Mutex<Vec<DeviceReport>>,
    logs: Mutex<Vec<DownloadLog>>,
    failing: AtomicBool,
}

impl ScriptedCollector {
    /// Answer every call with HTTP 500.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reports(&self) -> Vec<DeviceReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn download_logs(&self) -> Vec<DownloadLog> {
        self.logs.lock().unwrap().clone()
    }

    fn answer(&self) -> AppResult<String> {
        if self.failing.load(Ordering::SeqCst) {
            Err(AppError::Collector { status: 500 })
        } else {
            Ok("saved".to_string())
        }
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    async fn save_device(&self, report: &DeviceReport) -> AppResult<String> {
        self.reports.lock().unwrap().push(report.clone());
        self.answer()
    }

    async fn log_download(&self, log: &DownloadLog) -> AppResult<String> {
        self.logs.lock().unwrap().push(log.clone());
        self.answer()
    }
}

#[derive(Default)]
pub struct ScriptedGate {
    missing: Mutex<Vec<Permission>>,
    grant_on_request: AtomicBool,
    install_allowed: AtomicBool,
    permission_requests: AtomicUsize,
    install_requests: AtomicUsize,
}

impl ScriptedGate {
    /// `grant_on_request`: whether the operator accepts the prompt.
    pub fn set_missing(&self, missing: Vec<Permission>, grant_on_request: bool) {
        *self.missing.lock().unwrap() = missing;
        self.grant_on_request.store(grant_on_request, Ordering::SeqCst);
    }

    pub fn allow_install(&self, allowed: bool) {
        self.install_allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub fn install_requests(&self) -> usize {
        self.install_requests.load(Ordering::SeqCst)
    }
}

impl PermissionGate for ScriptedGate {
    fn missing_permissions(&self) -> Vec<Permission> {
        self.missing.lock().unwrap().clone()
    }

    fn request_permissions(&self, _permissions: &[Permission]) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        if self.grant_on_request.load(Ordering::SeqCst) {
            self.missing.lock().unwrap().clear();
        }
    }

    fn can_install_packages(&self) -> bool {
        self.install_allowed.load(Ordering::SeqCst)
    }

    fn request_install_grant(&self) {
        self.install_requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Download service whose terminal status is chosen by the test. By default
/// every transfer succeeds and the package is readable.
pub struct ScriptedDownloads {
    completions: Arc<DownloadCompletions>,
    completion: Mutex<Option<TransferStatus>>,
    readable: AtomicBool,
    stray_first: AtomicBool,
    fail_enqueue: AtomicBool,
    next_id: AtomicU64,
    enqueued: Mutex<Vec<DownloadRequest>>,
    destination_existed: Mutex<Vec<bool>>,
    destinations: Mutex<HashMap<DownloadId, PathBuf>>,
    cancelled: Mutex<Vec<DownloadId>>,
}

impl ScriptedDownloads {
    pub fn new(completions: Arc<DownloadCompletions>) -> Self {
        Self {
            completions,
            completion: Mutex::new(Some(TransferStatus::successful())),
            readable: AtomicBool::new(true),
            stray_first: AtomicBool::new(false),
            fail_enqueue: AtomicBool::new(false),
            next_id: AtomicU64::new(41),
            enqueued: Mutex::new(Vec::new()),
            destination_existed: Mutex::new(Vec::new()),
            destinations: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn complete_with(&self, status: TransferStatus) {
        *self.completion.lock().unwrap() = Some(status);
    }

    pub fn never_complete(&self) {
        *self.completion.lock().unwrap() = None;
    }

    pub fn set_readable(&self, readable: bool) {
        self.readable.store(readable, Ordering::SeqCst);
    }

    /// Deliver a completion for somebody else's download before ours.
    pub fn send_stray_first(&self, stray: bool) {
        self.stray_first.store(stray, Ordering::SeqCst);
    }

    pub fn fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    pub fn enqueued(&self) -> Vec<DownloadRequest> {
        self.enqueued.lock().unwrap().clone()
    }

    /// For each enqueue, whether a file already sat at the destination.
    pub fn destination_existed(&self) -> Vec<bool> {
        self.destination_existed.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<DownloadId> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl DownloadService for ScriptedDownloads {
    fn enqueue(&self, request: DownloadRequest) -> AppResult<DownloadId> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(AppError::CommandFailed("download queue unavailable".into()));
        }
        let id = DownloadId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.destination_existed
            .lock()
            .unwrap()
            .push(request.destination.exists());
        self.destinations
            .lock()
            .unwrap()
            .insert(id, request.destination.clone());
        self.enqueued.lock().unwrap().push(request.clone());

        if let Some(status) = *self.completion.lock().unwrap() {
            let completions = self.completions.clone();
            let stray = self.stray_first.load(Ordering::SeqCst);
            tokio::spawn(async move {
                if stray {
                    completions.notify(DownloadId(id.0 + 1000), TransferStatus::failed(404));
                }
                if status == TransferStatus::successful() {
                    std::fs::write(&request.destination, b"package").unwrap();
                }
                completions.notify(id, status);
            });
        }
        Ok(id)
    }

    fn content_ref(&self, id: DownloadId) -> Option<ArtifactRef> {
        if !self.readable.load(Ordering::SeqCst) {
            return None;
        }
        self.destinations
            .lock()
            .unwrap()
            .get(&id)
            .map(|p| ArtifactRef::File(p.clone()))
    }

    fn cancel(&self, id: DownloadId) {
        self.cancelled.lock().unwrap().push(id);
    }
}

#[derive(Default)]
pub struct RecordingInstaller {
    content_uri: AtomicBool,
    fail_launch: AtomicBool,
    launched: Mutex<Vec<ArtifactRef>>,
}

impl RecordingInstaller {
    pub fn require_content_uri(&self, required: bool) {
        self.content_uri.store(required, Ordering::SeqCst);
    }

    pub fn fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn launched(&self) -> Vec<ArtifactRef> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageInstaller for RecordingInstaller {
    fn requires_content_uri(&self) -> bool {
        self.content_uri.load(Ordering::SeqCst)
    }

    fn share(&self, path: &Path) -> AppResult<ArtifactRef> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(ArtifactRef::Content(format!("content://pos-agent.provider/{}", name)))
    }

    async fn launch(&self, artifact: &ArtifactRef) -> AppResult<()> {
        self.launched.lock().unwrap().push(artifact.clone());
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(AppError::CommandFailed("no activity handles the package".into()));
        }
        Ok(())
    }
}

fn request_complete(buf: &[u8]) -> bool {
    let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    buf.len() >= header_end + 4 + content_length
}

/// One-shot HTTP server on a loopback port. Returns the base URL and a handle
/// resolving to the raw request text.
pub async fn serve_once(status_line: &'static str, body: &'static [u8]) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            if request_complete(&request) {
                break;
            }
        }
        let head = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
            status_line,
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body).await.unwrap();
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    });
    (format!("http://{}", addr), handle)
}
