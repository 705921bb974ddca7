use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Platform permissions the update pipeline needs before it fetches anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Write access to the download directory.
    WriteStorage,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteStorage => "write_storage",
        }
    }
}

/// Permission negotiation with the operator.
///
/// Requests are fire-and-forget: they start whatever out-of-band prompt the
/// platform uses, and the caller re-checks once the operator comes back.
pub trait PermissionGate: Send + Sync {
    fn missing_permissions(&self) -> Vec<Permission>;
    fn request_permissions(&self, permissions: &[Permission]);
    /// Whether packages from this source may be installed.
    fn can_install_packages(&self) -> bool;
    fn request_install_grant(&self);
}

/// Gate for a headless terminal host.
///
/// Storage permission means the download directory exists and is writable.
/// The install grant is a marker file the operator creates (see
/// [`HostPermissionGate::grant_install`]).
pub struct HostPermissionGate {
    download_dir: PathBuf,
    grant_marker: PathBuf,
}

impl HostPermissionGate {
    pub fn new(download_dir: PathBuf, data_dir: &Path) -> Self {
        Self {
            download_dir,
            grant_marker: data_dir.join("allow-install"),
        }
    }

    /// Record the operator's install grant.
    pub fn grant_install(&self) -> std::io::Result<()> {
        if let Some(parent) = self.grant_marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.grant_marker, b"1")?;
        log::info!("permissions: install grant recorded at {:?}", self.grant_marker);
        Ok(())
    }
}

/// Check writability by creating and removing a file. Mode bits alone lie
/// on read-only mounts.
fn dir_writable(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let scratch = dir.join(".pos-agent-write-check");
    let ok = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&scratch)
        .is_ok();
    if ok {
        let _ = std::fs::remove_file(&scratch);
    }
    ok
}

impl PermissionGate for HostPermissionGate {
    fn missing_permissions(&self) -> Vec<Permission> {
        let mut missing = Vec::new();
        if !dir_writable(&self.download_dir) {
            missing.push(Permission::WriteStorage);
        }
        missing
    }

    fn request_permissions(&self, permissions: &[Permission]) {
        for permission in permissions {
            match permission {
                Permission::WriteStorage => {
                    if let Err(e) = std::fs::create_dir_all(&self.download_dir) {
                        log::warn!(
                            "permissions: cannot create download dir {:?}: {}",
                            self.download_dir,
                            e
                        );
                    }
                }
            }
        }
    }

    fn can_install_packages(&self) -> bool {
        self.grant_marker.exists()
    }

    fn request_install_grant(&self) {
        log::warn!(
            "permissions: installing from this source is not allowed yet; \
             run `pos-agent allow-install` (creates {:?}) and continue",
            self.grant_marker
        );
    }
}
