use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::models::ArtifactRef;
use crate::utils::{AppError, AppResult};

/// Hands a fetched package to the platform installer.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Whether plain file references must go through [`share`](Self::share)
    /// before they can be launched.
    fn requires_content_uri(&self) -> bool {
        false
    }

    /// Expose a local file through a content-provider style reference.
    fn share(&self, path: &Path) -> AppResult<ArtifactRef> {
        Err(AppError::CommandFailed(format!(
            "installer cannot share {:?}",
            path
        )))
    }

    /// Start the install. Returns once the installer has been launched, not
    /// when it finishes.
    async fn launch(&self, artifact: &ArtifactRef) -> AppResult<()>;
}

/// Launches a configured program with the package path as its last argument.
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn launch(&self, artifact: &ArtifactRef) -> AppResult<()> {
        let target = match artifact {
            ArtifactRef::File(path) => path.as_os_str().to_owned(),
            ArtifactRef::Content(uri) => uri.into(),
        };

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&target)
            .spawn()
            .map_err(|e| AppError::CommandFailed(format!("{}: {}", self.program, e)))?;

        log::info!(
            "Installer {} launched for {} (pid {:?})",
            self.program,
            artifact,
            child.id()
        );
        Ok(())
    }
}
