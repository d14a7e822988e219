use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::ControlError;

/// Makes sure the hysteria2 executable exists before a node starts.
#[async_trait]
pub trait BinaryAcquirer: Send + Sync + 'static {
    async fn ensure_present(&self, path: &Path) -> Result<(), ControlError>;
}

/// Downloads the release asset when the binary is missing.
pub struct ReleaseDownloader {
    client: reqwest::Client,
    url: String,
}

impl ReleaseDownloader {
    pub fn new(url: impl Into<String>) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| ControlError::Sys(format!("build download client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BinaryAcquirer for ReleaseDownloader {
    async fn ensure_present(&self, path: &Path) -> Result<(), ControlError> {
        if path.exists() {
            return Ok(());
        }
        let missing = |reason: String| ControlError::MissingDependency(format!("hysteria2 binary: {reason}"));

        info!(url = %self.url, path = %path.display(), "downloading hysteria2");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| missing(format!("download: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(missing(format!("download returned status {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| missing(format!("read body: {err}")))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| missing(format!("create dir: {err}")))?;
        }
        let partial = path.with_extension("download");
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|err| missing(format!("write: {err}")))?;
        make_executable(&partial).await.map_err(missing)?;
        tokio::fs::rename(&partial, path)
            .await
            .map_err(|err| missing(format!("rename: {err}")))?;
        info!(path = %path.display(), size = bytes.len(), "hysteria2 downloaded");
        Ok(())
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|err| format!("chmod: {err}"))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), String> {
    Ok(())
}
