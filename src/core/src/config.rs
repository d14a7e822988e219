use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::supervisor::NodeRole;

/// Runtime settings for the control plane.
///
/// These are host-level settings (paths, timeouts), distinct from the
/// persisted node settings kept in the store.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Directory holding the hysteria2 binary and the node config files.
    pub bin_dir: PathBuf,
    /// Directory holding the node log files.
    pub log_dir: PathBuf,
    /// File name of the hysteria2 binary inside `bin_dir`.
    pub binary_name: String,
    /// Release asset URL used when the binary is missing.
    pub download_url: String,
    /// Grace period between SIGTERM and a stop failure.
    pub stop_grace: Duration,
    /// How long a freshly spawned process must survive to count as started.
    pub start_probe: Duration,
    /// Timeout for every control API request.
    pub api_timeout: Duration,
    /// Interval between traffic collections.
    pub traffic_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("bin"),
            log_dir: PathBuf::from("logs"),
            binary_name: default_binary_name(),
            download_url: default_download_url(),
            stop_grace: Duration::from_secs(5),
            start_probe: Duration::from_millis(500),
            api_timeout: Duration::from_secs(3),
            traffic_interval: Duration::from_secs(60),
        }
    }
}

impl ControlConfig {
    pub fn binary_path(&self) -> PathBuf {
        self.bin_dir.join(&self.binary_name)
    }

    pub fn node_config_path(&self, role: NodeRole) -> PathBuf {
        self.bin_dir.join(role.config_file_name())
    }

    pub fn node_log_path(&self, role: NodeRole) -> PathBuf {
        self.log_dir.join(role.log_file_name())
    }

    /// Re-root relative directories under `home`.
    pub fn anchored(mut self, home: &Path) -> Self {
        if self.bin_dir.is_relative() {
            self.bin_dir = home.join(&self.bin_dir);
        }
        if self.log_dir.is_relative() {
            self.log_dir = home.join(&self.log_dir);
        }
        self
    }
}

fn default_binary_name() -> String {
    if cfg!(windows) {
        "hysteria-windows-amd64.exe".to_string()
    } else {
        format!("hysteria-{}-{}", std::env::consts::OS, release_arch())
    }
}

fn default_download_url() -> String {
    format!(
        "https://github.com/apernet/hysteria/releases/latest/download/{}",
        default_binary_name()
    )
}

fn release_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "arm",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_paths_are_fixed_per_role() {
        let cfg = ControlConfig::default().anchored(Path::new("/opt/hui"));
        assert_eq!(
            cfg.node_config_path(NodeRole::Primary),
            PathBuf::from("/opt/hui/bin/hysteria2.yaml")
        );
        assert_eq!(
            cfg.node_config_path(NodeRole::Secondary),
            PathBuf::from("/opt/hui/bin/hysteria2-node2.yaml")
        );
        assert_eq!(
            cfg.node_log_path(NodeRole::Secondary),
            PathBuf::from("/opt/hui/logs/hysteria2-node2.log")
        );
    }
}
