use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::ControlConfig;
use crate::paths::{hui_config_path, hui_home_dir, resolve_path};

/// Contents of `$HUI_HOME/config.toml`. Every section is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HuiConfig {
    pub version: u32,
    pub paths: PathsConfig,
    pub process: ProcessConfig,
    pub control_api: ControlApiConfig,
    pub binary: BinaryConfig,
    pub traffic: TrafficConfig,
}

impl Default for HuiConfig {
    fn default() -> Self {
        Self {
            version: 1,
            paths: PathsConfig::default(),
            process: ProcessConfig::default(),
            control_api: ControlApiConfig::default(),
            binary: BinaryConfig::default(),
            traffic: TrafficConfig::default(),
        }
    }
}

impl HuiConfig {
    pub fn load() -> Result<Self, String> {
        let path = hui_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| format!("read config.toml: {e}"))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("parse config.toml: {e}"))
    }

    pub fn database_path(&self) -> Result<PathBuf, String> {
        match self.paths.database.as_deref() {
            Some(path) => resolve_path(path),
            None => Ok(hui_home_dir()?.join("data").join("h_ui.db")),
        }
    }

    /// Runtime settings with directories anchored under the hui home.
    pub fn control_config(&self) -> Result<ControlConfig, String> {
        let mut cfg = ControlConfig::default();
        if let Some(dir) = self.paths.bin_dir.as_deref() {
            cfg.bin_dir = resolve_path(dir)?;
        }
        if let Some(dir) = self.paths.log_dir.as_deref() {
            cfg.log_dir = resolve_path(dir)?;
        }
        if let Some(name) = self.binary.name.as_deref().filter(|n| !n.is_empty()) {
            cfg.binary_name = name.to_string();
        }
        if let Some(url) = self.binary.download_url.as_deref().filter(|u| !u.is_empty()) {
            cfg.download_url = url.to_string();
        }
        cfg.stop_grace = Duration::from_secs(self.process.stop_grace_secs);
        cfg.start_probe = Duration::from_millis(self.process.start_probe_ms);
        cfg.api_timeout = Duration::from_secs(self.control_api.timeout_secs);
        cfg.traffic_interval = Duration::from_secs(self.traffic.collect_interval_secs.max(1));
        Ok(cfg.anchored(&hui_home_dir()?))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub bin_dir: Option<String>,
    pub log_dir: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub stop_grace_secs: u64,
    pub start_probe_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: 5,
            start_probe_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlApiConfig {
    pub timeout_secs: u64,
}

impl Default for ControlApiConfig {
    fn default() -> Self {
        Self { timeout_secs: 3 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    pub name: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub collect_interval_secs: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            collect_interval_secs: 60,
        }
    }
}
