use std::path::PathBuf;

use directories::BaseDirs;

fn env_home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

pub fn user_home_dir() -> Option<PathBuf> {
    if let Some(base) = BaseDirs::new() {
        return Some(base.home_dir().to_path_buf());
    }
    env_home_dir()
}

/// Root directory for binaries, logs and the database: `HUI_HOME` or `~/.hui`.
pub fn hui_home_dir() -> Result<PathBuf, String> {
    if let Some(override_dir) = std::env::var_os("HUI_HOME") {
        let path = PathBuf::from(override_dir);
        if path.is_relative() {
            return Err("HUI_HOME must be an absolute path".to_string());
        }
        std::fs::create_dir_all(&path)
            .map_err(|e| format!("failed to create HUI_HOME directory: {e}"))?;
        return Ok(path);
    }

    let home = user_home_dir()
        .ok_or_else(|| "failed to resolve user home; set HUI_HOME or HOME".to_string())?;
    let dir = home.join(".hui");
    std::fs::create_dir_all(&dir).map_err(|e| format!("failed to create ~/.hui: {e}"))?;
    Ok(dir)
}

pub fn hui_config_path() -> Result<PathBuf, String> {
    Ok(hui_home_dir()?.join("config.toml"))
}

/// Expand a leading `~/` and anchor relative paths under the hui home.
pub fn resolve_path(raw: &str) -> Result<PathBuf, String> {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = user_home_dir().ok_or_else(|| "failed to resolve user home".to_string())?;
        return Ok(home.join(rest));
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(hui_home_dir()?.join(path))
}
