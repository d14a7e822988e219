use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// Multi-proxy subscription document (Clash / Shadowrocket YAML).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClashConfig {
    pub proxies: Vec<ClashProxy>,
    #[serde(rename = "proxy-groups")]
    pub proxy_groups: Vec<ProxyGroup>,
}

impl ClashConfig {
    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// One `type: hysteria2` proxy entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClashProxy {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub server: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<String>,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs: Option<String>,
    #[serde(default, rename = "obfs-password", skip_serializing_if = "Option::is_none")]
    pub obfs_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(rename = "skip-cert-verify")]
    pub skip_cert_verify: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyGroup {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub proxies: Vec<String>,
}

impl ProxyGroup {
    /// Manual selection group over `proxies`.
    pub fn select(name: impl Into<String>, proxies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: "select".to_string(),
            proxies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_clash_key_names() {
        let doc = ClashConfig {
            proxies: vec![ClashProxy {
                name: "edge".into(),
                kind: "hysteria2".into(),
                server: "vpn.example.com".into(),
                port: 443,
                password: "alice.pw".into(),
                obfs: Some("salamander".into()),
                obfs_password: Some("x".into()),
                ..Default::default()
            }],
            proxy_groups: vec![ProxyGroup::select("PROXY", vec!["edge".into()])],
        };
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("proxy-groups:"));
        assert!(yaml.contains("obfs-password: x"));
        assert!(yaml.contains("skip-cert-verify: false"));
        assert!(yaml.contains("type: select"));
        assert!(!yaml.contains("sni"));
    }
}
