//! Per-node configuration derivation.
//!
//! Every node config is computed from the stored base config on each start
//! and never cached. The auth callback URL and the traffic stats secret are
//! always overwritten with the values the control plane owns, whatever the
//! stored document says.

use std::path::{Path, PathBuf};

use hui_schema::{Auth, ListenAddr, OutboundEntry, ServerConfig, Socks5Outbound, TrafficStats};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::supervisor::NodeRole;

/// Name of the relay outbound injected into the secondary node.
pub const RELAY_OUTBOUND_NAME: &str = "socks5_proxy";

/// Values the control plane injects into every node config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFields {
    pub auth_url: String,
    pub secret: String,
}

/// SOCKS5 relay the secondary node forwards its traffic through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRelay {
    pub addr: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl OutboundRelay {
    pub fn is_configured(&self) -> bool {
        !self.addr.trim().is_empty()
    }

    /// Empty, or a `host:port` with a numeric port.
    pub fn validate(&self) -> Result<(), ControlError> {
        if !self.is_configured() {
            return Ok(());
        }
        ListenAddr::parse(&self.addr)?;
        Ok(())
    }

    fn to_entry(&self) -> OutboundEntry {
        let non_empty = |v: &str| (!v.is_empty()).then(|| v.to_string());
        OutboundEntry {
            name: Some(RELAY_OUTBOUND_NAME.to_string()),
            kind: Some("socks5".to_string()),
            socks5: Some(Socks5Outbound {
                addr: Some(self.addr.trim().to_string()),
                username: non_empty(&self.username),
                password: non_empty(&self.password),
            }),
            ..Default::default()
        }
    }
}

/// Callback URL Hysteria2 posts client credentials to.
///
/// HTTPS only when both a cert and a key path are configured for the web
/// listener; the context prefix only when it is a real sub-path.
pub fn auth_http_url(web_port: u16, tls: bool, web_context: &str) -> String {
    let scheme = if tls { "https" } else { "http" };
    let context = context_prefix(web_context);
    format!("{scheme}://127.0.0.1:{web_port}{context}/hui/hysteria2/auth")
}

/// Path prefix for a configured web context; empty for `/` or garbage.
pub(crate) fn context_prefix(web_context: &str) -> &str {
    if web_context.starts_with('/') && web_context != "/" {
        web_context.trim_end_matches('/')
    } else {
        ""
    }
}

/// Overwrite the auth callback and traffic stats secret in place.
pub fn inject_system_fields(config: &mut ServerConfig, system: &SystemFields) {
    config.auth = Some(Auth::http_callback(system.auth_url.clone()));
    let stats = config.traffic_stats.get_or_insert_with(TrafficStats::default);
    stats.secret = Some(system.secret.clone());
}

/// Build the concrete config for `role` from the shared base.
pub fn derive_node_config(
    base: &ServerConfig,
    role: NodeRole,
    outbound: Option<&OutboundRelay>,
    system: &SystemFields,
) -> Result<ServerConfig, ControlError> {
    let listen = base
        .listen_addr()
        .ok_or_else(|| ControlError::InvalidConfig("listen is required".to_string()))?;
    let listen = ListenAddr::parse(listen)?;

    let mut config = base.clone();
    inject_system_fields(&mut config, system);

    if role == NodeRole::Primary {
        return Ok(config);
    }

    let offset = role.port_offset();
    config.listen = Some(listen.shifted(offset)?.to_string());

    let stats_listen = base.traffic_stats_listen().ok_or_else(|| {
        ControlError::InvalidConfig("trafficStats.listen is required for the secondary node".into())
    })?;
    let stats_listen = ListenAddr::parse(stats_listen)?.shifted(offset)?;
    if let Some(stats) = config.traffic_stats.as_mut() {
        stats.listen = Some(stats_listen.to_string());
    }

    if let Some(relay) = outbound.filter(|r| r.is_configured()) {
        config.outbounds = vec![relay.to_entry()];
    }
    Ok(config)
}

/// Serialize a node config to the YAML the server reads.
pub fn materialize(config: &ServerConfig) -> Result<Vec<u8>, ControlError> {
    Ok(config.to_yaml()?.into_bytes())
}

/// Certificate and key files a node serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Resolve the certificate pair of a node config.
///
/// Explicit TLS paths win and must both exist. Otherwise the ACME storage
/// directory is searched for `<domain>.crt` / `<domain>.key` of each domain.
pub fn acme_cert_paths(config: &ServerConfig) -> Result<CertPaths, ControlError> {
    let not_found = || ControlError::MissingDependency("certificate not found".to_string());

    if let Some(tls) = config.tls.as_ref() {
        let cert = tls.cert.as_deref().filter(|p| !p.is_empty());
        let key = tls.key.as_deref().filter(|p| !p.is_empty());
        if let (Some(cert), Some(key)) = (cert, key) {
            let (cert, key) = (PathBuf::from(cert), PathBuf::from(key));
            if cert.exists() && key.exists() {
                return Ok(CertPaths { cert, key });
            }
            return Err(not_found());
        }
    }

    let acme = config.acme.as_ref().ok_or_else(not_found)?;
    let dir = acme.dir.as_deref().filter(|d| !d.is_empty()).ok_or_else(not_found)?;
    for domain in acme.domains.iter().filter(|d| !d.is_empty()) {
        let cert = find_file(Path::new(dir), &format!("{domain}.crt"));
        let key = find_file(Path::new(dir), &format!("{domain}.key"));
        if let (Some(cert), Some(key)) = (cert, key) {
            return Ok(CertPaths { cert, key });
        }
    }
    Err(not_found())
}

fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if entry.file_name().to_str() == Some(name) {
            return Some(path);
        }
    }
    subdirs.iter().find_map(|sub| find_file(sub, name))
}
