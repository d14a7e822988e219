use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// Hysteria2 server configuration document.
///
/// Field names follow the server's YAML schema exactly (camelCase). Every
/// field is optional and omitted when unset so that a document read from
/// disk or from the store serializes back to the same keys. Keys this
/// struct does not model are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs: Option<Obfs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme: Option<Acme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quic: Option<Quic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<Bandwidth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_client_bandwidth: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_test: Option<bool>,
    #[serde(default, rename = "disableUDP", skip_serializing_if = "Option::is_none")]
    pub disable_udp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp_idle_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sniff: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outbounds: Vec<OutboundEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_stats: Option<TrafficStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<serde_yaml::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ServerConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, SchemaError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Listen address if set and non-empty.
    pub fn listen_addr(&self) -> Option<&str> {
        self.listen.as_deref().filter(|v| !v.trim().is_empty())
    }

    /// Traffic stats listen address if set and non-empty.
    pub fn traffic_stats_listen(&self) -> Option<&str> {
        self.traffic_stats
            .as_ref()
            .and_then(|t| t.listen.as_deref())
            .filter(|v| !v.trim().is_empty())
    }

    /// Salamander password, when salamander obfuscation is configured.
    pub fn salamander_password(&self) -> Option<&str> {
        let obfs = self.obfs.as_ref()?;
        if obfs.kind.as_deref() != Some("salamander") {
            return None;
        }
        obfs.salamander
            .as_ref()
            .and_then(|s| s.password.as_deref())
            .filter(|p| !p.is_empty())
    }

    /// First ACME domain, used as the client SNI.
    pub fn first_acme_domain(&self) -> Option<&str> {
        self.acme
            .as_ref()
            .and_then(|a| a.domains.first())
            .map(String::as_str)
            .filter(|d| !d.is_empty())
    }

    pub fn auth_http_url(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .and_then(|a| a.http.as_ref())
            .and_then(|h| h.url.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Obfs {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salamander: Option<Salamander>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Salamander {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni_guard: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acme {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<serde_yaml::Value>,
    #[serde(default, rename = "disableHTTP", skip_serializing_if = "Option::is_none")]
    pub disable_http: Option<bool>,
    #[serde(default, rename = "disableTLSALPN", skip_serializing_if = "Option::is_none")]
    pub disable_tlsalpn: Option<bool>,
    #[serde(default, rename = "altHTTPPort", skip_serializing_if = "Option::is_none")]
    pub alt_http_port: Option<u16>,
    #[serde(default, rename = "altTLSALPNPort", skip_serializing_if = "Option::is_none")]
    pub alt_tlsalpn_port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_stream_receive_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stream_receive_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_conn_receive_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conn_receive_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_incoming_streams: Option<u64>,
    #[serde(default, rename = "disablePathMTUDiscovery", skip_serializing_if = "Option::is_none")]
    pub disable_path_mtu_discovery: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bandwidth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<AuthHttp>,
}

impl Auth {
    /// HTTP callback auth pointing at `url`.
    pub fn http_callback(url: impl Into<String>) -> Self {
        Self {
            kind: Some("http".to_string()),
            password: None,
            http: Some(AuthHttp {
                url: Some(url.into()),
                insecure: Some(true),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthHttp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks5: Option<Socks5Outbound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Socks5Outbound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}
