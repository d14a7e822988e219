use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `GET /online` response body: username → connected device count.
pub type OnlineUsers = HashMap<String, i64>;

/// Per-user counters from `GET /traffic`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStat {
    /// Bytes sent by the client.
    #[serde(default)]
    pub tx: i64,
    /// Bytes received by the client.
    #[serde(default)]
    pub rx: i64,
}

/// `GET /traffic` response body.
pub type TrafficSnapshot = HashMap<String, TrafficStat>;

/// Body the server POSTs to the HTTP auth callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub addr: String,
    pub auth: String,
    #[serde(default)]
    pub tx: u64,
}

/// Reply expected by the server from the HTTP auth callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub ok: bool,
    pub id: String,
}

impl AuthResponse {
    pub fn allow(id: impl Into<String>) -> Self {
        Self {
            ok: true,
            id: id.into(),
        }
    }

    pub fn deny() -> Self {
        Self {
            ok: false,
            id: String::new(),
        }
    }
}
