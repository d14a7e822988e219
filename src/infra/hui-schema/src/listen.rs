use std::fmt;

use crate::SchemaError;

/// A `host:port` listen address as written in the Hysteria2 config.
///
/// The host part may be empty (`:443` binds every interface) or a bracketed
/// IPv6 literal (`[::]:443`); only the segment after the last colon is
/// interpreted as the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: u16,
}

impl ListenAddr {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let trimmed = raw.trim();
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| SchemaError::InvalidListen(trimmed.to_string()))?;
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SchemaError::InvalidListen(trimmed.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| SchemaError::PortOutOfRange(trimmed.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Same host, port moved by `offset`.
    pub fn shifted(&self, offset: u16) -> Result<Self, SchemaError> {
        let port = self
            .port
            .checked_add(offset)
            .ok_or_else(|| SchemaError::PortOutOfRange(self.to_string()))?;
        Ok(Self {
            host: self.host.clone(),
            port,
        })
    }

    /// Host to dial when talking to a local listener.
    pub fn dial_host(&self) -> &str {
        match self.host.as_str() {
            "" | "0.0.0.0" | "[::]" => "127.0.0.1",
            other => other,
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
