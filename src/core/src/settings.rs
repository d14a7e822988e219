use std::sync::Arc;

use hui_schema::{ListenAddr, ServerConfig};

use crate::control_api::ApiEndpoint;
use crate::derive::{auth_http_url, inject_system_fields, OutboundRelay, SystemFields};
use crate::error::{store_err, ControlError};
use crate::keys;
use crate::storage::{ConfigRecord, Store};
use crate::supervisor::NodeRole;

/// Typed view over the persisted settings.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn Store>,
}

impl Settings {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Write first-boot defaults for keys that do not exist yet.
    pub fn seed_defaults(&self) -> Result<(), ControlError> {
        self.store
            .seed_config(&keys::default_records())
            .map_err(store_err)
    }

    pub fn record(&self, key: &str) -> Result<Option<ConfigRecord>, ControlError> {
        self.store.get_config(key).map_err(store_err)
    }

    /// Stored value, empty when the key is absent.
    pub fn value(&self, key: &str) -> Result<String, ControlError> {
        Ok(self.record(key)?.map(|r| r.value).unwrap_or_default())
    }

    pub fn flag(&self, key: &str) -> Result<bool, ControlError> {
        Ok(self.value(key)? == "1")
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), ControlError> {
        self.store.update_config(&[(key, value)]).map_err(store_err)
    }

    pub fn set_flag(&self, key: &str, on: bool) -> Result<(), ControlError> {
        self.set(key, if on { "1" } else { "0" })
    }

    pub fn set_many(&self, values: &[(&str, &str)]) -> Result<(), ControlError> {
        self.store.update_config(values).map_err(store_err)
    }

    /// Stored base config, as written (no injection).
    pub fn base_config(&self) -> Result<ServerConfig, ControlError> {
        Ok(ServerConfig::from_yaml(&self.value(keys::HYSTERIA2_CONFIG)?)?)
    }

    /// Persist the base config with the system fields re-injected.
    pub fn store_base_config(
        &self,
        config: &ServerConfig,
        system: &SystemFields,
    ) -> Result<ServerConfig, ControlError> {
        let mut config = config.clone();
        inject_system_fields(&mut config, system);
        self.set(keys::HYSTERIA2_CONFIG, &config.to_yaml()?)?;
        Ok(config)
    }

    /// Last materialized secondary config.
    pub fn secondary_config(&self) -> Result<ServerConfig, ControlError> {
        Ok(ServerConfig::from_yaml(&self.value(keys::NODE2_CONFIG)?)?)
    }

    pub fn store_secondary_config(&self, config: &ServerConfig) -> Result<(), ControlError> {
        self.set(keys::NODE2_CONFIG, &config.to_yaml()?)
    }

    pub fn outbound(&self) -> Result<OutboundRelay, ControlError> {
        Ok(OutboundRelay {
            addr: self.value(keys::SOCKS5_ADDR)?,
            username: self.value(keys::SOCKS5_USER)?,
            password: self.value(keys::SOCKS5_PASS)?,
        })
    }

    pub fn store_outbound(&self, relay: &OutboundRelay) -> Result<(), ControlError> {
        self.set_many(&[
            (keys::SOCKS5_ADDR, relay.addr.trim()),
            (keys::SOCKS5_USER, &relay.username),
            (keys::SOCKS5_PASS, &relay.password),
        ])
    }

    pub fn secondary_enabled(&self) -> Result<bool, ControlError> {
        self.flag(keys::NODE2_ENABLE)
    }

    pub fn primary_enabled(&self) -> Result<bool, ControlError> {
        self.flag(keys::HYSTERIA2_ENABLE)
    }

    pub fn web_port(&self) -> Result<u16, ControlError> {
        let raw = self.value(keys::HUI_WEB_PORT)?;
        if raw.trim().is_empty() {
            return Err(ControlError::MissingDependency(keys::HUI_WEB_PORT.to_string()));
        }
        raw.trim()
            .parse()
            .map_err(|_| ControlError::InvalidConfig(format!("web port is not a port: {raw}")))
    }

    pub fn web_context(&self) -> Result<String, ControlError> {
        self.value(keys::HUI_WEB_CONTEXT)
    }

    pub fn web_tls(&self) -> Result<bool, ControlError> {
        Ok(!self.value(keys::HUI_CRT_PATH)?.is_empty() && !self.value(keys::HUI_KEY_PATH)?.is_empty())
    }

    /// Shared secret for the traffic stats API.
    pub fn secret(&self) -> Result<String, ControlError> {
        let secret = self.value(keys::JWT_SECRET)?;
        if secret.is_empty() {
            return Err(ControlError::MissingDependency(keys::JWT_SECRET.to_string()));
        }
        Ok(secret)
    }

    /// Current values injected into every node config.
    pub fn system_fields(&self) -> Result<SystemFields, ControlError> {
        Ok(SystemFields {
            auth_url: auth_http_url(self.web_port()?, self.web_tls()?, &self.web_context()?),
            secret: self.secret()?,
        })
    }

    /// Control API of `role`, derived from the stored base config.
    pub fn api_endpoint(&self, role: NodeRole) -> Result<ApiEndpoint, ControlError> {
        let base = self.base_config()?;
        let listen = base
            .traffic_stats_listen()
            .ok_or_else(|| ControlError::InvalidConfig("trafficStats.listen is not set".into()))?;
        let addr = ListenAddr::parse(listen)?.shifted(role.port_offset())?;
        ApiEndpoint::from_listen(&addr.to_string(), self.secret()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    fn settings() -> Settings {
        let settings = Settings::new(Arc::new(SqliteStore::open_memory().unwrap()));
        settings.seed_defaults().unwrap();
        settings
    }

    #[test]
    fn seeded_defaults_form_a_usable_system() {
        let settings = settings();
        let system = settings.system_fields().unwrap();
        assert_eq!(system.auth_url, "http://127.0.0.1:8081/hui/hysteria2/auth");
        assert_eq!(system.secret.len(), 32);
        assert_eq!(settings.base_config().unwrap().listen.as_deref(), Some(":443"));
        assert!(!settings.primary_enabled().unwrap());
        assert!(!settings.outbound().unwrap().is_configured());
    }

    #[test]
    fn https_only_with_both_cert_and_key() {
        let settings = settings();
        settings.set(keys::HUI_CRT_PATH, "/etc/hui/a.crt").unwrap();
        assert!(!settings.web_tls().unwrap());
        settings.set(keys::HUI_KEY_PATH, "/etc/hui/a.key").unwrap();
        assert!(settings.system_fields().unwrap().auth_url.starts_with("https://"));
    }

    #[test]
    fn missing_secret_is_missing_dependency() {
        let settings = settings();
        settings.set(keys::JWT_SECRET, "").unwrap();
        assert!(matches!(
            settings.system_fields(),
            Err(ControlError::MissingDependency(_))
        ));
    }

    #[test]
    fn stored_base_always_carries_system_fields() {
        let settings = settings();
        let mut cfg = settings.base_config().unwrap();
        cfg.auth = Some(hui_schema::Auth::http_callback("http://evil.example/auth"));
        let system = settings.system_fields().unwrap();
        settings.store_base_config(&cfg, &system).unwrap();

        let stored = settings.base_config().unwrap();
        assert_eq!(stored.auth_http_url(), Some(system.auth_url.as_str()));
        assert_eq!(
            stored.traffic_stats.and_then(|t| t.secret),
            Some(system.secret)
        );
    }

    #[test]
    fn secondary_endpoint_is_one_port_up() {
        let settings = settings();
        let ep = settings.api_endpoint(NodeRole::Secondary).unwrap();
        assert_eq!(ep.base_url, "http://127.0.0.1:7654");
    }
}
