use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use hui_schema::{ListenAddr, ServerConfig};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::accounts::AccessDowngrade;
use crate::binary::BinaryAcquirer;
use crate::derive::{derive_node_config, inject_system_fields, OutboundRelay};
use crate::error::{store_err, ControlError};
use crate::events::{publish, ControlEvent, EventSender};
use crate::keys;
use crate::port_hopping::{parse_port_ranges, validate_port_hopping, PortForwarder};
use crate::settings::Settings;
use crate::storage::ConfigRecord;
use crate::supervisor::{Node, NodeRole, ProcessSupervisor};
use crate::traffic::parse_reset_schedule;

/// Keys only the dedicated operations may write.
const MANAGED_KEYS: &[&str] = &[
    keys::HYSTERIA2_CONFIG,
    keys::JWT_SECRET,
    keys::NODE2_ENABLE,
    keys::NODE2_CONFIG,
    keys::NODE2_DOWNGRADE_PENDING,
    keys::SOCKS5_ADDR,
    keys::SOCKS5_USER,
    keys::SOCKS5_PASS,
];

/// One setting an operator wants to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: String,
}

impl ConfigUpdate {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Side effects started by a change.
///
/// Restarts and the access downgrade run in the background; await
/// [`join`](Self::join) to observe them, or drop the outcome.
#[derive(Debug, Default)]
pub struct ChangeOutcome {
    pub restarts: Vec<(NodeRole, JoinHandle<Result<(), ControlError>>)>,
    pub downgrade: Option<JoinHandle<()>>,
    pub port_hopping_reset: bool,
    pub host_restart: bool,
    /// Non-blocking failures, such as a secondary that would not stop.
    pub failures: Vec<(NodeRole, ControlError)>,
}

impl ChangeOutcome {
    pub fn restarted(&self) -> Vec<NodeRole> {
        self.restarts.iter().map(|(role, _)| *role).collect()
    }

    pub async fn join(self) -> Vec<(NodeRole, Result<(), ControlError>)> {
        let (roles, handles): (Vec<_>, Vec<_>) = self.restarts.into_iter().unzip();
        let results = join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|err| Err(ControlError::Sys(format!("restart task: {err}"))))
            });
        let results: Vec<_> = roles.into_iter().zip(results).collect();
        if let Some(handle) = self.downgrade {
            if let Err(err) = handle.await {
                warn!(error = %err, "downgrade task failed");
            }
        }
        results
    }
}

/// Per-node results of an operation over both nodes.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub completed: Vec<NodeRole>,
    pub failures: Vec<(NodeRole, ControlError)>,
}

impl BulkOutcome {
    fn record(&mut self, role: NodeRole, result: Result<(), ControlError>) {
        match result {
            Ok(()) => self.completed.push(role),
            Err(err) => {
                warn!(node = %role, error = %err, kind = err.as_label(), "node operation failed");
                self.failures.push((role, err));
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure(&self, role: NodeRole) -> Option<&ControlError> {
        self.failures
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, err)| err)
    }

    /// First failure, if any.
    pub fn into_result(self) -> Result<(), ControlError> {
        match self.failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodesStatus {
    pub primary: bool,
    pub secondary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryStatus {
    pub enabled: bool,
    pub remark: String,
    pub port: Option<u16>,
    pub running: bool,
    pub outbound: OutboundRelay,
}

/// Collaborators of a [`NodeCoordinator`].
pub struct CoordinatorParts {
    pub settings: Settings,
    pub primary: Arc<Node>,
    pub secondary: Arc<Node>,
    pub binaries: Arc<dyn BinaryAcquirer>,
    pub forwarder: Arc<dyn PortForwarder>,
    pub downgrade: Arc<AccessDowngrade>,
    pub events: EventSender,
    pub binary_path: PathBuf,
}

/// Decides which node restarts when settings change.
///
/// Validation and persistence run on the caller's task. Restarts are
/// spawned and handed back in a [`ChangeOutcome`]. Each node is only ever
/// touched through its own lock, so work on one node never waits on the
/// other.
#[derive(Clone)]
pub struct NodeCoordinator {
    settings: Settings,
    primary: Arc<Node>,
    secondary: Arc<Node>,
    binaries: Arc<dyn BinaryAcquirer>,
    forwarder: Arc<dyn PortForwarder>,
    downgrade: Arc<AccessDowngrade>,
    events: EventSender,
    binary_path: PathBuf,
}

impl NodeCoordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            settings: parts.settings,
            primary: parts.primary,
            secondary: parts.secondary,
            binaries: parts.binaries,
            forwarder: parts.forwarder,
            downgrade: parts.downgrade,
            events: parts.events,
            binary_path: parts.binary_path,
        }
    }

    pub fn node(&self, role: NodeRole) -> &Arc<Node> {
        match role {
            NodeRole::Primary => &self.primary,
            NodeRole::Secondary => &self.secondary,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ---- node lifecycle ---------------------------------------------------

    /// Freshly derived config for `role` from the stored settings.
    pub fn derive(&self, role: NodeRole) -> Result<ServerConfig, ControlError> {
        let base = self.settings.base_config()?;
        let system = self.settings.system_fields()?;
        match role {
            NodeRole::Primary => derive_node_config(&base, role, None, &system),
            NodeRole::Secondary => {
                let relay = self.settings.outbound()?;
                if !relay.is_configured() {
                    return Err(ControlError::InvalidConfig(
                        "secondary node needs an outbound relay address".to_string(),
                    ));
                }
                derive_node_config(&base, role, Some(&relay), &system)
            }
        }
    }

    pub async fn start_node(&self, role: NodeRole) -> Result<(), ControlError> {
        self.ensure_binary(role).await?;
        let mut supervisor = self.node(role).lock().await;
        self.start_locked(role, &mut supervisor).await
    }

    /// Graceful stop, force-killing on timeout. A timeout is still reported
    /// as `StopFailed`; the node stays running only if the kill fails too.
    pub async fn stop_node(&self, role: NodeRole) -> Result<(), ControlError> {
        let mut supervisor = self.node(role).lock().await;
        self.stop_locked(role, &mut supervisor).await
    }

    pub async fn restart_node(&self, role: NodeRole) -> Result<(), ControlError> {
        self.ensure_binary(role).await?;
        let mut supervisor = self.node(role).lock().await;
        if let Err(err) = self.stop_locked(role, &mut supervisor).await {
            if supervisor.is_running() {
                return Err(err);
            }
            warn!(node = %role, error = %err, "stop before restart failed");
        }
        self.start_locked(role, &mut supervisor).await
    }

    async fn ensure_binary(&self, role: NodeRole) -> Result<(), ControlError> {
        self.binaries
            .ensure_present(&self.binary_path)
            .await
            .map_err(|err| ControlError::start_failed(role, err.to_string()))
    }

    async fn start_locked(
        &self,
        role: NodeRole,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<(), ControlError> {
        if supervisor.is_running() {
            return Ok(());
        }
        let config = self.derive(role)?;
        self.persist_derived(role, &config)?;
        supervisor.start(&config).await?;
        publish(&self.events, ControlEvent::NodeStarted { node: role });
        Ok(())
    }

    async fn stop_locked(
        &self,
        role: NodeRole,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<(), ControlError> {
        if !supervisor.is_running() {
            return Ok(());
        }
        let result = match supervisor.stop().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(node = %role, error = %err, "graceful stop failed, killing");
                supervisor.release().await?;
                Err(err)
            }
        };
        publish(&self.events, ControlEvent::NodeStopped { node: role });
        result
    }

    /// Keep the stored documents in line with what the node runs.
    fn persist_derived(&self, role: NodeRole, config: &ServerConfig) -> Result<(), ControlError> {
        match role {
            NodeRole::Primary => {
                if self.settings.base_config()? != *config {
                    self.settings.set(keys::HYSTERIA2_CONFIG, &config.to_yaml()?)?;
                }
                Ok(())
            }
            NodeRole::Secondary => self.settings.store_secondary_config(config),
        }
    }

    /// Restart `role` in the background if it is running now.
    ///
    /// The task re-checks under the node lock, so a node stopped in the
    /// meantime stays stopped.
    async fn restart_if_running(&self, role: NodeRole, outcome: &mut ChangeOutcome) {
        if !self.node(role).is_running().await {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = this.restart_running(role).await;
            if let Err(err) = &result {
                error!(node = %role, error = %err, "background restart failed");
            }
            result
        });
        outcome.restarts.push((role, handle));
    }

    async fn restart_running(&self, role: NodeRole) -> Result<(), ControlError> {
        self.ensure_binary(role).await?;
        let mut supervisor = self.node(role).lock().await;
        if !supervisor.is_running() {
            return Ok(());
        }
        if let Err(err) = self.stop_locked(role, &mut supervisor).await {
            // The old process still holds the node with the old config.
            if supervisor.is_running() {
                return Err(err);
            }
            warn!(node = %role, error = %err, "stop before restart failed");
        }
        self.start_locked(role, &mut supervisor).await?;
        info!(node = %role, "node restarted with fresh config");
        Ok(())
    }

    // ---- settings ---------------------------------------------------------

    /// Validate and store a batch of plain settings.
    ///
    /// The whole batch is validated before anything is written. Port hopping
    /// rules are reinstalled before the primary enable flag is applied, and a
    /// host restart is requested when any host-level key actually changed.
    pub async fn update_configs(
        &self,
        updates: &[ConfigUpdate],
    ) -> Result<ChangeOutcome, ControlError> {
        for update in updates {
            self.validate_update(update)?;
        }

        let mut outcome = ChangeOutcome::default();
        let mut host_keys = Vec::new();
        let mut hopping_changed = false;
        let mut enable = None;
        let mut plain: Vec<(&str, &str)> = Vec::new();
        for update in updates {
            if update.key == keys::HYSTERIA2_ENABLE {
                enable = Some(update.value == "1");
                continue;
            }
            if self.settings.value(&update.key)? != update.value {
                if keys::HOST_RESTART_KEYS.contains(&update.key.as_str()) {
                    host_keys.push(update.key.clone());
                }
                if update.key == keys::HYSTERIA2_CONFIG_PORT_HOPPING {
                    hopping_changed = true;
                }
            }
            plain.push((update.key.as_str(), update.value.as_str()));
        }

        if !plain.is_empty() {
            self.settings.set_many(&plain)?;
        }
        // Stored host settings need the restart even if a later step fails.
        if !host_keys.is_empty() {
            self.publish_host_restart(host_keys);
            outcome.host_restart = true;
        }
        if hopping_changed {
            self.reset_port_hopping().await?;
            outcome.port_hopping_reset = true;
        }
        if let Some(on) = enable {
            self.set_primary_enabled(on).await?;
        }
        Ok(outcome)
    }

    /// Restore plain settings from an export, then restart the host.
    ///
    /// Node config documents are refused; they go through
    /// [`import_base_config`](Self::import_base_config).
    pub async fn import_settings(
        &self,
        records: &[ConfigRecord],
    ) -> Result<ChangeOutcome, ControlError> {
        for record in records {
            self.validate_import(record)?;
        }
        self.settings
            .store()
            .upsert_config(records)
            .map_err(store_err)?;
        info!(count = records.len(), "settings imported");
        self.publish_host_restart(records.iter().map(|r| r.key.clone()).collect());
        Ok(ChangeOutcome {
            host_restart: true,
            ..Default::default()
        })
    }

    /// Ask the host process to exit so its supervisor restarts it.
    pub fn request_host_restart(&self) {
        self.publish_host_restart(Vec::new());
    }

    fn publish_host_restart(&self, keys: Vec<String>) {
        info!(keys = ?keys, "requesting host restart");
        publish(&self.events, ControlEvent::HostRestartRequested { keys });
    }

    fn validate_import(&self, record: &ConfigRecord) -> Result<(), ControlError> {
        let key = record.key.as_str();
        if keys::NODE_CONFIG_KEYS.contains(&key) {
            return Err(ControlError::InvalidConfig(format!(
                "{key} cannot be imported as a plain setting"
            )));
        }
        match key {
            keys::SOCKS5_ADDR => OutboundRelay {
                addr: record.value.clone(),
                ..Default::default()
            }
            .validate(),
            key if MANAGED_KEYS.contains(&key) => Ok(()),
            _ => self.validate_update(&ConfigUpdate::new(key, record.value.as_str())),
        }
    }

    fn validate_update(&self, update: &ConfigUpdate) -> Result<(), ControlError> {
        let value = update.value.as_str();
        match update.key.as_str() {
            keys::HUI_WEB_PORT => {
                let port: u16 = value.trim().parse().map_err(|_| {
                    ControlError::InvalidConfig(format!("web port is not a port: {value}"))
                })?;
                if self.settings.web_port().ok() != Some(port) {
                    ensure_tcp_port_free(port)?;
                }
                Ok(())
            }
            keys::HUI_CRT_PATH | keys::HUI_KEY_PATH => {
                if !value.is_empty() && !Path::new(value).exists() {
                    return Err(ControlError::InvalidConfig(format!(
                        "{} does not exist: {value}",
                        update.key
                    )));
                }
                Ok(())
            }
            keys::RESET_TRAFFIC_CRON => {
                if !value.trim().is_empty() {
                    parse_reset_schedule(value)?;
                }
                Ok(())
            }
            keys::HYSTERIA2_CONFIG_PORT_HOPPING => validate_port_hopping(value),
            keys::HYSTERIA2_ENABLE => {
                match value {
                    "0" => Ok(()),
                    "1" if self.settings.base_config()?.listen_addr().is_some() => Ok(()),
                    "1" => Err(ControlError::InvalidConfig(
                        "hysteria2 config has no listen address".to_string(),
                    )),
                    other => Err(ControlError::InvalidConfig(format!(
                        "{} must be 0 or 1, got {other}",
                        update.key
                    ))),
                }
            }
            keys::TELEGRAM_ENABLE => match value {
                "0" | "1" => Ok(()),
                other => Err(ControlError::InvalidConfig(format!(
                    "{} must be 0 or 1, got {other}",
                    update.key
                ))),
            },
            key if MANAGED_KEYS.contains(&key) => Err(ControlError::InvalidConfig(format!(
                "{key} cannot be set directly"
            ))),
            _ => Ok(()),
        }
    }

    /// Start or stop the primary and store the flag.
    pub async fn set_primary_enabled(&self, on: bool) -> Result<(), ControlError> {
        if on {
            if self.settings.base_config()?.listen_addr().is_none() {
                return Err(ControlError::InvalidConfig(
                    "hysteria2 config has no listen address".to_string(),
                ));
            }
            self.start_node(NodeRole::Primary).await?;
            return self.settings.set_flag(keys::HYSTERIA2_ENABLE, true);
        }
        let stopped = self.stop_node(NodeRole::Primary).await;
        self.settings.set_flag(keys::HYSTERIA2_ENABLE, false)?;
        stopped
    }

    /// Read a setting. The primary enable flag is reconciled with the
    /// actual process state first.
    pub async fn config(&self, key: &str) -> Result<Option<ConfigRecord>, ControlError> {
        if key == keys::HYSTERIA2_ENABLE {
            self.reconcile_primary_flag().await?;
        }
        self.settings.record(key)
    }

    pub async fn configs(&self, keys_wanted: &[&str]) -> Result<Vec<ConfigRecord>, ControlError> {
        if keys_wanted.contains(&keys::HYSTERIA2_ENABLE) {
            self.reconcile_primary_flag().await?;
        }
        self.settings
            .store()
            .list_config(keys_wanted)
            .map_err(store_err)
    }

    /// All plain settings, without the node config documents.
    pub fn export_settings(&self) -> Result<Vec<ConfigRecord>, ControlError> {
        self.settings
            .store()
            .list_config_excluding(keys::NODE_CONFIG_KEYS)
            .map_err(store_err)
    }

    async fn reconcile_primary_flag(&self) -> Result<(), ControlError> {
        let running = self.primary.is_running().await;
        if self.settings.primary_enabled()? != running {
            self.settings.set_flag(keys::HYSTERIA2_ENABLE, running)?;
        }
        Ok(())
    }

    // ---- base config --------------------------------------------------------

    /// Stored base config with the system fields applied.
    pub fn base_config(&self) -> Result<ServerConfig, ControlError> {
        let mut base = self.settings.base_config()?;
        inject_system_fields(&mut base, &self.settings.system_fields()?);
        Ok(base)
    }

    /// Replace the shared base config.
    ///
    /// Both nodes derive from it, so every running node restarts. Forwarding
    /// rules follow a primary port change first.
    pub async fn update_base_config(
        &self,
        config: &ServerConfig,
    ) -> Result<ChangeOutcome, ControlError> {
        let listen = config
            .listen_addr()
            .ok_or_else(|| ControlError::InvalidConfig("listen is required".to_string()))?;
        let new_port = ListenAddr::parse(listen)?.port;
        if let Some(stats) = config.traffic_stats_listen() {
            ListenAddr::parse(stats)?;
        }
        let system = self.settings.system_fields()?;

        let old_port = self
            .settings
            .base_config()?
            .listen_addr()
            .and_then(|l| ListenAddr::parse(l).ok())
            .map(|addr| addr.port);
        self.settings.store_base_config(config, &system)?;

        let mut outcome = ChangeOutcome::default();
        let hopping = self.settings.value(keys::HYSTERIA2_CONFIG_PORT_HOPPING)?;
        if old_port != Some(new_port) && !hopping.trim().is_empty() {
            self.reset_port_hopping().await?;
            outcome.port_hopping_reset = true;
        }
        for role in NodeRole::ALL {
            self.restart_if_running(role, &mut outcome).await;
        }
        Ok(outcome)
    }

    /// Import a base config from YAML; same path as an update.
    pub async fn import_base_config(&self, yaml: &str) -> Result<ChangeOutcome, ControlError> {
        let config = ServerConfig::from_yaml(yaml)?;
        self.update_base_config(&config).await
    }

    pub fn export_base_config(&self) -> Result<String, ControlError> {
        Ok(self.base_config()?.to_yaml()?)
    }

    // ---- secondary node -------------------------------------------------------

    /// Config the secondary would run with right now.
    pub fn secondary_config(&self) -> Result<ServerConfig, ControlError> {
        self.derive(NodeRole::Secondary)
    }

    pub fn outbound(&self) -> Result<OutboundRelay, ControlError> {
        self.settings.outbound()
    }

    /// Replace the secondary's relay; only the secondary restarts.
    pub async fn update_outbound(
        &self,
        relay: &OutboundRelay,
    ) -> Result<ChangeOutcome, ControlError> {
        self.update_secondary_config(None, relay).await
    }

    /// Replace the secondary's own settings, its remark and relay.
    ///
    /// The primary is never touched; the secondary restarts only if it is
    /// running.
    pub async fn update_secondary_config(
        &self,
        remark: Option<&str>,
        relay: &OutboundRelay,
    ) -> Result<ChangeOutcome, ControlError> {
        relay.validate()?;
        if !relay.is_configured() && self.settings.secondary_enabled()? {
            return Err(ControlError::InvalidConfig(
                "the secondary node is enabled and needs a relay address".to_string(),
            ));
        }
        if let Some(remark) = remark {
            self.settings.set(keys::NODE2_REMARK, remark)?;
        }
        self.settings.store_outbound(relay)?;
        let mut outcome = ChangeOutcome::default();
        self.restart_if_running(NodeRole::Secondary, &mut outcome)
            .await;
        Ok(outcome)
    }

    /// The secondary's materialized config as YAML.
    pub fn export_secondary_config(&self) -> Result<String, ControlError> {
        Ok(self.derive(NodeRole::Secondary)?.to_yaml()?)
    }

    /// Enable or disable the secondary node.
    ///
    /// Enabling needs a relay address and a derivable config, finishes any
    /// pending access downgrade, stores the flag and then starts the node; a
    /// start failure leaves the flag set and is reported as `StartFailed`. Disabling stores the flag together with a pending downgrade
    /// marker, stops the node and runs the downgrade in the background.
    pub async fn toggle_secondary(
        &self,
        enable: bool,
        remark: Option<&str>,
    ) -> Result<ChangeOutcome, ControlError> {
        let mut outcome = ChangeOutcome::default();
        if enable {
            // Needs a relay and a derivable config before anything is stored.
            self.derive(NodeRole::Secondary)?;
            self.downgrade.run_pending().await?;
            if let Some(remark) = remark {
                self.settings.set(keys::NODE2_REMARK, remark)?;
            }
            self.settings.set_flag(keys::NODE2_ENABLE, true)?;
            self.start_node(NodeRole::Secondary)
                .await
                .map_err(|err| match err {
                    ControlError::StartFailed { .. } => err,
                    other => ControlError::start_failed(NodeRole::Secondary, other.to_string()),
                })?;
            info!("secondary node enabled");
            return Ok(outcome);
        }

        if let Some(remark) = remark {
            self.settings.set(keys::NODE2_REMARK, remark)?;
        }
        self.settings.set_many(&[
            (keys::NODE2_ENABLE, "0"),
            (keys::NODE2_DOWNGRADE_PENDING, "1"),
        ])?;
        if let Err(err) = self.stop_node(NodeRole::Secondary).await {
            outcome.failures.push((NodeRole::Secondary, err));
        }
        outcome.downgrade = Some(self.downgrade.spawn());
        info!("secondary node disabled");
        Ok(outcome)
    }

    pub async fn secondary_status(&self) -> Result<SecondaryStatus, ControlError> {
        let port = self
            .settings
            .base_config()?
            .listen_addr()
            .and_then(|l| ListenAddr::parse(l).ok())
            .and_then(|addr| addr.shifted(NodeRole::Secondary.port_offset()).ok())
            .map(|addr| addr.port);
        Ok(SecondaryStatus {
            enabled: self.settings.secondary_enabled()?,
            remark: self.settings.value(keys::NODE2_REMARK)?,
            port,
            running: self.secondary.is_running().await,
            outbound: self.settings.outbound()?,
        })
    }

    pub async fn nodes_status(&self) -> NodesStatus {
        NodesStatus {
            primary: self.primary.is_running().await,
            secondary: self.secondary.is_running().await,
        }
    }

    // ---- port hopping -----------------------------------------------------------

    async fn reset_port_hopping(&self) -> Result<(), ControlError> {
        let value = self.settings.value(keys::HYSTERIA2_CONFIG_PORT_HOPPING)?;
        let ranges = parse_port_ranges(&value)?;
        let target = match self.settings.base_config()?.listen_addr() {
            Some(listen) => ListenAddr::parse(listen)?.port,
            None if ranges.is_empty() => 0,
            None => {
                return Err(ControlError::InvalidConfig(
                    "port hopping needs a primary listen port".to_string(),
                ))
            }
        };
        self.forwarder
            .reset(&ranges, target)
            .await
            .map_err(|err| ControlError::Sys(format!("port hopping: {err}")))
    }

    /// Reinstall forwarding rules. Rules always target the primary.
    pub async fn init_port_hopping(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        outcome.record(NodeRole::Primary, self.reset_port_hopping().await);
        outcome
    }

    // ---- bulk ---------------------------------------------------------------------

    /// Start the primary, and the secondary when enabled.
    pub async fn start_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        outcome.record(NodeRole::Primary, self.start_node(NodeRole::Primary).await);
        match self.settings.secondary_enabled() {
            Ok(true) => outcome.record(
                NodeRole::Secondary,
                self.start_node(NodeRole::Secondary).await,
            ),
            Ok(false) => {}
            Err(err) => outcome.record(NodeRole::Secondary, Err(err)),
        }
        outcome
    }

    pub async fn stop_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for role in [NodeRole::Secondary, NodeRole::Primary] {
            outcome.record(role, self.stop_node(role).await);
        }
        outcome
    }

    /// Force-kill both nodes, e.g. on shutdown.
    pub async fn release_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for role in [NodeRole::Secondary, NodeRole::Primary] {
            let result = self.node(role).lock().await.release().await;
            outcome.record(role, result);
        }
        outcome
    }

    /// Bring the nodes to their stored desired state at startup.
    ///
    /// Only store faults fail boot; node failures are logged and returned.
    pub async fn boot(&self) -> Result<BulkOutcome, ControlError> {
        self.settings.seed_defaults()?;
        if let Err(err) = self.binaries.ensure_present(&self.binary_path).await {
            warn!(error = %err, "hysteria2 binary unavailable");
        }
        if self.downgrade.is_pending()? {
            if let Err(err) = self.downgrade.run_pending().await {
                warn!(error = %err, "resuming node access downgrade failed");
            }
        }
        if !self
            .settings
            .value(keys::HYSTERIA2_CONFIG_PORT_HOPPING)?
            .trim()
            .is_empty()
        {
            if let Err(err) = self.reset_port_hopping().await {
                warn!(error = %err, "port hopping init failed");
            }
        }

        let mut outcome = BulkOutcome::default();
        if self.settings.primary_enabled()? {
            outcome.record(NodeRole::Primary, self.start_node(NodeRole::Primary).await);
        }
        if self.settings.secondary_enabled()? {
            outcome.record(
                NodeRole::Secondary,
                self.start_node(NodeRole::Secondary).await,
            );
        }
        Ok(outcome)
    }
}

fn ensure_tcp_port_free(port: u16) -> Result<(), ControlError> {
    match std::net::TcpListener::bind(("0.0.0.0", port)) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => Err(
            ControlError::InvalidConfig(format!("port {port} is already in use")),
        ),
        Err(_) => Ok(()),
    }
}
