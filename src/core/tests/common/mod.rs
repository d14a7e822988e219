#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hui_core::keys;
use hui_core::storage::{AccountFilter, AccountRecord, NodeAccess};
use hui_core::{
    ApiEndpoint, BinaryAcquirer, Collaborators, ControlApi, ControlConfig, ControlError,
    ControlPlane, LaunchRequest, ManagedProcess, NodeRole, PortForwarder, PortRange,
    ProcessLauncher, SqliteStore,
};
use hui_schema::{OnlineUsers, TrafficSnapshot};

// ── Process fakes ────────────────────────────────────────────────────

#[derive(Default)]
pub struct ProcState {
    pub exited: bool,
    /// Ignores SIGTERM; only a kill ends it.
    pub stuck: bool,
    /// Survives even a kill.
    pub unkillable: bool,
}

#[derive(Default)]
pub struct FakeLauncher {
    pub spawned: Mutex<Vec<(LaunchRequest, Arc<Mutex<ProcState>>)>>,
    /// Config file names whose processes ignore SIGTERM.
    pub stuck: Mutex<HashSet<&'static str>>,
    pub refuse: Mutex<bool>,
}

impl FakeLauncher {
    fn role_of(request: &LaunchRequest) -> NodeRole {
        let config = request.args.get(1).cloned().unwrap_or_default();
        if config.ends_with(NodeRole::Secondary.config_file_name()) {
            NodeRole::Secondary
        } else {
            NodeRole::Primary
        }
    }

    pub fn spawn_count(&self, role: NodeRole) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|(req, _)| Self::role_of(req) == role)
            .count()
    }

    pub fn last_request(&self, role: NodeRole) -> Option<LaunchRequest> {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(req, _)| Self::role_of(req) == role)
            .map(|(req, _)| req.clone())
    }

    pub fn make_stuck(&self, role: NodeRole) {
        self.stuck.lock().unwrap().insert(role.config_file_name());
        for (req, state) in self.spawned.lock().unwrap().iter() {
            if Self::role_of(req) == role {
                state.lock().unwrap().stuck = true;
            }
        }
    }

    /// Live processes of `role` ignore SIGTERM and SIGKILL.
    pub fn make_unkillable(&self, role: NodeRole) {
        for (req, state) in self.spawned.lock().unwrap().iter() {
            if Self::role_of(req) == role {
                let mut state = state.lock().unwrap();
                state.stuck = true;
                state.unkillable = true;
            }
        }
    }

    /// Simulate the process of `role` dying on its own.
    pub fn crash(&self, role: NodeRole) {
        for (req, state) in self.spawned.lock().unwrap().iter() {
            if Self::role_of(req) == role {
                state.lock().unwrap().exited = true;
            }
        }
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, request: &LaunchRequest) -> Result<Box<dyn ManagedProcess>, String> {
        if *self.refuse.lock().unwrap() {
            return Err("exec format error".to_string());
        }
        let stuck = self
            .stuck
            .lock()
            .unwrap()
            .contains(FakeLauncher::role_of(request).config_file_name());
        let state = Arc::new(Mutex::new(ProcState {
            exited: false,
            stuck,
            unkillable: false,
        }));
        let pid = {
            let mut spawned = self.spawned.lock().unwrap();
            spawned.push((request.clone(), state.clone()));
            spawned.len() as u32
        };
        Ok(Box::new(FakeProcess { pid, state }))
    }
}

struct FakeProcess {
    pid: u32,
    state: Arc<Mutex<ProcState>>,
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exited(&mut self) -> Result<bool, String> {
        Ok(self.state.lock().unwrap().exited)
    }

    fn terminate(&mut self) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        if !state.stuck {
            state.exited = true;
        }
        Ok(())
    }

    async fn wait_timeout(&mut self, _grace: Duration) -> Result<bool, String> {
        Ok(self.state.lock().unwrap().exited)
    }

    async fn kill(&mut self) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        if state.unkillable {
            return Err("operation not permitted".to_string());
        }
        state.exited = true;
        Ok(())
    }
}

// ── Other collaborators ──────────────────────────────────────────────

/// Creates an empty file where the binary should be.
#[derive(Default)]
pub struct FakeBinaries {
    pub calls: Mutex<usize>,
}

#[async_trait]
impl BinaryAcquirer for FakeBinaries {
    async fn ensure_present(&self, path: &Path) -> Result<(), ControlError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        if !path.exists() {
            std::fs::write(path, b"").unwrap();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeApi {
    pub online: Mutex<HashMap<String, OnlineUsers>>,
    pub traffic: Mutex<HashMap<String, TrafficSnapshot>>,
    pub kicked: Mutex<Vec<(String, Vec<String>)>>,
    pub down: Mutex<HashSet<String>>,
}

impl FakeApi {
    fn check(&self, endpoint: &ApiEndpoint) -> Result<(), ControlError> {
        if self.down.lock().unwrap().contains(&endpoint.base_url) {
            return Err(ControlError::Unreachable(endpoint.base_url.clone()));
        }
        Ok(())
    }

    pub fn set_online(&self, base_url: &str, user: &str, devices: i64) {
        self.online
            .lock()
            .unwrap()
            .entry(base_url.to_string())
            .or_default()
            .insert(user.to_string(), devices);
    }

    pub fn kicked_at(&self, base_url: &str) -> Vec<String> {
        self.kicked
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url == base_url)
            .flat_map(|(_, users)| users.clone())
            .collect()
    }
}

#[async_trait]
impl ControlApi for FakeApi {
    async fn online(&self, endpoint: &ApiEndpoint) -> Result<OnlineUsers, ControlError> {
        self.check(endpoint)?;
        Ok(self
            .online
            .lock()
            .unwrap()
            .get(&endpoint.base_url)
            .cloned()
            .unwrap_or_default())
    }

    async fn kick(&self, endpoint: &ApiEndpoint, usernames: &[String]) -> Result<(), ControlError> {
        self.check(endpoint)?;
        self.kicked
            .lock()
            .unwrap()
            .push((endpoint.base_url.clone(), usernames.to_vec()));
        Ok(())
    }

    async fn traffic(
        &self,
        endpoint: &ApiEndpoint,
        clear: bool,
    ) -> Result<TrafficSnapshot, ControlError> {
        self.check(endpoint)?;
        let mut traffic = self.traffic.lock().unwrap();
        let snapshot = traffic.get(&endpoint.base_url).cloned().unwrap_or_default();
        if clear {
            traffic.remove(&endpoint.base_url);
        }
        Ok(snapshot)
    }
}

#[derive(Default)]
pub struct FakeForwarder {
    pub resets: Mutex<Vec<(Vec<PortRange>, u16)>>,
}

#[async_trait]
impl PortForwarder for FakeForwarder {
    async fn reset(&self, ranges: &[PortRange], target_port: u16) -> Result<(), String> {
        self.resets
            .lock()
            .unwrap()
            .push((ranges.to_vec(), target_port));
        Ok(())
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub struct Harness {
    pub plane: ControlPlane,
    pub launcher: Arc<FakeLauncher>,
    pub binaries: Arc<FakeBinaries>,
    pub api: Arc<FakeApi>,
    pub forwarder: Arc<FakeForwarder>,
    pub dir: PathBuf,
    /// Primary listen port; the secondary uses the next one.
    pub port: u16,
    /// Primary traffic stats port.
    pub stats_port: u16,
}

impl Harness {
    pub fn primary_api(&self) -> String {
        format!("http://127.0.0.1:{}", self.stats_port)
    }

    pub fn secondary_api(&self) -> String {
        format!("http://127.0.0.1:{}", self.stats_port + 1)
    }

    pub fn configure_relay(&self) {
        self.plane
            .settings
            .set_many(&[
                (keys::SOCKS5_ADDR, "10.0.0.9:1080"),
                (keys::SOCKS5_USER, "relay"),
                (keys::SOCKS5_PASS, "relay-pw"),
            ])
            .unwrap();
    }

    /// Insert an account and return its id.
    pub fn add_account(&self, username: &str, access: NodeAccess) -> i64 {
        self.add_account_with(AccountRecord {
            username: username.to_string(),
            con_pass: format!("{username}.pw"),
            node_access: access,
            ..Default::default()
        })
    }

    pub fn add_account_with(&self, record: AccountRecord) -> i64 {
        let store = self.plane.settings.store();
        let username = record.username.clone();
        store.upsert_accounts(&[record]).unwrap();
        store
            .get_account(&AccountFilter::Username(username))
            .unwrap()
            .unwrap()
            .id
    }

    pub fn account(&self, id: i64) -> AccountRecord {
        self.plane
            .settings
            .store()
            .get_account(&AccountFilter::Id(id))
            .unwrap()
            .unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// A UDP port that was free a moment ago, with room for the secondary.
fn free_udp_port() -> u16 {
    loop {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = socket.local_addr().unwrap().port();
        if port < u16::MAX - 1 {
            return port;
        }
    }
}

pub fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = std::env::temp_dir().join(format!("hui-test-{}", uuid::Uuid::new_v4().simple()));
    let config = ControlConfig {
        bin_dir: dir.join("bin"),
        log_dir: dir.join("logs"),
        stop_grace: Duration::from_millis(20),
        start_probe: Duration::ZERO,
        ..Default::default()
    };

    let launcher = Arc::new(FakeLauncher::default());
    let binaries = Arc::new(FakeBinaries::default());
    let api = Arc::new(FakeApi::default());
    let forwarder = Arc::new(FakeForwarder::default());
    let parts = Collaborators {
        launcher: launcher.clone(),
        binaries: binaries.clone(),
        api: api.clone(),
        forwarder: forwarder.clone(),
    };

    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let plane = ControlPlane::new(store, config, parts);
    plane.settings.seed_defaults().unwrap();

    let port = free_udp_port();
    let stats_port = 17653;
    let base = format!("listen: :{port}\ntrafficStats:\n  listen: 127.0.0.1:{stats_port}\n");
    plane
        .settings
        .set(keys::HYSTERIA2_CONFIG, &base)
        .unwrap();

    Harness {
        plane,
        launcher,
        binaries,
        api,
        forwarder,
        dir,
        port,
        stats_port,
    }
}
