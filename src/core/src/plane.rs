use std::sync::Arc;

use axum::Router;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::accounts::AccessDowngrade;
use crate::binary::{BinaryAcquirer, ReleaseDownloader};
use crate::config::ControlConfig;
use crate::control_api::{ControlApi, HttpControlApi};
use crate::coordinator::{CoordinatorParts, NodeCoordinator};
use crate::error::ControlError;
use crate::events::{event_channel, ControlEvent, EventSender};
use crate::keys;
use crate::port_hopping::{IptablesForwarder, PortForwarder};
use crate::server::build_router;
use crate::sessions::SessionAccounting;
use crate::settings::Settings;
use crate::storage::Store;
use crate::subscription::SubscriptionGenerator;
use crate::supervisor::{Node, NodeRole, ProcessLauncher, ProcessSupervisor, TokioLauncher};
use crate::traffic::{spawn_traffic_reset, TrafficCollector};

/// Outside-world seams of the control plane.
pub struct Collaborators {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub binaries: Arc<dyn BinaryAcquirer>,
    pub api: Arc<dyn ControlApi>,
    pub forwarder: Arc<dyn PortForwarder>,
}

impl Collaborators {
    /// Real processes, release downloads, HTTP and iptables.
    pub fn production(config: &ControlConfig) -> Result<Self, ControlError> {
        Ok(Self {
            launcher: Arc::new(TokioLauncher),
            binaries: Arc::new(ReleaseDownloader::new(config.download_url.clone())?),
            api: Arc::new(HttpControlApi::new(config.api_timeout)?),
            forwarder: Arc::new(IptablesForwarder::default()),
        })
    }
}

/// Every component wired to one store and one pair of nodes.
pub struct ControlPlane {
    pub settings: Settings,
    pub coordinator: NodeCoordinator,
    pub sessions: Arc<SessionAccounting>,
    pub subscriptions: Arc<SubscriptionGenerator>,
    pub collector: Arc<TrafficCollector>,
    config: ControlConfig,
    events: EventSender,
}

impl ControlPlane {
    pub fn new(store: Arc<dyn Store>, config: ControlConfig, parts: Collaborators) -> Self {
        let settings = Settings::new(store);
        let events = event_channel();
        let node = |role| {
            Arc::new(Node::new(ProcessSupervisor::new(
                role,
                &config,
                parts.launcher.clone(),
            )))
        };
        let primary = node(NodeRole::Primary);
        let secondary = node(NodeRole::Secondary);

        let coordinator = NodeCoordinator::new(CoordinatorParts {
            settings: settings.clone(),
            primary: primary.clone(),
            secondary: secondary.clone(),
            binaries: parts.binaries,
            forwarder: parts.forwarder,
            downgrade: Arc::new(AccessDowngrade::new(settings.clone())),
            events: events.clone(),
            binary_path: config.binary_path(),
        });
        let sessions = Arc::new(SessionAccounting::new(
            settings.clone(),
            primary.clone(),
            secondary.clone(),
            parts.api.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionGenerator::new(settings.clone()));
        let collector = Arc::new(TrafficCollector::new(
            settings.clone(),
            vec![primary, secondary],
            parts.api,
        ));

        Self {
            settings,
            coordinator,
            sessions,
            subscriptions,
            collector,
            config,
            events,
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControlEvent> {
        self.events.subscribe()
    }

    /// Router for the auth callback and subscriptions under the stored web
    /// context.
    pub fn router(&self) -> Result<Router, ControlError> {
        Ok(build_router(
            self.sessions.clone(),
            self.subscriptions.clone(),
            &self.settings.web_context()?,
        ))
    }

    /// Start traffic collection and the scheduled reset.
    pub fn spawn_background(&self) -> Result<Vec<JoinHandle<()>>, ControlError> {
        let mut handles = vec![self.collector.clone().spawn(self.config.traffic_interval)];
        let cron = self.settings.value(keys::RESET_TRAFFIC_CRON)?;
        if let Some(handle) = spawn_traffic_reset(self.settings.clone(), &cron)? {
            handles.push(handle);
        }
        Ok(handles)
    }
}
