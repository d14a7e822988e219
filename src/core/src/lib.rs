mod accounts;
mod binary;
mod config;
mod control_api;
mod coordinator;
mod derive;
mod error;
mod events;
mod hui_config;
pub mod keys;
mod paths;
mod plane;
mod port_hopping;
mod server;
mod sessions;
mod settings;
pub mod storage;
mod subscription;
mod supervisor;
mod traffic;

pub use accounts::{validate_node_access, AccessDowngrade, RetryPolicy};
pub use binary::{BinaryAcquirer, ReleaseDownloader};
pub use config::ControlConfig;
pub use control_api::{ApiEndpoint, ControlApi, HttpControlApi};
pub use coordinator::{
    BulkOutcome, ChangeOutcome, ConfigUpdate, CoordinatorParts, NodeCoordinator, NodesStatus,
    SecondaryStatus,
};
pub use derive::{
    acme_cert_paths, auth_http_url, derive_node_config, inject_system_fields,
    materialize, CertPaths, OutboundRelay, SystemFields, RELAY_OUTBOUND_NAME,
};
pub use error::ControlError;
pub use events::{event_channel, ControlEvent, EventSender};
pub use hui_config::HuiConfig;
pub use paths::{hui_config_path, hui_home_dir, resolve_path, user_home_dir};
pub use plane::{Collaborators, ControlPlane};
pub use port_hopping::{
    parse_port_ranges, plan_rules, validate_port_hopping, IptablesForwarder, PortForwarder,
    PortRange, PORT_HOPPING_CHAIN,
};
pub use server::build_router;
pub use sessions::SessionAccounting;
pub use settings::Settings;
pub use storage::{SqliteStore, Store};
pub use subscription::{
    ClientFormat, NodeDescriptor, NodeUrl, RenderedSubscription, SubscriptionGenerator,
};
pub use supervisor::{
    LaunchRequest, ManagedProcess, Node, NodeRole, NodeState, ProcessLauncher, ProcessSupervisor,
    TokioLauncher,
};
pub use traffic::{next_reset_after, parse_reset_schedule, spawn_traffic_reset, TrafficCollector};
