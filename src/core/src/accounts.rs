//! Account access levels tied to the secondary node.
//!
//! Disabling the secondary must drop every level-2 account back to level 1.
//! The downgrade runs in the background, but it is recorded as pending in
//! the settings table first, so a crash or a failed attempt is resumed at
//! boot and always completes before the secondary is enabled again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{store_err, ControlError};
use crate::keys;
use crate::settings::Settings;
use crate::storage::{AccountFilter, AccountPatch, NodeAccess};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

pub struct AccessDowngrade {
    settings: Settings,
    retry: RetryPolicy,
    lock: Mutex<()>,
}

impl AccessDowngrade {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            retry: RetryPolicy::default(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn mark_pending(&self) -> Result<(), ControlError> {
        self.settings.set_flag(keys::NODE2_DOWNGRADE_PENDING, true)
    }

    pub fn is_pending(&self) -> Result<bool, ControlError> {
        self.settings.flag(keys::NODE2_DOWNGRADE_PENDING)
    }

    /// Downgrade all level-2 accounts if a downgrade is pending.
    ///
    /// Returns how many accounts changed. Clears the pending marker only
    /// after the update succeeded.
    pub async fn run_pending(&self) -> Result<usize, ControlError> {
        let _guard = self.lock.lock().await;
        if !self.is_pending()? {
            return Ok(0);
        }
        let store = self.settings.store();
        let ids: Vec<i64> = store
            .list_accounts(&AccountFilter::NodeAccess(NodeAccess::Both))
            .map_err(store_err)?
            .into_iter()
            .map(|account| account.id)
            .collect();
        let changed = store
            .update_accounts(
                &ids,
                &AccountPatch {
                    node_access: Some(NodeAccess::PrimaryOnly),
                    ..Default::default()
                },
            )
            .map_err(store_err)?;
        self.settings
            .set_flag(keys::NODE2_DOWNGRADE_PENDING, false)?;
        info!(accounts = changed, "node access downgraded to primary only");
        Ok(changed)
    }

    /// Run the pending downgrade in the background with retries.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = job.retry.initial_backoff;
            for attempt in 1..=job.retry.attempts.max(1) {
                match job.run_pending().await {
                    Ok(_) => return,
                    Err(err) => {
                        warn!(attempt, error = %err, "node access downgrade failed");
                    }
                }
                if attempt < job.retry.attempts {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(job.retry.max_backoff);
                }
            }
            error!("node access downgrade gave up; it stays pending until the next boot or enable");
        })
    }
}

/// Check an access level an operator wants to assign.
pub fn validate_node_access(settings: &Settings, level: i64) -> Result<NodeAccess, ControlError> {
    match level {
        1 => Ok(NodeAccess::PrimaryOnly),
        2 if settings.secondary_enabled()? => Ok(NodeAccess::Both),
        2 => Err(ControlError::InvalidConfig(
            "node access 2 requires the secondary node to be enabled".to_string(),
        )),
        other => Err(ControlError::InvalidConfig(format!(
            "node access must be 1 or 2, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AccountRecord, SqliteStore};

    fn settings_with_accounts() -> Settings {
        let settings = Settings::new(Arc::new(SqliteStore::open_memory().unwrap()));
        settings.seed_defaults().unwrap();
        let records: Vec<AccountRecord> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(i, name)| AccountRecord {
                username: name.to_string(),
                con_pass: format!("{name}.pw"),
                node_access: if i < 2 { NodeAccess::Both } else { NodeAccess::PrimaryOnly },
                ..Default::default()
            })
            .collect();
        settings.store().upsert_accounts(&records).unwrap();
        settings
    }

    fn level_two_count(settings: &Settings) -> usize {
        settings
            .store()
            .list_accounts(&AccountFilter::NodeAccess(NodeAccess::Both))
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn nothing_happens_without_pending_marker() {
        let settings = settings_with_accounts();
        let job = AccessDowngrade::new(settings.clone());
        assert_eq!(job.run_pending().await.unwrap(), 0);
        assert_eq!(level_two_count(&settings), 2);
    }

    #[tokio::test]
    async fn pending_downgrade_runs_once() {
        let settings = settings_with_accounts();
        let job = Arc::new(AccessDowngrade::new(settings.clone()));
        job.mark_pending().unwrap();
        job.spawn().await.unwrap();

        assert_eq!(level_two_count(&settings), 0);
        assert!(!job.is_pending().unwrap());
        assert_eq!(job.run_pending().await.unwrap(), 0);
    }

    #[test]
    fn level_two_needs_enabled_secondary() {
        let settings = settings_with_accounts();
        assert_eq!(
            validate_node_access(&settings, 1).unwrap(),
            NodeAccess::PrimaryOnly
        );
        assert!(validate_node_access(&settings, 2).is_err());
        assert!(validate_node_access(&settings, 3).is_err());

        settings.set_flag(keys::NODE2_ENABLE, true).unwrap();
        assert_eq!(validate_node_access(&settings, 2).unwrap(), NodeAccess::Both);
    }
}
