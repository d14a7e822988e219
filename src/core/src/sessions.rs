use std::sync::Arc;

use chrono::Utc;
use hui_schema::OnlineUsers;
use tracing::{debug, warn};

use crate::control_api::ControlApi;
use crate::error::{store_err, ControlError};
use crate::settings::Settings;
use crate::storage::{AccountFilter, AccountPatch, AccountRecord};
use crate::supervisor::{Node, NodeRole};

/// Client authentication, online tracking and kicks.
///
/// Authentication reads the online device count and then admits the client
/// without holding any lock, so two devices racing through the callback may
/// both get in past the limit. Hysteria2 serializes nothing here either; the
/// next kick or reconnect settles it.
pub struct SessionAccounting {
    settings: Settings,
    primary: Arc<Node>,
    secondary: Arc<Node>,
    api: Arc<dyn ControlApi>,
}

impl SessionAccounting {
    pub fn new(
        settings: Settings,
        primary: Arc<Node>,
        secondary: Arc<Node>,
        api: Arc<dyn ControlApi>,
    ) -> Self {
        Self {
            settings,
            primary,
            secondary,
            api,
        }
    }

    pub async fn authenticate(&self, secret: &str) -> Result<AccountRecord, ControlError> {
        self.authenticate_at(secret, Utc::now().timestamp_millis())
            .await
    }

    /// Admit the account owning `secret` at `now` (epoch millis).
    pub async fn authenticate_at(
        &self,
        secret: &str,
        now: i64,
    ) -> Result<AccountRecord, ControlError> {
        if !self.primary.is_running().await {
            return Err(ControlError::Unreachable(
                "primary node is not running".to_string(),
            ));
        }
        let store = self.settings.store();
        let account = store
            .get_account(&AccountFilter::Usable {
                con_pass: secret.to_string(),
                now,
            })
            .map_err(store_err)?
            .ok_or(ControlError::Unauthorized)?;

        let endpoint = self.settings.api_endpoint(NodeRole::Primary)?;
        let online = self.api.online(&endpoint).await?;
        let devices = online.get(&account.username).copied().unwrap_or(0);
        if devices >= account.device_no {
            debug!(user = %account.username, devices, limit = account.device_no, "device limit reached");
            return Err(ControlError::DeviceLimitExceeded {
                devices,
                limit: account.device_no,
            });
        }

        store
            .update_accounts(
                &[account.id],
                &AccountPatch {
                    con_at: Some(now),
                    ..Default::default()
                },
            )
            .map_err(store_err)?;
        Ok(account)
    }

    /// Online devices per username on the primary; empty when it is down.
    pub async fn list_online(&self) -> Result<OnlineUsers, ControlError> {
        if !self.primary.is_running().await {
            return Ok(OnlineUsers::new());
        }
        let endpoint = self.settings.api_endpoint(NodeRole::Primary)?;
        self.api.online(&endpoint).await
    }

    /// Disconnect the accounts and refuse them until `until` (epoch millis).
    pub async fn kick(&self, ids: &[i64], until: i64) -> Result<(), ControlError> {
        if !self.primary.is_running().await {
            return Err(ControlError::Unreachable(
                "primary node is not running".to_string(),
            ));
        }
        let store = self.settings.store();
        store
            .update_accounts(
                ids,
                &AccountPatch {
                    kick_util_time: Some(until),
                    ..Default::default()
                },
            )
            .map_err(store_err)?;
        let usernames: Vec<String> = store
            .list_accounts(&AccountFilter::IdIn(ids.to_vec()))
            .map_err(store_err)?
            .into_iter()
            .map(|account| account.username)
            .collect();
        if usernames.is_empty() {
            return Ok(());
        }

        let endpoint = self.settings.api_endpoint(NodeRole::Primary)?;
        self.api.kick(&endpoint, &usernames).await?;

        if self.secondary.is_running().await {
            let kicked = match self.settings.api_endpoint(NodeRole::Secondary) {
                Ok(endpoint) => self.api.kick(&endpoint, &usernames).await,
                Err(err) => Err(err),
            };
            if let Err(err) = kicked {
                warn!(node = %NodeRole::Secondary, error = %err, "kick on secondary failed");
            }
        }
        Ok(())
    }

    /// Let a kicked account connect again right away.
    pub fn release_kick(&self, id: i64) -> Result<(), ControlError> {
        self.patch_one(
            id,
            AccountPatch {
                kick_util_time: Some(0),
                ..Default::default()
            },
        )
    }

    pub fn reset_traffic(&self, id: i64) -> Result<(), ControlError> {
        self.patch_one(
            id,
            AccountPatch {
                download: Some(0),
                upload: Some(0),
                ..Default::default()
            },
        )
    }

    fn patch_one(&self, id: i64, patch: AccountPatch) -> Result<(), ControlError> {
        let changed = self
            .settings
            .store()
            .update_accounts(&[id], &patch)
            .map_err(store_err)?;
        if changed == 0 {
            return Err(ControlError::InvalidConfig(format!("no account with id {id}")));
        }
        Ok(())
    }
}
