use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::control_api::ControlApi;
use crate::error::{store_err, ControlError};
use crate::settings::Settings;
use crate::supervisor::Node;

/// Parse a reset schedule. Classic 5-field expressions get a seconds field.
pub fn parse_reset_schedule(expression: &str) -> Result<Schedule, ControlError> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|err| ControlError::InvalidConfig(format!("invalid schedule: {err}")))
}

pub fn next_reset_after(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ControlError> {
    parse_reset_schedule(expression)?
        .after(&after)
        .next()
        .ok_or_else(|| ControlError::InvalidConfig("schedule never fires".to_string()))
}

/// Pulls per-user byte counters from every running node into the accounts.
pub struct TrafficCollector {
    settings: Settings,
    nodes: Vec<Arc<Node>>,
    api: Arc<dyn ControlApi>,
}

impl TrafficCollector {
    pub fn new(settings: Settings, nodes: Vec<Arc<Node>>, api: Arc<dyn ControlApi>) -> Self {
        Self {
            settings,
            nodes,
            api,
        }
    }

    /// One collection pass; returns how many user entries were applied.
    ///
    /// A node that is down or unreachable is skipped.
    pub async fn collect_once(&self) -> Result<usize, ControlError> {
        let mut applied = 0;
        for node in &self.nodes {
            if !node.is_running().await {
                continue;
            }
            let endpoint = self.settings.api_endpoint(node.role())?;
            let snapshot = match self.api.traffic(&endpoint, true).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(node = %node.role(), error = %err, "traffic collection failed");
                    continue;
                }
            };
            for (username, stat) in snapshot {
                self.settings
                    .store()
                    .add_account_traffic(&username, stat.rx, stat.tx)
                    .map_err(store_err)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tick.tick().await;
                match self.collect_once().await {
                    Ok(applied) => debug!(applied, "traffic collected"),
                    Err(err) => warn!(error = %err, "traffic collection failed"),
                }
            }
        })
    }
}

/// Reset every account's counters on `expression`. Empty disables it.
pub fn spawn_traffic_reset(
    settings: Settings,
    expression: &str,
) -> Result<Option<JoinHandle<()>>, ControlError> {
    if expression.trim().is_empty() {
        return Ok(None);
    }
    let schedule = parse_reset_schedule(expression)?;
    let handle = tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = schedule.after(&now).next() else {
                warn!("traffic reset schedule has no future run");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            match settings.store().reset_all_traffic() {
                Ok(accounts) => info!(accounts, "account traffic reset"),
                Err(err) => warn!(error = %err, "account traffic reset failed"),
            }
        }
    });
    Ok(Some(handle))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn five_field_expressions_are_accepted() {
        let after = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        let next = next_reset_after("0 0 1 * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn six_field_expressions_pass_through() {
        let after = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        let next = next_reset_after("30 0 0 * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 30).unwrap());
    }

    #[test]
    fn garbage_is_invalid_config() {
        assert!(matches!(
            parse_reset_schedule("every day"),
            Err(ControlError::InvalidConfig(_))
        ));
    }
}
