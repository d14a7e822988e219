use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::supervisor::NodeRole;

/// Notifications published by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// Host-level settings changed; the process should exit and be restarted.
    HostRestartRequested { keys: Vec<String> },
    NodeStarted { node: NodeRole },
    NodeStopped { node: NodeRole },
}

pub type EventSender = broadcast::Sender<ControlEvent>;

pub fn event_channel() -> EventSender {
    let (tx, _rx) = broadcast::channel(64);
    tx
}

pub(crate) fn publish(events: &EventSender, event: ControlEvent) {
    if let Err(broadcast::error::SendError(event)) = events.send(event) {
        debug!(?event, "no event subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_subscribers_and_tolerates_none() {
        let events = event_channel();
        publish(&events, ControlEvent::HostRestartRequested { keys: Vec::new() });

        let mut rx = events.subscribe();
        publish(&events, ControlEvent::NodeStarted { node: NodeRole::Primary });
        assert_eq!(
            rx.try_recv().unwrap(),
            ControlEvent::NodeStarted { node: NodeRole::Primary }
        );
        assert!(rx.try_recv().is_err());
    }
}
