mod common;

use common::harness;
use hui_core::storage::{AccountRecord, NodeAccess};
use hui_core::{ControlError, NodeRole};
use hui_schema::TrafficStat;

const NOW: i64 = 1_780_000_000_000;

async fn running() -> common::Harness {
    let h = harness();
    h.plane.coordinator.start_node(NodeRole::Primary).await.unwrap();
    h
}

#[tokio::test]
async fn authenticate_needs_a_running_primary() {
    let h = harness();
    h.add_account("alice", NodeAccess::PrimaryOnly);
    let err = h.plane.sessions.authenticate("alice.pw").await.unwrap_err();
    assert!(matches!(err, ControlError::Unreachable(_)));
    assert!(h.plane.sessions.list_online().await.unwrap().is_empty());
}

#[tokio::test]
async fn authenticate_denies_unusable_accounts() {
    let h = running().await;
    let base = AccountRecord {
        quota: 1_000,
        download: 100,
        upload: 100,
        expire_time: NOW + 60_000,
        ..Default::default()
    };
    let cases = [
        ("expired", AccountRecord { expire_time: NOW, ..base.clone() }),
        ("exhausted", AccountRecord { download: 600, upload: 400, ..base.clone() }),
        ("zero-quota", AccountRecord { quota: 0, download: 0, upload: 0, ..base.clone() }),
        ("kicked", AccountRecord { kick_util_time: NOW, ..base.clone() }),
        ("deleted", AccountRecord { deleted: true, ..base.clone() }),
    ];
    for (name, record) in cases {
        h.add_account_with(AccountRecord {
            username: name.to_string(),
            con_pass: format!("{name}.pw"),
            ..record
        });
        let err = h
            .plane
            .sessions
            .authenticate_at(&format!("{name}.pw"), NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Unauthorized), "{name}");
    }

    let err = h.plane.sessions.authenticate_at("nobody.pw", NOW).await.unwrap_err();
    assert!(matches!(err, ControlError::Unauthorized));
}

#[tokio::test]
async fn authenticate_admits_usable_accounts_and_stamps_them() {
    let h = running().await;
    let unlimited = h.add_account("alice", NodeAccess::PrimaryOnly);
    let metered = h.add_account_with(AccountRecord {
        username: "bob".into(),
        con_pass: "bob.pw".into(),
        quota: 1_000,
        download: 500,
        upload: 499,
        kick_util_time: NOW - 1,
        ..Default::default()
    });

    let account = h.plane.sessions.authenticate_at("alice.pw", NOW).await.unwrap();
    assert_eq!(account.id, unlimited);
    assert_eq!(h.account(unlimited).con_at, NOW);

    let account = h.plane.sessions.authenticate_at("bob.pw", NOW).await.unwrap();
    assert_eq!(account.username, "bob");
    assert_eq!(h.account(metered).con_at, NOW);
}

#[tokio::test]
async fn device_limit_is_enforced() {
    let h = running().await;
    h.add_account("alice", NodeAccess::PrimaryOnly);
    h.api.set_online(&h.primary_api(), "alice", 2);
    h.plane.sessions.authenticate_at("alice.pw", NOW).await.unwrap();

    h.api.set_online(&h.primary_api(), "alice", 3);
    let err = h
        .plane
        .sessions
        .authenticate_at("alice.pw", NOW)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControlError::DeviceLimitExceeded { devices: 3, limit: 3 }
    ));
}

#[tokio::test]
async fn control_api_failure_is_unreachable() {
    let h = running().await;
    h.add_account("alice", NodeAccess::PrimaryOnly);
    h.api.down.lock().unwrap().insert(h.primary_api());
    let err = h
        .plane
        .sessions
        .authenticate_at("alice.pw", NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Unreachable(_)));
}

#[tokio::test]
async fn kick_blocks_and_disconnects_on_both_nodes() {
    let h = harness();
    h.configure_relay();
    let alice = h.add_account("alice", NodeAccess::Both);
    let bob = h.add_account("bob", NodeAccess::PrimaryOnly);

    let err = h.plane.sessions.kick(&[alice], NOW).await.unwrap_err();
    assert!(matches!(err, ControlError::Unreachable(_)));

    h.plane.coordinator.start_node(NodeRole::Primary).await.unwrap();
    h.plane.coordinator.toggle_secondary(true, None).await.unwrap();
    h.plane.sessions.kick(&[alice, bob], NOW + 60_000).await.unwrap();

    assert_eq!(h.account(alice).kick_util_time, NOW + 60_000);
    assert_eq!(h.api.kicked_at(&h.primary_api()), vec!["alice", "bob"]);
    assert_eq!(h.api.kicked_at(&h.secondary_api()), vec!["alice", "bob"]);
    assert!(matches!(
        h.plane.sessions.authenticate_at("alice.pw", NOW).await,
        Err(ControlError::Unauthorized)
    ));

    h.plane.sessions.release_kick(alice).unwrap();
    h.plane.sessions.authenticate_at("alice.pw", NOW).await.unwrap();
}

#[tokio::test]
async fn secondary_kick_failure_does_not_fail_the_kick() {
    let h = harness();
    h.configure_relay();
    let alice = h.add_account("alice", NodeAccess::Both);
    h.plane.coordinator.start_node(NodeRole::Primary).await.unwrap();
    h.plane.coordinator.toggle_secondary(true, None).await.unwrap();
    h.api.down.lock().unwrap().insert(h.secondary_api());

    h.plane.sessions.kick(&[alice], NOW).await.unwrap();
    assert_eq!(h.api.kicked_at(&h.primary_api()), vec!["alice"]);
}

#[tokio::test]
async fn traffic_is_collected_from_running_nodes() {
    let h = harness();
    h.configure_relay();
    let alice = h.add_account("alice", NodeAccess::Both);
    h.plane.coordinator.start_node(NodeRole::Primary).await.unwrap();
    h.plane.coordinator.toggle_secondary(true, None).await.unwrap();

    {
        let mut traffic = h.api.traffic.lock().unwrap();
        traffic
            .entry(h.primary_api())
            .or_default()
            .insert("alice".into(), TrafficStat { tx: 10, rx: 100 });
        traffic
            .entry(h.secondary_api())
            .or_default()
            .insert("alice".into(), TrafficStat { tx: 1, rx: 2 });
    }
    assert_eq!(h.plane.collector.collect_once().await.unwrap(), 2);
    let account = h.account(alice);
    assert_eq!((account.download, account.upload), (102, 11));

    // Counters were cleared server-side.
    assert_eq!(h.plane.collector.collect_once().await.unwrap(), 0);

    h.plane.sessions.reset_traffic(alice).unwrap();
    let account = h.account(alice);
    assert_eq!((account.download, account.upload), (0, 0));
    assert!(h.plane.sessions.reset_traffic(9_999).is_err());
}
