mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeChannel, switch};
use rfleet::config::PollSettings;
use rfleet::fleet::{Device, Fleet};
use rfleet::model::ActivePath;
use rfleet::poller::{PollOutcome, Poller};
use rfleet::store::SnapshotStore;

fn poller(devices: Vec<Device>, channel: FakeChannel) -> (Poller<FakeChannel>, Arc<FakeChannel>) {
    let channel = Arc::new(channel);
    let settings = PollSettings {
        batch_size: 3,
        ..PollSettings::default()
    };
    let poller = Poller::new(
        Arc::new(Fleet::new(devices)),
        SnapshotStore::new(),
        Arc::clone(&channel),
        settings,
    );
    (poller, channel)
}

#[tokio::test]
async fn oob_is_preferred_when_both_paths_answer() {
    let (poller, channel) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(8).reachable(&["10.0.0.1", "10.1.0.1"]),
    );

    let report = poller.run_cycle().await;

    assert_eq!(report.outcome("sw1"), Some(&PollOutcome::Fresh(ActivePath::Oob)));
    assert_eq!(channel.fetches(), vec!["10.0.0.1"]);
    let snapshot = poller.store().get("sw1").await.expect("published");
    assert!(snapshot.connectivity.oob_reachable);
    assert!(snapshot.connectivity.trunk_reachable);
    assert_eq!(snapshot.connectivity.active_path, ActivePath::Oob);
    assert_eq!(snapshot.active_address.as_deref(), Some("10.0.0.1"));
    assert_eq!(snapshot.system_name, "SW1");
    assert_eq!(snapshot.vlan_map[&10], "Cameras");
}

#[tokio::test]
async fn snapshot_has_exactly_the_derived_port_range() {
    let (poller, _) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(16).reachable(&["10.0.0.1"]),
    );

    poller.run_cycle().await;

    let snapshot = poller.store().get("sw1").await.expect("published");
    assert_eq!(snapshot.derived_port_count, 16);
    assert_eq!(
        snapshot.ports.keys().copied().collect::<Vec<_>>(),
        (1..=16).collect::<Vec<_>>()
    );
    assert!(snapshot.ports[&16].link_up);
    assert!(!snapshot.ports[&5].link_up);
    assert_eq!(snapshot.ports[&5].label, "1/0/5");
}

#[tokio::test]
async fn trunk_is_used_when_oob_is_down() {
    let (poller, channel) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(8).reachable(&["10.1.0.1"]),
    );

    let report = poller.run_cycle().await;

    assert_eq!(report.outcome("sw1"), Some(&PollOutcome::Fresh(ActivePath::Trunk)));
    assert_eq!(channel.fetches(), vec!["10.1.0.1"]);
    let snapshot = poller.store().get("sw1").await.expect("published");
    assert!(!snapshot.connectivity.oob_reachable);
    assert_eq!(snapshot.active_address.as_deref(), Some("10.1.0.1"));
}

#[tokio::test]
async fn failed_oob_fetch_falls_through_to_trunk() {
    let (poller, channel) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(8)
            .reachable(&["10.0.0.1", "10.1.0.1"])
            .failing("10.0.0.1"),
    );

    let report = poller.run_cycle().await;

    assert_eq!(report.outcome("sw1"), Some(&PollOutcome::Fresh(ActivePath::Trunk)));
    assert_eq!(channel.fetches(), vec!["10.0.0.1", "10.1.0.1"]);
    let snapshot = poller.store().get("sw1").await.expect("published");
    assert!(!snapshot.connectivity.oob_reachable);
    assert!(snapshot.connectivity.trunk_reachable);
    assert_eq!(snapshot.connectivity.active_path, ActivePath::Trunk);
}

#[tokio::test]
async fn unreachable_device_keeps_its_last_port_data() {
    let (poller, channel) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(8).reachable(&["10.0.0.1"]),
    );
    poller.run_cycle().await;

    channel.set_reachable("10.0.0.1", false);
    let report = poller.run_cycle().await;

    assert_eq!(report.outcome("sw1"), Some(&PollOutcome::Unreachable));
    let snapshot = poller.store().get("sw1").await.expect("still cached");
    assert!(snapshot.ports[&1].link_up);
    assert_eq!(snapshot.ports[&1].vlan_id, Some(10));
    assert_eq!(snapshot.system_name, "SW1");
    assert!(!snapshot.connectivity.oob_reachable);
    assert!(!snapshot.connectivity.trunk_reachable);
    assert_eq!(snapshot.connectivity.active_path, ActivePath::None);
    assert_eq!(snapshot.active_address, None);
}

#[tokio::test]
async fn never_reached_device_is_published_as_pending() {
    let (poller, _) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(8),
    );

    let report = poller.run_cycle().await;

    assert_eq!(report.outcome("sw1"), Some(&PollOutcome::Unreachable));
    let snapshot = poller.store().get("sw1").await.expect("published");
    assert_eq!(snapshot.ports.len(), 8);
    assert!(snapshot.ports.values().all(|p| !p.link_up));
}

#[tokio::test]
async fn every_fetch_failing_reports_the_error() {
    let (poller, _) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(8)
            .reachable(&["10.0.0.1", "10.1.0.1"])
            .failing("10.0.0.1")
            .failing("10.1.0.1"),
    );

    let report = poller.run_cycle().await;

    match report.outcome("sw1") {
        Some(PollOutcome::FetchFailed(err)) => assert!(err.contains("10.1.0.1")),
        other => panic!("unexpected outcome {other:?}"),
    }
    let snapshot = poller.store().get("sw1").await.expect("published");
    assert_eq!(snapshot.connectivity.active_path, ActivePath::None);
}

#[tokio::test]
async fn refused_login_on_the_last_path_is_reported_as_rejected() {
    let (poller, channel) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(8)
            .reachable(&["10.0.0.1", "10.1.0.1"])
            .failing("10.0.0.1")
            .rejecting("10.1.0.1"),
    );

    let report = poller.run_cycle().await;

    match report.outcome("sw1") {
        Some(PollOutcome::Rejected(err)) => assert!(err.contains("refused the login")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(channel.fetches(), vec!["10.0.0.1", "10.1.0.1"]);
    let snapshot = poller.store().get("sw1").await.expect("published");
    assert!(!snapshot.connectivity.oob_reachable);
    assert!(!snapshot.connectivity.trunk_reachable);
}

#[tokio::test]
async fn a_panicking_device_does_not_stop_its_batch() {
    let (poller, _) = poller(
        vec![
            switch("sw-a", "10.0.0.1", "10.1.0.1"),
            switch("sw-b", "10.0.0.2", "10.1.0.2"),
        ],
        FakeChannel::new(8)
            .reachable(&["10.0.0.1", "10.0.0.2"])
            .panicking("sw-a"),
    );

    let report = poller.run_cycle().await;

    assert_eq!(report.outcome("sw-a"), Some(&PollOutcome::Aborted));
    assert_eq!(report.outcome("sw-b"), Some(&PollOutcome::Fresh(ActivePath::Oob)));
    assert!(poller.store().get("sw-a").await.is_none());
    assert!(poller.store().get("sw-b").await.is_some());
}

#[tokio::test]
async fn every_batch_is_polled_and_reported_in_name_order() {
    let devices: Vec<Device> = (1..=7)
        .rev()
        .map(|i| switch(&format!("sw{i}"), &format!("10.0.0.{i}"), &format!("10.1.0.{i}")))
        .collect();
    let oob: Vec<String> = (1..=7).map(|i| format!("10.0.0.{i}")).collect();
    let oob: Vec<&str> = oob.iter().map(String::as_str).collect();
    let (poller, channel) = poller(devices, FakeChannel::new(8).reachable(&oob));

    let report = poller.run_cycle().await;

    assert_eq!(report.fresh(), 7);
    let names: Vec<&str> = report.outcomes.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["sw1", "sw2", "sw3", "sw4", "sw5", "sw6", "sw7"]);
    assert_eq!(channel.fetches().len(), 7);
    assert_eq!(poller.store().all().len(), 7);
}

#[tokio::test(start_paused = true)]
async fn run_until_stops_between_cycles() {
    let (poller, channel) = poller(
        vec![switch("sw1", "10.0.0.1", "10.1.0.1")],
        FakeChannel::new(8).reachable(&["10.0.0.1"]),
    );

    // Cooldown is 15s: cycles start at 0s, 15s and 30s.
    let cycles = poller
        .run_until(tokio::time::sleep(Duration::from_secs(40)))
        .await;

    assert_eq!(cycles, 3);
    assert_eq!(channel.fetches().len(), 3);
}
