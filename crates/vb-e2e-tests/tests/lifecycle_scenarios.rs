//! E2E tests for the device lifecycle: discovery, link state, removal.

mod helpers;

use tokio::sync::mpsc;

use helpers::RunnerHarness;
use vb_runner::{
    DeviceAddress, Launch, LifecycleEvent, NetifCall, OperState, ServiceTracker, discovery, linkstate,
};

/// Discovery creates the interface; link-up starts the bridge with the
/// interface name and device address.
#[tokio::test]
async fn e2e_discovered_device_bridged_after_link_up() {
    let mut h = RunnerHarness::new();

    h.discover("device-A", "10.0.0.1:1234").await;
    assert_eq!(h.netif.created(), vec!["vcan-device-A"]);
    assert!(h.launcher.launches().is_empty());

    let view = h.manager.registry().lookup("vcan-device-A").unwrap();
    assert_eq!(view.instance, "device-A");
    assert!(!view.running);

    h.link("vcan-device-A", OperState::Unknown).await;
    assert_eq!(
        h.launcher.running(),
        vec![Launch {
            interface: "vcan-device-A".into(),
            address: DeviceAddress::new("10.0.0.1", 1234),
        }]
    );
    assert!(h.manager.registry().lookup("vcan-device-A").unwrap().running);
}

/// Long instance names map to a compressed interface name of the maximum length.
#[tokio::test]
async fn e2e_long_instance_name_truncated() {
    let mut h = RunnerHarness::new();

    h.discover("S101-IOU04-USB-EXT-1-can", "192.168.24.110:10000").await;
    h.link("vcan-S10..EXT-1", OperState::Unknown).await;

    let running = h.launcher.running();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].interface, "vcan-S10..EXT-1");
    assert_eq!(running[0].interface.len(), 15);
}

/// A new address stops the old bridge and starts one for the new address.
#[tokio::test]
async fn e2e_address_change_restarts_bridge() {
    let mut h = RunnerHarness::new();
    h.discover("device-A", "10.0.0.1:1234").await;
    h.link("vcan-device-A", OperState::Up).await;

    h.discover("device-A", "10.0.0.2:1234").await;

    let launches = h.launcher.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(h.launcher.stop_count(0), 1);
    assert_eq!(
        h.launcher.running(),
        vec![Launch {
            interface: "vcan-device-A".into(),
            address: DeviceAddress::new("10.0.0.2", 1234),
        }]
    );
    assert_eq!(
        h.manager.registry().lookup("vcan-device-A").unwrap().address,
        DeviceAddress::new("10.0.0.2", 1234)
    );
    // The interface is reused, not recreated.
    assert_eq!(h.netif.created().len(), 1);
}

/// Link down stops the bridge; the record and interface stay.
#[tokio::test]
async fn e2e_link_down_stops_bridge_keeps_record() {
    let mut h = RunnerHarness::new();
    h.discover("device-A", "10.0.0.1:1234").await;
    h.link("vcan-device-A", OperState::Unknown).await;
    assert_eq!(h.launcher.running().len(), 1);

    h.link("vcan-device-A", OperState::Down).await;
    assert!(h.launcher.running().is_empty());
    assert!(h.manager.registry().contains("vcan-device-A"));
    assert!(h.netif.exists("vcan-device-A"));
    assert!(h.netif.deleted().is_empty());

    // Back up: a fresh bridge.
    h.link("vcan-device-A", OperState::Unknown).await;
    assert_eq!(h.launcher.launches().len(), 2);
    assert_eq!(h.launcher.running().len(), 1);
}

/// Removal stops the bridge, deletes the interface and forgets the device;
/// later link events for the name do nothing.
#[tokio::test]
async fn e2e_removed_device_released() {
    let mut h = RunnerHarness::new();
    h.discover("device-A", "10.0.0.1:1234").await;
    h.link("vcan-device-A", OperState::Unknown).await;

    h.vanish("device-A").await;
    assert!(h.launcher.running().is_empty());
    assert_eq!(
        h.netif.calls(),
        vec![
            NetifCall::Create("vcan-device-A".into()),
            NetifCall::Delete("vcan-device-A".into()),
        ]
    );
    assert!(h.manager.registry().is_empty());

    h.link("vcan-device-A", OperState::Up).await;
    assert_eq!(h.launcher.launches().len(), 1);
    assert!(h.manager.registry().is_empty());
}

/// Two devices are handled independently.
#[tokio::test]
async fn e2e_multiple_devices_independent() {
    let mut h = RunnerHarness::new();
    h.discover("MIO04-1-can", "10.0.0.1:10000").await;
    h.discover("MIO04-2-can", "10.0.0.2:10000").await;
    h.link("vcan-MIO04-1", OperState::Unknown).await;
    h.link("vcan-MIO04-2", OperState::Unknown).await;
    assert_eq!(h.launcher.running().len(), 2);

    h.link("vcan-MIO04-1", OperState::Down).await;
    let running = h.launcher.running();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].interface, "vcan-MIO04-2");

    let names: Vec<String> = h
        .manager
        .registry()
        .snapshot()
        .into_iter()
        .map(|v| v.interface)
        .collect();
    assert_eq!(names, vec!["vcan-MIO04-1", "vcan-MIO04-2"]);
}

/// Parsed tool output drives the manager through its event channel.
#[tokio::test]
async fn e2e_source_lines_through_event_channel() {
    let mut h = RunnerHarness::new();
    let (tx, rx) = mpsc::channel::<LifecycleEvent>(16);

    let lines = [
        "+;eth0;IPv4;MIO04-1-can;_io4edge_canL2._tcp;local",
        "=;eth0;IPv4;MIO04-1-can;_io4edge_canL2._tcp;local;MIO04-1.local;10.0.0.7;10000;",
        "=;eth1;IPv4;MIO04-1-can;_io4edge_canL2._tcp;local;MIO04-1.local;10.0.1.7;10000;",
        "-;eth1;IPv4;MIO04-1-can;_io4edge_canL2._tcp;local",
    ];
    let mut tracker = ServiceTracker::new();
    for line in lines {
        let event = discovery::parse_line(line, discovery::DEFAULT_SERVICE_TYPE)
            .and_then(|record| tracker.apply(record));
        if let Some(event) = event {
            tx.send(event.into()).await.unwrap();
        }
    }
    drop(tx);
    h.manager.run(rx).await;
    assert!(h.manager.registry().contains("vcan-MIO04-1"));

    // Simulate the kernel bringing the link up.
    h.netif.set_up("vcan-MIO04-1", true);
    let (tx, rx) = mpsc::channel::<LifecycleEvent>(16);
    let update = linkstate::parse_line(
        "9: vcan-MIO04-1: <NOARP,UP,LOWER_UP> mtu 72 qdisc noqueue state UNKNOWN group default \\    link/can ",
    )
    .unwrap();
    tx.send(update.into()).await.unwrap();
    drop(tx);
    h.manager.run(rx).await;

    assert_eq!(
        h.launcher.running(),
        vec![Launch {
            interface: "vcan-MIO04-1".into(),
            address: DeviceAddress::new("10.0.0.7", 10000),
        }]
    );
}

/// Shutdown releases every device.
#[tokio::test]
async fn e2e_shutdown_releases_everything() {
    let mut h = RunnerHarness::new();
    h.discover("device-A", "10.0.0.1:1234").await;
    h.discover("device-B", "10.0.0.2:1234").await;
    h.link("vcan-device-A", OperState::Unknown).await;

    h.manager.shutdown().await;
    assert!(h.launcher.running().is_empty());
    assert!(h.manager.registry().is_empty());
    assert_eq!(h.netif.deleted().len(), 2);
}
