//! Device lifecycle: one virtual interface and one bridge per discovered
//! device.
//!
//! Events from the discovery and link-state sources go through a single
//! [`LifecycleManager`]. Its handlers take `&mut self`, so events are
//! applied one at a time and registry updates never interleave. Failures of
//! OS or process calls are logged and leave the registry in a safe state.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::discovery::DiscoveryEvent;
use crate::launcher::{BridgeLauncher, BridgeProcess};
use crate::linkstate::LinkUpdate;
use crate::naming::InterfaceNaming;
use crate::netif::InterfaceControl;
use crate::registry::{AddressUpdate, DeviceAddress, DeviceRegistry};

/// Input of the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Discovery(DiscoveryEvent),
    Link(LinkUpdate),
}

impl From<DiscoveryEvent> for LifecycleEvent {
    fn from(event: DiscoveryEvent) -> Self {
        Self::Discovery(event)
    }
}

impl From<LinkUpdate> for LifecycleEvent {
    fn from(update: LinkUpdate) -> Self {
        Self::Link(update)
    }
}

pub struct LifecycleManager {
    naming: InterfaceNaming,
    registry: DeviceRegistry,
    netif: Arc<dyn InterfaceControl>,
    launcher: Arc<dyn BridgeLauncher>,
}

impl LifecycleManager {
    pub fn new(
        naming: InterfaceNaming,
        netif: Arc<dyn InterfaceControl>,
        launcher: Arc<dyn BridgeLauncher>,
    ) -> Self {
        Self {
            naming,
            registry: DeviceRegistry::new(),
            netif,
            launcher,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Local interface name for a discovery instance.
    pub fn interface_name(&self, instance: &str) -> String {
        self.naming.derive(instance)
    }

    /// Apply events until every sender is gone.
    pub async fn run(&mut self, mut events: mpsc::Receiver<LifecycleEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        tracing::debug!("lifecycle event channel closed");
    }

    pub async fn handle(&mut self, event: LifecycleEvent) {
        tracing::debug!(?event, "lifecycle event");
        match event {
            LifecycleEvent::Discovery(DiscoveryEvent::Added { instance, address }) => {
                self.service_added(&instance, address).await;
            }
            LifecycleEvent::Discovery(DiscoveryEvent::Removed { instance }) => {
                self.service_removed(&instance).await;
            }
            LifecycleEvent::Link(update) => self.link_changed(&update),
        }
    }

    /// Stop every bridge and delete every interface we created.
    pub async fn shutdown(&mut self) {
        for view in self.registry.snapshot() {
            let Some(record) = self.registry.remove(&view.interface) else {
                continue;
            };
            if let Some(process) = record.process {
                stop_bridge(&record.interface, process);
            }
            if let Err(e) = self.netif.delete(&record.interface).await {
                tracing::warn!(interface = %record.interface, error = %e, "failed to delete interface");
            }
        }
        tracing::info!("all devices released");
    }

    async fn service_added(&mut self, instance: &str, address: DeviceAddress) {
        let interface = self.naming.derive(instance);

        if let Some(existing) = self.registry.lookup(&interface) {
            if existing.instance != instance {
                tracing::warn!(
                    %interface,
                    instance,
                    existing = %existing.instance,
                    "interface name already used by another device, ignoring"
                );
                return;
            }
            match self.registry.update_address(&interface, address.clone()) {
                AddressUpdate::Unchanged => {
                    tracing::debug!(%interface, device = %address, "no address change");
                }
                AddressUpdate::Changed { previous, process } => {
                    tracing::info!(%interface, from = %previous, to = %address, "device address changed");
                    if let Some(process) = process {
                        stop_bridge(&interface, process);
                    }
                    self.start_if_up(&interface).await;
                }
                AddressUpdate::Unknown => {}
            }
            return;
        }

        self.registry.register(instance, &interface, address.clone());
        tracing::info!(%interface, instance, device = %address, "device discovered");

        if let Err(e) = self.netif.create(&interface).await {
            tracing::error!(%interface, error = %e, "failed to create interface");
            return;
        }
        self.start_if_up(&interface).await;
    }

    async fn service_removed(&mut self, instance: &str) {
        let interface = self.naming.derive(instance);
        match self.registry.lookup(&interface) {
            Some(existing) if existing.instance == instance => {}
            _ => {
                tracing::debug!(%interface, instance, "removed device not known, ignoring");
                return;
            }
        }
        let Some(record) = self.registry.remove(&interface) else {
            return;
        };
        tracing::info!(%interface, instance, "device removed");

        if let Some(process) = record.process {
            stop_bridge(&interface, process);
        }
        if let Err(e) = self.netif.delete(&interface).await {
            tracing::warn!(%interface, error = %e, "failed to delete interface");
        }
    }

    fn link_changed(&mut self, update: &LinkUpdate) {
        let interface = update.interface.as_str();
        if !self.registry.contains(interface) {
            return;
        }
        tracing::debug!(interface, state = %update.state, "link state changed");

        if update.state.is_down() {
            if let Some(process) = self.registry.take_process(interface) {
                tracing::info!(interface, "link down, stopping bridge");
                stop_bridge(interface, process);
            }
        } else {
            self.start_bridge(interface);
        }
    }

    async fn start_if_up(&mut self, interface: &str) {
        match self.netif.is_up(interface).await {
            Ok(true) => self.start_bridge(interface),
            Ok(false) => tracing::debug!(interface, "link down, bridge deferred"),
            Err(e) => tracing::warn!(interface, error = %e, "can't query link state"),
        }
    }

    /// Launch the bridge unless one is already attached.
    fn start_bridge(&mut self, interface: &str) {
        if self.registry.has_process(interface) {
            return;
        }
        let Some(device) = self.registry.lookup(interface) else {
            return;
        };

        match self.launcher.launch(interface, &device.address) {
            Ok(process) => match self.registry.attach_process(interface, process) {
                Ok(()) => {
                    tracing::info!(interface, device = %device.address, "bridge started");
                }
                Err(orphan) => stop_bridge(interface, orphan),
            },
            Err(e) => tracing::error!(interface, error = %e, "failed to start bridge"),
        }
    }
}

fn stop_bridge(interface: &str, process: Box<dyn BridgeProcess>) {
    match process.stop() {
        Ok(()) => tracing::info!(interface, "bridge stopped"),
        Err(e) => tracing::warn!(interface, error = %e, "failed to stop bridge"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linkstate::OperState;
    use crate::mock::{Launch, MockInterfaceControl, MockLauncher};

    struct Harness {
        manager: LifecycleManager,
        netif: Arc<MockInterfaceControl>,
        launcher: Arc<MockLauncher>,
    }

    fn harness() -> Harness {
        let netif = Arc::new(MockInterfaceControl::new());
        let launcher = Arc::new(MockLauncher::new());
        let manager = LifecycleManager::new(
            InterfaceNaming::default(),
            Arc::clone(&netif) as Arc<dyn InterfaceControl>,
            Arc::clone(&launcher) as Arc<dyn BridgeLauncher>,
        );
        Harness {
            manager,
            netif,
            launcher,
        }
    }

    fn added(instance: &str, host: &str) -> LifecycleEvent {
        DiscoveryEvent::Added {
            instance: instance.to_string(),
            address: DeviceAddress::new(host, 1234),
        }
        .into()
    }

    fn removed(instance: &str) -> LifecycleEvent {
        DiscoveryEvent::Removed {
            instance: instance.to_string(),
        }
        .into()
    }

    fn link(interface: &str, state: OperState) -> LifecycleEvent {
        LinkUpdate {
            interface: interface.to_string(),
            state,
        }
        .into()
    }

    #[tokio::test]
    async fn new_device_created_and_started_when_up() {
        let mut h = harness();
        h.manager.handle(added("MIO04-1-can", "10.0.0.1")).await;

        assert_eq!(h.netif.created(), vec!["vcan-MIO04-1"]);
        assert_eq!(
            h.launcher.launches(),
            vec![Launch {
                interface: "vcan-MIO04-1".into(),
                address: DeviceAddress::new("10.0.0.1", 1234),
            }]
        );
        assert!(h.manager.registry().lookup("vcan-MIO04-1").unwrap().running);
    }

    #[tokio::test]
    async fn new_device_waits_for_link_up() {
        let mut h = harness();
        h.netif.set_create_up(false);
        h.manager.handle(added("dev", "10.0.0.1")).await;
        assert!(h.launcher.launches().is_empty());

        h.netif.set_up("vcan-dev", true);
        h.manager.handle(link("vcan-dev", OperState::Unknown)).await;
        assert_eq!(h.launcher.running().len(), 1);
    }

    #[tokio::test]
    async fn repeated_announcement_is_noop() {
        let mut h = harness();
        h.manager.handle(added("dev", "10.0.0.1")).await;
        h.manager.handle(added("dev", "10.0.0.1")).await;

        assert_eq!(h.netif.created().len(), 1);
        assert_eq!(h.launcher.launches().len(), 1);
        assert_eq!(h.launcher.stop_count(0), 0);
    }

    #[tokio::test]
    async fn address_change_restarts_bridge() {
        let mut h = harness();
        h.manager.handle(added("dev", "10.0.0.1")).await;
        h.manager.handle(added("dev", "10.0.0.2")).await;

        let launches = h.launcher.launches();
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[1].address, DeviceAddress::new("10.0.0.2", 1234));
        assert_eq!(h.launcher.stop_count(0), 1);
        assert_eq!(h.launcher.running(), vec![launches[1].clone()]);
    }

    #[tokio::test]
    async fn address_change_while_down_defers_start() {
        let mut h = harness();
        h.manager.handle(added("dev", "10.0.0.1")).await;
        h.netif.set_up("vcan-dev", false);
        h.manager.handle(link("vcan-dev", OperState::Down)).await;
        h.manager.handle(added("dev", "10.0.0.2")).await;

        assert!(h.launcher.running().is_empty());
        let view = h.manager.registry().lookup("vcan-dev").unwrap();
        assert_eq!(view.address, DeviceAddress::new("10.0.0.2", 1234));
        assert!(!view.running);
    }

    #[tokio::test]
    async fn link_down_stops_and_keeps_record() {
        let mut h = harness();
        h.manager.handle(added("dev", "10.0.0.1")).await;
        h.manager.handle(link("vcan-dev", OperState::Down)).await;

        assert!(h.launcher.running().is_empty());
        assert!(h.manager.registry().contains("vcan-dev"));
        assert!(h.netif.exists("vcan-dev"));

        // Second down: nothing left to stop.
        h.manager.handle(link("vcan-dev", OperState::Down)).await;
        assert_eq!(h.launcher.stop_count(0), 1);
    }

    #[tokio::test]
    async fn link_up_is_idempotent() {
        let mut h = harness();
        h.manager.handle(added("dev", "10.0.0.1")).await;
        h.manager.handle(link("vcan-dev", OperState::Up)).await;
        h.manager.handle(link("vcan-dev", OperState::Unknown)).await;
        assert_eq!(h.launcher.launches().len(), 1);
    }

    #[tokio::test]
    async fn removal_releases_everything() {
        let mut h = harness();
        h.manager.handle(added("dev", "10.0.0.1")).await;
        h.manager.handle(removed("dev")).await;

        assert!(h.launcher.running().is_empty());
        assert_eq!(h.netif.deleted(), vec!["vcan-dev"]);
        assert!(h.manager.registry().is_empty());

        h.manager.handle(link("vcan-dev", OperState::Up)).await;
        assert_eq!(h.launcher.launches().len(), 1);
    }

    #[tokio::test]
    async fn unknown_removal_ignored() {
        let mut h = harness();
        h.manager.handle(removed("ghost")).await;
        assert!(h.netif.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_link_ignored() {
        let mut h = harness();
        h.manager.handle(link("eth0", OperState::Up)).await;
        assert!(h.launcher.launches().is_empty());
    }

    #[tokio::test]
    async fn create_failure_keeps_record_without_bridge() {
        let mut h = harness();
        h.netif.fail_create(true);
        h.manager.handle(added("dev", "10.0.0.1")).await;

        assert!(h.manager.registry().contains("vcan-dev"));
        assert!(h.launcher.launches().is_empty());
    }

    #[tokio::test]
    async fn launch_failure_logged_and_retried_on_next_up() {
        let mut h = harness();
        h.launcher.fail_launches(true);
        h.manager.handle(added("dev", "10.0.0.1")).await;
        assert!(!h.manager.registry().has_process("vcan-dev"));

        h.launcher.fail_launches(false);
        h.manager.handle(link("vcan-dev", OperState::Unknown)).await;
        assert!(h.manager.registry().has_process("vcan-dev"));
    }

    #[tokio::test]
    async fn colliding_names_keep_first_device() {
        let mut h = harness();
        h.manager.handle(added("S101-IOU04-USB-EXT-1-can", "10.0.0.1")).await;
        h.manager.handle(added("S102-IOU04-USB-EXT-1-can", "10.0.0.2")).await;

        let view = h.manager.registry().lookup("vcan-S10..EXT-1").unwrap();
        assert_eq!(view.instance, "S101-IOU04-USB-EXT-1-can");
        assert_eq!(h.launcher.launches().len(), 1);

        h.manager.handle(removed("S102-IOU04-USB-EXT-1-can")).await;
        assert!(h.manager.registry().contains("vcan-S10..EXT-1"));
    }

    #[tokio::test]
    async fn run_consumes_until_closed() {
        let mut h = harness();
        let (tx, rx) = mpsc::channel(8);
        tx.send(added("dev", "10.0.0.1")).await.unwrap();
        tx.send(link("vcan-dev", OperState::Down)).await.unwrap();
        drop(tx);

        h.manager.run(rx).await;
        assert!(h.manager.registry().contains("vcan-dev"));
        assert!(h.launcher.running().is_empty());
    }

    #[tokio::test]
    async fn shutdown_releases_all_devices() {
        let mut h = harness();
        h.manager.handle(added("a", "10.0.0.1")).await;
        h.manager.handle(added("b", "10.0.0.2")).await;
        h.manager.shutdown().await;

        assert!(h.manager.registry().is_empty());
        assert!(h.launcher.running().is_empty());
        let mut deleted = h.netif.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["vcan-a", "vcan-b"]);
    }
}
