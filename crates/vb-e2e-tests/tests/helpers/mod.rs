//! Shared test harness for E2E integration tests.
//!
//! Wires a real `LifecycleManager` to mock interface control and a mock
//! launcher, and provides frame helpers for gateway scenarios.

#![allow(dead_code)]

use std::sync::Arc;

use vb_frame::CanFrame;
use vb_runner::{
    BridgeLauncher, DeviceAddress, DiscoveryEvent, InterfaceControl, InterfaceNaming,
    LifecycleManager, LinkUpdate, MockInterfaceControl, MockLauncher, OperState,
};

/// Runner-side harness: manager plus the mocks it drives.
pub struct RunnerHarness {
    pub manager: LifecycleManager,
    pub netif: Arc<MockInterfaceControl>,
    pub launcher: Arc<MockLauncher>,
}

impl RunnerHarness {
    /// Default naming; created interfaces start down.
    pub fn new() -> Self {
        let netif = Arc::new(MockInterfaceControl::new());
        netif.set_create_up(false);
        let launcher = Arc::new(MockLauncher::new());
        let manager = LifecycleManager::new(
            InterfaceNaming::default(),
            netif.clone() as Arc<dyn InterfaceControl>,
            launcher.clone() as Arc<dyn BridgeLauncher>,
        );
        Self {
            manager,
            netif,
            launcher,
        }
    }

    /// Discovery reports `instance` at `address` ("host:port").
    pub async fn discover(&mut self, instance: &str, address: &str) {
        let address: DeviceAddress = address.parse().unwrap();
        self.manager
            .handle(
                DiscoveryEvent::Added {
                    instance: instance.to_string(),
                    address,
                }
                .into(),
            )
            .await;
    }

    /// Discovery reports `instance` gone.
    pub async fn vanish(&mut self, instance: &str) {
        self.manager
            .handle(
                DiscoveryEvent::Removed {
                    instance: instance.to_string(),
                }
                .into(),
            )
            .await;
    }

    /// The kernel reports a link state; the mock interface follows it.
    pub async fn link(&mut self, interface: &str, state: OperState) {
        self.netif.set_up(interface, !state.is_down());
        self.manager
            .handle(
                LinkUpdate {
                    interface: interface.to_string(),
                    state,
                }
                .into(),
            )
            .await;
    }
}

/// Standard data frame with id `id` and a payload derived from it.
pub fn frame(id: u32) -> CanFrame {
    CanFrame::new_data(id, false, &[id as u8, 0xAA]).unwrap()
}

/// Frames with ids `1..=n`.
pub fn frames(n: u32) -> Vec<CanFrame> {
    (1..=n).map(frame).collect()
}
