//! vcan bridge runner: keeps one supervised gateway process per
//! discovered remote CAN device.
//!
//! Re-exports all modules so external crates (e.g. `vb-e2e-tests`) can
//! drive the `LifecycleManager` with mock collaborators.

pub mod config;
pub mod discovery;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod linkstate;
pub mod mock;
pub mod naming;
pub mod netif;
pub mod registry;
mod source;
pub mod supervisor;

pub use config::RunnerConfig;
pub use discovery::{DiscoveryEvent, ServiceRecord, ServiceTracker};
pub use error::{
    NetifError, NetifResult, SourceError, SourceResult, SupervisorError, SupervisorResult,
};
pub use launcher::{BridgeLauncher, BridgeProcess, SupervisorLauncher};
pub use lifecycle::{LifecycleEvent, LifecycleManager};
pub use linkstate::{LinkUpdate, OperState};
pub use mock::{Launch, MockInterfaceControl, MockLauncher, NetifCall};
pub use naming::InterfaceNaming;
pub use netif::{InterfaceControl, IpLink};
pub use registry::{DeviceAddress, DeviceRegistry, DeviceView};
pub use supervisor::{LineSink, OutputSinks, RestartPolicy, Supervisor};
