//! vcan bridge gateway: moves CAN traffic between a local SocketCAN
//! interface and a remote CAN device.
//!
//! - `BatchQueue` paces both directions
//! - `LocalBus` / `RemoteDevice` traits with SocketCAN, TCP and mock impls
//! - `GatewaySession` runs the four directional loops of one bridge

pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod mock;
pub mod queue;
pub mod session;
pub mod transport;

pub use bus::{BusWrite, LocalBus};
pub use config::{GatewayConfig, SendFailurePolicy};
pub use device::{ErrorEvent, RemoteDevice, Sample, StreamConfig};
pub use error::{BusError, BusResult, RemoteError, RemoteResult, SessionError, SessionResult};
pub use mock::{MockBus, MockDevice, SendAttempt};
pub use queue::{BatchReceiver, BatchSender, QUEUE_CAPACITY, batch_queue};
pub use session::{BusStateTracker, GatewaySession, error_frame_for};
pub use transport::TcpDevice;

#[cfg(target_os = "linux")]
pub use bus::SocketCanBus;
