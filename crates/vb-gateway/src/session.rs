//! Gateway session: the four loops bridging one local interface and one
//! remote device.
//!
//! ```text
//! local bus ──read_bus──▶ [uplink queue] ──forward_batches──▶ device
//! device ──pump_samples──▶ [downlink queue] ──write_bus──▶ local bus
//! ```
//!
//! The two directions share nothing but the bus and the device client. The
//! session ends as soon as one loop hits a fatal condition; recovery is left
//! to the process supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use vb_frame::{CanErrorFrame, CanFrame, ControllerError, ControllerState, ErrorClass};

use crate::bus::{BusWrite, LocalBus};
use crate::config::{GatewayConfig, SendFailurePolicy};
use crate::device::{ErrorEvent, RemoteDevice, Sample};
use crate::error::{RemoteError, SessionError, SessionResult};
use crate::queue::{BatchReceiver, BatchSender, batch_queue};

/// One running bridge between `interface` and a remote device.
pub struct GatewaySession {
    interface: String,
    bus: Arc<dyn LocalBus>,
    device: Arc<dyn RemoteDevice>,
    config: GatewayConfig,
}

impl GatewaySession {
    pub fn new(
        interface: impl Into<String>,
        bus: Arc<dyn LocalBus>,
        device: Arc<dyn RemoteDevice>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            interface: interface.into(),
            bus,
            device,
            config,
        }
    }

    /// Start the sample stream and run all loops until one of them fails.
    ///
    /// Failing to start the stream is returned before any loop is spawned.
    pub async fn run(self) -> SessionResult<()> {
        self.device
            .start_stream(&self.config.stream_config())
            .await?;
        tracing::info!(
            interface = %self.interface,
            keepalive_ms = self.config.keepalive_ms,
            "sample stream started"
        );

        let (up_tx, up_rx) = batch_queue(self.config.queue_capacity);
        let (down_tx, down_rx) = batch_queue(self.config.queue_capacity);

        let mut tasks = JoinSet::new();
        tasks.spawn(read_bus(self.interface.clone(), self.bus.clone(), up_tx));
        tasks.spawn(forward_batches(
            self.interface.clone(),
            up_rx,
            self.device.clone(),
            Uplink::from(&self.config),
        ));
        tasks.spawn(pump_samples(
            self.interface.clone(),
            self.device.clone(),
            down_tx,
            self.config.stream_timeout(),
        ));
        tasks.spawn(write_bus(
            self.interface.clone(),
            down_rx,
            self.bus.clone(),
            self.config.queue_capacity,
        ));

        let result = match tasks.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(SessionError::Task(e.to_string())),
            None => Ok(()),
        };
        tasks.abort_all();

        if let Err(e) = &result {
            tracing::error!(interface = %self.interface, error = %e, "gateway session ended");
        }
        result
    }
}

// ── Local → remote ──────────────────────────────────────────────

/// Uplink pacing and failure handling.
#[derive(Debug, Clone, Copy)]
pub struct Uplink {
    pub max_batch: usize,
    pub retry_delay: Duration,
    pub policy: SendFailurePolicy,
}

impl From<&GatewayConfig> for Uplink {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_batch: config.max_batch,
            retry_delay: config.retry_delay(),
            policy: config.send_failure_policy,
        }
    }
}

/// Read frames from the local bus into the uplink queue. A read error is fatal.
async fn read_bus(
    interface: String,
    bus: Arc<dyn LocalBus>,
    tx: BatchSender<CanFrame>,
) -> SessionResult<()> {
    loop {
        let frame = bus.receive().await?;
        tracing::debug!(interface = %interface, %frame, "received from local bus");
        if tx.push(frame).await.is_err() {
            return Ok(());
        }
    }
}

/// Drain the uplink queue in batches and hand each batch to the device.
///
/// A batch refused with `TemporarilyUnavailable` is resent after
/// `retry_delay` until the device answers otherwise; nothing behind it is
/// drained meanwhile, so order is kept.
pub async fn forward_batches(
    interface: String,
    mut rx: BatchReceiver<CanFrame>,
    device: Arc<dyn RemoteDevice>,
    uplink: Uplink,
) -> SessionResult<()> {
    while let Some(batch) = rx.drain_batch(uplink.max_batch).await {
        tracing::debug!(interface = %interface, count = batch.len(), "sending frames to device");
        loop {
            match device.send_frames(&batch).await {
                Ok(()) => break,
                Err(RemoteError::TemporarilyUnavailable) => {
                    tracing::debug!(interface = %interface, "device queue full, retrying batch");
                    tokio::time::sleep(uplink.retry_delay).await;
                }
                Err(e) => match uplink.policy {
                    SendFailurePolicy::Drop => {
                        tracing::warn!(
                            interface = %interface,
                            error = %e,
                            dropped = batch.len(),
                            "failed to send frames, batch discarded"
                        );
                        break;
                    }
                    SendFailurePolicy::Fatal => return Err(SessionError::SendFailed(e)),
                },
            }
        }
    }
    Ok(())
}

// ── Remote → local ──────────────────────────────────────────────

/// Tracks the remote controller state and turns transitions into error frames.
#[derive(Debug, Default)]
pub struct BusStateTracker {
    last: ControllerState,
}

impl BusStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> ControllerState {
        self.last
    }

    /// Record `state`; returns the error frame announcing a transition, if any.
    pub fn observe(&mut self, state: ControllerState) -> Option<CanErrorFrame> {
        if state == self.last {
            return None;
        }
        self.last = state;
        match state {
            ControllerState::BusOff => Some(CanErrorFrame::bus_off()),
            ControllerState::ErrorPassive => Some(CanErrorFrame::error_passive()),
            ControllerState::Ok => None,
        }
    }

    /// Everything `sample` asks to write to the local bus, in order:
    /// state transition, received frame, reported error.
    pub fn translate(&mut self, sample: &Sample) -> Vec<BusWrite> {
        let mut out = Vec::new();
        if let Some(err) = self.observe(sample.controller_state) {
            out.push(BusWrite::Error(err));
        }
        if let Some(frame) = sample.data_frame() {
            out.push(BusWrite::Frame(frame.clone()));
        }
        if let Some(err) = error_frame_for(sample.error) {
            out.push(BusWrite::Error(err));
        }
        out
    }
}

/// Map a device error event to the error frame announcing it locally.
pub fn error_frame_for(event: ErrorEvent) -> Option<CanErrorFrame> {
    match event {
        ErrorEvent::None => None,
        ErrorEvent::TransmitFailed => Some(CanErrorFrame::from_class(
            ErrorClass::TX_TIMEOUT | ErrorClass::NO_ACK,
        )),
        ErrorEvent::ReceiveQueueFull => Some(CanErrorFrame::new(
            ErrorClass::CONTROLLER,
            ControllerError::RX_OVERFLOW,
        )),
        ErrorEvent::ArbitrationLost => {
            Some(CanErrorFrame::from_class(ErrorClass::LOST_ARBITRATION))
        }
        ErrorEvent::BusError => Some(CanErrorFrame::from_class(ErrorClass::BUS_ERROR)),
    }
}

/// Read the sample stream into the downlink queue.
///
/// A read timeout means the device went silent despite keepalives and ends
/// the session.
pub async fn pump_samples(
    interface: String,
    device: Arc<dyn RemoteDevice>,
    tx: BatchSender<BusWrite>,
    timeout: Duration,
) -> SessionResult<()> {
    let mut tracker = BusStateTracker::new();
    loop {
        let sample = match device.read_stream(timeout).await {
            Ok(sample) => sample,
            Err(RemoteError::Timeout { .. }) => {
                return Err(SessionError::StreamTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let previous = tracker.last();
        for item in tracker.translate(&sample) {
            if tx.push(item).await.is_err() {
                return Ok(());
            }
        }
        if tracker.last() != previous {
            tracing::info!(
                interface = %interface,
                from = %previous,
                to = %tracker.last(),
                "controller state changed"
            );
        }
    }
}

/// Write everything queued for the local bus. Write errors drop the frame.
async fn write_bus(
    interface: String,
    mut rx: BatchReceiver<BusWrite>,
    bus: Arc<dyn LocalBus>,
    max_items: usize,
) -> SessionResult<()> {
    while let Some(batch) = rx.drain_batch(max_items).await {
        for item in &batch {
            if let Err(e) = bus.write(item).await {
                tracing::warn!(interface = %interface, error = %e, "failed to write to local bus");
            }
        }
    }
    Ok(())
}
