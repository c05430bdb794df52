//! Mock bus and device for testing.
//!
//! `MockBus` replays injected inbound frames and records writes;
//! `MockDevice` follows a script of send outcomes and replays pushed
//! stream samples. Neither needs SocketCAN or a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use vb_frame::{CanErrorFrame, CanFrame};

use crate::bus::{BusWrite, LocalBus};
use crate::device::{RemoteDevice, Sample, StreamConfig};
use crate::error::{BusError, BusResult, RemoteError, RemoteResult};

// ── MockBus ─────────────────────────────────────────────────────

/// Mock local bus with scripted inbound traffic and write recording.
pub struct MockBus {
    inbound_tx: mpsc::UnboundedSender<BusResult<CanFrame>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BusResult<CanFrame>>>,
    written: Mutex<Vec<BusWrite>>,
    fail_writes: AtomicBool,
}

impl MockBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            written: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Queue a frame for `receive`.
    pub fn inject(&self, frame: CanFrame) {
        let _ = self.inbound_tx.send(Ok(frame));
    }

    /// Make the next `receive` fail after already queued frames.
    pub fn inject_read_error(&self, reason: &str) {
        let _ = self.inbound_tx.send(Err(BusError::Io(reason.to_string())));
    }

    /// Make subsequent writes fail (nothing is recorded while set).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Everything successfully written so far.
    pub fn written(&self) -> Vec<BusWrite> {
        self.written.lock().unwrap().clone()
    }

    /// Only the data/remote frames written so far.
    pub fn written_frames(&self) -> Vec<CanFrame> {
        self.written()
            .into_iter()
            .filter_map(|w| match w {
                BusWrite::Frame(f) => Some(f),
                BusWrite::Error(_) => None,
            })
            .collect()
    }

    fn record(&self, item: BusWrite) -> BusResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BusError::Io("write failed".into()));
        }
        self.written.lock().unwrap().push(item);
        Ok(())
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalBus for MockBus {
    async fn send(&self, frame: &CanFrame) -> BusResult<()> {
        self.record(BusWrite::Frame(frame.clone()))
    }

    async fn send_error(&self, frame: &CanErrorFrame) -> BusResult<()> {
        self.record(BusWrite::Error(*frame))
    }

    async fn receive(&self) -> BusResult<CanFrame> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await.unwrap_or(Err(BusError::Closed))
    }
}

// ── MockDevice ──────────────────────────────────────────────────

/// A recorded `send_frames` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAttempt {
    pub frames: Vec<CanFrame>,
    /// Whether the device accepted the batch.
    pub accepted: bool,
}

/// Mock remote device.
///
/// `send_frames` pops outcomes from a script (accepting once it is empty).
/// `read_stream` returns pushed samples and times out when none arrive.
pub struct MockDevice {
    send_script: Mutex<VecDeque<RemoteResult<()>>>,
    attempts: Mutex<Vec<SendAttempt>>,
    samples_tx: mpsc::UnboundedSender<Sample>,
    samples_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Sample>>,
    stream_config: Mutex<Option<StreamConfig>>,
    stream_start_error: Mutex<Option<String>>,
    bitrate: Mutex<Option<u32>>,
}

impl MockDevice {
    pub fn new() -> Self {
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        Self {
            send_script: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            samples_tx,
            samples_rx: tokio::sync::Mutex::new(samples_rx),
            stream_config: Mutex::new(None),
            stream_start_error: Mutex::new(None),
            bitrate: Mutex::new(None),
        }
    }

    /// Queue the outcome of the next unscripted `send_frames` call.
    pub fn script_send(&self, outcome: RemoteResult<()>) {
        self.send_script.lock().unwrap().push_back(outcome);
    }

    /// Queue a sample for `read_stream`.
    pub fn push_sample(&self, sample: Sample) {
        let _ = self.samples_tx.send(sample);
    }

    /// Make `start_stream` fail with `reason`.
    pub fn fail_stream_start(&self, reason: &str) {
        *self.stream_start_error.lock().unwrap() = Some(reason.to_string());
    }

    /// All `send_frames` calls so far.
    pub fn send_attempts(&self) -> Vec<SendAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Frames of accepted batches, in delivery order.
    pub fn delivered_frames(&self) -> Vec<CanFrame> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.accepted)
            .flat_map(|a| a.frames.iter().cloned())
            .collect()
    }

    pub fn stream_config(&self) -> Option<StreamConfig> {
        *self.stream_config.lock().unwrap()
    }

    pub fn bitrate(&self) -> Option<u32> {
        *self.bitrate.lock().unwrap()
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDevice for MockDevice {
    async fn configure(&self, bitrate: u32) -> RemoteResult<()> {
        *self.bitrate.lock().unwrap() = Some(bitrate);
        Ok(())
    }

    async fn send_frames(&self, frames: &[CanFrame]) -> RemoteResult<()> {
        let outcome = self.send_script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        self.attempts.lock().unwrap().push(SendAttempt {
            frames: frames.to_vec(),
            accepted: outcome.is_ok(),
        });
        outcome
    }

    async fn start_stream(&self, config: &StreamConfig) -> RemoteResult<()> {
        if let Some(reason) = self.stream_start_error.lock().unwrap().clone() {
            return Err(RemoteError::Rejected(reason));
        }
        *self.stream_config.lock().unwrap() = Some(*config);
        Ok(())
    }

    async fn read_stream(&self, timeout: Duration) -> RemoteResult<Sample> {
        let mut rx = self.samples_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(sample)) => Ok(sample),
            Ok(None) => Err(RemoteError::Closed),
            Err(_) => Err(RemoteError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
