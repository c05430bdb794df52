//! TCP client for remote CAN devices.
//!
//! Every message is framed as `FE ED`, a little-endian `u32` payload
//! length and a JSON payload. Every request carries an `id` and is
//! answered by exactly one `response` message echoing it; `stream_data`
//! buckets arrive unsolicited once the stream has been started and are
//! split into single samples here.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use vb_frame::CanFrame;

use crate::device::{RemoteDevice, Sample, StreamConfig};
use crate::error::{RemoteError, RemoteResult};

/// Frame header magic.
const MAGIC: [u8; 2] = [0xFE, 0xED];

/// Largest accepted payload.
const MAX_PAYLOAD: usize = 1024 * 1024;

/// Default time a request may wait for its response.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Buckets buffered between the socket reader and `read_stream`.
const BUCKET_BUFFER: usize = 64;

// ── Wire messages ───────────────────────────────────────────────

/// Requests sent to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Request {
    Configure { bitrate: u32 },
    SendFrames { frames: Vec<CanFrame> },
    StartStream(StreamConfig),
}

/// A request as written to the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RequestFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// Outcome reported in a `response` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ResponseStatus {
    Ok,
    TemporarilyUnavailable,
    Error,
}

/// Messages received from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum DeviceMessage {
    Response {
        id: u64,
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StreamData {
        sequence: u64,
        samples: Vec<Sample>,
    },
}

/// Write one framed message.
pub(crate) async fn write_message<W, T>(writer: &mut W, message: &T) -> RemoteResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload =
        serde_json::to_vec(message).map_err(|e| RemoteError::Protocol(e.to_string()))?;
    if payload.len() > MAX_PAYLOAD {
        return Err(RemoteError::Protocol(format!(
            "payload of {} bytes exceeds limit",
            payload.len()
        )));
    }
    let mut buf = Vec::with_capacity(payload.len() + 6);
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
pub(crate) async fn read_message<R, T>(reader: &mut R) -> RemoteResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 6];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(RemoteError::Closed);
        }
        Err(e) => return Err(e.into()),
    }
    if header[..2] != MAGIC {
        return Err(RemoteError::Protocol(format!(
            "bad magic {:02x}{:02x}",
            header[0], header[1]
        )));
    }
    let len = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(RemoteError::Protocol(format!(
            "payload of {len} bytes exceeds limit"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    serde_json::from_slice(&payload).map_err(|e| RemoteError::Protocol(e.to_string()))
}

// ── TcpDevice ───────────────────────────────────────────────────

/// Answer to one request, as routed by the reader task.
struct Reply {
    id: u64,
    status: ResponseStatus,
    error: Option<String>,
}

/// Request side of the connection. One request is in flight at a time.
struct CommandChannel {
    writer: OwnedWriteHalf,
    responses: mpsc::Receiver<Reply>,
    next_id: u64,
}

/// Stream side: buckets from the reader task, split into samples.
struct SampleStream {
    buckets: mpsc::Receiver<Vec<Sample>>,
    pending: VecDeque<Sample>,
}

/// Remote CAN device reached over TCP.
pub struct TcpDevice {
    address: String,
    commands: Mutex<CommandChannel>,
    stream: Mutex<SampleStream>,
    reader: JoinHandle<()>,
    command_timeout: Duration,
}

impl TcpDevice {
    /// Connect to `address` (`host:port`).
    pub async fn connect(address: &str, timeout: Duration) -> RemoteResult<Self> {
        let socket = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| RemoteError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| RemoteError::Connection(format!("{address}: {e}")))?;
        socket.set_nodelay(true)?;
        Ok(Self::from_stream(address, socket))
    }

    fn from_stream(address: &str, socket: TcpStream) -> Self {
        let (mut read_half, writer) = socket.into_split();
        let (resp_tx, responses) = mpsc::channel(4);
        let (bucket_tx, buckets) = mpsc::channel(BUCKET_BUFFER);
        let peer = address.to_string();

        let reader = tokio::spawn(async move {
            loop {
                match read_message::<_, DeviceMessage>(&mut read_half).await {
                    Ok(DeviceMessage::Response { id, status, error }) => {
                        if resp_tx.send(Reply { id, status, error }).await.is_err() {
                            break;
                        }
                    }
                    Ok(DeviceMessage::StreamData { sequence, samples }) => {
                        tracing::trace!(device = %peer, sequence, count = samples.len(), "stream bucket");
                        if bucket_tx.send(samples).await.is_err() {
                            break;
                        }
                    }
                    Err(RemoteError::Closed) => {
                        tracing::warn!(device = %peer, "device closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(device = %peer, error = %e, "device connection failed");
                        break;
                    }
                }
            }
        });

        Self {
            address: address.to_string(),
            commands: Mutex::new(CommandChannel {
                writer,
                responses,
                next_id: 1,
            }),
            stream: Mutex::new(SampleStream {
                buckets,
                pending: VecDeque::new(),
            }),
            reader,
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    /// Override how long a request waits for its response.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn request(&self, request: &Request) -> RemoteResult<()> {
        let mut channel = self.commands.lock().await;
        let id = channel.next_id;
        channel.next_id += 1;
        let frame = RequestFrame {
            id,
            request: request.clone(),
        };
        write_message(&mut channel.writer, &frame).await?;

        // Answers to requests that already timed out are discarded here.
        let deadline = tokio::time::Instant::now() + self.command_timeout;
        let Reply { status, error, .. } = loop {
            let reply = tokio::time::timeout_at(deadline, channel.responses.recv())
                .await
                .map_err(|_| RemoteError::Timeout {
                    timeout_ms: self.command_timeout.as_millis() as u64,
                })?
                .ok_or(RemoteError::Closed)?;
            if reply.id == id {
                break reply;
            }
            tracing::debug!(device = %self.address, id = reply.id, expected = id, "discarding stale response");
        };

        match status {
            ResponseStatus::Ok => Ok(()),
            ResponseStatus::TemporarilyUnavailable => Err(RemoteError::TemporarilyUnavailable),
            ResponseStatus::Error => Err(RemoteError::Rejected(
                error.unwrap_or_else(|| "unspecified error".into()),
            )),
        }
    }
}

impl Drop for TcpDevice {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl RemoteDevice for TcpDevice {
    async fn configure(&self, bitrate: u32) -> RemoteResult<()> {
        self.request(&Request::Configure { bitrate }).await
    }

    async fn send_frames(&self, frames: &[CanFrame]) -> RemoteResult<()> {
        self.request(&Request::SendFrames {
            frames: frames.to_vec(),
        })
        .await
    }

    async fn start_stream(&self, config: &StreamConfig) -> RemoteResult<()> {
        self.request(&Request::StartStream(*config)).await
    }

    async fn read_stream(&self, timeout: Duration) -> RemoteResult<Sample> {
        let mut stream = self.stream.lock().await;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(sample) = stream.pending.pop_front() {
                return Ok(sample);
            }
            // Keepalive buckets may be empty; keep waiting until the deadline.
            match tokio::time::timeout_at(deadline, stream.buckets.recv()).await {
                Ok(Some(bucket)) => stream.pending.extend(bucket),
                Ok(None) => return Err(RemoteError::Closed),
                Err(_) => {
                    return Err(RemoteError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
    }
}
