//! Local CAN bus abstraction.
//!
//! `LocalBus` trait with `send`/`send_error`/`receive`. Two impls:
//! - `SocketCanBus`: Linux-only, raw `CAN_RAW` socket bound to a (virtual) interface
//! - `MockBus`: all platforms, scripted inbound frames (in `mock.rs`)

use async_trait::async_trait;

use vb_frame::{CanErrorFrame, CanFrame};

use crate::error::BusResult;

/// Something queued for the local bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusWrite {
    Frame(CanFrame),
    Error(CanErrorFrame),
}

/// Trait for local CAN bus implementations.
#[async_trait]
pub trait LocalBus: Send + Sync {
    /// Write a data or remote-request frame.
    async fn send(&self, frame: &CanFrame) -> BusResult<()>;

    /// Write a synthesized error frame.
    async fn send_error(&self, frame: &CanErrorFrame) -> BusResult<()>;

    /// Wait for the next data or remote-request frame. Error frames read
    /// from the bus are skipped.
    async fn receive(&self) -> BusResult<CanFrame>;

    /// Write whichever kind of frame `item` holds.
    async fn write(&self, item: &BusWrite) -> BusResult<()> {
        match item {
            BusWrite::Frame(frame) => self.send(frame).await,
            BusWrite::Error(frame) => self.send_error(frame).await,
        }
    }
}

// ── SocketCAN (Linux-only) ──────────────────────────────────────

#[cfg(target_os = "linux")]
pub use socket::SocketCanBus;

#[cfg(target_os = "linux")]
mod socket {
    use std::io;
    use std::os::fd::{AsRawFd, RawFd};

    use async_trait::async_trait;
    use socketcan::{CanSocket, Socket};
    use tokio::io::unix::AsyncFd;

    use vb_frame::{CanErrorFrame, CanFrame, Decoded, WIRE_FRAME_LEN, codec};

    use super::LocalBus;
    use crate::error::{BusError, BusResult};

    /// Raw SocketCAN socket exchanging 16-byte `can_frame` blocks.
    ///
    /// `socketcan` resolves and binds the interface; frames go through
    /// [`vb_frame::codec`] and plain `read`/`write` on the descriptor.
    pub struct SocketCanBus {
        interface: String,
        fd: AsyncFd<CanSocket>,
    }

    impl SocketCanBus {
        /// Open a raw socket bound to `interface`.
        pub fn open(interface: &str) -> BusResult<Self> {
            let open_err = |e: io::Error| BusError::Open {
                interface: interface.to_string(),
                reason: e.to_string(),
            };
            let socket = CanSocket::open(interface).map_err(open_err)?;
            socket.set_nonblocking(true).map_err(open_err)?;
            let fd = AsyncFd::new(socket).map_err(open_err)?;
            Ok(Self {
                interface: interface.to_string(),
                fd,
            })
        }

        pub fn interface(&self) -> &str {
            &self.interface
        }

        async fn write_block(&self, block: &[u8; WIRE_FRAME_LEN]) -> BusResult<()> {
            loop {
                let mut guard = self.fd.writable().await?;
                match guard.try_io(|inner| write_raw(inner.get_ref().as_raw_fd(), block)) {
                    Ok(Ok(n)) if n == WIRE_FRAME_LEN => return Ok(()),
                    Ok(Ok(n)) => {
                        return Err(BusError::Io(format!(
                            "short write: {n} of {WIRE_FRAME_LEN} bytes"
                        )));
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_would_block) => continue,
                }
            }
        }

        async fn read_block(&self) -> BusResult<([u8; WIRE_FRAME_LEN], usize)> {
            let mut block = [0u8; WIRE_FRAME_LEN];
            loop {
                let mut guard = self.fd.readable().await?;
                match guard.try_io(|inner| read_raw(inner.get_ref().as_raw_fd(), &mut block)) {
                    Ok(Ok(0)) => return Err(BusError::Closed),
                    Ok(Ok(n)) => return Ok((block, n)),
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_would_block) => continue,
                }
            }
        }
    }

    #[async_trait]
    impl LocalBus for SocketCanBus {
        async fn send(&self, frame: &CanFrame) -> BusResult<()> {
            self.write_block(&codec::encode(frame)).await
        }

        async fn send_error(&self, frame: &CanErrorFrame) -> BusResult<()> {
            self.write_block(&codec::encode_error(frame)).await
        }

        async fn receive(&self) -> BusResult<CanFrame> {
            loop {
                let (block, len) = self.read_block().await?;
                if len != WIRE_FRAME_LEN {
                    tracing::debug!(interface = %self.interface, len, "ignoring short CAN read");
                    continue;
                }
                match codec::decode(&block) {
                    Some(Decoded::Frame(frame)) => return Ok(frame),
                    Some(Decoded::Error(err)) => {
                        tracing::debug!(interface = %self.interface, %err, "skipping error frame");
                    }
                    None => {
                        tracing::debug!(interface = %self.interface, "ignoring malformed frame");
                    }
                }
            }
        }
    }

    fn write_raw(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `buf` is a valid readable region of `buf.len()` bytes for the call.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn read_raw(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is a valid writable region of `buf.len()` bytes for the call.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}
