//! Gateway configuration, loadable from TOML.

use std::time::Duration;

use serde::Deserialize;

use crate::device::StreamConfig;
use crate::queue::QUEUE_CAPACITY;

/// What to do when the device rejects a batch for a reason other than a
/// full transmit queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailurePolicy {
    /// Log and discard the batch, keep the session running.
    #[default]
    Drop,
    /// End the session; the supervisor restarts the bridge.
    Fatal,
}

/// Tunables of one gateway session.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Depth of each direction's batch queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum frames forwarded to the device in one request.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Delay before resending a batch the device could not accept.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Keepalive interval requested for the sample stream.
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u32,
    /// Stream read timeout as a multiple of the keepalive interval.
    #[serde(default = "default_stream_timeout_factor")]
    pub stream_timeout_factor: u32,
    /// Samples per stream bucket.
    #[serde(default = "default_bucket_samples")]
    pub bucket_samples: u32,
    /// Samples buffered on the device.
    #[serde(default = "default_buffered_samples")]
    pub buffered_samples: u32,
    #[serde(default)]
    pub send_failure_policy: SendFailurePolicy,
    /// Remote bus bitrate in bit/s. None keeps the device's setting.
    #[serde(default)]
    pub bitrate: Option<u32>,
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_queue_capacity() -> usize {
    QUEUE_CAPACITY
}

fn default_max_batch() -> usize {
    30
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_keepalive_ms() -> u32 {
    1000
}

fn default_stream_timeout_factor() -> u32 {
    3
}

fn default_bucket_samples() -> u32 {
    25
}

fn default_buffered_samples() -> u32 {
    400
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_batch: default_max_batch(),
            retry_delay_ms: default_retry_delay_ms(),
            keepalive_ms: default_keepalive_ms(),
            stream_timeout_factor: default_stream_timeout_factor(),
            bucket_samples: default_bucket_samples(),
            buffered_samples: default_buffered_samples(),
            send_failure_policy: SendFailurePolicy::default(),
            bitrate: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl GatewayConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings a session cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.max_batch == 0 {
            anyhow::bail!("max_batch must be at least 1");
        }
        if self.keepalive_ms == 0 {
            anyhow::bail!("keepalive_ms must be at least 1");
        }
        if self.stream_timeout_factor == 0 {
            anyhow::bail!("stream_timeout_factor must be at least 1");
        }
        if self.bitrate == Some(0) {
            anyhow::bail!("bitrate must not be 0");
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// How long the sample stream may stay silent before the session dies.
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.keepalive_ms) * u64::from(self.stream_timeout_factor))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            bucket_samples: self.bucket_samples,
            buffered_samples: self.buffered_samples,
            keepalive_interval_ms: self.keepalive_ms,
        }
    }
}
