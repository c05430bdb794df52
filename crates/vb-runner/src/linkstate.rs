//! Link-state updates from `ip -o monitor link`.

use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::mpsc;

use crate::error::SourceResult;
use crate::source::stream_lines;

static RE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\[LINK\]\s*)?(Deleted\s+)?\d+:\s+([^:\s]+):\s+<[^>]*>.*?\bstate\s+(\S+)")
        .unwrap()
});

/// Operational state reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperState {
    Up,
    Down,
    /// Usual state of an up vcan interface.
    Unknown,
    Other(String),
}

impl OperState {
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Down)
    }
}

impl From<&str> for OperState {
    fn from(s: &str) -> Self {
        match s {
            "UP" => Self::Up,
            "DOWN" => Self::Down,
            "UNKNOWN" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for OperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// One link-state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkUpdate {
    pub interface: String,
    pub state: OperState,
}

/// Parse one line of `ip -o monitor link`. A deleted link is reported
/// as down.
pub fn parse_line(line: &str) -> Option<LinkUpdate> {
    let caps = RE_LINK.captures(line)?;
    let name = &caps[2];
    let interface = name.split_once('@').map_or(name, |(base, _)| base);
    let state = if caps.get(1).is_some() {
        OperState::Down
    } else {
        OperState::from(&caps[3])
    };
    Some(LinkUpdate {
        interface: interface.to_string(),
        state,
    })
}

/// Follow link-state changes of all interfaces until the monitor exits.
pub async fn monitor<T>(tx: mpsc::Sender<T>) -> SourceResult<()>
where
    T: From<LinkUpdate>,
{
    stream_lines(
        "ip",
        &["-o", "monitor", "link"],
        |line| parse_line(line).map(T::from),
        tx,
    )
    .await
}
