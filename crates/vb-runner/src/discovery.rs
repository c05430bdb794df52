//! Service discovery through `avahi-browse`.
//!
//! The browser runs in parsable mode with resolution enabled. Every line
//! describes one service on one network interface: resolved services
//! (`=` lines) and removed services (`-` lines). Only IPv4 records are
//! used. [`ServiceTracker`] folds the per-interface records into
//! [`DiscoveryEvent`]s, so a device stays added while any interface still
//! sees it.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;

use crate::error::SourceResult;
use crate::registry::DeviceAddress;
use crate::source::stream_lines;

/// Service type announced by remote CAN devices.
pub const DEFAULT_SERVICE_TYPE: &str = "_io4edge_canL2._tcp";

/// A service appeared, changed or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added {
        instance: String,
        address: DeviceAddress,
    },
    Removed {
        instance: String,
    },
}

impl DiscoveryEvent {
    pub fn instance(&self) -> &str {
        match self {
            Self::Added { instance, .. } | Self::Removed { instance } => instance,
        }
    }
}

/// One browser line: a service as seen on network interface `nic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceRecord {
    Resolved {
        nic: String,
        instance: String,
        address: DeviceAddress,
    },
    Removed {
        nic: String,
        instance: String,
    },
}

/// Parse one `avahi-browse -p -r` line for `service_type`.
pub fn parse_line(line: &str, service_type: &str) -> Option<ServiceRecord> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < 6 || fields[2] != "IPv4" || fields[4] != service_type {
        return None;
    }
    let nic = fields[1].to_string();
    let instance = unescape(fields[3]);

    match fields[0] {
        "=" => {
            let host = fields.get(7)?;
            let port = fields.get(8)?.parse::<u16>().ok()?;
            if host.is_empty() {
                return None;
            }
            Some(ServiceRecord::Resolved {
                nic,
                instance,
                address: DeviceAddress::new(*host, port),
            })
        }
        "-" => Some(ServiceRecord::Removed { nic, instance }),
        _ => None,
    }
}

#[derive(Debug)]
struct Presence {
    /// Address last resolved on each network interface.
    nics: BTreeMap<String, DeviceAddress>,
    /// Interface whose address is in use.
    current: String,
}

/// Per-instance view over all network interfaces.
///
/// A device keeps the address of the interface it was first resolved on
/// until that interface loses it; then another interface's address takes
/// over. The device is removed once no interface sees it.
#[derive(Debug, Default)]
pub struct ServiceTracker {
    services: HashMap<String, Presence>,
}

impl ServiceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one record; returns the event it causes, if any.
    pub fn apply(&mut self, record: ServiceRecord) -> Option<DiscoveryEvent> {
        match record {
            ServiceRecord::Resolved {
                nic,
                instance,
                address,
            } => match self.services.entry(instance.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(Presence {
                        nics: BTreeMap::from([(nic.clone(), address.clone())]),
                        current: nic,
                    });
                    Some(DiscoveryEvent::Added { instance, address })
                }
                Entry::Occupied(mut entry) => {
                    let presence = entry.get_mut();
                    presence.nics.insert(nic.clone(), address.clone());
                    (presence.current == nic).then_some(DiscoveryEvent::Added { instance, address })
                }
            },
            ServiceRecord::Removed { nic, instance } => {
                let presence = self.services.get_mut(&instance)?;
                presence.nics.remove(&nic)?;
                if presence.current != nic {
                    return None;
                }
                let next = presence
                    .nics
                    .iter()
                    .next()
                    .map(|(other, address)| (other.clone(), address.clone()));
                match next {
                    Some((other, address)) => {
                        tracing::debug!(%instance, lost = %nic, now = %other, "service moved to another interface");
                        presence.current = other;
                        Some(DiscoveryEvent::Added { instance, address })
                    }
                    None => {
                        self.services.remove(&instance);
                        Some(DiscoveryEvent::Removed { instance })
                    }
                }
            }
        }
    }
}

/// Undo avahi label escaping: `\DDD` is a decimal byte, `\c` is `c`.
fn unescape(label: &str) -> String {
    let bytes = label.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let digits = &bytes[i + 1..bytes.len().min(i + 4)];
            if digits.len() == 3 && digits.iter().all(u8::is_ascii_digit) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
            out.push(bytes[i + 1]);
            i += 2;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Browse `service_type` until the browser exits.
pub async fn browse<T>(service_type: &str, tx: mpsc::Sender<T>) -> SourceResult<()>
where
    T: From<DiscoveryEvent>,
{
    let mut tracker = ServiceTracker::new();
    stream_lines(
        "avahi-browse",
        &["-p", "-r", "-k", "-f", service_type],
        |line| {
            parse_line(line, service_type)
                .and_then(|record| tracker.apply(record))
                .map(T::from)
        },
        tx,
    )
    .await
}
