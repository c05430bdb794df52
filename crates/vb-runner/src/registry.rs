//! Registry of discovered devices, keyed by local interface name.
//!
//! Every method takes the lock for its own duration only, and nothing
//! outside this module touches the map. Process handles are moved out
//! before they are stopped so no process call runs under the lock.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use crate::launcher::BridgeProcess;

/// Network address of a remote device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for DeviceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in {s:?}"))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("bad port in {s:?}: {e}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("missing host in {s:?}"));
        }
        Ok(Self::new(host, port))
    }
}

/// One discovered device.
pub struct DeviceRecord {
    pub instance: String,
    pub interface: String,
    pub address: DeviceAddress,
    pub process: Option<Box<dyn BridgeProcess>>,
}

/// Read-only copy of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceView {
    pub instance: String,
    pub interface: String,
    pub address: DeviceAddress,
    /// Whether a bridge process is attached.
    pub running: bool,
}

impl From<&DeviceRecord> for DeviceView {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            instance: record.instance.clone(),
            interface: record.interface.clone(),
            address: record.address.clone(),
            running: record.process.is_some(),
        }
    }
}

/// Outcome of [`DeviceRegistry::update_address`].
pub enum AddressUpdate {
    /// No record under that interface name.
    Unknown,
    /// Same address as stored.
    Unchanged,
    /// Address replaced; the detached process (if any) must be stopped.
    Changed {
        previous: DeviceAddress,
        process: Option<Box<dyn BridgeProcess>>,
    },
}

/// The device registry.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record without a process. Returns false if the interface
    /// name is already registered.
    pub fn register(&self, instance: &str, interface: &str, address: DeviceAddress) -> bool {
        let mut devices = self.lock();
        if devices.contains_key(interface) {
            return false;
        }
        devices.insert(
            interface.to_string(),
            DeviceRecord {
                instance: instance.to_string(),
                interface: interface.to_string(),
                address,
                process: None,
            },
        );
        true
    }

    /// Store a new address, detaching the running process when it changes.
    pub fn update_address(&self, interface: &str, address: DeviceAddress) -> AddressUpdate {
        let mut devices = self.lock();
        let Some(record) = devices.get_mut(interface) else {
            return AddressUpdate::Unknown;
        };
        if record.address == address {
            return AddressUpdate::Unchanged;
        }
        let previous = std::mem::replace(&mut record.address, address);
        AddressUpdate::Changed {
            previous,
            process: record.process.take(),
        }
    }

    /// Attach a freshly launched process.
    ///
    /// Hands the process back if the record vanished or already has one,
    /// so the caller can stop it.
    pub fn attach_process(
        &self,
        interface: &str,
        process: Box<dyn BridgeProcess>,
    ) -> Result<(), Box<dyn BridgeProcess>> {
        let mut devices = self.lock();
        match devices.get_mut(interface) {
            Some(record) if record.process.is_none() => {
                record.process = Some(process);
                Ok(())
            }
            _ => Err(process),
        }
    }

    /// Detach the process of `interface`, if any.
    pub fn take_process(&self, interface: &str) -> Option<Box<dyn BridgeProcess>> {
        self.lock()
            .get_mut(interface)
            .and_then(|record| record.process.take())
    }

    /// Remove and return the record of `interface`.
    pub fn remove(&self, interface: &str) -> Option<DeviceRecord> {
        self.lock().remove(interface)
    }

    pub fn lookup(&self, interface: &str) -> Option<DeviceView> {
        self.lock().get(interface).map(DeviceView::from)
    }

    pub fn contains(&self, interface: &str) -> bool {
        self.lock().contains_key(interface)
    }

    pub fn has_process(&self, interface: &str) -> bool {
        self.lock()
            .get(interface)
            .is_some_and(|record| record.process.is_some())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copies of all records, sorted by interface name.
    pub fn snapshot(&self) -> Vec<DeviceView> {
        let mut views: Vec<DeviceView> = self.lock().values().map(DeviceView::from).collect();
        views.sort_by(|a, b| a.interface.cmp(&b.interface));
        views
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DeviceRecord>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
