//! Mock interface control and bridge launcher for testing.
//!
//! `MockInterfaceControl` keeps an in-memory table of interfaces and their
//! up flag; `MockLauncher` records every launch and hands out processes
//! whose stop calls are counted. No root privileges or binaries needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{NetifError, NetifResult, SupervisorError, SupervisorResult};
use crate::launcher::{BridgeLauncher, BridgeProcess};
use crate::netif::InterfaceControl;
use crate::registry::DeviceAddress;

// ── MockInterfaceControl ────────────────────────────────────────

/// A recorded interface control call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetifCall {
    Create(String),
    Delete(String),
}

/// In-memory interface table.
pub struct MockInterfaceControl {
    interfaces: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<NetifCall>>,
    create_up: AtomicBool,
    fail_create: AtomicBool,
}

impl MockInterfaceControl {
    /// Created interfaces come up immediately, like `IpLink`.
    pub fn new() -> Self {
        Self {
            interfaces: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            create_up: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
        }
    }

    /// Whether newly created interfaces start up.
    pub fn set_create_up(&self, up: bool) {
        self.create_up.store(up, Ordering::SeqCst);
    }

    /// Make `create` fail.
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Change the up flag of an existing interface.
    pub fn set_up(&self, name: &str, up: bool) {
        if let Some(flag) = self.interfaces.lock().unwrap().get_mut(name) {
            *flag = up;
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.interfaces.lock().unwrap().contains_key(name)
    }

    pub fn calls(&self) -> Vec<NetifCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                NetifCall::Create(name) => Some(name),
                NetifCall::Delete(_) => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                NetifCall::Delete(name) => Some(name),
                NetifCall::Create(_) => None,
            })
            .collect()
    }
}

impl Default for MockInterfaceControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterfaceControl for MockInterfaceControl {
    async fn create(&self, name: &str) -> NetifResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(NetifCall::Create(name.to_string()));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(NetifError::Failed {
                command: format!("ip link add dev {name} type vcan"),
                output: "Operation not permitted".into(),
            });
        }
        let up = self.create_up.load(Ordering::SeqCst);
        self.interfaces
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(up);
        Ok(())
    }

    async fn delete(&self, name: &str) -> NetifResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(NetifCall::Delete(name.to_string()));
        match self.interfaces.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(NetifError::Failed {
                command: format!("ip link delete {name}"),
                output: "Cannot find device".into(),
            }),
        }
    }

    async fn is_up(&self, name: &str) -> NetifResult<bool> {
        self.interfaces
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| NetifError::Failed {
                command: format!("ip -o link show dev {name}"),
                output: format!("Device \"{name}\" does not exist."),
            })
    }
}

// ── MockLauncher ────────────────────────────────────────────────

/// A recorded launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub interface: String,
    pub address: DeviceAddress,
}

#[derive(Debug)]
struct ProcessState {
    running: AtomicBool,
    stops: AtomicU32,
}

struct MockProcess {
    interface: String,
    state: Arc<ProcessState>,
}

impl BridgeProcess for MockProcess {
    fn stop(&self) -> SupervisorResult<()> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        if self.state.running.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SupervisorError::NotRunning(self.interface.clone()))
        }
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

/// Launcher recording every bridge it starts.
pub struct MockLauncher {
    launches: Mutex<Vec<(Launch, Arc<ProcessState>)>>,
    fail: AtomicBool,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Make subsequent launches fail.
    pub fn fail_launches(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every launch so far, oldest first.
    pub fn launches(&self) -> Vec<Launch> {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .map(|(launch, _)| launch.clone())
            .collect()
    }

    /// Launches whose process has not been stopped.
    pub fn running(&self) -> Vec<Launch> {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, state)| state.running.load(Ordering::SeqCst))
            .map(|(launch, _)| launch.clone())
            .collect()
    }

    /// Number of `stop` calls on the process of launch `index`.
    pub fn stop_count(&self, index: usize) -> u32 {
        self.launches
            .lock()
            .unwrap()
            .get(index)
            .map_or(0, |(_, state)| state.stops.load(Ordering::SeqCst))
    }
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeLauncher for MockLauncher {
    fn launch(
        &self,
        interface: &str,
        address: &DeviceAddress,
    ) -> SupervisorResult<Box<dyn BridgeProcess>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SupervisorError::Spawn {
                id: interface.to_string(),
                reason: "launch disabled".into(),
            });
        }
        let state = Arc::new(ProcessState {
            running: AtomicBool::new(true),
            stops: AtomicU32::new(0),
        });
        self.launches.lock().unwrap().push((
            Launch {
                interface: interface.to_string(),
                address: address.clone(),
            },
            Arc::clone(&state),
        ));
        Ok(Box::new(MockProcess {
            interface: interface.to_string(),
            state,
        }))
    }
}
