//! Launching gateway processes for discovered devices.

use std::path::PathBuf;

use crate::error::SupervisorResult;
use crate::registry::DeviceAddress;
use crate::supervisor::{RestartPolicy, Supervisor};

/// A running bridge for one device.
pub trait BridgeProcess: Send + Sync {
    /// Terminate the bridge; it is never restarted afterwards.
    fn stop(&self) -> SupervisorResult<()>;

    fn is_running(&self) -> bool;
}

/// Starts bridges. Abstracted so lifecycle logic can be tested without
/// real processes.
pub trait BridgeLauncher: Send + Sync {
    fn launch(
        &self,
        interface: &str,
        address: &DeviceAddress,
    ) -> SupervisorResult<Box<dyn BridgeProcess>>;
}

impl BridgeProcess for Supervisor {
    fn stop(&self) -> SupervisorResult<()> {
        Supervisor::stop(self)
    }

    fn is_running(&self) -> bool {
        Supervisor::is_running(self)
    }
}

/// Runs `<executable> [extra args..] <address> <interface>` under a
/// [`Supervisor`] whose id is the interface name.
#[derive(Debug, Clone)]
pub struct SupervisorLauncher {
    executable: PathBuf,
    extra_args: Vec<String>,
    policy: RestartPolicy,
}

impl SupervisorLauncher {
    pub fn new(executable: impl Into<PathBuf>, extra_args: Vec<String>, policy: RestartPolicy) -> Self {
        Self {
            executable: executable.into(),
            extra_args,
            policy,
        }
    }

    /// Command-line arguments for one bridge.
    pub fn args(&self, interface: &str, address: &DeviceAddress) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push(address.to_string());
        args.push(interface.to_string());
        args
    }
}

impl BridgeLauncher for SupervisorLauncher {
    fn launch(
        &self,
        interface: &str,
        address: &DeviceAddress,
    ) -> SupervisorResult<Box<dyn BridgeProcess>> {
        let args = self.args(interface, address);
        let supervisor = Supervisor::start(interface, &self.executable, &args, self.policy)?;
        Ok(Box::new(supervisor))
    }
}
