//! Virtual CAN interface control through the `ip` tool.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::error::{NetifError, NetifResult};

/// Flag list of an `ip -o link` line, e.g. `<NOARP,UP,LOWER_UP>`.
static RE_FLAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+:\s+\S+:\s+<([^>]*)>").unwrap());

/// Create, inspect and delete local virtual interfaces.
#[async_trait]
pub trait InterfaceControl: Send + Sync {
    /// Create the interface and bring it up. An existing interface is
    /// not an error.
    async fn create(&self, name: &str) -> NetifResult<()>;

    async fn delete(&self, name: &str) -> NetifResult<()>;

    /// Whether the interface is administratively up.
    async fn is_up(&self, name: &str) -> NetifResult<bool>;
}

/// [`InterfaceControl`] running `ip link` commands.
#[derive(Debug, Clone)]
pub struct IpLink {
    program: String,
}

impl Default for IpLink {
    fn default() -> Self {
        Self {
            program: "ip".to_string(),
        }
    }
}

impl IpLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another binary in place of `ip`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run the tool and return its combined output.
    async fn run(&self, args: &[&str]) -> NetifResult<String> {
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::debug!(%command, "running");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| NetifError::Exec {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(NetifError::Failed {
                command,
                output: text.trim().to_string(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl InterfaceControl for IpLink {
    async fn create(&self, name: &str) -> NetifResult<()> {
        match self.run(&["link", "add", "dev", name, "type", "vcan"]).await {
            Ok(_) => {}
            Err(NetifError::Failed { output, .. }) if output.contains("File exists") => {
                tracing::debug!(interface = name, "interface already exists");
            }
            Err(e) => return Err(e),
        }
        self.run(&["link", "set", "up", name]).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> NetifResult<()> {
        self.run(&["link", "delete", name]).await?;
        Ok(())
    }

    async fn is_up(&self, name: &str) -> NetifResult<bool> {
        let output = self.run(&["-o", "link", "show", "dev", name]).await?;
        Ok(output.lines().any(flags_up))
    }
}

/// Whether an `ip -o link` line lists the `UP` flag.
pub fn flags_up(line: &str) -> bool {
    RE_FLAGS
        .captures(line)
        .is_some_and(|caps| caps[1].split(',').any(|flag| flag == "UP"))
}
