//! TCP port probing with platform-specific implementations.
//!
//! Answers "is port P bound?", "which process owns it?", and provides the
//! kill primitive used by conflict resolution. Ownership lookup has to shell
//! out to OS tools (`lsof`, `ss`, `netstat`); there is no portable
//! unprivileged syscall for "who owns this listening socket".

#[cfg(target_os = "macos")]
mod darwin;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
mod windows;

use tracing::{debug, warn};

use crate::error::Result;
use crate::process;

/// An OS process found listening on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOwner {
    /// Process ID.
    pub pid: u32,

    /// Short command name (e.g. "node").
    pub command: String,
}

/// Trait for port ownership and termination, so callers can be tested
/// against a mock instead of the live OS.
pub trait PortProber: Send + Sync {
    /// All processes currently listening on `port`.
    ///
    /// A port can have multiple listeners across protocols and interfaces.
    fn owners_of(&self, port: u16) -> impl std::future::Future<Output = Result<Vec<PortOwner>>> + Send;

    /// Whether anything is currently bound to `port`.
    ///
    /// Fail-open: a probe failure must report "not in use" rather than block
    /// a legitimate script run.
    fn is_port_in_use(&self, port: u16) -> impl std::future::Future<Output = bool> + Send;

    /// Kill every process bound to `port` with a non-catchable signal.
    ///
    /// Returns true iff at least one termination succeeded.
    fn kill_owners(&self, port: u16) -> impl std::future::Future<Output = bool> + Send;
}

/// The port probe backed by the current platform's socket-owner tooling.
pub struct PortProbe {
    #[cfg(target_os = "macos")]
    inner: darwin::DarwinProber,

    #[cfg(target_os = "linux")]
    inner: linux::LinuxProber,

    #[cfg(target_os = "windows")]
    inner: windows::WindowsProber,
}

impl PortProbe {
    /// Create a new probe for the current platform.
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "macos")]
            inner: darwin::DarwinProber::new(),

            #[cfg(target_os = "linux")]
            inner: linux::LinuxProber::new(),

            #[cfg(target_os = "windows")]
            inner: windows::WindowsProber::new(),
        }
    }
}

impl Default for PortProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Cap a ps command line at 200 bytes, cutting on a char boundary.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub(crate) fn truncate_command(command: &str) -> String {
    const MAX_COMMAND_BYTES: usize = 200;
    if command.len() <= MAX_COMMAND_BYTES {
        return command.to_string();
    }
    let mut end = MAX_COMMAND_BYTES;
    while !command.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &command[..end])
}

impl PortProber for PortProbe {
    async fn owners_of(&self, port: u16) -> Result<Vec<PortOwner>> {
        self.inner.owners_of(port).await
    }

    async fn is_port_in_use(&self, port: u16) -> bool {
        match self.inner.owners_of(port).await {
            Ok(owners) => !owners.is_empty(),
            Err(e) => {
                warn!(port = port, error = %e, "Port probe failed, treating port as free");
                false
            }
        }
    }

    async fn kill_owners(&self, port: u16) -> bool {
        let owners = match self.inner.owners_of(port).await {
            Ok(owners) => owners,
            Err(e) => {
                warn!(port = port, error = %e, "Port probe failed, nothing to kill");
                return false;
            }
        };

        let mut any_killed = false;
        let mut seen = std::collections::HashSet::new();

        for owner in owners {
            if !seen.insert(owner.pid) {
                continue;
            }
            match process::kill_pid(owner.pid) {
                Ok(true) => {
                    debug!(pid = owner.pid, port = port, "Killed port owner");
                    any_killed = true;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(pid = owner.pid, port = port, error = %e, "Failed to kill port owner");
                }
            }
        }

        any_killed
    }
}
