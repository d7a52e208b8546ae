//! Port conflict resolution.
//!
//! When a script wants a port that something else holds, the resolver
//! identifies the occupant and either kills it outright (`force`) or asks
//! the embedding for a yes/no decision. An occupant the probe cannot
//! identify is never touched.

use tracing::{info, warn};

use crate::error::Result;
use crate::probe::{PortOwner, PortProber};

/// Decision point for killing a port's occupant when `force` is not set.
///
/// Non-interactive embeddings should use [`DenyAll`], which makes an
/// unforced conflict fail immediately instead of prompting.
pub trait ConflictPrompt: Send + Sync {
    /// Whether the occupant of `port` should be killed.
    fn confirm_kill(
        &self,
        port: u16,
        owner: &PortOwner,
    ) -> impl std::future::Future<Output = bool> + Send;
}

/// Prompt that declines every kill. For non-interactive embeddings.
pub struct DenyAll;

impl ConflictPrompt for DenyAll {
    async fn confirm_kill(&self, _port: u16, _owner: &PortOwner) -> bool {
        false
    }
}

/// Resolves a detected port conflict against the live OS.
pub struct ConflictResolver<'a, P: PortProber> {
    probe: &'a P,
}

impl<'a, P: PortProber> ConflictResolver<'a, P> {
    /// Create a resolver over the given probe.
    pub fn new(probe: &'a P) -> Self {
        Self { probe }
    }

    /// Try to free `port` for `project_label`.
    ///
    /// Returns `Ok(true)` when the caller may retry the original operation:
    /// the occupant was terminated. `Ok(false)` means the conflict stands —
    /// the occupant could not be identified, the user declined, or the kill
    /// failed.
    pub async fn resolve<C: ConflictPrompt>(
        &self,
        port: u16,
        project_label: &str,
        force: bool,
        prompt: &C,
    ) -> Result<bool> {
        let owners = match self.probe.owners_of(port).await {
            Ok(owners) => owners,
            Err(e) => {
                warn!(port = port, error = %e, "Ownership lookup failed during conflict resolution");
                return Ok(false);
            }
        };

        let Some(owner) = owners.first() else {
            // Cannot safely act on an unidentified occupant
            warn!(port = port, project = project_label,
                  "Port is in use but no owning process could be identified");
            return Ok(false);
        };

        info!(
            port = port,
            pid = owner.pid,
            command = %owner.command,
            project = project_label,
            "Port conflict detected"
        );

        if force {
            return Ok(self.probe.kill_owners(port).await);
        }

        if !prompt.confirm_kill(port, owner).await {
            info!(port = port, "Conflict resolution declined");
            return Ok(false);
        }

        Ok(self.probe.kill_owners(port).await)
    }
}
