//! Linux port ownership lookup using ss.
//!
//! Uses `ss -Htlnp` to enumerate listening TCP sockets and `ps` to resolve
//! full command lines for the owning PIDs.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{truncate_command, PortOwner};

static SS_PROCESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"users:\(\("(.+?)",pid=(\d+),fd=\d+\)"#).unwrap());

/// Linux-specific prober.
pub struct LinuxProber;

impl LinuxProber {
    /// Create a new Linux prober.
    pub fn new() -> Self {
        Self
    }

    /// Get full command lines for all processes using ps.
    ///
    /// Executes: `ps -axo pid,command --no-headers`
    ///
    /// Long command lines are truncated.
    async fn get_process_commands(&self) -> HashMap<u32, String> {
        let output = match Command::new("ps")
            .args(["-axo", "pid,command", "--no-headers"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(_) => return HashMap::new(),
        };

        let stdout = match String::from_utf8(output.stdout) {
            Ok(s) => s,
            Err(_) => return HashMap::new(),
        };

        let mut commands = HashMap::new();

        for line in stdout.lines() {
            let trimmed = line.trim();
            let mut parts = trimmed.splitn(2, char::is_whitespace);

            let pid: u32 = match parts.next().and_then(|p| p.trim().parse().ok()) {
                Some(p) => p,
                None => continue,
            };
            let command = match parts.next() {
                Some(c) => c.trim(),
                None => continue,
            };

            commands.insert(pid, truncate_command(command));
        }

        commands
    }

    /// Parse ss output into owners of `port`.
    ///
    /// Expected ss output format:
    /// ```text
    /// LISTEN 0 511  0.0.0.0:3000  0.0.0.0:*  users:(("node",pid=53561,fd=24))
    /// ```
    fn parse_ss_output(
        &self,
        output: &str,
        port: u16,
        commands: &HashMap<u32, String>,
    ) -> Vec<PortOwner> {
        let mut owners = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();

        for line in output.lines() {
            if line.is_empty() {
                continue;
            }

            // Columns: [State] [Recv-Q] [Send-Q] [Local Address:Port] [Peer Address:Port] [Process]
            let components: Vec<&str> = line.split_whitespace().collect();
            if components.len() < 6 {
                continue;
            }

            // Local address ends in ":<port>"
            if !components[3].ends_with(&format!(":{}", port)) {
                continue;
            }

            let Some(caps) = SS_PROCESS_RE.captures(components[5]) else {
                continue;
            };

            let process_name = caps[1].to_string();
            let pid: u32 = match caps[2].parse() {
                Ok(p) => p,
                Err(_) => continue,
            };

            if !seen.insert(pid) {
                continue;
            }

            let command = commands.get(&pid).cloned().unwrap_or(process_name);
            owners.push(PortOwner { pid, command });
        }

        owners
    }

    /// All processes listening on `port`.
    ///
    /// Executes: `ss -Htlnp`
    ///
    /// Flags explained:
    /// -H, --no-header     Suppress header line
    /// -t, --tcp           display only TCP sockets
    /// -l, --listening     display listening sockets
    /// -n, --numeric       don't resolve service names
    /// -p, --processes     show process using socket
    pub async fn owners_of(&self, port: u16) -> Result<Vec<PortOwner>> {
        let output = Command::new("ss")
            .args(["-Htlnp"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("Failed to run ss: {}", e)))?;

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| Error::ParseError(format!("Invalid UTF-8 in ss output: {}", e)))?;

        let commands = self.get_process_commands().await;

        Ok(self.parse_ss_output(&stdout, port, &commands))
    }
}

impl Default for LinuxProber {
    fn default() -> Self {
        Self::new()
    }
}
