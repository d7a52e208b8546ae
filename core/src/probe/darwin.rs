//! macOS port ownership lookup using lsof and ps.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{Error, Result};

use super::{truncate_command, PortOwner};

/// macOS-specific prober.
pub struct DarwinProber;

impl DarwinProber {
    /// Create a new macOS prober.
    pub fn new() -> Self {
        Self
    }

    /// Get full command lines for all processes using ps.
    ///
    /// Executes: `ps -axo pid,command`
    ///
    /// Long command lines are truncated.
    async fn get_process_commands(&self) -> HashMap<u32, String> {
        let output = match Command::new("/bin/ps")
            .args(["-axo", "pid,command"])
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

        // Skip header line
        for line in stdout.lines().skip(1) {
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

    /// Parse lsof output into owners.
    ///
    /// Expected lsof output format:
    /// ```text
    /// COMMAND    PID  USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
    /// node     34805  code   19u  IPv6 0x3d8015e195af1f3f      0t0  TCP [::1]:3000 (LISTEN)
    /// ```
    fn parse_lsof_output(&self, output: &str, commands: &HashMap<u32, String>) -> Vec<PortOwner> {
        let mut owners = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();

        // Skip header line
        for line in output.lines().skip(1) {
            if line.is_empty() {
                continue;
            }

            let components: Vec<&str> = line.split_whitespace().collect();
            if components.len() < 9 {
                continue;
            }

            // Unescape the process name lsof emits
            let process_name = components[0].replace("\\x20", " ").replace("\\x2f", "/");

            let pid: u32 = match components[1].parse() {
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
    /// Executes: `lsof -nP -iTCP:<port> -sTCP:LISTEN`
    ///
    /// lsof exits non-zero with empty output when nothing matches; that is
    /// "no owners", not an error.
    pub async fn owners_of(&self, port: u16) -> Result<Vec<PortOwner>> {
        let output = Command::new("/usr/sbin/lsof")
            .args(["-nP", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("Failed to run lsof: {}", e)))?;

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| Error::ParseError(format!("Invalid UTF-8 in lsof output: {}", e)))?;

        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let commands = self.get_process_commands().await;

        Ok(self.parse_lsof_output(&stdout, &commands))
    }
}

impl Default for DarwinProber {
    fn default() -> Self {
        Self::new()
    }
}
