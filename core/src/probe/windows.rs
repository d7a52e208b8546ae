//! Windows port ownership lookup using netstat and tasklist.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{Error, Result};

use super::PortOwner;

/// Windows-specific prober.
pub struct WindowsProber;

impl WindowsProber {
    /// Create a new Windows prober.
    pub fn new() -> Self {
        Self
    }

    /// Get image names for all processes using tasklist.
    ///
    /// Executes: `tasklist /FO CSV /NH`
    async fn get_process_names(&self) -> HashMap<u32, String> {
        let output = match Command::new("tasklist")
            .args(["/FO", "CSV", "/NH"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(_) => return HashMap::new(),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let mut names = HashMap::new();

        // CSV rows: "Image Name","PID","Session Name","Session#","Mem Usage"
        for line in stdout.lines() {
            let fields: Vec<&str> = line.split("\",\"").collect();
            if fields.len() < 2 {
                continue;
            }

            let name = fields[0].trim_start_matches('"').to_string();
            let pid: u32 = match fields[1].trim_matches('"').parse() {
                Ok(p) => p,
                Err(_) => continue,
            };

            names.insert(pid, name);
        }

        names
    }

    /// Parse netstat output into owners of `port`.
    ///
    /// Expected netstat output format:
    /// ```text
    ///   TCP    0.0.0.0:3000           0.0.0.0:0              LISTENING       4136
    /// ```
    fn parse_netstat_output(
        &self,
        output: &str,
        port: u16,
        names: &HashMap<u32, String>,
    ) -> Vec<PortOwner> {
        let mut owners = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();

        for line in output.lines() {
            let components: Vec<&str> = line.split_whitespace().collect();
            if components.len() < 5 || components[0] != "TCP" {
                continue;
            }

            if components[3] != "LISTENING" {
                continue;
            }

            if !components[1].ends_with(&format!(":{}", port)) {
                continue;
            }

            let pid: u32 = match components[4].parse() {
                Ok(p) => p,
                Err(_) => continue,
            };

            if !seen.insert(pid) {
                continue;
            }

            let command = names
                .get(&pid)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            owners.push(PortOwner { pid, command });
        }

        owners
    }

    /// All processes listening on `port`.
    ///
    /// Executes: `netstat -ano -p tcp`
    pub async fn owners_of(&self, port: u16) -> Result<Vec<PortOwner>> {
        let output = Command::new("netstat")
            .args(["-ano", "-p", "tcp"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("Failed to run netstat: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let names = self.get_process_names().await;

        Ok(self.parse_netstat_output(&stdout, port, &names))
    }
}

impl Default for WindowsProber {
    fn default() -> Self {
        Self::new()
    }
}
