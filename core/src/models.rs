//! Core data models shared across the execution engine and registry.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Freshness window for port records. Anything older needs a rescan.
pub const PORT_RECORD_TTL_HOURS: i64 = 24;

/// Which tool actually runs a discovered script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Npm,
    Pnpm,
    Yarn,
    Bun,
    Cargo,
    Make,
    /// The command is a module path (e.g. `python -m <module>`), not shell text.
    Module,
    /// Generic fallback: the command is split on whitespace and executed as-is.
    Shell,
}

/// Broad classification of the project a script belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    Node,
    Rust,
    Python,
    Make,
    Other,
}

/// A runnable script resolved by the discovery layer.
///
/// Immutable once resolved for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    /// Script name as it appears in the project manifest (e.g. "dev").
    pub name: String,

    /// The literal command or module path behind the script.
    pub command: String,

    /// Which runner executes this script.
    pub runner: RunnerKind,

    /// The kind of project the script was discovered in.
    pub project: ProjectKind,
}

/// A previously-detected port for a project, consumed from the port registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    /// The port number.
    pub port: u16,

    /// Script this port is scoped to; `None` means project-wide.
    pub script_name: Option<String>,

    /// Where the port was detected (e.g. "log", "config").
    pub source: String,

    /// When the port was last seen in use by this project.
    pub last_detected_at: DateTime<Utc>,
}

impl PortRecord {
    /// A record is stale once it has aged past the freshness window.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_detected_at >= Duration::hours(PORT_RECORD_TTL_HOURS)
    }
}

/// A project needs rescanning if it has no records or any stale record.
pub fn needs_rescan(records: &[PortRecord], now: DateTime<Utc>) -> bool {
    records.is_empty() || records.iter().any(|r| r.is_stale(now))
}

/// A background process spawned by this tool, persisted across invocations.
///
/// Field names match the on-disk registry format. The `pid` is unique only
/// among currently tracked entries; the OS recycles PIDs over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundProcessEntry {
    /// OS process id of the detached child.
    pub pid: u32,

    /// Absolute path of the project the script was launched from.
    pub project_path: PathBuf,

    /// Human-readable project name.
    pub project_name: String,

    /// Name of the script that was launched.
    pub script_name: String,

    /// The command line the child was started with.
    pub command: String,

    /// When the child was spawned.
    pub started_at: DateTime<Utc>,

    /// Log file owned exclusively by this entry's child.
    pub log_file: PathBuf,

    /// URLs discovered in the child's output after launch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_urls: Vec<String>,
}
