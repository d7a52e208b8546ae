//! Projax Core Library
//!
//! Script execution and background-process orchestration for registered
//! project directories. Provides functionality to:
//! - Probe TCP ports for conflicting listeners and identify their owners
//! - Extract conflicting ports and server URLs from process output
//! - Resolve port conflicts interactively or by force
//! - Run scripts in the foreground (teed output) or detached in the
//!   background, with reactive conflict detection and a bounded retry
//! - Track background processes in a durable registry shared across
//!   CLI invocations
//!
//! # Platform Support
//! - macOS: uses `lsof` and `ps`
//! - Linux: uses `ss` and `ps`
//! - Windows: uses `netstat` and `tasklist`

pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod models;
pub mod output;
pub mod probe;
pub mod process;
pub mod registry;
pub mod runner;

// Re-export commonly used types
pub use config::Paths;
pub use conflict::{ConflictPrompt, ConflictResolver, DenyAll};
pub use engine::{
    BackgroundLaunch, ExecutionEngine, FollowupTasks, RunOutcome, RunRequest,
    MAX_CONFLICT_RETRIES,
};
pub use error::{Error, Result};
pub use models::{
    needs_rescan, BackgroundProcessEntry, PortRecord, ProjectKind, RunnerKind, ScriptDescriptor,
};
pub use output::{extract_port, extract_urls};
pub use probe::{PortOwner, PortProbe, PortProber};
pub use registry::ProcessRegistry;
pub use runner::{build_invocation, Invocation};
