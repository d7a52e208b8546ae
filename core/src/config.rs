//! Filesystem locations used by the process registry and log capture.
//!
//! Everything lives under `~/.projax`:
//! - `processes.json` — the background process registry
//! - `logs/` — one log file per background run
//!
//! Paths are resolved once and passed explicitly to the components that need
//! them, so tests can point everything at a temp directory.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Resolved filesystem locations for registry and log data.
#[derive(Debug, Clone)]
pub struct Paths {
    data_dir: PathBuf,
}

impl Paths {
    /// Resolve the default data directory, `~/.projax`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

        Ok(Self {
            data_dir: home.join(".projax"),
        })
    }

    /// Use a custom data directory (for testing).
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// The data directory itself.
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Path of the background process registry file.
    pub fn registry_file(&self) -> PathBuf {
        self.data_dir.join("processes.json")
    }

    /// Directory holding background process log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Log file path for a new background run of `script_name`.
    ///
    /// The name embeds the current epoch milliseconds so successive runs of
    /// the same script never collide.
    pub fn new_log_file(&self, script_name: &str) -> PathBuf {
        let millis = chrono::Utc::now().timestamp_millis();
        self.logs_dir()
            .join(format!("process-{}-{}.log", millis, script_name))
    }

    /// Create the data and logs directories if they do not exist.
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.logs_dir()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_file_under_data_dir() {
        let paths = Paths::with_data_dir(PathBuf::from("/tmp/projax-test"));
        assert_eq!(
            paths.registry_file(),
            PathBuf::from("/tmp/projax-test/processes.json")
        );
        assert_eq!(paths.logs_dir(), PathBuf::from("/tmp/projax-test/logs"));
    }

    #[test]
    fn test_log_file_name_embeds_script() {
        let paths = Paths::with_data_dir(PathBuf::from("/tmp/projax-test"));
        let log = paths.new_log_file("dev");
        let name = log.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("process-"));
        assert!(name.ends_with("-dev.log"));
    }
}
