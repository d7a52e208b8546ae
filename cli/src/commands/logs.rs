//! Logs command - print a background process's log file.

use anyhow::{bail, Result};
use projax_core::{Paths, ProcessRegistry};

pub async fn run(pid: u32) -> Result<()> {
    let paths = Paths::new()?;
    let registry = ProcessRegistry::new(paths.registry_file());

    let entry = registry
        .list()
        .await
        .into_iter()
        .find(|e| e.pid == pid);

    let Some(entry) = entry else {
        bail!("no tracked process with PID {}", pid);
    };

    match tokio::fs::read_to_string(&entry.log_file).await {
        Ok(content) => {
            print!("{}", content);
            Ok(())
        }
        Err(e) => bail!("cannot read log {}: {}", entry.log_file.display(), e),
    }
}
