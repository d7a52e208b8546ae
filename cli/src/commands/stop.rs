//! Stop command - terminate tracked background processes.

use anyhow::{Context, Result};
use projax_core::{process, Paths, ProcessRegistry};

pub async fn run(project_dir: String, pid: Option<u32>) -> Result<()> {
    let paths = Paths::new()?;
    let registry = ProcessRegistry::new(paths.registry_file());

    if let Some(pid) = pid {
        // Kill failure still clears the ledger entry
        if let Err(e) = process::kill_pid(pid) {
            eprintln!("Warning: {}", e);
        }
        if registry.remove_by_pid(pid).await? {
            println!("Stopped process {}", pid);
        } else {
            println!("No tracked process with PID {}", pid);
        }
        return Ok(());
    }

    let project_path = std::fs::canonicalize(&project_dir)
        .with_context(|| format!("resolving project directory {}", project_dir))?;

    let removed = registry.stop_project(&project_path).await?;
    println!("Stopped {} background process(es)", removed);
    Ok(())
}
