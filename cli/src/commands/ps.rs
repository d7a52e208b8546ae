//! Ps command - list live background processes.

use anyhow::Result;
use projax_core::{Paths, ProcessRegistry};

pub async fn run(json: bool) -> Result<()> {
    let paths = Paths::new()?;
    let registry = ProcessRegistry::new(paths.registry_file());

    let entries = registry.list_live().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No background processes running.");
        return Ok(());
    }

    println!(
        "{:<8} {:<16} {:<12} {:<20} COMMAND",
        "PID", "PROJECT", "SCRIPT", "STARTED"
    );
    println!("{}", "-".repeat(80));

    for entry in &entries {
        let started = entry.started_at.format("%Y-%m-%d %H:%M:%S");
        println!(
            "{:<8} {:<16} {:<12} {:<20} {}",
            entry.pid,
            truncate(&entry.project_name, 16),
            truncate(&entry.script_name, 12),
            started,
            truncate(&entry.command, 30)
        );
        for url in &entry.detected_urls {
            println!("{:<8} {}", "", url);
        }
    }

    println!("\nTotal: {} processes", entries.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    // Back up to a char boundary so multi-byte names never split
    let mut end = max - 1;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
