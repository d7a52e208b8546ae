//! Durable registry of background processes, shared across CLI invocations.
//!
//! One JSON file (`~/.projax/processes.json`) holds every entry this tool
//! believes is or recently was running. Entries are removed, never marked
//! dead in place. A corrupt or missing file degrades to an empty registry;
//! losing track of background processes is acceptable, crashing is not.
//! Writes go through a temp file and an atomic rename so concurrent readers
//! never observe a partial file. Within one process, mutations serialize on
//! a shared lock so read-modify-write cycles from concurrent tasks cannot
//! drop each other's updates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::BackgroundProcessEntry;
use crate::process;

/// File-backed registry of background processes.
///
/// Clones share one write lock, so every handle derived from the same
/// registry participates in the same mutation ordering.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    registry_path: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ProcessRegistry {
    /// Create a registry over the given file path.
    pub fn new(registry_path: PathBuf) -> Self {
        Self {
            registry_path,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.registry_path
    }

    /// Load all entries.
    ///
    /// Unreadable or unparsable files are treated as empty.
    pub async fn list(&self) -> Vec<BackgroundProcessEntry> {
        let content = match fs::read_to_string(&self.registry_path).await {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };

        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.registry_path.display(), error = %e,
                      "Registry file is unparsable, treating as empty");
                Vec::new()
            }
        }
    }

    /// Load entries whose OS process is still alive, removing the rest.
    ///
    /// The surviving set is persisted in one pass, so independent
    /// invocations converge on the same view.
    pub async fn list_live(&self) -> Result<Vec<BackgroundProcessEntry>> {
        let _guard = self.write_lock.lock().await;
        let entries = self.list().await;
        let total = entries.len();

        let live: Vec<BackgroundProcessEntry> = entries
            .into_iter()
            .filter(|e| process::is_pid_alive(e.pid))
            .collect();

        if live.len() != total {
            debug!(
                removed = total - live.len(),
                "Liveness sweep removed dead registry entries"
            );
            self.save(&live).await?;
        }

        Ok(live)
    }

    /// Append an entry and persist immediately.
    pub async fn add(&self, entry: BackgroundProcessEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.list().await;
        entries.push(entry);
        self.save(&entries).await
    }

    /// Remove the entry with the given PID.
    ///
    /// Always removes from the durable registry regardless of whether the OS
    /// process could be terminated, so a stuck entry can be cleared.
    /// Returns true if an entry was removed.
    pub async fn remove_by_pid(&self, pid: u32) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.list().await;
        let before = entries.len();
        entries.retain(|e| e.pid != pid);

        if entries.len() == before {
            return Ok(false);
        }

        self.save(&entries).await?;
        Ok(true)
    }

    /// All entries belonging to the given project path.
    pub async fn for_project(&self, project_path: &Path) -> Vec<BackgroundProcessEntry> {
        self.list()
            .await
            .into_iter()
            .filter(|e| e.project_path == project_path)
            .collect()
    }

    /// Merge discovered URLs into the entry with the given PID.
    ///
    /// Existing URLs are kept; new ones are appended in order, deduplicated.
    pub async fn merge_detected_urls(&self, pid: u32, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut entries = self.list().await;
        let Some(entry) = entries.iter_mut().find(|e| e.pid == pid) else {
            // Entry already swept away; nothing to update
            return Ok(());
        };

        for url in urls {
            if !entry.detected_urls.contains(url) {
                entry.detected_urls.push(url.clone());
            }
        }

        self.save(&entries).await
    }

    /// Stop every background process of a project.
    ///
    /// Attempts OS termination and removes each entry from the registry;
    /// returns the number of entries actually removed.
    pub async fn stop_project(&self, project_path: &Path) -> Result<usize> {
        let targets = self.for_project(project_path).await;
        let mut removed = 0;

        for entry in &targets {
            match process::kill_pid(entry.pid) {
                Ok(_) => {}
                Err(e) => {
                    // The registry entry is still cleared below
                    warn!(pid = entry.pid, error = %e, "Failed to kill background process");
                }
            }
            if self.remove_by_pid(entry.pid).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Persist the full entry set via temp file + atomic rename.
    async fn save(&self, entries: &[BackgroundProcessEntry]) -> Result<()> {
        if let Some(dir) = self.registry_path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).await?;
            }
        }

        let content = serde_json::to_string_pretty(entries)?;
        let temp_path = self.registry_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp registry file: {}", e)))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write registry: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync registry: {}", e)))?;

        fs::rename(&temp_path, &self.registry_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename registry file: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn test_registry() -> (ProcessRegistry, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("processes.json");
        (ProcessRegistry::new(path), dir)
    }

    fn entry(pid: u32, project: &str, script: &str) -> BackgroundProcessEntry {
        BackgroundProcessEntry {
            pid,
            project_path: PathBuf::from(project),
            project_name: project.rsplit('/').next().unwrap_or(project).to_string(),
            script_name: script.to_string(),
            command: format!("npm run {}", script),
            started_at: Utc::now(),
            log_file: PathBuf::from(format!("/tmp/process-0-{}.log", script)),
            detected_urls: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_when_file_missing() {
        let (registry, _dir) = test_registry();
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_degrades_to_empty() {
        let (registry, _dir) = test_registry();
        fs::write(registry.path(), "{not json!").await.unwrap();
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let (registry, _dir) = test_registry();

        registry.add(entry(100, "/home/u/app", "dev")).await.unwrap();
        registry.add(entry(200, "/home/u/app", "api")).await.unwrap();

        let entries = registry.list().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pid, 100);
        assert_eq!(entries[1].pid, 200);
    }

    #[tokio::test]
    async fn test_remove_by_pid() {
        let (registry, _dir) = test_registry();

        registry.add(entry(100, "/home/u/app", "dev")).await.unwrap();
        registry.add(entry(200, "/home/u/app", "api")).await.unwrap();

        assert!(registry.remove_by_pid(100).await.unwrap());

        let entries = registry.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pid, 200);
    }

    #[tokio::test]
    async fn test_remove_nonexistent_pid_is_noop() {
        let (registry, _dir) = test_registry();

        registry.add(entry(100, "/home/u/app", "dev")).await.unwrap();

        assert!(!registry.remove_by_pid(999).await.unwrap());
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_for_project_filters_by_path() {
        let (registry, _dir) = test_registry();

        registry.add(entry(100, "/home/u/app", "dev")).await.unwrap();
        registry.add(entry(200, "/home/u/other", "dev")).await.unwrap();

        let entries = registry.for_project(Path::new("/home/u/app")).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pid, 100);
    }

    #[tokio::test]
    async fn test_liveness_sweep_removes_dead_and_persists() {
        let (registry, _dir) = test_registry();

        // Our own PID is alive; a huge PID is not
        registry
            .add(entry(std::process::id(), "/home/u/app", "dev"))
            .await
            .unwrap();
        registry
            .add(entry(1_073_741_000, "/home/u/app", "api"))
            .await
            .unwrap();

        let live = registry.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].pid, std::process::id());

        // The reduced set was written back
        let entries = registry.list().await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_detected_urls() {
        let (registry, _dir) = test_registry();

        registry.add(entry(100, "/home/u/app", "dev")).await.unwrap();

        registry
            .merge_detected_urls(100, &["http://localhost:3000".to_string()])
            .await
            .unwrap();
        registry
            .merge_detected_urls(
                100,
                &[
                    "http://localhost:3000".to_string(),
                    "http://localhost:3001".to_string(),
                ],
            )
            .await
            .unwrap();

        let entries = registry.list().await;
        assert_eq!(
            entries[0].detected_urls,
            vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_merges_keep_both_updates() {
        let (registry, _dir) = test_registry();

        registry.add(entry(100, "/home/u/app", "dev")).await.unwrap();

        // Two tasks racing on the same entry, as the post-launch log scan
        // and URL synthesis do. Both URLs must survive.
        let a = registry.clone();
        let b = registry.clone();
        let ta = tokio::spawn(async move {
            a.merge_detected_urls(100, &["http://localhost:5173/".to_string()])
                .await
        });
        let tb = tokio::spawn(async move {
            b.merge_detected_urls(100, &["http://localhost:5174".to_string()])
                .await
        });
        ta.await.unwrap().unwrap();
        tb.await.unwrap().unwrap();

        let entries = registry.list().await;
        assert!(entries[0]
            .detected_urls
            .contains(&"http://localhost:5173/".to_string()));
        assert!(entries[0]
            .detected_urls
            .contains(&"http://localhost:5174".to_string()));
    }

    #[tokio::test]
    async fn test_merge_urls_for_missing_pid_is_noop() {
        let (registry, _dir) = test_registry();
        registry
            .merge_detected_urls(42, &["http://localhost:3000".to_string()])
            .await
            .unwrap();
        assert!(registry.list().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_project_kills_and_counts() {
        let (registry, _dir) = test_registry();

        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();

        registry.add(entry(pid, "/home/u/app", "dev")).await.unwrap();
        // Dead PID entry for the same project still counts as removed
        registry
            .add(entry(1_073_741_000, "/home/u/app", "api"))
            .await
            .unwrap();
        registry
            .add(entry(300, "/home/u/other", "dev"))
            .await
            .unwrap();

        let removed = registry.stop_project(Path::new("/home/u/app")).await.unwrap();
        assert_eq!(removed, 2);

        let remaining = registry.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].pid, 300);

        let mut child = child;
        let _ = child.wait();
    }
}
