//! Script execution engine.
//!
//! Drives one script run end to end: preflight port check, conflict
//! resolution, spawn (foreground streaming or background detach), reactive
//! conflict detection on failure, and a bounded retry after each successful
//! resolution.
//!
//! Retry policy: `MAX_CONFLICT_RETRIES` automatic retries per run, total,
//! across preflight and reactive resolutions. Once the budget is spent a
//! persisting conflict is reported instead of re-killing in a loop.

use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Paths;
use crate::conflict::{ConflictPrompt, ConflictResolver};
use crate::error::{Error, Result};
use crate::models::{BackgroundProcessEntry, PortRecord, ScriptDescriptor};
use crate::output::{extract_port, extract_urls};
use crate::probe::{PortProbe, PortProber};
use crate::registry::ProcessRegistry;
use crate::runner::{build_invocation, Invocation};

/// Automatic retries allowed per run after successful conflict resolutions.
pub const MAX_CONFLICT_RETRIES: u32 = 1;

/// How long a background child gets to initialize before its log is scanned.
const LOG_SCAN_DELAY: Duration = Duration::from_secs(2);

/// Everything needed to run one script once.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Absolute path of the project directory.
    pub project_path: std::path::PathBuf,

    /// Human-readable project name, used in prompts and the registry.
    pub project_name: String,

    /// The script to run.
    pub script: ScriptDescriptor,

    /// Extra arguments appended to the constructed command line.
    pub extra_args: Vec<String>,

    /// Previously-detected ports for this project.
    pub port_records: Vec<PortRecord>,

    /// Kill conflicting processes without prompting.
    pub force: bool,

    /// Detach the child and track it in the process registry.
    pub background: bool,
}

/// Handles for the delayed follow-up work after a background launch.
///
/// Callers that stay alive should either `wait()` for the follow-ups or
/// `abort()` them when the owning registry entry is removed.
#[derive(Debug)]
pub struct FollowupTasks {
    handles: Vec<JoinHandle<()>>,
}

impl FollowupTasks {
    /// Wait for all follow-up tasks to finish.
    pub async fn wait(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    /// Cancel all follow-up tasks.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// A successful background launch.
#[derive(Debug)]
pub struct BackgroundLaunch {
    /// PID of the detached child.
    pub pid: u32,

    /// Log file receiving the child's output.
    pub log_file: std::path::PathBuf,

    /// Best-effort exit watcher: appends the exit trailer to the log and
    /// removes the registry entry, if this invocation lives to see the exit.
    pub exit_watch: JoinHandle<()>,

    /// Delayed log-scan and URL-synthesis tasks.
    pub followups: FollowupTasks,
}

/// Outcome of one script run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Foreground run finished; the child's exit code is preserved verbatim.
    Foreground { exit_code: i32 },

    /// A port conflict was not resolved (declined, kill failed, or the
    /// occupant could not be identified). Nothing was spawned.
    Cancelled { port: u16 },

    /// A detached child was spawned and registered.
    Background(BackgroundLaunch),
}

/// The script execution engine.
pub struct ExecutionEngine<P: PortProber = PortProbe> {
    probe: P,
    registry: ProcessRegistry,
    paths: Paths,
    log_scan_delay: Duration,
}

impl ExecutionEngine<PortProbe> {
    /// Create an engine for the current platform.
    pub fn new(paths: Paths) -> Self {
        Self::with_probe(PortProbe::new(), paths)
    }
}

impl<P: PortProber> ExecutionEngine<P> {
    /// Create an engine over a specific probe (for testing).
    pub fn with_probe(probe: P, paths: Paths) -> Self {
        let registry = ProcessRegistry::new(paths.registry_file());
        Self {
            probe,
            registry,
            paths,
            log_scan_delay: LOG_SCAN_DELAY,
        }
    }

    /// Override the delay before background log scanning (for testing).
    pub fn with_log_scan_delay(mut self, delay: Duration) -> Self {
        self.log_scan_delay = delay;
        self
    }

    /// The background process registry this engine writes to.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Run one script to completion.
    pub async fn run<C: ConflictPrompt>(&self, req: &RunRequest, prompt: &C) -> Result<RunOutcome> {
        let invocation = build_invocation(&req.script, &req.extra_args);
        let mut conflict_retries = 0u32;

        loop {
            // Preflight: first occupied relevant port triggers resolution
            if let Some(port) = self.preflight_conflict(req).await {
                if conflict_retries >= MAX_CONFLICT_RETRIES {
                    return Err(Error::CommandFailed(format!(
                        "port {} is still in use after {} conflict resolution(s)",
                        port, MAX_CONFLICT_RETRIES
                    )));
                }

                let resolver = ConflictResolver::new(&self.probe);
                let can_proceed = resolver
                    .resolve(port, &req.project_name, req.force, prompt)
                    .await?;
                if !can_proceed {
                    return Ok(RunOutcome::Cancelled { port });
                }

                conflict_retries += 1;
                continue;
            }

            if req.background {
                return self.launch_background(req, &invocation).await;
            }

            let (exit_code, output) = self.run_foreground(req, &invocation).await?;
            if exit_code == 0 {
                return Ok(RunOutcome::Foreground { exit_code });
            }

            // Reactive detection: a conflict buried in the failure output
            let Some(port) = extract_port(&output) else {
                return Ok(RunOutcome::Foreground { exit_code });
            };

            info!(
                port = port,
                exit_code = exit_code,
                "Detected port conflict in failed script output"
            );

            if conflict_retries >= MAX_CONFLICT_RETRIES {
                return Ok(RunOutcome::Foreground { exit_code });
            }

            let resolver = ConflictResolver::new(&self.probe);
            let can_proceed = resolver
                .resolve(port, &req.project_name, req.force, prompt)
                .await?;
            if !can_proceed {
                return Ok(RunOutcome::Foreground { exit_code });
            }

            conflict_retries += 1;
        }
    }

    /// First occupied port among the records relevant to this run.
    ///
    /// Records scoped to the script win; with none, project-wide records
    /// (no script name) are checked instead.
    async fn preflight_conflict(&self, req: &RunRequest) -> Option<u16> {
        let scoped: Vec<&PortRecord> = req
            .port_records
            .iter()
            .filter(|r| r.script_name.as_deref() == Some(req.script.name.as_str()))
            .collect();

        let relevant: Vec<&PortRecord> = if scoped.is_empty() {
            req.port_records
                .iter()
                .filter(|r| r.script_name.is_none())
                .collect()
        } else {
            scoped
        };

        for record in relevant {
            if self.probe.is_port_in_use(record.port).await {
                debug!(port = record.port, "Preflight found an occupied port");
                return Some(record.port);
            }
        }

        None
    }

    /// Spawn in the foreground, teeing output to the terminal and into a
    /// capture buffer for reactive analysis.
    async fn run_foreground(
        &self,
        req: &RunRequest,
        invocation: &Invocation,
    ) -> Result<(i32, String)> {
        let mut child = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&req.project_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Spawn {
                command: invocation.display(),
                reason: e.to_string(),
            })?;

        let captured = Arc::new(Mutex::new(String::new()));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = tokio::spawn(tee_stream(stdout, Arc::clone(&captured), false));
        let err_task = tokio::spawn(tee_stream(stderr, Arc::clone(&captured), true));

        let status = child.wait().await?;
        let _ = out_task.await;
        let _ = err_task.await;

        // A signal-terminated child has no code; report -1
        let exit_code = status.code().unwrap_or(-1);
        let output = captured.lock().clone();

        Ok((exit_code, output))
    }

    /// Spawn detached, redirect output to a fresh log file, and register the
    /// child before any output is observed.
    async fn launch_background(
        &self,
        req: &RunRequest,
        invocation: &Invocation,
    ) -> Result<RunOutcome> {
        self.paths.ensure_dirs().await?;
        let log_file = self.paths.new_log_file(&req.script.name);

        let stdout_log = std::fs::File::create(&log_file)?;
        let stderr_log = stdout_log.try_clone()?;

        let mut command = std::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&req.project_path)
            .stdin(Stdio::null())
            .stdout(stdout_log)
            .stderr(stderr_log);

        // Detach so the child outlives this invocation
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn().map_err(|e| Error::Spawn {
            command: invocation.display(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let entry = BackgroundProcessEntry {
            pid,
            project_path: req.project_path.clone(),
            project_name: req.project_name.clone(),
            script_name: req.script.name.clone(),
            command: invocation.display(),
            started_at: chrono::Utc::now(),
            log_file: log_file.clone(),
            detected_urls: Vec::new(),
        };

        // Persisted before the child has produced any output
        self.registry.add(entry).await?;
        info!(pid = pid, script = %req.script.name, "Background process registered");

        let exit_watch = self.spawn_exit_watch(child, pid, log_file.clone());
        let followups = FollowupTasks {
            handles: vec![
                self.spawn_log_scan(pid, log_file.clone()),
                self.spawn_url_synthesis(pid, req),
            ],
        };

        Ok(RunOutcome::Background(BackgroundLaunch {
            pid,
            log_file,
            exit_watch,
            followups,
        }))
    }

    /// Best-effort exit watcher: trailer into the log, entry out of the
    /// registry. Any later invocation's liveness sweep covers the case where
    /// this invocation exits first.
    fn spawn_exit_watch(
        &self,
        child: std::process::Child,
        pid: u32,
        log_file: std::path::PathBuf,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let status = tokio::task::spawn_blocking(move || {
                let mut child = child;
                child.wait()
            })
            .await;

            let Ok(Ok(status)) = status else {
                return;
            };

            let trailer = match status.code() {
                Some(code) => format!("\n\n[Process exited with code {}]\n", code),
                None => {
                    #[cfg(unix)]
                    let signal = {
                        use std::os::unix::process::ExitStatusExt;
                        status.signal().unwrap_or(0)
                    };
                    #[cfg(not(unix))]
                    let signal = 0;
                    format!("\n\n[Process killed by signal {}]\n", signal)
                }
            };

            if let Err(e) = append_to_log(&log_file, &trailer).await {
                warn!(pid = pid, error = %e, "Failed to append exit trailer to log");
            }

            let _ = registry.remove_by_pid(pid).await;
            debug!(pid = pid, "Background process exited and was deregistered");
        })
    }

    /// Delayed log scan: surface port-conflict warnings and merge discovered
    /// URLs into the registry entry.
    fn spawn_log_scan(&self, pid: u32, log_file: std::path::PathBuf) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let delay = self.log_scan_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let text = tokio::fs::read_to_string(&log_file)
                .await
                .unwrap_or_default();

            if let Some(port) = extract_port(&text) {
                warn!(
                    pid = pid,
                    port = port,
                    "Background process output reports a port conflict"
                );
            }

            let urls = extract_urls(&text);
            if let Err(e) = registry.merge_detected_urls(pid, &urls).await {
                warn!(pid = pid, error = %e, "Failed to record detected URLs");
            }
        })
    }

    /// Delayed URL synthesis from the project's script-scoped port records,
    /// independent of what the log contains.
    fn spawn_url_synthesis(&self, pid: u32, req: &RunRequest) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let delay = self.log_scan_delay;

        let urls: Vec<String> = req
            .port_records
            .iter()
            .filter(|r| r.script_name.as_deref() == Some(req.script.name.as_str()))
            .map(|r| format!("http://localhost:{}", r.port))
            .collect();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Err(e) = registry.merge_detected_urls(pid, &urls).await {
                warn!(pid = pid, error = %e, "Failed to record synthesized URLs");
            }
        })
    }
}

/// Stream one pipe live to the terminal while accumulating it for reactive
/// analysis.
async fn tee_stream<R: AsyncRead + Unpin>(
    reader: Option<R>,
    sink: Arc<Mutex<String>>,
    is_stderr: bool,
) {
    let Some(reader) = reader else {
        return;
    };

    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }

        let mut buf = sink.lock();
        buf.push_str(&line);
        buf.push('\n');
    }
}

async fn append_to_log(path: &std::path::Path, text: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::DenyAll;
    use crate::models::{ProjectKind, RunnerKind};
    use crate::probe::PortOwner;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Mock prober with a scriptable set of occupied ports.
    struct MockProbe {
        occupied: Mutex<Vec<u16>>,
        kills: AtomicUsize,
    }

    impl MockProbe {
        fn new(occupied: Vec<u16>) -> Self {
            Self {
                occupied: Mutex::new(occupied),
                kills: AtomicUsize::new(0),
            }
        }
    }

    impl PortProber for MockProbe {
        async fn owners_of(&self, port: u16) -> Result<Vec<PortOwner>> {
            if self.occupied.lock().contains(&port) {
                Ok(vec![PortOwner {
                    pid: 4242,
                    command: "node server.js".to_string(),
                }])
            } else {
                Ok(Vec::new())
            }
        }

        async fn is_port_in_use(&self, port: u16) -> bool {
            self.occupied.lock().contains(&port)
        }

        async fn kill_owners(&self, port: u16) -> bool {
            self.kills.fetch_add(1, Ordering::SeqCst);
            self.occupied.lock().retain(|p| *p != port);
            true
        }
    }

    fn record(port: u16, script: Option<&str>) -> PortRecord {
        PortRecord {
            port,
            script_name: script.map(String::from),
            source: "log".to_string(),
            last_detected_at: Utc::now(),
        }
    }

    fn shell_script(name: &str, command: &str) -> ScriptDescriptor {
        ScriptDescriptor {
            name: name.to_string(),
            command: command.to_string(),
            runner: RunnerKind::Shell,
            project: ProjectKind::Other,
        }
    }

    fn request(dir: &std::path::Path, script: ScriptDescriptor) -> RunRequest {
        RunRequest {
            project_path: dir.to_path_buf(),
            project_name: "testproj".to_string(),
            script,
            extra_args: Vec::new(),
            port_records: Vec::new(),
            force: false,
            background: false,
        }
    }

    fn engine(
        probe: MockProbe,
        dir: &std::path::Path,
    ) -> ExecutionEngine<MockProbe> {
        ExecutionEngine::with_probe(probe, Paths::with_data_dir(dir.join("data")))
            .with_log_scan_delay(Duration::from_millis(100))
    }

    #[cfg(unix)]
    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_declined_preflight_conflict_cancels_without_spawn() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("spawned");

        let mut req = request(
            dir.path(),
            shell_script("dev", &format!("touch {}", marker.display())),
        );
        req.port_records = vec![record(3000, Some("dev"))];

        let eng = engine(MockProbe::new(vec![3000]), dir.path());
        let outcome = eng.run(&req, &DenyAll).await.unwrap();

        match outcome {
            RunOutcome::Cancelled { port } => assert_eq!(port, 3000),
            other => panic!("expected Cancelled, got {:?}", other),
        }
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forced_preflight_conflict_kills_then_spawns_once() {
        let dir = tempdir().unwrap();
        let counter = dir.path().join("count");

        let script = write_script(
            dir.path(),
            "run.sh",
            &format!("printf x >> {}", counter.display()),
        );
        let mut req = request(dir.path(), shell_script("dev", &script));
        req.port_records = vec![record(3000, Some("dev"))];
        req.force = true;

        let probe = MockProbe::new(vec![3000]);
        let eng = engine(probe, dir.path());
        let outcome = eng.run(&req, &DenyAll).await.unwrap();

        match outcome {
            RunOutcome::Foreground { exit_code } => assert_eq!(exit_code, 0),
            other => panic!("expected Foreground, got {:?}", other),
        }
        // Exactly one spawn, one kill
        assert_eq!(std::fs::read_to_string(&counter).unwrap(), "x");
        assert_eq!(eng.probe.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_project_wide_records_used_when_no_scoped_match() {
        let dir = tempdir().unwrap();
        let mut req = request(dir.path(), shell_script("dev", "true"));
        req.port_records = vec![record(8080, None), record(9090, Some("other"))];

        // 9090 is occupied but scoped to a different script; 8080 applies
        let eng = engine(MockProbe::new(vec![8080, 9090]), dir.path());
        let outcome = eng.run(&req, &DenyAll).await.unwrap();

        match outcome {
            RunOutcome::Cancelled { port } => assert_eq!(port, 8080),
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reactive_conflict_retries_exactly_once() {
        let dir = tempdir().unwrap();
        let counter = dir.path().join("count");

        // Always fails with an EADDRINUSE message on stderr
        let script = write_script(
            dir.path(),
            "fail.sh",
            &format!(
                "printf x >> {}\n\
                 echo 'Error: listen EADDRINUSE: address already in use 0.0.0.0:4000' >&2\n\
                 exit 1",
                counter.display()
            ),
        );
        let mut req = request(dir.path(), shell_script("dev", &script));
        req.force = true;

        let probe = MockProbe::new(vec![4000]);
        let eng = engine(probe, dir.path());
        let outcome = eng.run(&req, &DenyAll).await.unwrap();

        // Original exit code is the terminal result after the single retry
        match outcome {
            RunOutcome::Foreground { exit_code } => assert_eq!(exit_code, 1),
            other => panic!("expected Foreground, got {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&counter).unwrap(), "xx");
        assert_eq!(eng.probe.kills.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_without_conflict_preserves_exit_code() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo boom >&2\nexit 7");
        let req = request(dir.path(), shell_script("dev", &script));

        let eng = engine(MockProbe::new(Vec::new()), dir.path());
        let outcome = eng.run(&req, &DenyAll).await.unwrap();

        match outcome {
            RunOutcome::Foreground { exit_code } => assert_eq!(exit_code, 7),
            other => panic!("expected Foreground, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_creates_no_registry_entry() {
        let dir = tempdir().unwrap();
        let mut req = request(
            dir.path(),
            shell_script("dev", "/nonexistent/binary/definitely-missing"),
        );
        req.background = true;

        let eng = engine(MockProbe::new(Vec::new()), dir.path());
        let err = eng.run(&req, &DenyAll).await.unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert!(eng.registry().list().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_launch_registers_before_output() {
        let dir = tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "server.sh",
            "sleep 0.3\necho 'Local: http://localhost:5173/'\nsleep 30",
        );
        let mut req = request(dir.path(), shell_script("dev", &script));
        req.port_records = vec![record(5174, Some("dev"))];
        req.background = true;

        // The script prints its URL after 300ms; scan after that
        let eng = engine(MockProbe::new(Vec::new()), dir.path())
            .with_log_scan_delay(Duration::from_millis(600));
        let outcome = eng.run(&req, &DenyAll).await.unwrap();

        let launch = match outcome {
            RunOutcome::Background(launch) => launch,
            other => panic!("expected Background, got {:?}", other),
        };

        // Entry exists immediately, before the child printed anything
        let entries = eng.registry().list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pid, launch.pid);
        assert_eq!(entries[0].script_name, "dev");
        assert!(entries[0].detected_urls.is_empty());

        // After the delayed scans: sniffed URL plus synthesized record URL
        launch.followups.wait().await;
        let entries = eng.registry().list().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0]
            .detected_urls
            .contains(&"http://localhost:5173/".to_string()));
        assert!(entries[0]
            .detected_urls
            .contains(&"http://localhost:5174".to_string()));

        crate::process::kill_pid(launch.pid).unwrap();
        launch.exit_watch.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_watch_appends_trailer_and_deregisters() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "quick.sh", "echo done\nexit 3");
        let mut req = request(dir.path(), shell_script("dev", &script));
        req.background = true;

        let eng = engine(MockProbe::new(Vec::new()), dir.path());
        let outcome = eng.run(&req, &DenyAll).await.unwrap();

        let launch = match outcome {
            RunOutcome::Background(launch) => launch,
            other => panic!("expected Background, got {:?}", other),
        };

        launch.exit_watch.await.unwrap();

        let log = std::fs::read_to_string(&launch.log_file).unwrap();
        assert!(log.contains("done"));
        assert!(log.contains("[Process exited with code 3]"));
        assert!(eng.registry().list().await.is_empty());

        launch.followups.abort();
    }
}
