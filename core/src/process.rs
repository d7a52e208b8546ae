//! OS process liveness checks and the kill primitive.
//!
//! Unix uses signals directly (signal 0 to probe, SIGKILL to terminate);
//! Windows queries the process table with `tasklist` and kills with
//! `taskkill /F`. Target processes are assumed to be disposable dev servers,
//! so termination is forceful and immediate.

use crate::error::Result;

#[cfg(unix)]
use crate::error::Error;

/// Check whether a process with the given PID currently exists.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    // Signal 0 probes existence without delivering anything. EPERM still
    // means the process exists.
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Check whether a process with the given PID currently exists.
#[cfg(windows)]
pub fn is_pid_alive(pid: u32) -> bool {
    use std::process::Command;

    let output = match Command::new("tasklist")
        .args(["/FO", "CSV", "/NH", "/FI", &format!("PID eq {}", pid)])
        .output()
    {
        Ok(output) => output,
        Err(_) => return false,
    };

    // tasklist prints an INFO line (not CSV) when the filter matches nothing
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.contains(&format!("\"{}\"", pid))
}

/// Forcefully kill a process.
///
/// Returns `Ok(true)` when the signal landed or the process was already
/// gone, `Ok(false)` when nothing was killed.
#[cfg(unix)]
pub fn kill_pid(pid: u32) -> Result<bool> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if pid == 0 || pid > i32::MAX as u32 {
        return Ok(false);
    }

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => Ok(true),
        // Already gone counts as success
        Err(nix::errno::Errno::ESRCH) => Ok(true),
        Err(nix::errno::Errno::EPERM) => Err(Error::KillFailed {
            pid,
            reason: "permission denied".to_string(),
        }),
        Err(e) => Err(Error::KillFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

/// Forcefully kill a process.
#[cfg(windows)]
pub fn kill_pid(pid: u32) -> Result<bool> {
    use std::process::Command;

    use crate::error::Error;

    let output = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()
        .map_err(|e| Error::KillFailed {
            pid,
            reason: e.to_string(),
        })?;

    if output.status.success() {
        return Ok(true);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    // "not found" means the process is already gone
    if stderr.contains("not found") {
        return Ok(true);
    }

    Err(Error::KillFailed {
        pid,
        reason: stderr.trim().to_string(),
    })
}
