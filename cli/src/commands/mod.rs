//! CLI command implementations.

pub mod kill_port;
pub mod logs;
pub mod ps;
pub mod run;
pub mod stop;

use projax_core::{ConflictPrompt, PortOwner};

/// Interactive yes/no prompt on the terminal.
///
/// Only used when stdout is a TTY; non-interactive invocations get the
/// fail-immediately behavior of `DenyAll` instead.
pub struct TtyPrompt;

impl ConflictPrompt for TtyPrompt {
    async fn confirm_kill(&self, port: u16, owner: &PortOwner) -> bool {
        println!(
            "Port {} is in use by PID {} ({})",
            port, owner.pid, owner.command
        );
        print!("Kill it? [y/N] ");

        use std::io::Write;
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }

        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Whether this invocation may prompt the user.
pub fn is_interactive() -> bool {
    atty::is(atty::Stream::Stdout) && atty::is(atty::Stream::Stdin)
}
