//! Mapping from a resolved script to an executable and argv.
//!
//! Each runner kind has its own invocation shape: npm-style package managers
//! use `run <script>`, yarn takes the script name bare, cargo and make take
//! the target directly, and the module runner treats the command as a module
//! path. The shell fallback splits the literal command on whitespace.

use crate::models::{RunnerKind, ScriptDescriptor};

/// A fully constructed invocation: program plus argv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// The invocation rendered as a display string for logs and the registry.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Build the concrete invocation for a script, appending `extra_args`.
pub fn build_invocation(script: &ScriptDescriptor, extra_args: &[String]) -> Invocation {
    let (program, mut args) = match script.runner {
        RunnerKind::Npm => ("npm".to_string(), vec!["run".to_string(), script.name.clone()]),
        RunnerKind::Pnpm => ("pnpm".to_string(), vec!["run".to_string(), script.name.clone()]),
        RunnerKind::Bun => ("bun".to_string(), vec!["run".to_string(), script.name.clone()]),
        RunnerKind::Yarn => ("yarn".to_string(), vec![script.name.clone()]),
        RunnerKind::Cargo => ("cargo".to_string(), vec![script.name.clone()]),
        RunnerKind::Make => ("make".to_string(), vec![script.name.clone()]),
        // The command is a module path, not shell text
        RunnerKind::Module => (
            "python".to_string(),
            vec!["-m".to_string(), script.command.clone()],
        ),
        RunnerKind::Shell => {
            let mut parts = script.command.split_whitespace().map(String::from);
            let program = parts.next().unwrap_or_else(|| script.command.clone());
            (program, parts.collect())
        }
    };

    args.extend(extra_args.iter().cloned());
    Invocation { program, args }
}
