//! Run command - execute a script with conflict resolution.

use anyhow::{bail, Context, Result};
use projax_core::{
    DenyAll, ExecutionEngine, Paths, PortRecord, ProjectKind, RunOutcome, RunRequest, RunnerKind,
    ScriptDescriptor,
};

use super::{is_interactive, TtyPrompt};

pub struct RunArgs {
    pub script: String,
    pub command: String,
    pub runner: String,
    pub project_dir: String,
    pub ports_file: Option<String>,
    pub background: bool,
    pub force: bool,
    pub extra_args: Vec<String>,
}

fn parse_runner(value: &str) -> Result<RunnerKind> {
    Ok(match value.to_lowercase().as_str() {
        "npm" => RunnerKind::Npm,
        "pnpm" => RunnerKind::Pnpm,
        "yarn" => RunnerKind::Yarn,
        "bun" => RunnerKind::Bun,
        "cargo" => RunnerKind::Cargo,
        "make" => RunnerKind::Make,
        "module" => RunnerKind::Module,
        "shell" => RunnerKind::Shell,
        other => bail!("unknown runner kind: {}", other),
    })
}

fn project_kind_for(runner: RunnerKind) -> ProjectKind {
    match runner {
        RunnerKind::Npm | RunnerKind::Pnpm | RunnerKind::Yarn | RunnerKind::Bun => {
            ProjectKind::Node
        }
        RunnerKind::Cargo => ProjectKind::Rust,
        RunnerKind::Module => ProjectKind::Python,
        RunnerKind::Make => ProjectKind::Make,
        RunnerKind::Shell => ProjectKind::Other,
    }
}

fn load_port_records(path: Option<&str>) -> Result<Vec<PortRecord>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };

    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading ports file {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parsing ports file {}", path))
}

pub async fn run(args: RunArgs) -> Result<()> {
    let runner = parse_runner(&args.runner)?;

    let project_path = std::fs::canonicalize(&args.project_dir)
        .with_context(|| format!("resolving project directory {}", args.project_dir))?;
    let project_name = project_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.project_dir.clone());

    let request = RunRequest {
        project_path,
        project_name,
        script: ScriptDescriptor {
            name: args.script.clone(),
            command: args.command,
            runner,
            project: project_kind_for(runner),
        },
        extra_args: args.extra_args,
        port_records: load_port_records(args.ports_file.as_deref())?,
        force: args.force,
        background: args.background,
    };

    let engine = ExecutionEngine::new(Paths::new()?);

    let outcome = if is_interactive() {
        engine.run(&request, &TtyPrompt).await?
    } else {
        engine.run(&request, &DenyAll).await?
    };

    match outcome {
        RunOutcome::Foreground { exit_code } => {
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
            Ok(())
        }
        RunOutcome::Cancelled { port } => {
            bail!(
                "cancelled: port {} is in use and the conflict was not resolved",
                port
            );
        }
        RunOutcome::Background(launch) => {
            println!(
                "Started `{}` in the background (PID {})",
                args.script, launch.pid
            );
            println!("Log: {}", launch.log_file.display());

            // Give the delayed log scan a chance to record URLs before the
            // CLI exits; the exit watcher is dropped on purpose.
            launch.followups.wait().await;
            Ok(())
        }
    }
}
