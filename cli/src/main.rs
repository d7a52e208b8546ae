//! Projax CLI - run project scripts with port-conflict resolution.
//!
//! A command-line front-end over projax-core: run scripts in the foreground
//! or detached, list and stop tracked background processes, and free
//! occupied ports.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "projax")]
#[command(author, version, about = "Run project scripts with port-conflict resolution")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a project script
    Run {
        /// Script name (e.g. "dev")
        script: String,

        /// Literal command or module path behind the script
        #[arg(short, long, default_value = "")]
        command: String,

        /// Runner kind: npm, pnpm, yarn, bun, cargo, make, module, shell
        #[arg(short, long, default_value = "shell")]
        runner: String,

        /// Project directory
        #[arg(short = 'd', long, default_value = ".")]
        project_dir: String,

        /// JSON file of previously-detected port records for the project
        #[arg(long)]
        ports_file: Option<String>,

        /// Detach the process and track it in the registry
        #[arg(short, long)]
        background: bool,

        /// Kill conflicting processes without prompting
        #[arg(short, long)]
        force: bool,

        /// Extra arguments appended to the script command
        #[arg(last = true)]
        extra_args: Vec<String>,
    },

    /// List tracked background processes that are still alive
    Ps,

    /// Stop a project's background processes
    Stop {
        /// Project directory
        #[arg(short = 'd', long, default_value = ".")]
        project_dir: String,

        /// Stop a single process by PID instead
        #[arg(short, long)]
        pid: Option<u32>,
    },

    /// Kill whatever is listening on a port
    KillPort {
        /// Port number to free
        port: u16,

        /// Kill without prompting
        #[arg(short, long)]
        force: bool,
    },

    /// Print the log of a tracked background process
    Logs {
        /// PID of the background process
        pid: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            command,
            runner,
            project_dir,
            ports_file,
            background,
            force,
            extra_args,
        } => {
            commands::run::run(commands::run::RunArgs {
                script,
                command,
                runner,
                project_dir,
                ports_file,
                background,
                force,
                extra_args,
            })
            .await
        }
        Commands::Ps => commands::ps::run(cli.json).await,
        Commands::Stop { project_dir, pid } => commands::stop::run(project_dir, pid).await,
        Commands::KillPort { port, force } => commands::kill_port::run(port, force).await,
        Commands::Logs { pid } => commands::logs::run(pid).await,
    }
}
