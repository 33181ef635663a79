use crate::commands;
use anyhow::Result;
use clap::{Parser, Subcommand};
use cordon_core::update::{default_state_path, spawn_check, UpdateChecker};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "cordon",
    version,
    about = "Run coding agents in reproducible, security-hardened containers",
    long_about = "cordon wraps a long-lived coding agent in a Docker container: it builds a \
                  project image with content-addressed caching, persists agent state in named \
                  volumes, and streams an interactive terminal into the container."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a starter cordon.yaml and .cordonignore in the current directory
    Init(commands::init::InitArgs),
    /// Validate or display the project configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
    /// Build the project image
    Build(commands::build::BuildArgs),
    /// Start an agent session (interactive unless --detach)
    Start(commands::start::StartArgs),
    /// Run a one-off command in an agent container
    Run(commands::run::RunArgs),
    /// Run a command in a running agent container
    Exec(commands::exec::ExecArgs),
    /// Open a shell in a running agent container
    Shell(commands::shell::ShellArgs),
    /// Stream logs from an agent container
    Logs(commands::logs::LogsArgs),
    /// Stop a running agent container
    Stop(commands::stop::StopArgs),
    /// Restart an agent container
    Restart(commands::restart::RestartArgs),
    /// Remove an agent container and optionally its volumes
    Rm(commands::rm::RmArgs),
    /// Remove all stopped agent containers for this project
    Prune(commands::prune::PruneArgs),
    /// List agent containers for this project
    Ls(commands::ls::LsArgs),
    /// Inspect or remove agent volumes
    #[command(subcommand)]
    Volumes(commands::volumes::VolumesCommand),
    /// Manage the background telemetry stack
    #[command(subcommand)]
    Monitor(commands::monitor::MonitorCommand),
    /// Diagnose the local environment
    Doctor(commands::doctor::DoctorArgs),
    /// In-container socket forwarder (internal)
    #[command(name = "__bridge-forwarder", hide = true)]
    BridgeForwarder,
}

impl Cli {
    pub async fn dispatch(self, cancel: &CancellationToken) -> Result<i32> {
        // The forwarder runs inside the container; it must never probe
        // release feeds or print notices onto its frame transport.
        if matches!(self.command, Command::BridgeForwarder) {
            commands::forwarder::execute(cancel).await?;
            return Ok(0);
        }

        let checker = UpdateChecker::new(
            default_state_path(),
            commands::TOOL_VERSION,
            commands::RELEASE_REPO,
        );
        let background = spawn_check(checker, cancel);

        let result = match self.command {
            Command::Init(args) => commands::init::execute(args).map(|()| 0),
            Command::Config(command) => commands::config::execute(command).map(|()| 0),
            Command::Build(args) => commands::build::execute(cancel, args).await.map(|()| 0),
            Command::Start(args) => commands::start::execute(cancel, args).await,
            Command::Run(args) => commands::run::execute(cancel, args).await,
            Command::Exec(args) => commands::exec::execute(cancel, args).await,
            Command::Shell(args) => commands::shell::execute(cancel, args).await,
            Command::Logs(args) => commands::logs::execute(cancel, args).await.map(|()| 0),
            Command::Stop(args) => commands::stop::execute(cancel, args).await.map(|()| 0),
            Command::Restart(args) => commands::restart::execute(cancel, args).await.map(|()| 0),
            Command::Rm(args) => commands::rm::execute(cancel, args).await.map(|()| 0),
            Command::Prune(args) => commands::prune::execute(cancel, args).await.map(|()| 0),
            Command::Ls(args) => commands::ls::execute(cancel, args).await.map(|()| 0),
            Command::Volumes(command) => {
                commands::volumes::execute(cancel, command).await.map(|()| 0)
            }
            Command::Monitor(command) => commands::monitor::execute(command).map(|()| 0),
            Command::Doctor(args) => commands::doctor::execute(cancel, args).await.map(|()| 0),
            Command::BridgeForwarder => unreachable!("handled above"),
        };

        // The update result is only consulted after the command is done; an
        // unfinished check is cancelled rather than awaited.
        if let Some(update) = background.finish().await {
            eprintln!(
                "\nA new cordon release is available: {} -> {}\n  {}",
                commands::TOOL_VERSION,
                update.version,
                update.url
            );
        }

        result
    }
}
