//! Monitor command: bring the telemetry stack up or down.
//!
//! The stack is an external collaborator driven through `docker compose`
//! with a bundled compose file; cordon only materialises the file and
//! shells out. An absent compose plugin degrades to a warning rather than
//! a failure.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::warn;

const COMPOSE_FILE: &str = include_str!("../assets/monitor-compose.yaml");
const COMPOSE_PROJECT: &str = "cordon-monitor";

#[derive(clap::Subcommand, Debug)]
pub enum MonitorCommand {
    /// Start the telemetry stack in the background
    Up,
    /// Stop and remove the telemetry stack
    Down,
    /// Show the state of the telemetry stack
    Status,
}

pub fn execute(command: MonitorCommand) -> Result<()> {
    let compose_path = materialise_compose_file()?;
    let args: &[&str] = match command {
        MonitorCommand::Up => &["up", "-d"],
        MonitorCommand::Down => &["down"],
        MonitorCommand::Status => &["ps"],
    };

    let status = compose(&compose_path).args(args).status();
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            warn!(code = ?status.code(), "docker compose reported failure");
            anyhow::bail!("docker compose exited with {}", status)
        }
        Err(e) => {
            // No compose plugin installed: the agent session works fine
            // without telemetry, so this is not fatal.
            warn!(error = %e, "docker compose unavailable; telemetry stack skipped");
            Ok(())
        }
    }
}

fn compose(compose_path: &PathBuf) -> Command {
    let mut command = Command::new("docker");
    command
        .arg("compose")
        .arg("-f")
        .arg(compose_path)
        .arg("-p")
        .arg(COMPOSE_PROJECT);
    command
}

/// Write the bundled compose file under the user state directory.
fn materialise_compose_file() -> Result<PathBuf> {
    let dir = cordon_core::update::default_state_path()
        .parent()
        .map(|p| p.join("monitor"))
        .unwrap_or_else(|| std::env::temp_dir().join("cordon-monitor"));
    std::fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;
    let path = dir.join("compose.yaml");
    std::fs::write(&path, COMPOSE_FILE)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}
