//! Rm command: remove an agent container, optionally with its volumes.

use super::{connect, load_config};
use anyhow::{bail, Result};
use cordon_core::lifecycle::{remove_agent, select_agent};
use cordon_core::naming::{AgentIdentity, LABEL_AGENT};
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct RmArgs {
    /// Agent to remove; required when several exist
    #[arg(long)]
    pub agent: Option<String>,

    /// Also remove the agent's volumes
    #[arg(long)]
    pub volumes: bool,

    /// Remove even when the container is running
    #[arg(long, short = 'f')]
    pub force: bool,
}

pub async fn execute(cancel: &CancellationToken, args: RmArgs) -> Result<()> {
    let (_dir, config) = load_config()?;
    let engine = connect()?;

    let selected = select_agent(cancel, &engine, &config.project, args.agent.as_deref()).await?;
    if selected.state.is_running() && !args.force {
        bail!(
            "{} is running; stop it first or pass --force",
            selected.name
        );
    }

    let agent = selected
        .labels
        .get(LABEL_AGENT)
        .cloned()
        .unwrap_or_else(|| selected.name.clone());
    let identity = AgentIdentity::new(&config.project, Some(&agent));
    remove_agent(cancel, &engine, &identity, args.volumes).await?;
    println!("Removed {}", selected.name);
    Ok(())
}
