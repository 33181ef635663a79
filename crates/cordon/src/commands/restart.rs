//! Restart command.

use super::{connect, load_config};
use anyhow::Result;
use cordon_core::engine::ContainerOps;
use cordon_core::lifecycle::{select_agent, DEFAULT_STOP_TIMEOUT_SECS};
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct RestartArgs {
    /// Agent to restart; required when several are running
    #[arg(long)]
    pub agent: Option<String>,

    /// Grace period in seconds before the daemon force-kills
    #[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT_SECS)]
    pub timeout: i64,
}

pub async fn execute(cancel: &CancellationToken, args: RestartArgs) -> Result<()> {
    let (_dir, config) = load_config()?;
    let engine = connect()?;

    let selected = select_agent(cancel, &engine, &config.project, args.agent.as_deref()).await?;
    engine
        .stop_container(cancel, &selected.name, args.timeout)
        .await?;
    engine.start_container(cancel, &selected.name).await?;
    println!("Restarted {}", selected.name);
    Ok(())
}
