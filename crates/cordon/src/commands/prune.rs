//! Prune command: clear out stopped agent containers for the project.

use super::{connect, load_config};
use anyhow::Result;
use cordon_core::lifecycle::{list_project, remove_agent};
use cordon_core::naming::{AgentIdentity, LABEL_AGENT};
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct PruneArgs {
    /// Also remove the pruned agents' volumes
    #[arg(long)]
    pub volumes: bool,
}

pub async fn execute(cancel: &CancellationToken, args: PruneArgs) -> Result<()> {
    let (_dir, config) = load_config()?;
    let engine = connect()?;

    let mut pruned = 0usize;
    for container in list_project(cancel, &engine, &config.project).await? {
        if container.state.is_running() {
            continue;
        }
        let agent = container
            .labels
            .get(LABEL_AGENT)
            .cloned()
            .unwrap_or_else(|| container.name.clone());
        let identity = AgentIdentity::new(&config.project, Some(&agent));
        remove_agent(cancel, &engine, &identity, args.volumes).await?;
        pruned += 1;
    }

    println!("Pruned {pruned} container(s)");
    Ok(())
}
