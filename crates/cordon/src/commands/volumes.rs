//! Volumes command: inspect or remove agent volumes.

use super::{connect, load_config};
use anyhow::Result;
use cordon_core::engine::VolumeOps;
use cordon_core::naming::{AgentIdentity, VolumeKind, LABEL_MANAGED, LABEL_PROJECT};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(clap::Subcommand, Debug)]
pub enum VolumesCommand {
    /// List this project's volumes
    List,
    /// Remove the volumes of one agent
    Rm {
        /// Agent whose volumes to remove
        #[arg(long)]
        agent: String,
    },
}

pub async fn execute(cancel: &CancellationToken, command: VolumesCommand) -> Result<()> {
    let (_dir, config) = load_config()?;
    let engine = connect()?;

    match command {
        VolumesCommand::List => {
            let labels = HashMap::from([
                (LABEL_MANAGED.to_string(), "true".to_string()),
                (LABEL_PROJECT.to_string(), config.project.clone()),
            ]);
            let volumes = engine.list_volumes(cancel, &labels).await?;
            if volumes.is_empty() {
                println!("No volumes for project {}", config.project);
            }
            for volume in volumes {
                println!("{volume}");
            }
        }
        VolumesCommand::Rm { agent } => {
            let identity = AgentIdentity::new(&config.project, Some(&agent));
            for kind in VolumeKind::ALL {
                engine
                    .remove_volume(cancel, &identity.volume_name(kind))
                    .await?;
            }
            println!("Removed volumes for agent {agent}");
        }
    }
    Ok(())
}
