//! Ls command: list agent containers for the project.

use super::{connect, load_config};
use anyhow::Result;
use cordon_core::lifecycle::list_project;
use cordon_core::naming::LABEL_AGENT;
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct LsArgs {}

pub async fn execute(cancel: &CancellationToken, _args: LsArgs) -> Result<()> {
    let (_dir, config) = load_config()?;
    let engine = connect()?;

    let mut containers = list_project(cancel, &engine, &config.project).await?;
    containers.sort_by(|a, b| a.name.cmp(&b.name));

    if containers.is_empty() {
        println!("No agents for project {}", config.project);
        return Ok(());
    }

    println!("{:<40} {:<16} {:<10} IMAGE", "NAME", "AGENT", "STATE");
    for container in containers {
        let agent = container
            .labels
            .get(LABEL_AGENT)
            .map(String::as_str)
            .unwrap_or("-");
        println!(
            "{:<40} {:<16} {:<10} {}",
            container.name,
            agent,
            container.state.to_string(),
            container.image
        );
    }
    Ok(())
}
