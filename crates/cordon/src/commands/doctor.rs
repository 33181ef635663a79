//! Doctor command: environment diagnostics.
//!
//! Checks the pieces a working session needs, in dependency order, and
//! prints one line per check. Diagnostics never fail the process; broken
//! pieces are reported with their error text so the output doubles as a
//! support snippet.

use super::{connect, project_dir, NETWORK_NAME, TOOL_VERSION};
use anyhow::Result;
use cordon_core::config::CordonConfig;
use cordon_core::engine::ImageOps;
use cordon_core::lifecycle::list_project;
use cordon_core::naming::image_tag;
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct DoctorArgs {}

pub async fn execute(cancel: &CancellationToken, _args: DoctorArgs) -> Result<()> {
    println!("cordon {TOOL_VERSION}");
    println!(
        "host: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();

    let dir = project_dir()?;
    let config = match CordonConfig::load(&dir) {
        Ok(config) => {
            report(true, &format!("configuration: project {}", config.project));
            Some(config)
        }
        Err(e) => {
            report(false, &format!("configuration: {e}"));
            None
        }
    };

    let engine = match connect() {
        Ok(engine) => engine,
        Err(e) => {
            report(false, &format!("daemon: {e}"));
            return Ok(());
        }
    };
    match engine.daemon_version(cancel).await {
        Ok(version) => report(true, &format!("daemon: {version}")),
        Err(e) => {
            report(false, &format!("daemon: {e}"));
            return Ok(());
        }
    }

    if let Some(config) = config {
        let tag = image_tag(&config.project);
        match engine.image_exists(cancel, &tag).await {
            Ok(true) => report(true, &format!("image: {tag}")),
            Ok(false) => report(false, &format!("image: {tag} not built (run `cordon build`)")),
            Err(e) => report(false, &format!("image: {e}")),
        }

        match list_project(cancel, &engine, &config.project).await {
            Ok(containers) => {
                let running = containers.iter().filter(|c| c.state.is_running()).count();
                report(
                    true,
                    &format!(
                        "agents: {} ({} running) on {}",
                        containers.len(),
                        running,
                        NETWORK_NAME
                    ),
                );
            }
            Err(e) => report(false, &format!("agents: {e}")),
        }
    }

    Ok(())
}

fn report(ok: bool, line: &str) {
    let marker = if ok { "ok " } else { "!! " };
    println!("{marker}{line}");
}
