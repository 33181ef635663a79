//! Build command: ensure the project image exists.

use super::{connect, load_config, TOOL_VERSION};
use anyhow::Result;
use cordon_core::image::{ensure_image, EnsureImageOptions};
use std::io::Write;
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// Build even when the content fingerprint already has an image
    #[arg(long)]
    pub force: bool,

    /// Disable the daemon's layer cache
    #[arg(long)]
    pub no_cache: bool,

    /// Always attempt to pull a newer base image
    #[arg(long)]
    pub pull: bool,
}

pub async fn execute(cancel: &CancellationToken, args: BuildArgs) -> Result<()> {
    let (dir, config) = load_config()?;
    let engine = connect()?;
    engine.ping(cancel).await?;

    let mut print_line = |line: &str| {
        print!("{line}");
        let _ = std::io::stdout().flush();
    };
    let ensured = ensure_image(
        cancel,
        &engine,
        &config,
        &dir,
        TOOL_VERSION,
        EnsureImageOptions {
            force_build: args.force,
            no_cache: args.no_cache,
            pull: args.pull,
        },
        &mut print_line,
    )
    .await?;

    match (&ensured.fingerprint, ensured.built) {
        (Some(fingerprint), true) => {
            println!("Built {} (fingerprint {})", ensured.tag, fingerprint)
        }
        (Some(fingerprint), false) => {
            println!("Up to date: {} (fingerprint {})", ensured.tag, fingerprint)
        }
        (None, _) => println!("Built {} from user Dockerfile", ensured.tag),
    }
    Ok(())
}
