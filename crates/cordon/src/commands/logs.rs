//! Logs command: stream container output.

use super::{connect, load_config};
use anyhow::Result;
use cordon_core::engine::ContainerOps;
use cordon_core::lifecycle::select_agent;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct LogsArgs {
    /// Agent whose logs to show; required when several are running
    #[arg(long)]
    pub agent: Option<String>,

    /// Keep following new output
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Number of trailing lines to show
    #[arg(long)]
    pub tail: Option<u32>,
}

pub async fn execute(cancel: &CancellationToken, args: LogsArgs) -> Result<()> {
    let (_dir, config) = load_config()?;
    let engine = connect()?;

    let selected = select_agent(cancel, &engine, &config.project, args.agent.as_deref()).await?;
    let mut stream = engine
        .container_logs(cancel, &selected.name, args.follow, args.tail)
        .await?;

    let mut stdout = tokio::io::stdout();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(chunk) => {
                stdout.write_all(&chunk?).await?;
                stdout.flush().await?;
            }
            None => break,
        }
    }
    Ok(())
}
