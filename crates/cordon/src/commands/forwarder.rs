//! Hidden forwarder entry point, run inside the container via exec with
//! its stdin/stdout as the bridge transport.

use anyhow::Result;
use cordon_core::bridge::{forwarder, parse_socket_config, SOCKETS_ENV};
use tokio_util::sync::CancellationToken;

pub async fn execute(cancel: &CancellationToken) -> Result<()> {
    let raw = std::env::var(SOCKETS_ENV).unwrap_or_else(|_| "[]".to_string());
    let sockets = parse_socket_config(&raw)?;
    forwarder::run(tokio::io::stdin(), tokio::io::stdout(), sockets, cancel).await?;
    Ok(())
}
