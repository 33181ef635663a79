//! Host side of the socket bridge
//!
//! Runs in the CLI alongside an interactive session. Receives OPEN frames
//! from the in-container forwarder, dials the corresponding real host
//! socket, and relays DATA both ways. A single stream failing never
//! disturbs the others; the failed stream is closed symmetrically.

use super::{
    pump_connection, read_frame, FrameWriter, MessageType, SharedState, SocketKind, SocketSpec,
};
use crate::errors::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Everything the host side needs to serve a bridge session.
#[derive(Debug, Clone, Default)]
pub struct BridgePlan {
    /// Listener specs shipped to the forwarder via its environment.
    pub specs: Vec<SocketSpec>,
    /// Host socket path per tunnelled kind.
    pub host_paths: HashMap<SocketKind, PathBuf>,
    /// Public keyring bytes for the PUBKEY handshake.
    pub pubkey: Option<Vec<u8>>,
}

impl BridgePlan {
    /// Discover which host sockets can be tunnelled. Credential agents are
    /// picked up when the host has them; the Docker socket only when the
    /// security profile enables passthrough.
    pub fn discover(docker_socket: bool, agent_home: &str) -> Self {
        let mut plan = BridgePlan::default();

        if let Ok(ssh_sock) = std::env::var("SSH_AUTH_SOCK") {
            let path = PathBuf::from(&ssh_sock);
            if path.exists() {
                plan.host_paths.insert(SocketKind::SshAgent, path);
                plan.specs.push(SocketSpec {
                    path: "/run/cordon/ssh-agent.sock".to_string(),
                    kind: SocketKind::SshAgent,
                });
            }
        }

        if let Some(home) = std::env::var_os("HOME") {
            let gnupg = PathBuf::from(home).join(".gnupg");
            let socket = gnupg.join("S.gpg-agent");
            if socket.exists() {
                plan.host_paths.insert(SocketKind::GpgAgent, socket);
                plan.pubkey = std::fs::read(gnupg.join("pubring.kbx")).ok();
                plan.specs.push(SocketSpec {
                    path: format!("{}/.gnupg/S.gpg-agent", agent_home),
                    kind: SocketKind::GpgAgent,
                });
            }
        }

        if docker_socket {
            let path = PathBuf::from("/var/run/docker.sock");
            if path.exists() {
                plan.host_paths.insert(SocketKind::Docker, path);
                plan.specs.push(SocketSpec {
                    path: "/var/run/docker.sock".to_string(),
                    kind: SocketKind::Docker,
                });
            }
        }

        plan
    }

    /// Whether any socket will be tunnelled.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// The forwarder's environment value: a JSON array of `{path, type}`.
    pub fn env_value(&self) -> String {
        serde_json::to_string(&self.specs).expect("socket specs serialize")
    }
}

/// Serve the host side of a bridge over a transport until it closes or the
/// token cancels.
pub async fn run<R, W>(
    mut reader: R,
    writer: W,
    plan: BridgePlan,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = FrameWriter::new(writer);

    if plan.host_paths.contains_key(&SocketKind::GpgAgent) {
        let payload = plan.pubkey.clone().unwrap_or_default();
        writer.send(MessageType::Pubkey, 0, &payload).await?;
    }

    let state = SharedState::new(writer.clone());

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = read_frame(&mut reader) => frame?,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        match frame.message() {
            Some(MessageType::Ready) => {
                debug!("forwarder ready");
            }
            Some(MessageType::Open) => {
                let id = frame.stream_id;
                let kind = std::str::from_utf8(&frame.payload)
                    .ok()
                    .and_then(SocketKind::from_name);
                let Some(path) = kind.and_then(|k| plan.host_paths.get(&k)) else {
                    warn!(id, "open for unconfigured socket type; closing");
                    let _ = writer.send(MessageType::Close, id, &[]).await;
                    continue;
                };
                match UnixStream::connect(path).await {
                    Ok(conn) => {
                        let (read_half, write_half) = conn.into_split();
                        state.table.insert(id, write_half).await;
                        trace!(id, path = %path.display(), "stream dialled");
                        tokio::spawn(pump_connection(read_half, id, Arc::clone(&state)));
                    }
                    Err(e) => {
                        // One stream failing to dial must not take down the
                        // bridge.
                        warn!(id, error = %e, "host socket dial failed");
                        let _ = writer.send(MessageType::Close, id, &[]).await;
                    }
                }
            }
            Some(MessageType::Data) => {
                if !state.table.write_to(frame.stream_id, &frame.payload).await {
                    trace!(id = frame.stream_id, "data for closed stream dropped");
                }
            }
            Some(MessageType::Close) => {
                state.table.remove(frame.stream_id).await;
                trace!(id = frame.stream_id, "stream closed by forwarder");
            }
            Some(MessageType::Error) => {
                return Err(Error::ProtocolViolation {
                    message: String::from_utf8_lossy(&frame.payload).into_owned(),
                });
            }
            Some(MessageType::Pubkey) | None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_value_is_json_specs() {
        let plan = BridgePlan {
            specs: vec![SocketSpec {
                path: "/run/cordon/ssh-agent.sock".into(),
                kind: SocketKind::SshAgent,
            }],
            ..Default::default()
        };
        let parsed = super::super::parse_socket_config(&plan.env_value()).unwrap();
        assert_eq!(parsed, plan.specs);
    }

    #[test]
    fn empty_plan_reports_empty() {
        assert!(BridgePlan::default().is_empty());
    }
}
