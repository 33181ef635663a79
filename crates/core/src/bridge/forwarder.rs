//! In-container side of the socket bridge
//!
//! The forwarder is launched through the engine's exec channel with its
//! stdin/stdout serving as the transport. It reads its socket configuration
//! from [`SOCKETS_ENV`], creates a Unix listener per configured socket, and
//! relays accepted connections to the host as numbered streams.
//!
//! When a `gpg-agent` socket is configured the forwarder first awaits
//! exactly one PUBKEY frame and materialises the keyring next to the socket
//! before any listener exists; gpg refuses to use an agent without the
//! public keys on disk.
//!
//! [`SOCKETS_ENV`]: super::SOCKETS_ENV

use super::{
    pump_connection, read_frame, FrameWriter, MessageType, SharedState, SocketKind, SocketSpec,
};
use crate::errors::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// File the PUBKEY payload is written to, next to the gpg socket.
const PUBRING_FILE: &str = "pubring.kbx";

/// Where the keyring for a gpg socket spec lands.
pub fn pubring_path(spec: &SocketSpec) -> PathBuf {
    let socket = Path::new(&spec.path);
    socket
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(PUBRING_FILE)
}

/// Run the forwarder over a transport until the transport closes or the
/// token cancels.
pub async fn run<R, W>(
    mut reader: R,
    writer: W,
    sockets: Vec<SocketSpec>,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = FrameWriter::new(writer);

    // PUBKEY handshake precedes listener creation.
    if let Some(gpg) = sockets.iter().find(|s| s.kind == SocketKind::GpgAgent) {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = read_frame(&mut reader) => frame?,
        };
        let frame = frame.ok_or_else(|| Error::ProtocolViolation {
            message: "transport closed before PUBKEY".to_string(),
        })?;
        if frame.message() != Some(MessageType::Pubkey) {
            return Err(Error::ProtocolViolation {
                message: format!("expected PUBKEY before listeners, got type {}", frame.kind),
            });
        }
        let target = pubring_path(gpg);
        if let Some(parent) = target.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(&target, &frame.payload).map_err(|e| Error::ProtocolViolation {
            message: format!("cannot write keyring to {}: {}", target.display(), e),
        })?;
        debug!(path = %target.display(), "wrote public keyring");
    }

    let state = SharedState::new(writer.clone());
    let mut accept_tasks = Vec::new();

    for spec in &sockets {
        let listener = bind_listener(&spec.path)?;
        debug!(path = %spec.path, kind = spec.kind.as_str(), "listening");
        accept_tasks.push(tokio::spawn(accept_loop(
            listener,
            spec.kind,
            Arc::clone(&state),
        )));
    }

    writer.send(MessageType::Ready, 0, &[]).await?;

    let result = frame_loop(&mut reader, &state, cancel).await;
    for task in accept_tasks {
        task.abort();
    }
    result
}

fn bind_listener(path: &str) -> Result<UnixListener> {
    // A stale socket file from a previous session blocks the bind.
    let _ = std::fs::remove_file(path);
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    UnixListener::bind(path).map_err(|e| Error::ProtocolViolation {
        message: format!("cannot listen on {}: {}", path, e),
    })
}

async fn accept_loop<W: AsyncWrite + Unpin + Send + 'static>(
    listener: UnixListener,
    kind: SocketKind,
    state: Arc<SharedState<W>>,
) {
    loop {
        match listener.accept().await {
            Ok((conn, _addr)) => {
                let id = state.allocate_id();
                let (read_half, write_half) = conn.into_split();
                state.table.insert(id, write_half).await;
                trace!(id, kind = kind.as_str(), "stream opened");
                if state
                    .writer
                    .send(MessageType::Open, id, kind.as_str().as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::spawn(pump_connection(read_half, id, Arc::clone(&state)));
            }
            Err(e) => {
                warn!(error = %e, "accept failed; stopping listener");
                return;
            }
        }
    }
}

async fn frame_loop<R, W>(
    reader: &mut R,
    state: &Arc<SharedState<W>>,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = read_frame(reader) => frame?,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        match frame.message() {
            Some(MessageType::Data) => {
                // A miss means the stream raced a close; dropping the
                // payload is the safe outcome.
                let delivered = state.table.write_to(frame.stream_id, &frame.payload).await;
                if !delivered {
                    trace!(id = frame.stream_id, "data for closed stream dropped");
                }
            }
            Some(MessageType::Close) => {
                state.table.remove(frame.stream_id).await;
                trace!(id = frame.stream_id, "stream closed by host");
            }
            Some(MessageType::Error) => {
                return Err(Error::ProtocolViolation {
                    message: String::from_utf8_lossy(&frame.payload).into_owned(),
                });
            }
            // OPEN/READY travel the other direction; a late PUBKEY and
            // unknown types are skipped.
            Some(_) | None => {}
        }
    }
}
