//! Multiplexed Unix-socket bridge
//!
//! Tunnels Unix-domain-socket traffic (credential agents, optionally the
//! Docker socket) from the host into the container over a single exec
//! channel, so the container needs no network route back to the host.
//!
//! The wire protocol is length-prefixed and big-endian:
//!
//! ```text
//! [4-byte length][1-byte type][4-byte stream_id][payload...]
//! ```
//!
//! `length` counts everything after itself (type + stream_id + payload),
//! so a frame is at least 5 and at most 1 MiB bytes long. Violating either
//! bound terminates the bridge; an unknown type byte is skipped.
//!
//! The [`forwarder`] side runs inside the container with its stdin/stdout
//! as the transport; the [`host`] side runs in the CLI and dials the real
//! host sockets. Both are generic over the transport so tests drive them
//! through in-memory pipes.

pub mod forwarder;
pub mod host;

use crate::errors::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};

/// Environment variable carrying the forwarder's socket configuration as a
/// JSON array of `{path, type}` objects.
pub const SOCKETS_ENV: &str = "CORDON_BRIDGE_SOCKETS";

/// Maximum frame length (type + stream_id + payload).
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;
/// Minimum frame length: type byte plus stream id.
pub const MIN_FRAME_LEN: u32 = 5;
/// Maximum payload a single frame can carry.
pub const MAX_PAYLOAD: usize = (MAX_FRAME_LEN - MIN_FRAME_LEN) as usize;

/// Frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Stream payload bytes.
    Data = 1,
    /// New stream; payload names the socket type.
    Open = 2,
    /// Stream closed by the sending side.
    Close = 3,
    /// GPG public keyring content, sent before listeners exist.
    Pubkey = 4,
    /// Forwarder listeners are up.
    Ready = 5,
    /// Fatal condition described in the payload.
    Error = 6,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Data),
            2 => Some(MessageType::Open),
            3 => Some(MessageType::Close),
            4 => Some(MessageType::Pubkey),
            5 => Some(MessageType::Ready),
            6 => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// A decoded frame. The type byte is kept raw so receivers can skip types
/// they do not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn message(&self) -> Option<MessageType> {
        MessageType::from_byte(self.kind)
    }
}

/// Kind of host socket tunnelled through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SocketKind {
    SshAgent,
    GpgAgent,
    Docker,
}

impl SocketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SocketKind::SshAgent => "ssh-agent",
            SocketKind::GpgAgent => "gpg-agent",
            SocketKind::Docker => "docker",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ssh-agent" => Some(SocketKind::SshAgent),
            "gpg-agent" => Some(SocketKind::GpgAgent),
            "docker" => Some(SocketKind::Docker),
            _ => None,
        }
    }
}

/// One tunnelled socket: the in-container listener path and its type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SocketSpec {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: SocketKind,
}

/// Parse the forwarder socket configuration from its environment form.
pub fn parse_socket_config(raw: &str) -> Result<Vec<SocketSpec>> {
    serde_json::from_str(raw).map_err(|e| Error::ProtocolViolation {
        message: format!("invalid socket configuration: {}", e),
    })
}

/// Read one frame. Returns `None` on clean EOF at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(Error::ProtocolViolation {
                message: format!("frame read failed: {}", e),
            })
        }
    }
    let len = u32::from_be_bytes(len_buf);
    if len < MIN_FRAME_LEN {
        return Err(Error::ProtocolViolation {
            message: format!("frame length {} below minimum {}", len, MIN_FRAME_LEN),
        });
    }
    if len > MAX_FRAME_LEN {
        return Err(Error::ProtocolViolation {
            message: format!("frame length {} exceeds limit {}", len, MAX_FRAME_LEN),
        });
    }

    let mut kind = [0u8; 1];
    let mut id_buf = [0u8; 4];
    let mut payload = vec![0u8; (len - MIN_FRAME_LEN) as usize];
    let read_body = async {
        reader.read_exact(&mut kind).await?;
        reader.read_exact(&mut id_buf).await?;
        reader.read_exact(&mut payload).await?;
        std::io::Result::Ok(())
    };
    read_body.await.map_err(|e| Error::ProtocolViolation {
        message: format!("truncated frame: {}", e),
    })?;

    Ok(Some(Frame {
        kind: kind[0],
        stream_id: u32::from_be_bytes(id_buf),
        payload: Bytes::from(payload),
    }))
}

/// Serialised frame writer shared across tasks. The internal lock keeps
/// concurrently emitted frames from interleaving.
pub struct FrameWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for FrameWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one frame atomically with respect to other `send` calls.
    pub async fn send(
        &self,
        message: MessageType,
        stream_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::ProtocolViolation {
                message: format!(
                    "payload of {} bytes exceeds the {} byte frame limit",
                    payload.len(),
                    MAX_FRAME_LEN
                ),
            });
        }
        let len = MIN_FRAME_LEN + payload.len() as u32;
        let mut writer = self.inner.lock().await;
        let write = async {
            writer.write_all(&len.to_be_bytes()).await?;
            writer.write_all(&[message as u8]).await?;
            writer.write_all(&stream_id.to_be_bytes()).await?;
            writer.write_all(payload).await?;
            writer.flush().await
        };
        write.await.map_err(|e| Error::ProtocolViolation {
            message: format!("frame write failed: {}", e),
        })
    }
}

/// Live streams keyed by id. The table is read-mostly; per-stream writers
/// carry their own lock so one slow stream does not hold up the table.
#[derive(Default)]
pub(crate) struct StreamTable {
    streams: RwLock<HashMap<u32, Arc<Mutex<OwnedWriteHalf>>>>,
}

impl StreamTable {
    pub(crate) async fn insert(&self, id: u32, writer: OwnedWriteHalf) {
        self.streams
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(writer)));
    }

    /// Remove a stream; returns whether it was present. Removal before
    /// close keeps a racing DATA writer from touching a dead connection.
    pub(crate) async fn remove(&self, id: u32) -> bool {
        self.streams.write().await.remove(&id).is_some()
    }

    /// Write payload bytes to a registered stream. Returns `false` when the
    /// stream is gone or its connection errored.
    pub(crate) async fn write_to(&self, id: u32, payload: &[u8]) -> bool {
        let writer = {
            let streams = self.streams.read().await;
            streams.get(&id).cloned()
        };
        match writer {
            Some(writer) => {
                let mut writer = writer.lock().await;
                writer.write_all(payload).await.is_ok() && writer.flush().await.is_ok()
            }
            None => false,
        }
    }
}

/// State shared between a bridge endpoint's frame loop, its accept loops
/// and its per-connection pumps.
pub(crate) struct SharedState<W> {
    pub(crate) table: StreamTable,
    pub(crate) writer: FrameWriter<W>,
    pub(crate) next_id: std::sync::atomic::AtomicU32,
}

impl<W: AsyncWrite + Unpin + Send> SharedState<W> {
    pub(crate) fn new(writer: FrameWriter<W>) -> Arc<Self> {
        Arc::new(Self {
            table: StreamTable::default(),
            writer,
            next_id: std::sync::atomic::AtomicU32::new(1),
        })
    }

    /// Allocate the next stream id. Ids are never reused within a bridge's
    /// lifetime.
    pub(crate) fn allocate_id(&self) -> u32 {
        self.next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

/// Per-connection pump: relay connection reads as DATA frames until EOF or
/// error, then deregister and emit CLOSE unless the peer closed first.
pub(crate) async fn pump_connection<W: AsyncWrite + Unpin + Send + 'static>(
    mut read_half: tokio::net::unix::OwnedReadHalf,
    id: u32,
    state: Arc<SharedState<W>>,
) {
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if state.writer.send(MessageType::Data, id, &buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
    if state.table.remove(id).await {
        let _ = state.writer.send(MessageType::Close, id, &[]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip(payload_len: usize) -> Frame {
        let (mut near, far) = tokio::io::duplex(MAX_FRAME_LEN as usize * 2);
        let writer = FrameWriter::new(far);
        let payload = vec![0xabu8; payload_len];
        writer
            .send(MessageType::Data, 7, &payload)
            .await
            .unwrap();
        read_frame(&mut near).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn frames_round_trip_across_lengths() {
        for len in [0usize, 1, 2, 255, 4096, MAX_PAYLOAD] {
            let frame = round_trip(len).await;
            assert_eq!(frame.message(), Some(MessageType::Data));
            assert_eq!(frame.stream_id, 7);
            assert_eq!(frame.payload.len(), len);
        }
    }

    #[tokio::test]
    async fn oversize_payload_is_rejected_at_write() {
        let (_near, far) = tokio::io::duplex(64);
        let writer = FrameWriter::new(far);
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let err = writer
            .send(MessageType::Data, 1, &payload)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn short_frame_is_rejected_at_read() {
        let (mut near, mut far) = tokio::io::duplex(64);
        far.write_all(&4u32.to_be_bytes()).await.unwrap();
        far.write_all(&[1, 0, 0, 0]).await.unwrap();
        let err = read_frame(&mut near).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected_at_read() {
        let (mut near, mut far) = tokio::io::duplex(64);
        far.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut near).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn clean_eof_reads_as_none() {
        let (mut near, far) = tokio::io::duplex(64);
        drop(far);
        assert!(read_frame(&mut near).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_type_bytes_are_preserved_for_the_caller() {
        let (mut near, mut far) = tokio::io::duplex(64);
        far.write_all(&5u32.to_be_bytes()).await.unwrap();
        far.write_all(&[200]).await.unwrap();
        far.write_all(&9u32.to_be_bytes()).await.unwrap();
        let frame = read_frame(&mut near).await.unwrap().unwrap();
        assert_eq!(frame.kind, 200);
        assert_eq!(frame.message(), None);
        assert_eq!(frame.stream_id, 9);
    }

    #[test]
    fn socket_config_parses() {
        let specs = parse_socket_config(
            r#"[{"path": "/run/cordon/ssh.sock", "type": "ssh-agent"},
               {"path": "/run/cordon/gpg.sock", "type": "gpg-agent"}]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].kind, SocketKind::SshAgent);
        assert_eq!(specs[1].kind, SocketKind::GpgAgent);
        assert!(parse_socket_config("not json").is_err());
    }

    #[tokio::test]
    async fn concurrent_senders_do_not_interleave() {
        let (mut near, far) = tokio::io::duplex(1024 * 1024);
        let writer = FrameWriter::new(far);

        let mut tasks = Vec::new();
        for id in 0..16u32 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let payload = vec![id as u8; 1000];
                for _ in 0..8 {
                    writer.send(MessageType::Data, id, &payload).await.unwrap();
                }
            }));
        }

        let reader = tokio::spawn(async move {
            let mut seen = 0;
            while seen < 16 * 8 {
                let frame = read_frame(&mut near).await.unwrap().unwrap();
                // Payload bytes must all match the stream id they were sent on.
                assert!(frame
                    .payload
                    .iter()
                    .all(|b| *b == frame.stream_id as u8));
                seen += 1;
            }
        });

        for task in tasks {
            task.await.unwrap();
        }
        reader.await.unwrap();
    }
}
