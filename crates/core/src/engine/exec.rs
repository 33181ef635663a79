//! Exec and attach channels.
//!
//! Attach and exec both hand back a hijacked bidirectional byte channel.
//! [`AttachedIo`] normalises the daemon's stream types into a byte stream
//! plus a writer, and can also be built from in-memory pipes so the PTY
//! handler and the socket bridge are testable without a daemon.

use super::{guard, BoxedReader, BoxedWriter, ByteStream, Engine};
use crate::errors::{Error, Result};
use bollard::container::AttachContainerResults;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// A hijacked bidirectional byte channel.
pub struct AttachedIo {
    /// Bytes produced by the remote side.
    pub output: ByteStream,
    /// Writer feeding the remote side's stdin.
    pub input: BoxedWriter,
}

impl AttachedIo {
    pub(crate) fn from_attach(results: AttachContainerResults) -> Self {
        let output = results
            .output
            .map(|item| match item {
                Ok(log) => Ok(log.into_bytes()),
                Err(e) => Err(Error::from_engine("attach_stream", e)),
            })
            .boxed();
        Self {
            output,
            input: Box::new(results.input),
        }
    }

    /// Build a channel from any read/write pair. Used by tests and by the
    /// forwarder, whose transport is process stdin/stdout.
    pub fn from_pipes(
        reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
        writer: impl tokio::io::AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let output = tokio_util::io::ReaderStream::new(reader)
            .map(|item| item.map_err(|e| Error::ProtocolViolation {
                message: format!("transport read failed: {}", e),
            }))
            .boxed();
        Self {
            output,
            input: Box::new(writer),
        }
    }

    /// Convert the output stream into an [`AsyncRead`] for frame decoding.
    ///
    /// [`AsyncRead`]: tokio::io::AsyncRead
    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        let reader = tokio_util::io::StreamReader::new(
            self.output
                .map(|item| item.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
        );
        (Box::new(reader), self.input)
    }
}

/// Inputs for an exec channel.
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub tty: bool,
}

/// A started exec instance and its byte channel.
pub struct ExecChannel {
    pub id: String,
    pub io: AttachedIo,
}

impl Engine {
    /// Create and start an exec instance with an attached channel.
    pub async fn exec(
        &self,
        cancel: &CancellationToken,
        container: &str,
        spec: ExecSpec,
    ) -> Result<ExecChannel> {
        let options = CreateExecOptions::<String> {
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(spec.tty),
            env: (!spec.env.is_empty()).then_some(spec.env),
            cmd: Some(spec.cmd),
            user: spec.user,
            working_dir: spec.workdir,
            ..Default::default()
        };

        guard("exec", cancel, async {
            let created = self
                .docker
                .create_exec(container, options)
                .await
                .map_err(|e| Error::AttachFailed {
                    name: container.to_string(),
                    source: Box::new(e),
                })?;

            let started = self
                .docker
                .start_exec(&created.id, Some(StartExecOptions::default()))
                .await
                .map_err(|e| Error::AttachFailed {
                    name: container.to_string(),
                    source: Box::new(e),
                })?;

            match started {
                StartExecResults::Attached { output, input } => {
                    let output = output
                        .map(|item| match item {
                            Ok(log) => Ok(log.into_bytes()),
                            Err(e) => Err(Error::from_engine("exec_stream", e)),
                        })
                        .boxed();
                    Ok(ExecChannel {
                        id: created.id,
                        io: AttachedIo {
                            output,
                            input: Box::new(input),
                        },
                    })
                }
                StartExecResults::Detached => Err(Error::AttachFailed {
                    name: container.to_string(),
                    source: "exec started detached without a channel".into(),
                }),
            }
        })
        .await
    }

    /// Exit code of a finished exec instance.
    pub async fn exec_exit_code(
        &self,
        cancel: &CancellationToken,
        exec_id: &str,
    ) -> Result<i64> {
        guard("exec_exit_code", cancel, async {
            let inspect = self
                .docker
                .inspect_exec(exec_id)
                .await
                .map_err(|e| Error::from_engine("exec_exit_code", e))?;
            Ok(inspect.exit_code.unwrap_or(0))
        })
        .await
    }

    /// Resize an exec instance's TTY.
    pub async fn resize_exec(
        &self,
        cancel: &CancellationToken,
        exec_id: &str,
        rows: u16,
        cols: u16,
    ) -> Result<()> {
        let options = ResizeExecOptions {
            height: rows,
            width: cols,
        };
        guard("resize_exec", cancel, async {
            self.docker
                .resize_exec(exec_id, options)
                .await
                .map_err(|e| Error::from_engine("resize_exec", e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn pipe_channel_round_trips() {
        let (near, far) = tokio::io::duplex(64);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, mut far_write) = tokio::io::split(far);

        let io = AttachedIo::from_pipes(near_read, near_write);
        let (mut reader, mut writer) = io.into_split();

        far_write.write_all(b"from-remote").await.unwrap();
        let mut buf = [0u8; 11];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from-remote");

        writer.write_all(b"to-remote").await.unwrap();
        writer.flush().await.unwrap();
        let mut buf = [0u8; 9];
        far_read.take(9).read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"to-remote");
    }
}
