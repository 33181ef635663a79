//! Interactive terminal handling
//!
//! Puts the host terminal into raw mode for the duration of an attached
//! session, copies bytes both ways between the terminal and the container
//! channel, propagates window-size changes, and guarantees the terminal is
//! restored on every exit path.
//!
//! The two copy directions terminate asymmetrically: the call returns as
//! soon as the container→stdout copy finishes (or cancellation fires, or a
//! copy fails), while the stdin→container copy is abandoned rather than
//! awaited. stdin reads cannot be interrupted portably, and a session must
//! not hang on a terminal read after the container is gone.

use crate::engine::AttachedIo;
use crate::errors::{Error, Result};
use futures::StreamExt;
use nix::sys::termios::{self, SetArg, Termios};
use std::io::Write;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Escape sequence written before termios restoration: leave the alternate
/// screen, show the cursor, reset attributes, select the ASCII character set.
const VISUAL_RESET: &[u8] = b"\x1b[?1049l\x1b[?25h\x1b[0m\x1b(B";

/// Saved termios state, held under a mutex so concurrent setup/restore
/// cannot race the save slot.
static SAVED_TERMIOS: Mutex<Option<Termios>> = Mutex::new(None);

/// A terminal session wrapping raw-mode state.
#[derive(Debug)]
pub struct PtySession {
    is_terminal: bool,
}

impl PtySession {
    /// Enter raw mode, saving the prior termios state.
    ///
    /// When standard input is not a terminal this is a no-op and the
    /// returned session reports [`is_terminal`] false so callers skip
    /// resize handling.
    ///
    /// [`is_terminal`]: PtySession::is_terminal
    pub fn setup() -> Result<Self> {
        let stdin = std::io::stdin();
        let saved = match termios::tcgetattr(&stdin) {
            Ok(saved) => saved,
            Err(_) => {
                debug!("stdin is not a terminal; raw mode skipped");
                return Ok(Self { is_terminal: false });
            }
        };

        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);

        {
            let mut slot = SAVED_TERMIOS.lock().expect("termios slot poisoned");
            if slot.is_none() {
                *slot = Some(saved);
            }
        }

        termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).map_err(|e| Error::AttachFailed {
            name: "terminal".to_string(),
            source: Box::new(e),
        })?;
        trace!("terminal in raw mode");
        Ok(Self { is_terminal: true })
    }

    /// Whether standard input is an interactive terminal.
    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    /// Restore the terminal: visual reset first, then the saved termios.
    ///
    /// Safe to call any number of times and from any exit path; the save
    /// slot empties on the first call. Callers that terminate via
    /// `process::exit` must invoke this before exiting, since that path
    /// skips destructors.
    pub fn restore() {
        let taken = {
            let mut slot = SAVED_TERMIOS.lock().expect("termios slot poisoned");
            slot.take()
        };
        if let Some(saved) = taken {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(VISUAL_RESET);
            let _ = stdout.flush();
            if let Err(e) = termios::tcsetattr(&std::io::stdin(), SetArg::TCSANOW, &saved) {
                warn!(error = %e, "failed to restore termios");
            }
        }
    }

    /// Current terminal size as `(rows, cols)`.
    pub fn size() -> Option<(u16, u16)> {
        crossterm::terminal::size().ok().map(|(cols, rows)| (rows, cols))
    }

    /// Run the bidirectional copy between the host terminal and an attached
    /// channel until the container side closes, the token cancels, or a
    /// copy fails.
    ///
    /// Cancellation initiated through `cancel` is success for this call.
    pub async fn stream(&self, attached: AttachedIo, cancel: &CancellationToken) -> Result<()> {
        copy_session(attached, tokio::io::stdin(), tokio::io::stdout(), cancel).await
    }

    /// Like [`stream`], with window-size propagation: applies the resize
    /// jiggle on entry to force a redraw inside the container, then invokes
    /// `resize` with `(rows, cols)` on every host window-change signal.
    ///
    /// [`stream`]: PtySession::stream
    pub async fn stream_with_resize<F, Fut>(
        &self,
        attached: AttachedIo,
        cancel: &CancellationToken,
        resize: F,
    ) -> Result<()>
    where
        F: Fn(u16, u16) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        let mut winch = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
            .map_err(|e| Error::AttachFailed {
                name: "terminal".to_string(),
                source: Box::new(e),
            })?;

        // Jiggle: an off-by-one resize and back forces full-screen programs
        // to repaint into the real dimensions.
        if let Some((rows, cols)) = Self::size() {
            let _ = resize(rows + 1, cols + 1).await;
            let _ = resize(rows, cols).await;
        }

        let listener = tokio::spawn(async move {
            while winch.recv().await.is_some() {
                if let Some((rows, cols)) = Self::size() {
                    if resize(rows, cols).await.is_err() {
                        break;
                    }
                }
            }
        });

        let result = self.stream(attached, cancel).await;
        listener.abort();
        result
    }
}

/// Core copy loop, split from [`PtySession::stream`] so it can run against
/// in-memory pipes.
async fn copy_session(
    attached: AttachedIo,
    host_in: impl AsyncRead + Send + Unpin + 'static,
    mut host_out: impl AsyncWrite + Send + Unpin,
    cancel: &CancellationToken,
) -> Result<()> {
    let AttachedIo {
        mut output,
        mut input,
    } = attached;

    // Host→container copy. Deliberately not awaited at termination: it may
    // sit in a blocked read forever.
    let inbound = tokio::spawn(async move {
        let mut host_in = host_in;
        let mut buf = [0u8; 8192];
        loop {
            match host_in.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if input.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    if input.flush().await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let outbound = async {
        while let Some(chunk) = output.next().await {
            let chunk = chunk?;
            host_out
                .write_all(&chunk)
                .await
                .map_err(|e| Error::NetworkError {
                    op: "stream_output",
                    source: Box::new(e),
                })?;
            host_out.flush().await.map_err(|e| Error::NetworkError {
                op: "stream_output",
                source: Box::new(e),
            })?;
        }
        Ok(())
    };

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(()),
        r = outbound => r,
    };
    inbound.abort();
    result
}
