//! Container engine integration
//!
//! A thin, typed facade over the Docker Engine HTTP API reachable on the
//! local Unix endpoint. Operations are grouped into capability traits
//! ([`ImageOps`], [`ContainerOps`], [`VolumeOps`]) so the image builder and
//! the container lifecycle can be exercised against recording mocks; the
//! [`Engine`] struct implements all of them against the live daemon.
//!
//! Every suspending operation takes the ambient cancellation token as its
//! first argument and maps transport failures to domain error kinds, keeping
//! the daemon's own error detail as the source.

mod containers;
mod exec;
mod images;
mod volumes;

use crate::errors::{Error, Result};
use bollard::{Docker, API_DEFAULT_VERSION};
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub use containers::{ContainerOps, ContainerSpec, ContainerState, ContainerSummary, MountKind, MountSpec, PortMapping};
pub use exec::{AttachedIo, ExecChannel, ExecSpec};
pub use images::{BuildRequest, ImageOps};
pub use volumes::VolumeOps;

/// Default timeout for daemon requests, in seconds. Long-running streams
/// (build output, attach, wait) are exempt by construction.
const DAEMON_TIMEOUT_SECS: u64 = 120;

/// Byte stream produced by attach, exec and log endpoints.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Boxed reader/writer halves of a hijacked channel.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Typed facade over the container daemon.
///
/// Cloning is cheap and clones share the underlying connection pool, so a
/// single `Engine` can serve concurrent tasks.
#[derive(Clone)]
pub struct Engine {
    pub(crate) docker: Docker,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Connect to the daemon endpoint named by `DOCKER_HOST`, falling back
    /// to the platform default Unix socket.
    #[instrument]
    pub fn connect() -> Result<Self> {
        let docker = match std::env::var("DOCKER_HOST") {
            Ok(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(&host, DAEMON_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Ok(host) => Docker::connect_with_http(&host, DAEMON_TIMEOUT_SECS, API_DEFAULT_VERSION),
            Err(_) => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| Error::from_engine("connect", e))?;
        debug!("connected to container daemon");
        Ok(Self { docker })
    }

    /// Health check against the daemon.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        guard(
            "ping",
            cancel,
            async {
                self.docker
                    .ping()
                    .await
                    .map(|_| ())
                    .map_err(|e| Error::from_engine("ping", e))
            },
        )
        .await
    }

    /// Daemon version string, e.g. `26.1.3 (api 1.45)`.
    pub async fn daemon_version(&self, cancel: &CancellationToken) -> Result<String> {
        guard("daemon_version", cancel, async {
            let version = self
                .docker
                .version()
                .await
                .map_err(|e| Error::from_engine("daemon_version", e))?;
            Ok(format!(
                "{} (api {})",
                version.version.unwrap_or_else(|| "unknown".to_string()),
                version.api_version.unwrap_or_else(|| "unknown".to_string())
            ))
        })
        .await
    }

    /// Create the named bridge network if it does not already exist.
    ///
    /// Idempotent: a concurrent create racing this call surfaces as the
    /// daemon's conflict status and is treated as success.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_network(
        &self,
        cancel: &CancellationToken,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        use bollard::network::CreateNetworkOptions;

        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            labels,
            ..Default::default()
        };
        guard("ensure_network", cancel, async {
            match self.docker.create_network(options).await {
                Ok(_) => Ok(()),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 409, ..
                }) => Ok(()),
                Err(e) => Err(Error::from_engine("ensure_network", e)),
            }
        })
        .await
    }
}

/// Race a fallible future against the ambient cancellation token.
pub(crate) async fn guard<T>(
    op: &'static str,
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled { op }),
        result = fut => result,
    }
}
