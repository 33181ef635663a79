//! Error types and handling
//!
//! All fallible operations in the core crate return [`Error`], a closed set of
//! domain errors. Every variant maps to an [`ErrorKind`] discriminant so glue
//! code and tests can dispatch on the kind without string matching, and every
//! variant carries enough context to render a user-facing message plus a list
//! of next-step hints.

use thiserror::Error;

/// Source errors are heterogeneous (daemon transport, IO, HTTP, YAML), so
/// variants store them as boxed trait objects.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed discriminant for [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DaemonUnavailable,
    ImageNotFound,
    ImageBuildFailed,
    ContainerNotFound,
    ContainerCreateFailed,
    ContainerStartFailed,
    VolumeCreateFailed,
    VolumeCopyFailed,
    AttachFailed,
    NetworkError,
    ConfigNotFound,
    ConfigInvalid,
    AmbiguousAgent,
    ProtocolViolation,
    Cancelled,
    Timeout,
}

/// Domain errors for cordon operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The Docker daemon endpoint did not respond.
    #[error("cannot connect to the Docker daemon during {op}")]
    DaemonUnavailable {
        op: &'static str,
        #[source]
        source: BoxedSource,
    },

    /// A referenced image does not exist locally.
    #[error("image not found: {image}")]
    ImageNotFound { image: String },

    /// The daemon reported a build failure.
    #[error("image build failed: {message}")]
    ImageBuildFailed {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// No managed container matched the selection.
    #[error("container not found: {name}")]
    ContainerNotFound { name: String },

    /// Container creation was rejected by the daemon.
    #[error("failed to create container {name}")]
    ContainerCreateFailed {
        name: String,
        #[source]
        source: BoxedSource,
    },

    /// Container start was rejected by the daemon.
    #[error("failed to start container {name}")]
    ContainerStartFailed {
        name: String,
        #[source]
        source: BoxedSource,
    },

    /// Volume creation was rejected by the daemon.
    #[error("failed to create volume {name}")]
    VolumeCreateFailed {
        name: String,
        #[source]
        source: BoxedSource,
    },

    /// Copying workspace contents into a volume failed.
    #[error("workspace copy failed: {message}")]
    VolumeCopyFailed {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Attaching to a container's primary process failed.
    #[error("failed to attach to container {name}")]
    AttachFailed {
        name: String,
        #[source]
        source: BoxedSource,
    },

    /// A daemon or transport error not covered by a more specific kind.
    #[error("engine request failed during {op}")]
    NetworkError {
        op: &'static str,
        #[source]
        source: BoxedSource,
    },

    /// No project configuration file was found.
    #[error("no cordon.yaml found in {path}")]
    ConfigNotFound { path: String },

    /// The configuration file exists but is not usable.
    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    /// More than one agent matched and no `--agent` was given.
    #[error("multiple agents are running for project {project}: {}", .agents.join(", "))]
    AmbiguousAgent {
        project: String,
        agents: Vec<String>,
    },

    /// The socket bridge received a malformed frame.
    #[error("bridge protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// The operation was cancelled by the ambient token.
    #[error("{op} cancelled")]
    Cancelled { op: &'static str },

    /// The operation exceeded its deadline.
    #[error("{op} timed out after {seconds}s")]
    Timeout { op: &'static str, seconds: u64 },
}

impl Error {
    /// The closed discriminant for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DaemonUnavailable { .. } => ErrorKind::DaemonUnavailable,
            Error::ImageNotFound { .. } => ErrorKind::ImageNotFound,
            Error::ImageBuildFailed { .. } => ErrorKind::ImageBuildFailed,
            Error::ContainerNotFound { .. } => ErrorKind::ContainerNotFound,
            Error::ContainerCreateFailed { .. } => ErrorKind::ContainerCreateFailed,
            Error::ContainerStartFailed { .. } => ErrorKind::ContainerStartFailed,
            Error::VolumeCreateFailed { .. } => ErrorKind::VolumeCreateFailed,
            Error::VolumeCopyFailed { .. } => ErrorKind::VolumeCopyFailed,
            Error::AttachFailed { .. } => ErrorKind::AttachFailed,
            Error::NetworkError { .. } => ErrorKind::NetworkError,
            Error::ConfigNotFound { .. } => ErrorKind::ConfigNotFound,
            Error::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            Error::AmbiguousAgent { .. } => ErrorKind::AmbiguousAgent,
            Error::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Ordered next-step suggestions for the presentation layer.
    ///
    /// Rendered by the CLI as a `Next steps:` block under the error message.
    pub fn hints(&self) -> &'static [&'static str] {
        match self {
            Error::DaemonUnavailable { .. } => &[
                "check that Docker is running: `docker info`",
                "if the daemon uses a non-default socket, set DOCKER_HOST",
            ],
            Error::ImageNotFound { .. } => &[
                "run `cordon build` to build the project image",
                "or set build.image in cordon.yaml to an existing image",
            ],
            Error::ImageBuildFailed { .. } => &[
                "inspect the build output above for the failing step",
                "re-run with `cordon build --no-cache` to rule out stale layers",
            ],
            Error::ContainerNotFound { .. } => &[
                "run `cordon ls` to list containers for this project",
                "start one with `cordon start`",
            ],
            Error::ContainerCreateFailed { .. } | Error::ContainerStartFailed { .. } => &[
                "run `cordon ls` to check for name collisions",
                "remove stale containers with `cordon rm` and retry",
            ],
            Error::VolumeCreateFailed { .. } | Error::VolumeCopyFailed { .. } => &[
                "check free disk space for the Docker data root",
                "retry with `cordon start --clean` to recreate the volume",
            ],
            Error::AttachFailed { .. } => {
                &["the container may have exited immediately; check `cordon logs`"]
            }
            Error::NetworkError { .. } => &["retry the command; the daemon may be restarting"],
            Error::ConfigNotFound { .. } => &["run `cordon init` to create a starter cordon.yaml"],
            Error::ConfigInvalid { .. } => &["run `cordon config validate` for the full report"],
            Error::AmbiguousAgent { .. } => &[
                "pass `--agent <name>` to select one",
                "run `cordon ls` to see all agents for this project",
            ],
            Error::ProtocolViolation { .. } => {
                &["restart the session to re-establish the socket bridge"]
            }
            Error::Cancelled { .. } | Error::Timeout { .. } => &[],
        }
    }

    /// Wrap a daemon error: an actual daemon response is a
    /// [`ErrorKind::NetworkError`]; anything without a response (connect
    /// refused, missing socket, transport failure) means the daemon is
    /// unreachable.
    pub fn from_engine(op: &'static str, err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError { .. }
            | bollard::errors::Error::DockerContainerWaitError { .. } => Error::NetworkError {
                op,
                source: Box::new(err),
            },
            other => Error::DaemonUnavailable {
                op,
                source: Box::new(other),
            },
        }
    }
}

/// Convenience type alias for Results with cordon [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_across_context() {
        let a = Error::ContainerNotFound {
            name: "cordon.demo.alpha".into(),
        };
        let b = Error::ContainerNotFound {
            name: "cordon.other.beta".into(),
        };
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.kind(), ErrorKind::ContainerNotFound);
    }

    #[test]
    fn ambiguous_agent_lists_candidates() {
        let err = Error::AmbiguousAgent {
            project: "demo".into(),
            agents: vec!["alpha".into(), "beta".into()],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("alpha"));
        assert!(rendered.contains("beta"));
        assert!(!err.hints().is_empty());
    }

    #[test]
    fn cancelled_has_no_hints() {
        let err = Error::Cancelled { op: "attach" };
        assert!(err.hints().is_empty());
    }

    #[test]
    fn config_not_found_points_at_init() {
        let err = Error::ConfigNotFound {
            path: "/tmp/project".into(),
        };
        assert!(err.hints().iter().any(|h| h.contains("cordon init")));
    }
}
