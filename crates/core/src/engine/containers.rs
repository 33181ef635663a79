//! Container operations against the daemon.

use super::exec::AttachedIo;
use super::{guard, ByteStream, Engine};
use crate::errors::{Error, Result};
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, ResizeContainerTtyOptions, StartContainerOptions,
    StopContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::models::{
    HostConfig, Mount, MountBindOptions, MountBindOptionsPropagationEnum, MountTypeEnum,
    PortBinding,
};
use futures::StreamExt;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Lifecycle states the core distinguishes. Anything the daemon reports
/// beyond these is carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Other(String),
}

impl ContainerState {
    pub fn from_daemon(state: &str) -> Self {
        match state {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "exited" => ContainerState::Exited,
            other => ContainerState::Other(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Created => f.write_str("created"),
            ContainerState::Running => f.write_str("running"),
            ContainerState::Exited => f.write_str("exited"),
            ContainerState::Other(state) => f.write_str(state),
        }
    }
}

/// Summary of a container as observed through the daemon.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
}

/// Mount flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountKind {
    /// Host directory bind-mounted with private propagation.
    Bind,
    /// Named volume.
    Volume,
}

/// A single mount in a container spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl MountSpec {
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn volume(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Volume,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }
}

/// A published port: `host:container[/proto]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    pub proto: String,
}

impl std::str::FromStr for PortMapping {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ports, proto) = match s.split_once('/') {
            Some((ports, proto)) => (ports, proto),
            None => (s, "tcp"),
        };
        let parsed = ports.split_once(':').and_then(|(host, container)| {
            Some(PortMapping {
                host: host.parse().ok()?,
                container: container.parse().ok()?,
                proto: proto.to_string(),
            })
        });
        parsed.ok_or_else(|| Error::ConfigInvalid {
            message: format!("invalid port mapping {:?}: expected host:container[/proto]", s),
        })
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=VALUE` pairs, pre-sorted by the caller for determinism.
    pub env: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub cap_add: Vec<String>,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub network: Option<String>,
    pub labels: HashMap<String, String>,
    pub tty: bool,
    pub open_stdin: bool,
    pub ports: Vec<PortMapping>,
    pub memory_bytes: Option<i64>,
}

/// Container operations used by the lifecycle subsystem.
#[allow(async_fn_in_trait)]
pub trait ContainerOps {
    /// Look up a container by exact name.
    async fn find_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Option<ContainerSummary>>;

    /// List containers (running or not) matching every given label.
    async fn list_by_labels(
        &self,
        cancel: &CancellationToken,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<ContainerSummary>>;

    /// Create a container, returning its id.
    async fn create_container(
        &self,
        cancel: &CancellationToken,
        spec: &ContainerSpec,
    ) -> Result<String>;

    async fn start_container(&self, cancel: &CancellationToken, name: &str) -> Result<()>;

    /// Stop with a grace timeout before the daemon force-kills.
    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
        timeout_secs: i64,
    ) -> Result<()>;

    async fn remove_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
        force: bool,
    ) -> Result<()>;

    /// Block until the container exits and return its exit code.
    async fn wait_container(&self, cancel: &CancellationToken, name: &str) -> Result<i64>;

    /// Acquire the bidirectional byte channel to the primary process.
    async fn attach_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<AttachedIo>;

    /// Resize the primary process TTY.
    async fn resize_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
        rows: u16,
        cols: u16,
    ) -> Result<()>;

    /// Stream container logs.
    async fn container_logs(
        &self,
        cancel: &CancellationToken,
        name: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<ByteStream>;

    /// Extract a tar archive into a path inside the container.
    async fn upload_archive(
        &self,
        cancel: &CancellationToken,
        name: &str,
        path: &str,
        archive: Vec<u8>,
    ) -> Result<()>;
}

impl ContainerOps for Engine {
    async fn find_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Option<ContainerSummary>> {
        guard("find_container", cancel, async {
            use bollard::models::ContainerStateStatusEnum as Status;
            match self.docker.inspect_container(name, None).await {
                Ok(inspect) => {
                    let state = match inspect.state.as_ref().and_then(|s| s.status) {
                        Some(Status::CREATED) => ContainerState::Created,
                        Some(Status::RUNNING) => ContainerState::Running,
                        Some(Status::EXITED) => ContainerState::Exited,
                        Some(other) => {
                            ContainerState::Other(format!("{:?}", other).to_lowercase())
                        }
                        None => ContainerState::Other("unknown".to_string()),
                    };
                    Ok(Some(ContainerSummary {
                        id: inspect.id.unwrap_or_default(),
                        name: name.to_string(),
                        image: inspect
                            .config
                            .as_ref()
                            .and_then(|c| c.image.clone())
                            .unwrap_or_default(),
                        state,
                        labels: inspect
                            .config
                            .and_then(|c| c.labels)
                            .unwrap_or_default(),
                    }))
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => Ok(None),
                Err(e) => Err(Error::from_engine("find_container", e)),
            }
        })
        .await
    }

    async fn list_by_labels(
        &self,
        cancel: &CancellationToken,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<ContainerSummary>> {
        let filters = HashMap::from([(
            "label".to_string(),
            labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>(),
        )]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        guard("list_containers", cancel, async {
            let listed = self
                .docker
                .list_containers(Some(options))
                .await
                .map_err(|e| Error::from_engine("list_containers", e))?;
            Ok(listed
                .into_iter()
                .map(|c| ContainerSummary {
                    id: c.id.unwrap_or_default(),
                    name: c
                        .names
                        .unwrap_or_default()
                        .first()
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_default(),
                    image: c.image.unwrap_or_default(),
                    state: c
                        .state
                        .as_deref()
                        .map(ContainerState::from_daemon)
                        .unwrap_or(ContainerState::Other("unknown".to_string())),
                    labels: c.labels.unwrap_or_default(),
                })
                .collect())
        })
        .await
    }

    #[instrument(skip(self, cancel, spec), fields(name = %spec.name))]
    async fn create_container(
        &self,
        cancel: &CancellationToken,
        spec: &ContainerSpec,
    ) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let mounts: Vec<Mount> = spec.mounts.iter().map(to_daemon_mount).collect();
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|p| (format!("{}/{}", p.container, p.proto), HashMap::new()))
            .collect();
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .ports
            .iter()
            .map(|p| {
                (
                    format!("{}/{}", p.container, p.proto),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(p.host.to_string()),
                    }]),
                )
            })
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            user: spec.user.clone(),
            working_dir: spec.workdir.clone(),
            tty: Some(spec.tty),
            open_stdin: Some(spec.open_stdin),
            attach_stdin: Some(spec.open_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(HostConfig {
                mounts: (!mounts.is_empty()).then_some(mounts),
                cap_add: (!spec.cap_add.is_empty()).then(|| spec.cap_add.clone()),
                network_mode: spec.network.clone(),
                port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
                memory: spec.memory_bytes,
                ..Default::default()
            }),
            ..Default::default()
        };

        guard("create_container", cancel, async {
            let created = self
                .docker
                .create_container(Some(options), config)
                .await
                .map_err(|e| Error::ContainerCreateFailed {
                    name: spec.name.clone(),
                    source: Box::new(e),
                })?;
            debug!(id = %created.id, "created container");
            Ok(created.id)
        })
        .await
    }

    async fn start_container(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        guard("start_container", cancel, async {
            match self
                .docker
                .start_container(name, None::<StartContainerOptions<String>>)
                .await
            {
                Ok(()) => Ok(()),
                // Already running.
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 304, ..
                }) => Ok(()),
                Err(e) => Err(Error::ContainerStartFailed {
                    name: name.to_string(),
                    source: Box::new(e),
                }),
            }
        })
        .await
    }

    async fn stop_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
        timeout_secs: i64,
    ) -> Result<()> {
        guard("stop_container", cancel, async {
            match self
                .docker
                .stop_container(name, Some(StopContainerOptions { t: timeout_secs }))
                .await
            {
                Ok(()) => Ok(()),
                // Already stopped.
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 304, ..
                }) => Ok(()),
                Err(e) => Err(Error::from_engine("stop_container", e)),
            }
        })
        .await
    }

    async fn remove_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
        force: bool,
    ) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        guard("remove_container", cancel, async {
            match self.docker.remove_container(name, Some(options)).await {
                Ok(()) => Ok(()),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => Ok(()),
                Err(e) => Err(Error::from_engine("remove_container", e)),
            }
        })
        .await
    }

    async fn wait_container(&self, cancel: &CancellationToken, name: &str) -> Result<i64> {
        guard("wait_container", cancel, async {
            let mut stream = self
                .docker
                .wait_container(name, None::<WaitContainerOptions<String>>);
            match stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // Non-zero exits surface as a dedicated daemon error carrying
                // the code.
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    Ok(code)
                }
                Some(Err(e)) => Err(Error::from_engine("wait_container", e)),
                None => Err(Error::ContainerNotFound {
                    name: name.to_string(),
                }),
            }
        })
        .await
    }

    async fn attach_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<AttachedIo> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            ..Default::default()
        };
        guard("attach_container", cancel, async {
            let results = self
                .docker
                .attach_container(name, Some(options))
                .await
                .map_err(|e| Error::AttachFailed {
                    name: name.to_string(),
                    source: Box::new(e),
                })?;
            Ok(AttachedIo::from_attach(results))
        })
        .await
    }

    async fn resize_container(
        &self,
        cancel: &CancellationToken,
        name: &str,
        rows: u16,
        cols: u16,
    ) -> Result<()> {
        let options = ResizeContainerTtyOptions {
            height: rows,
            width: cols,
        };
        guard("resize_container", cancel, async {
            self.docker
                .resize_container_tty(name, options)
                .await
                .map_err(|e| Error::from_engine("resize_container", e))
        })
        .await
    }

    async fn container_logs(
        &self,
        cancel: &CancellationToken,
        name: &str,
        follow: bool,
        tail: Option<u32>,
    ) -> Result<ByteStream> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };
        guard("container_logs", cancel, async {
            let stream = self
                .docker
                .logs(name, Some(options))
                .map(|item| match item {
                    Ok(output) => Ok(output.into_bytes()),
                    Err(e) => Err(Error::from_engine("container_logs", e)),
                })
                .boxed();
            Ok(stream as ByteStream)
        })
        .await
    }

    async fn upload_archive(
        &self,
        cancel: &CancellationToken,
        name: &str,
        path: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        guard("upload_archive", cancel, async {
            self.docker
                .upload_to_container(name, Some(options), archive.into())
                .await
                .map_err(|e| Error::VolumeCopyFailed {
                    message: format!("upload into {} at {} failed", name, path),
                    source: Some(Box::new(e)),
                })
        })
        .await
    }
}

fn to_daemon_mount(spec: &MountSpec) -> Mount {
    match spec.kind {
        MountKind::Bind => Mount {
            target: Some(spec.target.clone()),
            source: Some(spec.source.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(spec.read_only),
            bind_options: Some(MountBindOptions {
                propagation: Some(MountBindOptionsPropagationEnum::PRIVATE),
                ..Default::default()
            }),
            ..Default::default()
        },
        MountKind::Volume => Mount {
            target: Some(spec.target.clone()),
            source: Some(spec.source.clone()),
            typ: Some(MountTypeEnum::VOLUME),
            read_only: Some(spec.read_only),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_mappings_parse() {
        let mapping: PortMapping = "8080:80".parse().unwrap();
        assert_eq!(mapping.host, 8080);
        assert_eq!(mapping.container, 80);
        assert_eq!(mapping.proto, "tcp");

        let udp: PortMapping = "5353:53/udp".parse().unwrap();
        assert_eq!(udp.proto, "udp");

        assert!("80".parse::<PortMapping>().is_err());
        assert!("x:80".parse::<PortMapping>().is_err());
    }

    #[test]
    fn container_state_classification() {
        assert_eq!(ContainerState::from_daemon("running"), ContainerState::Running);
        assert_eq!(ContainerState::from_daemon("exited"), ContainerState::Exited);
        assert_eq!(ContainerState::from_daemon("created"), ContainerState::Created);
        assert!(matches!(
            ContainerState::from_daemon("paused"),
            ContainerState::Other(_)
        ));
        assert!(ContainerState::Running.is_running());
    }

    #[test]
    fn bind_mounts_use_private_propagation() {
        let mount = to_daemon_mount(&MountSpec::bind("/host/dir", "/workspace"));
        assert_eq!(mount.typ, Some(MountTypeEnum::BIND));
        assert_eq!(
            mount.bind_options.unwrap().propagation,
            Some(MountBindOptionsPropagationEnum::PRIVATE)
        );
    }
}
