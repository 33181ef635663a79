//! Container lifecycle
//!
//! Idempotent create-or-attach semantics for agent containers, the
//! attach-then-start ordering interactive sessions depend on, agent
//! selection across a project, and ephemeral-run cleanup.
//!
//! Attach-then-start is a hard ordering requirement, not a preference: a
//! fast-finishing command can produce all of its output between start and a
//! late attach, and that output would be lost.

use crate::engine::{AttachedIo, ContainerOps, ContainerSpec, ContainerSummary, VolumeOps};
use crate::errors::{Error, Result};
use crate::naming::{
    is_managed, AgentIdentity, VolumeKind, LABEL_AGENT, LABEL_MANAGED, LABEL_PROJECT,
};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default grace period before a stop escalates to kill.
pub const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;

/// Outcome of [`find_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredContainer {
    pub id: String,
    /// False when an existing managed container was reused.
    pub created: bool,
}

/// Find a managed container by name or create it from the spec.
///
/// A name collision with a container that does not carry the managed-by
/// marker is an error; cordon never adopts foreign containers.
#[instrument(skip_all, fields(name = %spec.name))]
pub async fn find_or_create<E: ContainerOps>(
    cancel: &CancellationToken,
    engine: &E,
    spec: &ContainerSpec,
) -> Result<EnsuredContainer> {
    if let Some(existing) = engine.find_container(cancel, &spec.name).await? {
        if !is_managed(&existing.labels) {
            return Err(Error::ContainerCreateFailed {
                name: spec.name.clone(),
                source: "name is taken by a container cordon does not manage".into(),
            });
        }
        debug!(id = %existing.id, "reusing existing container");
        return Ok(EnsuredContainer {
            id: existing.id,
            created: false,
        });
    }

    let id = engine.create_container(cancel, spec).await?;
    info!(id = %id, "created container");
    Ok(EnsuredContainer { id, created: true })
}

/// Attach to a container's primary process, then start it.
pub async fn attach_and_start<E: ContainerOps>(
    cancel: &CancellationToken,
    engine: &E,
    name: &str,
) -> Result<AttachedIo> {
    let attached = engine.attach_container(cancel, name).await?;
    engine.start_container(cancel, name).await?;
    Ok(attached)
}

/// List all managed containers of a project.
pub async fn list_project<E: ContainerOps>(
    cancel: &CancellationToken,
    engine: &E,
    project: &str,
) -> Result<Vec<ContainerSummary>> {
    let labels = HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_PROJECT.to_string(), project.to_string()),
    ]);
    engine.list_by_labels(cancel, &labels).await
}

/// Resolve which agent container a command acts on.
///
/// With `--agent` the named container must exist. Without it the project
/// must have exactly one container; zero is [`ContainerNotFound`] and more
/// than one is [`AmbiguousAgent`] naming the candidates.
///
/// [`ContainerNotFound`]: crate::errors::ErrorKind::ContainerNotFound
/// [`AmbiguousAgent`]: crate::errors::ErrorKind::AmbiguousAgent
pub async fn select_agent<E: ContainerOps>(
    cancel: &CancellationToken,
    engine: &E,
    project: &str,
    agent: Option<&str>,
) -> Result<ContainerSummary> {
    if let Some(agent) = agent {
        let name = AgentIdentity::new(project, Some(agent)).container_name();
        return engine
            .find_container(cancel, &name)
            .await?
            .filter(|c| is_managed(&c.labels))
            .ok_or(Error::ContainerNotFound { name });
    }

    let mut candidates = list_project(cancel, engine, project).await?;
    match candidates.len() {
        0 => Err(Error::ContainerNotFound {
            name: format!("cordon.{}.*", project),
        }),
        1 => Ok(candidates.remove(0)),
        _ => {
            let mut agents: Vec<String> = candidates
                .iter()
                .map(|c| {
                    c.labels
                        .get(LABEL_AGENT)
                        .cloned()
                        .unwrap_or_else(|| c.name.clone())
                })
                .collect();
            agents.sort();
            Err(Error::AmbiguousAgent {
                project: project.to_string(),
                agents,
            })
        }
    }
}

/// Remove an agent's container and, when requested, every volume in its
/// namespace. Volumes the current mode never created (the workspace volume
/// in bind mode) are covered by remove-volume treating absence as success.
#[instrument(skip(cancel, engine))]
pub async fn remove_agent<E: ContainerOps + VolumeOps>(
    cancel: &CancellationToken,
    engine: &E,
    identity: &AgentIdentity,
    remove_volumes: bool,
) -> Result<()> {
    engine
        .remove_container(cancel, &identity.container_name(), true)
        .await?;
    if remove_volumes {
        for kind in VolumeKind::ALL {
            engine
                .remove_volume(cancel, &identity.volume_name(kind))
                .await?;
        }
    }
    Ok(())
}
