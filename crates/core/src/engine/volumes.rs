//! Volume operations against the daemon.

use super::{guard, Engine};
use crate::errors::{Error, Result};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Volume operations used by the workspace strategies and the lifecycle
/// cleanup paths.
#[allow(async_fn_in_trait)]
pub trait VolumeOps {
    async fn volume_exists(&self, cancel: &CancellationToken, name: &str) -> Result<bool>;

    async fn create_volume(
        &self,
        cancel: &CancellationToken,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<()>;

    /// Names of volumes matching every given label.
    async fn list_volumes(
        &self,
        cancel: &CancellationToken,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<String>>;

    /// Remove a volume; absent volumes are not an error.
    async fn remove_volume(&self, cancel: &CancellationToken, name: &str) -> Result<()>;
}

impl VolumeOps for Engine {
    async fn volume_exists(&self, cancel: &CancellationToken, name: &str) -> Result<bool> {
        guard("volume_exists", cancel, async {
            match self.docker.inspect_volume(name).await {
                Ok(_) => Ok(true),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => Ok(false),
                Err(e) => Err(Error::from_engine("volume_exists", e)),
            }
        })
        .await
    }

    async fn create_volume(
        &self,
        cancel: &CancellationToken,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels,
            ..Default::default()
        };
        guard("create_volume", cancel, async {
            self.docker
                .create_volume(options)
                .await
                .map(|_| ())
                .map_err(|e| Error::VolumeCreateFailed {
                    name: name.to_string(),
                    source: Box::new(e),
                })
        })
        .await
    }

    async fn list_volumes(
        &self,
        cancel: &CancellationToken,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<String>> {
        let filters = HashMap::from([(
            "label".to_string(),
            labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>(),
        )]);
        let options = ListVolumesOptions { filters };
        guard("list_volumes", cancel, async {
            let response = self
                .docker
                .list_volumes(Some(options))
                .await
                .map_err(|e| Error::from_engine("list_volumes", e))?;
            let mut names: Vec<String> = response
                .volumes
                .unwrap_or_default()
                .into_iter()
                .map(|v| v.name)
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn remove_volume(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        guard("remove_volume", cancel, async {
            match self
                .docker
                .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
                .await
            {
                Ok(()) => Ok(()),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => Ok(()),
                Err(e) => Err(Error::from_engine("remove_volume", e)),
            }
        })
        .await
    }
}
