//! Image operations against the daemon.

use super::{guard, Engine};
use crate::errors::{Error, Result};
use bollard::image::{BuildImageOptions, RemoveImageOptions, TagImageOptions};
use futures::StreamExt;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Inputs for an image build.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Tags applied to the built image; the first is the build tag, the rest
    /// are aliased to it after the build succeeds.
    pub tags: Vec<String>,
    /// Recipe file name inside the context tar.
    pub recipe_name: String,
    /// Disable the daemon's layer cache.
    pub no_cache: bool,
    /// Always attempt to pull a newer base image.
    pub pull: bool,
    /// Labels stamped onto the image.
    pub labels: HashMap<String, String>,
    /// Build arguments.
    pub build_args: HashMap<String, String>,
    /// Network mode for build-time RUN steps.
    pub network_mode: Option<String>,
    /// Target stage for multi-stage recipes.
    pub target: Option<String>,
}

/// Image operations used by the image builder.
#[allow(async_fn_in_trait)]
pub trait ImageOps {
    /// Whether an image with the given reference exists locally.
    async fn image_exists(&self, cancel: &CancellationToken, reference: &str) -> Result<bool>;

    /// Resolve an image reference to its id.
    async fn image_id(&self, cancel: &CancellationToken, reference: &str) -> Result<String>;

    /// Build an image from a tar context, streaming daemon output lines to
    /// `on_output`.
    async fn build_image(
        &self,
        cancel: &CancellationToken,
        request: BuildRequest,
        context: Vec<u8>,
        on_output: &mut (dyn FnMut(&str) + Send),
    ) -> Result<()>;

    /// Point `repo:tag` at the image currently referenced by `source`.
    async fn tag_image(
        &self,
        cancel: &CancellationToken,
        source: &str,
        repo: &str,
        tag: &str,
    ) -> Result<()>;

    /// Remove an image reference.
    async fn remove_image(
        &self,
        cancel: &CancellationToken,
        reference: &str,
        force: bool,
    ) -> Result<()>;
}

impl ImageOps for Engine {
    async fn image_exists(&self, cancel: &CancellationToken, reference: &str) -> Result<bool> {
        guard("image_exists", cancel, async {
            match self.docker.inspect_image(reference).await {
                Ok(_) => Ok(true),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => Ok(false),
                Err(e) => Err(Error::from_engine("image_exists", e)),
            }
        })
        .await
    }

    async fn image_id(&self, cancel: &CancellationToken, reference: &str) -> Result<String> {
        guard("image_id", cancel, async {
            match self.docker.inspect_image(reference).await {
                Ok(inspect) => inspect.id.ok_or_else(|| Error::ImageNotFound {
                    image: reference.to_string(),
                }),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => Err(Error::ImageNotFound {
                    image: reference.to_string(),
                }),
                Err(e) => Err(Error::from_engine("image_id", e)),
            }
        })
        .await
    }

    #[instrument(skip(self, cancel, request, context, on_output), fields(tag = %request.tags.first().map(String::as_str).unwrap_or("<none>")))]
    async fn build_image(
        &self,
        cancel: &CancellationToken,
        request: BuildRequest,
        context: Vec<u8>,
        on_output: &mut (dyn FnMut(&str) + Send),
    ) -> Result<()> {
        let build_tag = request
            .tags
            .first()
            .cloned()
            .ok_or_else(|| Error::ImageBuildFailed {
                message: "build requested without a tag".to_string(),
                source: None,
            })?;

        let options = BuildImageOptions::<String> {
            dockerfile: request.recipe_name.clone(),
            t: build_tag.clone(),
            nocache: request.no_cache,
            pull: request.pull,
            rm: true,
            labels: request.labels.clone(),
            buildargs: request.build_args.clone(),
            networkmode: request.network_mode.clone().unwrap_or_default(),
            target: request.target.clone().unwrap_or_default(),
            ..Default::default()
        };

        guard("build_image", cancel, async {
            let mut stream = self.docker.build_image(options, None, Some(context.into()));
            while let Some(item) = stream.next().await {
                let info = item.map_err(|e| Error::ImageBuildFailed {
                    message: "daemon build stream failed".to_string(),
                    source: Some(Box::new(e)),
                })?;
                if let Some(line) = info.stream {
                    on_output(&line);
                }
                if let Some(message) = info.error {
                    return Err(Error::ImageBuildFailed {
                        message,
                        source: None,
                    });
                }
            }
            Ok(())
        })
        .await?;

        // The HTTP API takes a single tag per build; remaining tags become
        // aliases of the image just built.
        for alias in request.tags.iter().skip(1) {
            let (repo, tag) = split_reference(alias);
            self.tag_image(cancel, &build_tag, repo, tag).await?;
        }
        debug!("image build complete");
        Ok(())
    }

    async fn tag_image(
        &self,
        cancel: &CancellationToken,
        source: &str,
        repo: &str,
        tag: &str,
    ) -> Result<()> {
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        guard("tag_image", cancel, async {
            self.docker
                .tag_image(source, Some(options))
                .await
                .map_err(|e| Error::from_engine("tag_image", e))
        })
        .await
    }

    async fn remove_image(
        &self,
        cancel: &CancellationToken,
        reference: &str,
        force: bool,
    ) -> Result<()> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        guard("remove_image", cancel, async {
            match self.docker.remove_image(reference, Some(options), None).await {
                Ok(_) => Ok(()),
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => Ok(()),
                Err(e) => Err(Error::from_engine("remove_image", e)),
            }
        })
        .await
    }
}

/// Split `repo:tag` at the last colon that is not part of a registry port.
pub(crate) fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reference_handles_plain_tags() {
        assert_eq!(split_reference("cordon/demo:latest"), ("cordon/demo", "latest"));
        assert_eq!(
            split_reference("cordon/demo:0123456789ab"),
            ("cordon/demo", "0123456789ab")
        );
    }

    #[test]
    fn split_reference_defaults_to_latest() {
        assert_eq!(split_reference("cordon/demo"), ("cordon/demo", "latest"));
        // A port-qualified registry without a tag keeps the whole reference.
        assert_eq!(
            split_reference("registry.local:5000/demo"),
            ("registry.local:5000/demo", "latest")
        );
    }
}
