//! Image builder
//!
//! Orchestrates recipe rendering, fingerprinting and the content-addressed
//! build cache. The daemon's layer cache and the fingerprint cache are
//! orthogonal: `no_cache` disables the former, `force_build` overrides the
//! latter.

use crate::config::CordonConfig;
use crate::engine::{BuildRequest, ImageOps};
use crate::errors::Result;
use crate::fingerprint::fingerprint;
use crate::naming::{hash_image_tag, image_repo, image_tag, project_labels};
use crate::recipe;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Build policy flags for [`ensure_image`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureImageOptions {
    /// Build even when the fingerprint tag already exists.
    pub force_build: bool,
    /// Disable the daemon's layer cache. Does not affect the fingerprint
    /// cache.
    pub no_cache: bool,
    /// Always attempt to pull a newer base image.
    pub pull: bool,
}

/// Outcome of [`ensure_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredImage {
    /// Primary tag, `cordon/<project>:latest`.
    pub tag: String,
    /// Content fingerprint; `None` for opaque user-supplied recipes.
    pub fingerprint: Option<String>,
    /// Whether a daemon build ran (false on a cache hit).
    pub built: bool,
}

/// Ensure the project image exists, building only when the content
/// fingerprint is new.
///
/// User-supplied recipes short-circuit the fingerprint machinery: the user's
/// context directory is archived as-is and every invocation builds.
#[instrument(skip_all, fields(project = %config.project))]
pub async fn ensure_image<E: ImageOps>(
    cancel: &CancellationToken,
    engine: &E,
    config: &CordonConfig,
    project_dir: &Path,
    version: &str,
    options: EnsureImageOptions,
    on_output: &mut (dyn FnMut(&str) + Send),
) -> Result<EnsuredImage> {
    let primary = image_tag(&config.project);
    let labels = project_labels(&config.project, version);

    if let Some(dockerfile) = &config.build.dockerfile {
        let context_dir = config.build_context_dir(project_dir);
        let (context, recipe_name) =
            recipe::user_build_context(&context_dir, &project_dir.join(dockerfile))?;
        info!(tag = %primary, "building from user recipe");
        engine
            .build_image(
                cancel,
                BuildRequest {
                    tags: vec![primary.clone()],
                    recipe_name,
                    no_cache: options.no_cache,
                    pull: options.pull,
                    labels,
                    build_args: config.build.build_args.clone().into_iter().collect(),
                    ..Default::default()
                },
                context,
                on_output,
            )
            .await?;
        return Ok(EnsuredImage {
            tag: primary,
            fingerprint: None,
            built: true,
        });
    }

    let rendered = recipe::render(config, project_dir)?;
    let digest = fingerprint(
        rendered.dockerfile.as_bytes(),
        &rendered.fingerprint_inputs(),
    );
    let hash_tag = hash_image_tag(&config.project, &digest);

    if !options.force_build && engine.image_exists(cancel, &hash_tag).await? {
        // Cache hit: re-point the alias only.
        engine
            .tag_image(cancel, &hash_tag, &image_repo(&config.project), "latest")
            .await?;
        debug!(fingerprint = %digest, "image cache hit");
        return Ok(EnsuredImage {
            tag: primary,
            fingerprint: Some(digest),
            built: false,
        });
    }

    let context = recipe::build_context(&rendered)?;
    info!(tag = %primary, fingerprint = %digest, "building image");
    engine
        .build_image(
            cancel,
            BuildRequest {
                tags: vec![primary.clone(), hash_tag],
                recipe_name: recipe::RECIPE_FILE.to_string(),
                no_cache: options.no_cache,
                pull: options.pull,
                labels,
                build_args: config.build.build_args.clone().into_iter().collect(),
                ..Default::default()
            },
            context,
            on_output,
        )
        .await?;

    Ok(EnsuredImage {
        tag: primary,
        fingerprint: Some(digest),
        built: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Recording mock: pre-seeded image references plus an event log.
    #[derive(Default)]
    struct MockEngine {
        existing: Mutex<HashSet<String>>,
        events: Mutex<Vec<String>>,
    }

    impl MockEngine {
        fn with_existing(reference: &str) -> Self {
            let mock = Self::default();
            mock.existing.lock().unwrap().insert(reference.to_string());
            mock
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ImageOps for MockEngine {
        async fn image_exists(
            &self,
            _cancel: &CancellationToken,
            reference: &str,
        ) -> Result<bool> {
            self.events
                .lock()
                .unwrap()
                .push(format!("exists {}", reference));
            Ok(self.existing.lock().unwrap().contains(reference))
        }

        async fn image_id(&self, _cancel: &CancellationToken, reference: &str) -> Result<String> {
            Ok(format!("sha256:{}", reference))
        }

        async fn build_image(
            &self,
            _cancel: &CancellationToken,
            request: BuildRequest,
            _context: Vec<u8>,
            _on_output: &mut (dyn FnMut(&str) + Send),
        ) -> Result<()> {
            self.events.lock().unwrap().push(format!(
                "build {} recipe={}",
                request.tags.join(","),
                request.recipe_name
            ));
            let mut existing = self.existing.lock().unwrap();
            for tag in request.tags {
                existing.insert(tag);
            }
            Ok(())
        }

        async fn tag_image(
            &self,
            _cancel: &CancellationToken,
            source: &str,
            repo: &str,
            tag: &str,
        ) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("tag {} {}:{}", source, repo, tag));
            self.existing
                .lock()
                .unwrap()
                .insert(format!("{}:{}", repo, tag));
            Ok(())
        }

        async fn remove_image(
            &self,
            _cancel: &CancellationToken,
            _reference: &str,
            _force: bool,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn template_config() -> CordonConfig {
        serde_yaml::from_str("version: 1\nproject: demo\nbuild:\n  image: debian:12\n").unwrap()
    }

    fn noop() -> impl FnMut(&str) + Send {
        |_line: &str| {}
    }

    #[tokio::test]
    async fn cache_miss_builds_with_both_tags() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::default();
        let cancel = CancellationToken::new();

        let ensured = ensure_image(
            &cancel,
            &engine,
            &template_config(),
            dir.path(),
            "0.3.1",
            EnsureImageOptions::default(),
            &mut noop(),
        )
        .await
        .unwrap();

        assert!(ensured.built);
        let digest = ensured.fingerprint.unwrap();
        let events = engine.events();
        assert!(events
            .iter()
            .any(|e| e.starts_with("build cordon/demo:latest,cordon/demo:") && e.contains(&digest)));
    }

    #[tokio::test]
    async fn cache_hit_only_repoints_alias() {
        let dir = TempDir::new().unwrap();
        let config = template_config();

        // Compute the digest the same way production does.
        let rendered = recipe::render(&config, dir.path()).unwrap();
        let digest = fingerprint(
            rendered.dockerfile.as_bytes(),
            &rendered.fingerprint_inputs(),
        );
        let hash_tag = hash_image_tag("demo", &digest);
        let engine = MockEngine::with_existing(&hash_tag);
        let cancel = CancellationToken::new();

        let ensured = ensure_image(
            &cancel,
            &engine,
            &config,
            dir.path(),
            "0.3.1",
            EnsureImageOptions::default(),
            &mut noop(),
        )
        .await
        .unwrap();

        assert!(!ensured.built);
        assert_eq!(ensured.fingerprint.as_deref(), Some(digest.as_str()));
        let events = engine.events();
        assert!(events.iter().any(|e| e == &format!("tag {} cordon/demo:latest", hash_tag)));
        assert!(!events.iter().any(|e| e.starts_with("build ")));

        // Both tags now resolve.
        assert!(engine.existing.lock().unwrap().contains("cordon/demo:latest"));
        assert!(engine.existing.lock().unwrap().contains(&hash_tag));
    }

    #[tokio::test]
    async fn force_build_dominates_cache_hit() {
        let dir = TempDir::new().unwrap();
        let config = template_config();
        let rendered = recipe::render(&config, dir.path()).unwrap();
        let digest = fingerprint(
            rendered.dockerfile.as_bytes(),
            &rendered.fingerprint_inputs(),
        );
        let engine = MockEngine::with_existing(&hash_image_tag("demo", &digest));
        let cancel = CancellationToken::new();

        let ensured = ensure_image(
            &cancel,
            &engine,
            &config,
            dir.path(),
            "0.3.1",
            EnsureImageOptions {
                force_build: true,
                ..Default::default()
            },
            &mut noop(),
        )
        .await
        .unwrap();

        assert!(ensured.built);
        assert!(engine.events().iter().any(|e| e.starts_with("build ")));
    }

    #[tokio::test]
    async fn user_recipe_bypasses_fingerprinting() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        let yaml = "version: 1\nproject: demo\nbuild:\n  dockerfile: Dockerfile\n";
        let config: CordonConfig = serde_yaml::from_str(yaml).unwrap();
        let engine = MockEngine::default();
        let cancel = CancellationToken::new();

        let ensured = ensure_image(
            &cancel,
            &engine,
            &config,
            dir.path(),
            "0.3.1",
            EnsureImageOptions::default(),
            &mut noop(),
        )
        .await
        .unwrap();

        assert!(ensured.built);
        assert_eq!(ensured.fingerprint, None);
        let events = engine.events();
        assert!(events.iter().any(|e| e == "build cordon/demo:latest recipe=Dockerfile"));
        assert!(!events.iter().any(|e| e.starts_with("exists ")));
    }
}
