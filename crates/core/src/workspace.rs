//! Workspace strategies
//!
//! The project workspace reaches the container one of two ways. In bind
//! mode the host directory is mounted read-write and the host stays the
//! source of truth. In snapshot mode the project is copied into a named
//! volume, filtered by `.cordonignore`, and the container works on the
//! isolated copy.
//!
//! Strategies are a capability set (name, prepare, mounts, cleanup,
//! preserve flag) selected by the typed [`WorkspaceMode`] enum rather than
//! an inheritance hierarchy.

use crate::config::IGNORE_FILE_NAME;
use crate::engine::{ContainerOps, ContainerSpec, MountSpec, VolumeOps};
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How the project workspace is exposed to the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    /// Live bind mount of the host project directory.
    #[default]
    Bind,
    /// Isolated copy in a named volume.
    Snapshot,
}

impl std::str::FromStr for WorkspaceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bind" => Ok(WorkspaceMode::Bind),
            "snapshot" => Ok(WorkspaceMode::Snapshot),
            other => Err(Error::ConfigInvalid {
                message: format!("unknown workspace mode {:?}: expected bind or snapshot", other),
            }),
        }
    }
}

impl std::fmt::Display for WorkspaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceMode::Bind => f.write_str("bind"),
            WorkspaceMode::Snapshot => f.write_str("snapshot"),
        }
    }
}

/// A selected workspace strategy for one session.
#[derive(Debug, Clone)]
pub enum Workspace {
    Bind(BindWorkspace),
    Snapshot(SnapshotWorkspace),
}

/// Bind-mode strategy: the host directory is the workspace.
#[derive(Debug, Clone)]
pub struct BindWorkspace {
    host_dir: PathBuf,
    remote_path: String,
}

/// Snapshot-mode strategy: a volume seeded from the host directory.
#[derive(Debug, Clone)]
pub struct SnapshotWorkspace {
    project_dir: PathBuf,
    volume: String,
    remote_path: String,
    /// Image used for the short-lived copy helper container.
    image: String,
    labels: HashMap<String, String>,
}

impl Workspace {
    /// Select a strategy for the given mode.
    pub fn select(
        mode: WorkspaceMode,
        project_dir: &Path,
        remote_path: &str,
        volume: String,
        image: String,
        labels: HashMap<String, String>,
    ) -> Self {
        match mode {
            WorkspaceMode::Bind => Workspace::Bind(BindWorkspace {
                host_dir: project_dir.to_path_buf(),
                remote_path: remote_path.to_string(),
            }),
            WorkspaceMode::Snapshot => Workspace::Snapshot(SnapshotWorkspace {
                project_dir: project_dir.to_path_buf(),
                volume,
                remote_path: remote_path.to_string(),
                image,
                labels,
            }),
        }
    }

    pub fn mode(&self) -> WorkspaceMode {
        match self {
            Workspace::Bind(_) => WorkspaceMode::Bind,
            Workspace::Snapshot(_) => WorkspaceMode::Snapshot,
        }
    }

    /// Whether the host directory remains the source of truth.
    pub fn preserves_host(&self) -> bool {
        matches!(self, Workspace::Bind(_))
    }

    /// Mounts contributed to the container spec.
    pub fn mounts(&self) -> Vec<MountSpec> {
        match self {
            Workspace::Bind(bind) => vec![MountSpec::bind(
                bind.host_dir.to_string_lossy().into_owned(),
                bind.remote_path.clone(),
            )],
            Workspace::Snapshot(snapshot) => vec![MountSpec::volume(
                snapshot.volume.clone(),
                snapshot.remote_path.clone(),
            )],
        }
    }

    /// Mode-specific preparation before container creation.
    ///
    /// Bind mode needs nothing. Snapshot mode ensures the volume exists and
    /// seeds it from the host on first creation; an existing volume is left
    /// untouched so container restarts keep their isolated state.
    pub async fn prepare<E: VolumeOps + ContainerOps>(
        &self,
        cancel: &CancellationToken,
        engine: &E,
    ) -> Result<()> {
        match self {
            Workspace::Bind(_) => Ok(()),
            Workspace::Snapshot(snapshot) => snapshot.prepare(cancel, engine).await,
        }
    }

    /// Mode-specific cleanup after a session ends. `clean` reflects the
    /// `--clean` flag.
    pub async fn cleanup<E: VolumeOps>(
        &self,
        cancel: &CancellationToken,
        engine: &E,
        clean: bool,
    ) -> Result<()> {
        match self {
            Workspace::Bind(_) => Ok(()),
            Workspace::Snapshot(snapshot) => {
                if clean {
                    info!(volume = %snapshot.volume, "removing workspace volume");
                    engine.remove_volume(cancel, &snapshot.volume).await?;
                }
                Ok(())
            }
        }
    }
}

impl SnapshotWorkspace {
    #[instrument(skip_all, fields(volume = %self.volume))]
    async fn prepare<E: VolumeOps + ContainerOps>(
        &self,
        cancel: &CancellationToken,
        engine: &E,
    ) -> Result<()> {
        if engine.volume_exists(cancel, &self.volume).await? {
            debug!("workspace volume already populated");
            return Ok(());
        }

        engine
            .create_volume(cancel, &self.volume, self.labels.clone())
            .await?;

        let archive = snapshot_archive(&self.project_dir)?;
        match self.populate(cancel, engine, archive.clone()).await {
            Ok(()) => Ok(()),
            Err(first) => {
                // One retry covers transient daemon hiccups during the copy.
                warn!(error = %first, "workspace copy failed; retrying once");
                self.populate(cancel, engine, archive).await
            }
        }
    }

    /// Seed the volume through a short-lived helper container. The helper is
    /// created but never started; the archive endpoint works on created
    /// containers.
    async fn populate<E: ContainerOps>(
        &self,
        cancel: &CancellationToken,
        engine: &E,
        archive: Vec<u8>,
    ) -> Result<()> {
        let helper_name = format!("{}-copy", self.volume);
        let spec = ContainerSpec {
            name: helper_name.clone(),
            image: self.image.clone(),
            cmd: vec!["true".to_string()],
            mounts: vec![MountSpec::volume(
                self.volume.clone(),
                self.remote_path.clone(),
            )],
            labels: self.labels.clone(),
            ..Default::default()
        };

        engine.create_container(cancel, &spec).await?;
        let upload = engine
            .upload_archive(cancel, &helper_name, &self.remote_path, archive)
            .await;
        let removal = engine.remove_container(cancel, &helper_name, true).await;
        upload?;
        removal
    }
}

/// Archive the project directory for a snapshot copy, honouring
/// `.cordonignore` patterns (gitignore syntax).
pub fn snapshot_archive(project_dir: &Path) -> Result<Vec<u8>> {
    let mut walker = ignore::WalkBuilder::new(project_dir);
    walker
        .standard_filters(false)
        .hidden(false)
        .add_custom_ignore_filename(IGNORE_FILE_NAME);

    let mut builder = tar::Builder::new(Vec::new());
    for entry in walker.build() {
        let entry = entry.map_err(|e| copy_error("walking project directory", e))?;
        let path = entry.path();
        if path == project_dir || !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let relative = path
            .strip_prefix(project_dir)
            .expect("walker yields paths under its root");
        builder
            .append_path_with_name(path, relative)
            .map_err(|e| copy_error("archiving project directory", e))?;
    }
    builder
        .into_inner()
        .map_err(|e| copy_error("finalizing project archive", e))
}

fn copy_error(message: &str, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::VolumeCopyFailed {
        message: message.to_string(),
        source: Some(Box::new(source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AttachedIo, ByteStream, ContainerSummary};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn mode_parsing() {
        assert_eq!("bind".parse::<WorkspaceMode>().unwrap(), WorkspaceMode::Bind);
        assert_eq!(
            "snapshot".parse::<WorkspaceMode>().unwrap(),
            WorkspaceMode::Snapshot
        );
        assert!("network".parse::<WorkspaceMode>().is_err());
    }

    #[test]
    fn bind_strategy_is_inert() {
        let workspace = Workspace::select(
            WorkspaceMode::Bind,
            Path::new("/home/dev/proj"),
            "/workspace",
            "unused".into(),
            "unused".into(),
            HashMap::new(),
        );
        assert!(workspace.preserves_host());
        let mounts = workspace.mounts();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0], MountSpec::bind("/home/dev/proj", "/workspace"));
    }

    #[test]
    fn snapshot_archive_honours_ignore_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(IGNORE_FILE_NAME), "target/\n*.log\n").unwrap();
        std::fs::write(dir.path().join("kept.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("noise.log"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("target/debug/bin"), "x").unwrap();

        let bytes = snapshot_archive(dir.path()).unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let entries: HashSet<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();

        assert!(entries.contains("kept.rs"));
        assert!(entries.contains(IGNORE_FILE_NAME));
        assert!(!entries.contains("noise.log"));
        assert!(!entries.iter().any(|e| e.starts_with("target")));
    }

    /// Mock recording volume and helper-container traffic.
    #[derive(Default)]
    struct MockEngine {
        volumes: Mutex<HashSet<String>>,
        events: Mutex<Vec<String>>,
        fail_first_upload: Mutex<bool>,
    }

    impl MockEngine {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl VolumeOps for MockEngine {
        async fn volume_exists(&self, _c: &CancellationToken, name: &str) -> Result<bool> {
            Ok(self.volumes.lock().unwrap().contains(name))
        }

        async fn create_volume(
            &self,
            _c: &CancellationToken,
            name: &str,
            _labels: HashMap<String, String>,
        ) -> Result<()> {
            self.volumes.lock().unwrap().insert(name.to_string());
            self.events.lock().unwrap().push(format!("volume {}", name));
            Ok(())
        }

        async fn list_volumes(
            &self,
            _c: &CancellationToken,
            _labels: &HashMap<String, String>,
        ) -> Result<Vec<String>> {
            let mut names: Vec<String> = self.volumes.lock().unwrap().iter().cloned().collect();
            names.sort();
            Ok(names)
        }

        async fn remove_volume(&self, _c: &CancellationToken, name: &str) -> Result<()> {
            self.volumes.lock().unwrap().remove(name);
            self.events.lock().unwrap().push(format!("rm-volume {}", name));
            Ok(())
        }
    }

    impl ContainerOps for MockEngine {
        async fn find_container(
            &self,
            _c: &CancellationToken,
            _name: &str,
        ) -> Result<Option<ContainerSummary>> {
            Ok(None)
        }

        async fn list_by_labels(
            &self,
            _c: &CancellationToken,
            _labels: &HashMap<String, String>,
        ) -> Result<Vec<ContainerSummary>> {
            Ok(Vec::new())
        }

        async fn create_container(
            &self,
            _c: &CancellationToken,
            spec: &ContainerSpec,
        ) -> Result<String> {
            self.events
                .lock()
                .unwrap()
                .push(format!("create {}", spec.name));
            Ok("helper-id".into())
        }

        async fn start_container(&self, _c: &CancellationToken, _name: &str) -> Result<()> {
            unreachable!("the copy helper must never be started")
        }

        async fn stop_container(
            &self,
            _c: &CancellationToken,
            _name: &str,
            _timeout: i64,
        ) -> Result<()> {
            Ok(())
        }

        async fn remove_container(
            &self,
            _c: &CancellationToken,
            name: &str,
            _force: bool,
        ) -> Result<()> {
            self.events.lock().unwrap().push(format!("remove {}", name));
            Ok(())
        }

        async fn wait_container(&self, _c: &CancellationToken, _name: &str) -> Result<i64> {
            Ok(0)
        }

        async fn attach_container(
            &self,
            _c: &CancellationToken,
            _name: &str,
        ) -> Result<AttachedIo> {
            unreachable!("not exercised")
        }

        async fn resize_container(
            &self,
            _c: &CancellationToken,
            _name: &str,
            _rows: u16,
            _cols: u16,
        ) -> Result<()> {
            Ok(())
        }

        async fn container_logs(
            &self,
            _c: &CancellationToken,
            _name: &str,
            _follow: bool,
            _tail: Option<u32>,
        ) -> Result<ByteStream> {
            unreachable!("not exercised")
        }

        async fn upload_archive(
            &self,
            _c: &CancellationToken,
            name: &str,
            path: &str,
            _archive: Vec<u8>,
        ) -> Result<()> {
            let mut fail = self.fail_first_upload.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(Error::VolumeCopyFailed {
                    message: "transient".into(),
                    source: None,
                });
            }
            self.events
                .lock()
                .unwrap()
                .push(format!("upload {} {}", name, path));
            Ok(())
        }
    }

    fn snapshot_fixture(dir: &TempDir) -> Workspace {
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        Workspace::select(
            WorkspaceMode::Snapshot,
            dir.path(),
            "/workspace",
            "cordon.demo.alpha-workspace".into(),
            "cordon/demo:latest".into(),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn snapshot_prepare_seeds_fresh_volume() {
        let dir = TempDir::new().unwrap();
        let workspace = snapshot_fixture(&dir);
        let engine = MockEngine::default();
        let cancel = CancellationToken::new();

        workspace.prepare(&cancel, &engine).await.unwrap();

        let events = engine.events();
        assert_eq!(
            events,
            vec![
                "volume cordon.demo.alpha-workspace",
                "create cordon.demo.alpha-workspace-copy",
                "upload cordon.demo.alpha-workspace-copy /workspace",
                "remove cordon.demo.alpha-workspace-copy",
            ]
        );
    }

    #[tokio::test]
    async fn snapshot_prepare_leaves_existing_volume_alone() {
        let dir = TempDir::new().unwrap();
        let workspace = snapshot_fixture(&dir);
        let engine = MockEngine::default();
        engine
            .volumes
            .lock()
            .unwrap()
            .insert("cordon.demo.alpha-workspace".to_string());
        let cancel = CancellationToken::new();

        workspace.prepare(&cancel, &engine).await.unwrap();
        assert!(engine.events().is_empty());
    }

    #[tokio::test]
    async fn snapshot_copy_retries_once() {
        let dir = TempDir::new().unwrap();
        let workspace = snapshot_fixture(&dir);
        let engine = MockEngine::default();
        *engine.fail_first_upload.lock().unwrap() = true;
        let cancel = CancellationToken::new();

        workspace.prepare(&cancel, &engine).await.unwrap();
        let events = engine.events();
        // Two helper creations, one successful upload.
        assert_eq!(
            events.iter().filter(|e| e.starts_with("create ")).count(),
            2
        );
        assert_eq!(
            events.iter().filter(|e| e.starts_with("upload ")).count(),
            1
        );
    }

    #[tokio::test]
    async fn cleanup_removes_volume_only_when_clean() {
        let dir = TempDir::new().unwrap();
        let workspace = snapshot_fixture(&dir);
        let engine = MockEngine::default();
        let cancel = CancellationToken::new();

        workspace.cleanup(&cancel, &engine, false).await.unwrap();
        assert!(engine.events().is_empty());

        workspace.cleanup(&cancel, &engine, true).await.unwrap();
        assert_eq!(engine.events(), vec!["rm-volume cordon.demo.alpha-workspace"]);
    }
}
