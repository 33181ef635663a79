//! Project configuration loading and validation
//!
//! A project is described by a `cordon.yaml` file in its root directory. The
//! configuration identifies the project by a stable slug and carries the image
//! build inputs, the agent environment, workspace paths, and the security
//! profile. The loaded value is immutable for the duration of a run.
//!
//! Absence of the file is a distinct error ([`ErrorKind::ConfigNotFound`])
//! with a defined recovery path (`cordon init`); any parse or validation
//! problem maps to [`ErrorKind::ConfigInvalid`].
//!
//! [`ErrorKind::ConfigNotFound`]: crate::errors::ErrorKind::ConfigNotFound
//! [`ErrorKind::ConfigInvalid`]: crate::errors::ErrorKind::ConfigInvalid

use crate::errors::{Error, Result};
use crate::workspace::WorkspaceMode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Conventional configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "cordon.yaml";

/// Conventional ignore file consumed in snapshot mode.
pub const IGNORE_FILE_NAME: &str = ".cordonignore";

/// Current configuration schema version.
pub const CONFIG_VERSION: u32 = 1;

/// Top-level project configuration parsed from `cordon.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CordonConfig {
    /// Schema version; currently always 1.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Stable project slug; namespaces containers, volumes and image tags.
    pub project: String,
    /// Image build inputs.
    #[serde(default)]
    pub build: BuildConfig,
    /// Agent process environment.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Workspace paths and default mode.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Security profile.
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

/// Image build inputs: either a base image to extend via the built-in recipe
/// template, or a user-supplied Dockerfile with its build context.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Base image reference for the template path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Path to a user-supplied Dockerfile, relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<PathBuf>,
    /// Build context directory for a user-supplied Dockerfile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PathBuf>,
    /// Additional OS packages installed into the image, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    /// Build arguments forwarded to the daemon.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub build_args: IndexMap<String, String>,
}

/// Agent process configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Files copied into the agent home at image build time. These are the
    /// include files hashed into the image fingerprint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<PathBuf>,
    /// Environment passed to the agent process; wins over host passthrough.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Container memory limit, e.g. `2g` or `512m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Login shell used by `cordon shell`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// Workspace mount configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Mount point of the project inside the container.
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    /// Workspace mode used when no `--mode` flag is given.
    #[serde(default)]
    pub default_mode: WorkspaceMode,
}

fn default_remote_path() -> String {
    "/workspace".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            remote_path: default_remote_path(),
            default_mode: WorkspaceMode::default(),
        }
    }
}

/// Security profile applied to the container.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    /// Install and initialise the egress firewall inside the container.
    #[serde(default = "default_true")]
    pub enable_firewall: bool,
    /// Tunnel the host Docker socket into the container over the bridge.
    #[serde(default)]
    pub docker_socket: bool,
    /// Domains the firewall allows outbound connections to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,
    /// Extra Linux capabilities granted to the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_firewall: true,
            docker_socket: false,
            allowed_domains: Vec::new(),
            cap_add: Vec::new(),
        }
    }
}

impl CordonConfig {
    /// Load and validate the configuration from a project directory.
    #[instrument]
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Err(Error::ConfigNotFound {
                path: project_dir.display().to_string(),
            });
        }
        Self::load_from_path(&path)
    }

    /// Load and validate the configuration from an explicit file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::ConfigInvalid {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let config: CordonConfig =
            serde_yaml::from_str(&raw).map_err(|e| Error::ConfigInvalid {
                message: format!("{}: {}", path.display(), e),
            })?;
        config.validate()?;
        debug!(project = %config.project, "loaded configuration");
        Ok(config)
    }

    /// Validate invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(invalid(format!(
                "unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }
        validate_project_slug(&self.project)?;
        match (&self.build.image, &self.build.dockerfile) {
            (None, None) => {
                return Err(invalid(
                    "build must set exactly one of `image` or `dockerfile`".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "build.image and build.dockerfile are mutually exclusive".to_string(),
                ))
            }
            _ => {}
        }
        if self.build.context.is_some() && self.build.dockerfile.is_none() {
            return Err(invalid(
                "build.context requires build.dockerfile".to_string(),
            ));
        }
        if let Some(memory) = &self.agent.memory {
            validate_memory_limit(memory)?;
        }
        if !self.workspace.remote_path.starts_with('/') {
            return Err(invalid(format!(
                "workspace.remote_path must be absolute, got {}",
                self.workspace.remote_path
            )));
        }
        Ok(())
    }

    /// Whether the build path is a user-supplied Dockerfile.
    pub fn uses_user_dockerfile(&self) -> bool {
        self.build.dockerfile.is_some()
    }

    /// Build context directory, defaulting to the project root.
    pub fn build_context_dir(&self, project_dir: &Path) -> PathBuf {
        match &self.build.context {
            Some(context) => project_dir.join(context),
            None => project_dir.to_path_buf(),
        }
    }
}

fn invalid(message: String) -> Error {
    Error::ConfigInvalid { message }
}

/// Validate a project slug: lowercase alphanumerics, `-` and `_`, starting
/// with an alphanumeric. The slug flows into container names, volume names
/// and image tags, so the grammar is the intersection of what those accept.
pub fn validate_project_slug(slug: &str) -> Result<()> {
    let mut chars = slug.chars();
    let valid_head = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false);
    let valid_tail =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid_head || !valid_tail {
        return Err(invalid(format!(
            "invalid project slug {:?}: use lowercase letters, digits, `-` and `_`",
            slug
        )));
    }
    Ok(())
}

fn validate_memory_limit(memory: &str) -> Result<()> {
    let valid = memory.len() >= 2
        && memory.ends_with(['b', 'k', 'm', 'g'])
        && memory[..memory.len() - 1].chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(invalid(format!(
            "invalid agent.memory {:?}: expected e.g. `512m` or `2g`",
            memory
        )));
    }
    Ok(())
}

/// Parse an `agent.memory` limit into bytes for the daemon.
pub fn parse_memory_bytes(memory: &str) -> Option<i64> {
    let (digits, multiplier) = match memory.as_bytes().last()? {
        b'b' => (&memory[..memory.len() - 1], 1),
        b'k' => (&memory[..memory.len() - 1], 1024),
        b'm' => (&memory[..memory.len() - 1], 1024 * 1024),
        b'g' => (&memory[..memory.len() - 1], 1024 * 1024 * 1024),
        _ => (memory, 1),
    };
    digits.parse::<i64>().ok().map(|n| n * multiplier)
}

/// Commented starter configuration written by `cordon init`.
pub fn starter_config(project: &str) -> String {
    format!(
        r#"# cordon project configuration
version: 1
project: {project}

build:
  # Base image the agent runs on. Mutually exclusive with `dockerfile`.
  image: debian:bookworm-slim
  # Extra OS packages installed into the image.
  packages: []
  # Or bring your own recipe:
  # dockerfile: ./Dockerfile
  # context: .

agent:
  # Files copied into the agent home at build time (prompt memory, settings).
  includes: []
  env: {{}}
  # memory: 2g
  # shell: /bin/bash

workspace:
  remote_path: /workspace
  # bind: mount the project directory; snapshot: copy into an isolated volume.
  default_mode: bind

security:
  enable_firewall: true
  docker_socket: false
  allowed_domains: []
  cap_add: []
"#
    )
}

/// Starter ignore file written by `cordon init`.
pub fn starter_ignore() -> &'static str {
    "# Paths excluded from snapshot-mode workspace copies (gitignore syntax).\n\
     .git/\n\
     target/\n\
     node_modules/\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn minimal_yaml() -> &'static str {
        "version: 1\nproject: demo\nbuild:\n  image: debian:bookworm-slim\n"
    }

    #[test]
    fn parses_minimal_config() {
        let config: CordonConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.project, "demo");
        assert_eq!(config.workspace.remote_path, "/workspace");
        assert_eq!(config.workspace.default_mode, WorkspaceMode::Bind);
        assert!(config.security.enable_firewall);
        assert!(!config.uses_user_dockerfile());
    }

    #[test]
    fn starter_config_round_trips() {
        let config: CordonConfig = serde_yaml::from_str(&starter_config("myproj")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.project, "myproj");
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = CordonConfig::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigNotFound);
    }

    #[test]
    fn image_and_dockerfile_are_exclusive() {
        let yaml = "version: 1\nproject: demo\nbuild:\n  image: debian\n  dockerfile: ./Dockerfile\n";
        let config: CordonConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn build_source_is_required() {
        let yaml = "version: 1\nproject: demo\n";
        let config: CordonConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_slugs() {
        assert!(validate_project_slug("Demo").is_err());
        assert!(validate_project_slug("-demo").is_err());
        assert!(validate_project_slug("").is_err());
        assert!(validate_project_slug("demo-1_x").is_ok());
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "version: 1\nproject: demo\nbuilds:\n  image: debian\n";
        assert!(serde_yaml::from_str::<CordonConfig>(yaml).is_err());
    }

    #[test]
    fn memory_limits_parse() {
        assert_eq!(parse_memory_bytes("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("512m"), Some(512 * 1024 * 1024));
        let yaml = "version: 1\nproject: demo\nbuild:\n  image: debian\nagent:\n  memory: lots\n";
        let config: CordonConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn remote_path_must_be_absolute() {
        let yaml =
            "version: 1\nproject: demo\nbuild:\n  image: debian\nworkspace:\n  remote_path: work\n";
        let config: CordonConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
