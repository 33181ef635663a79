//! Build recipe generation and context assembly
//!
//! The recipe generator turns a project configuration into the two artifacts
//! the image builder needs: the rendered Dockerfile bytes and a tar build
//! context carrying the Dockerfile, the sidecar scripts it references, and
//! the agent include files.
//!
//! The template detects the base image family (Debian-like vs Alpine-like)
//! and emits the matching package-manager and user-creation idioms. Firewall
//! tooling is installed, and the firewall init script shipped, only when the
//! security profile enables it.
//!
//! A user-supplied Dockerfile bypasses template rendering entirely: the
//! generator tars the user's build-context directory, skipping
//! version-control metadata directories.

use crate::config::CordonConfig;
use crate::errors::{Error, Result};
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

/// Recipe file name inside the build context.
pub const RECIPE_FILE: &str = "Dockerfile";

/// In-container user the agent runs as.
pub const AGENT_USER: &str = "agent";
/// Home directory of the agent user.
pub const AGENT_HOME: &str = "/home/agent";

const ENTRYPOINT_SCRIPT: &str = include_str!("scripts/entrypoint.sh");
const FIREWALL_SCRIPT: &str = include_str!("scripts/init-firewall.sh");

/// Base image family, detected from the image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseFamily {
    Debian,
    Alpine,
}

impl BaseFamily {
    /// Detect the family from an image reference. Anything that does not
    /// look Alpine-like is treated as Debian-like.
    pub fn detect(image: &str) -> Self {
        let reference = image.to_ascii_lowercase();
        if reference.contains("alpine") {
            BaseFamily::Alpine
        } else {
            BaseFamily::Debian
        }
    }
}

/// An include file referenced by the recipe: the name as declared in the
/// configuration plus the resolved host path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    /// Path string exactly as written in `agent.includes`.
    pub declared: String,
    /// Host path resolved against the project directory.
    pub path: PathBuf,
}

impl Include {
    /// Flat name used for the tar entry and the in-image destination.
    /// Declared paths may contain separators; those flatten to `_`.
    pub fn flat_name(&self) -> String {
        self.declared
            .trim_start_matches("./")
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect()
    }
}

/// A rendered recipe: the Dockerfile bytes plus the includes it references.
#[derive(Debug, Clone)]
pub struct RenderedRecipe {
    pub dockerfile: String,
    pub includes: Vec<Include>,
    firewall: bool,
}

impl RenderedRecipe {
    /// Include list in the `(declared name, path)` shape the fingerprint
    /// function consumes.
    pub fn fingerprint_inputs(&self) -> Vec<(String, PathBuf)> {
        self.includes
            .iter()
            .map(|i| (i.declared.clone(), i.path.clone()))
            .collect()
    }
}

/// Render the built-in recipe template for a project configuration.
///
/// Include files that do not exist on disk are declared (and therefore
/// fingerprinted) but omitted from the COPY list, so rendering never fails
/// on a missing include.
#[instrument(skip(config))]
pub fn render(config: &CordonConfig, project_dir: &Path) -> Result<RenderedRecipe> {
    let image = config.build.image.as_deref().ok_or_else(|| {
        Error::ConfigInvalid {
            message: "recipe rendering requires build.image".to_string(),
        }
    })?;
    let family = BaseFamily::detect(image);
    let firewall = config.security.enable_firewall;

    let includes: Vec<Include> = config
        .agent
        .includes
        .iter()
        .map(|declared| Include {
            declared: declared.to_string_lossy().into_owned(),
            path: project_dir.join(declared),
        })
        .collect();

    let mut out = String::new();
    out.push_str("# generated by cordon; do not edit\n");
    for (key, value) in &config.build.build_args {
        out.push_str(&format!("ARG {}={}\n", key, value));
    }
    out.push_str(&format!("FROM {}\n\n", image));

    out.push_str(&package_install_block(family, &config.build.packages, firewall));
    out.push_str(&user_creation_block(family));

    out.push_str(
        "\nCOPY entrypoint.sh /usr/local/bin/cordon-entrypoint\n\
         RUN chmod 0755 /usr/local/bin/cordon-entrypoint\n",
    );
    if firewall {
        out.push_str(
            "COPY init-firewall.sh /usr/local/bin/cordon-init-firewall\n\
             RUN chmod 0755 /usr/local/bin/cordon-init-firewall \\\n \
                && echo 'agent ALL=(root) NOPASSWD: /usr/local/bin/cordon-init-firewall' \
                > /etc/sudoers.d/cordon-firewall\n",
        );
    }

    let mut copied_any = false;
    for include in &includes {
        if include.path.exists() {
            out.push_str(&format!(
                "COPY includes/{name} {home}/{name}\n",
                name = include.flat_name(),
                home = AGENT_HOME
            ));
            copied_any = true;
        } else {
            warn!(include = %include.declared, "include file missing; skipping COPY");
        }
    }
    if copied_any {
        out.push_str(&format!(
            "RUN chown -R {user}:{user} {home}\n",
            user = AGENT_USER,
            home = AGENT_HOME
        ));
    }

    out.push_str(&format!(
        "\nUSER {}\nWORKDIR /workspace\nENTRYPOINT [\"/usr/local/bin/cordon-entrypoint\"]\n",
        AGENT_USER
    ));

    debug!(family = ?family, includes = includes.len(), "rendered recipe");
    Ok(RenderedRecipe {
        dockerfile: out,
        includes,
        firewall,
    })
}

fn package_install_block(family: BaseFamily, packages: &[String], firewall: bool) -> String {
    let mut wanted: Vec<&str> = vec!["ca-certificates", "curl", "git", "sudo"];
    if firewall {
        wanted.extend(["iptables", "ipset"]);
    }
    wanted.extend(packages.iter().map(String::as_str));

    match family {
        BaseFamily::Debian => format!(
            "RUN apt-get update \\\n \
                && apt-get install -y --no-install-recommends {} \\\n \
                && rm -rf /var/lib/apt/lists/*\n",
            wanted.join(" ")
        ),
        BaseFamily::Alpine => format!("RUN apk add --no-cache {}\n", wanted.join(" ")),
    }
}

fn user_creation_block(family: BaseFamily) -> String {
    match family {
        BaseFamily::Debian => format!(
            "RUN useradd --create-home --shell /bin/bash --uid 1000 {}\n",
            AGENT_USER
        ),
        BaseFamily::Alpine => format!("RUN adduser -D -s /bin/sh -u 1000 {}\n", AGENT_USER),
    }
}

/// Assemble the tar build context for a rendered recipe: the Dockerfile, the
/// sidecar scripts, and every include file that exists.
#[instrument(skip(recipe))]
pub fn build_context(recipe: &RenderedRecipe) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    append_bytes(&mut builder, RECIPE_FILE, recipe.dockerfile.as_bytes(), 0o644)?;
    append_bytes(&mut builder, "entrypoint.sh", ENTRYPOINT_SCRIPT.as_bytes(), 0o755)?;
    if recipe.firewall {
        append_bytes(
            &mut builder,
            "init-firewall.sh",
            FIREWALL_SCRIPT.as_bytes(),
            0o755,
        )?;
    }

    for include in &recipe.includes {
        match std::fs::read(&include.path) {
            Ok(content) => {
                let entry = format!("includes/{}", include.flat_name());
                append_bytes(&mut builder, &entry, &content, 0o644)?;
            }
            Err(_) => {
                // Rendering already skipped the COPY line.
                warn!(include = %include.declared, "include file missing; omitted from context");
            }
        }
    }

    builder
        .into_inner()
        .map_err(|e| context_error("finalizing build context", e))
}

/// Tar a user-supplied build context directory, skipping version-control
/// metadata. When the Dockerfile lives outside the context directory its
/// bytes are injected at the tar root under the conventional name.
///
/// Returns the tar bytes and the recipe name to pass to the daemon.
#[instrument]
pub fn user_build_context(context_dir: &Path, dockerfile: &Path) -> Result<(Vec<u8>, String)> {
    const VCS_DIRS: [&str; 3] = [".git", ".hg", ".svn"];

    let mut builder = Builder::new(Vec::new());
    for entry in WalkDir::new(context_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && VCS_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        })
    {
        let entry = entry.map_err(|e| context_error("walking build context", e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(context_dir)
            .expect("walkdir yields paths under its root");
        builder
            .append_path_with_name(entry.path(), relative)
            .map_err(|e| context_error("archiving build context", e))?;
    }

    let recipe_name = match dockerfile.strip_prefix(context_dir) {
        Ok(relative) => relative.to_string_lossy().into_owned(),
        Err(_) => {
            let content =
                std::fs::read(dockerfile).map_err(|e| context_error("reading Dockerfile", e))?;
            append_bytes(&mut builder, RECIPE_FILE, &content, 0o644)?;
            RECIPE_FILE.to_string()
        }
    };

    let bytes = builder
        .into_inner()
        .map_err(|e| context_error("finalizing build context", e))?;
    Ok((bytes, recipe_name))
}

fn append_bytes(
    builder: &mut Builder<Vec<u8>>,
    name: &str,
    content: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, name, content)
        .map_err(|e| context_error("archiving build context", e))
}

fn context_error(
    message: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> Error {
    Error::ImageBuildFailed {
        message: message.to_string(),
        source: Some(Box::new(source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CordonConfig;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn config_with(image: &str, firewall: bool) -> CordonConfig {
        let yaml = format!(
            "version: 1\nproject: demo\nbuild:\n  image: {image}\nsecurity:\n  enable_firewall: {firewall}\n"
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn tar_entries(bytes: &[u8]) -> HashSet<String> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn detects_base_family() {
        assert_eq!(BaseFamily::detect("debian:bookworm-slim"), BaseFamily::Debian);
        assert_eq!(BaseFamily::detect("ubuntu:24.04"), BaseFamily::Debian);
        assert_eq!(BaseFamily::detect("alpine:3.20"), BaseFamily::Alpine);
        assert_eq!(BaseFamily::detect("rust:1-alpine"), BaseFamily::Alpine);
    }

    #[test]
    fn debian_template_uses_apt_and_useradd() {
        let dir = TempDir::new().unwrap();
        let recipe = render(&config_with("debian:bookworm-slim", true), dir.path()).unwrap();
        assert!(recipe.dockerfile.contains("apt-get install"));
        assert!(recipe.dockerfile.contains("useradd"));
        assert!(recipe.dockerfile.contains("iptables"));
        assert!(recipe.dockerfile.contains("cordon-init-firewall"));
    }

    #[test]
    fn alpine_template_uses_apk_and_adduser() {
        let dir = TempDir::new().unwrap();
        let recipe = render(&config_with("alpine:3.20", false), dir.path()).unwrap();
        assert!(recipe.dockerfile.contains("apk add --no-cache"));
        assert!(recipe.dockerfile.contains("adduser -D"));
        assert!(!recipe.dockerfile.contains("iptables"));
        assert!(!recipe.dockerfile.contains("init-firewall"));
    }

    #[test]
    fn firewall_script_shipped_only_when_enabled() {
        let dir = TempDir::new().unwrap();
        let enabled = render(&config_with("debian:12", true), dir.path()).unwrap();
        let entries = tar_entries(&build_context(&enabled).unwrap());
        assert!(entries.contains("init-firewall.sh"));
        assert!(entries.contains("entrypoint.sh"));
        assert!(entries.contains(RECIPE_FILE));

        let disabled = render(&config_with("debian:12", false), dir.path()).unwrap();
        let entries = tar_entries(&build_context(&disabled).unwrap());
        assert!(!entries.contains("init-firewall.sh"));
    }

    #[test]
    fn includes_are_copied_and_missing_ones_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("memory.md"), "context").unwrap();
        let yaml = "version: 1\nproject: demo\nbuild:\n  image: debian:12\nagent:\n  includes: [memory.md, absent.md]\n";
        let config: CordonConfig = serde_yaml::from_str(yaml).unwrap();
        let recipe = render(&config, dir.path()).unwrap();

        assert!(recipe.dockerfile.contains("COPY includes/memory.md"));
        assert!(!recipe.dockerfile.contains("absent.md\n"));
        // Both are still declared for fingerprinting.
        assert_eq!(recipe.fingerprint_inputs().len(), 2);

        let entries = tar_entries(&build_context(&recipe).unwrap());
        assert!(entries.contains("includes/memory.md"));
        assert!(!entries.iter().any(|e| e.contains("absent")));
    }

    #[test]
    fn nested_include_names_flatten() {
        let include = Include {
            declared: "./prompts/system.md".to_string(),
            path: PathBuf::from("/tmp/prompts/system.md"),
        };
        assert_eq!(include.flat_name(), "prompts_system.md");
    }

    #[test]
    fn user_context_skips_vcs_metadata() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        std::fs::write(dir.path().join("app.py"), "print()").unwrap();

        let (bytes, recipe_name) =
            user_build_context(dir.path(), &dir.path().join("Dockerfile")).unwrap();
        let entries = tar_entries(&bytes);
        assert_eq!(recipe_name, "Dockerfile");
        assert!(entries.contains("Dockerfile"));
        assert!(entries.contains("app.py"));
        assert!(!entries.iter().any(|e| e.starts_with(".git")));
    }

    #[test]
    fn out_of_context_dockerfile_is_injected() {
        let dir = TempDir::new().unwrap();
        let context = dir.path().join("ctx");
        std::fs::create_dir_all(&context).unwrap();
        std::fs::write(context.join("app.py"), "print()").unwrap();
        let dockerfile = dir.path().join("Dockerfile.agent");
        std::fs::write(&dockerfile, "FROM scratch").unwrap();

        let (bytes, recipe_name) = user_build_context(&context, &dockerfile).unwrap();
        assert_eq!(recipe_name, RECIPE_FILE);
        assert!(tar_entries(&bytes).contains(RECIPE_FILE));
    }
}
