//! Container spec assembly for agent sessions.

use crate::commands::{NETWORK_NAME, TOOL_VERSION};
use anyhow::{Context, Result};
use cordon_core::config::{parse_memory_bytes, CordonConfig};
use cordon_core::engine::{ContainerSpec, MountSpec, PortMapping};
use cordon_core::env as container_env;
use cordon_core::naming::{AgentIdentity, VolumeKind};
use cordon_core::recipe::{AGENT_HOME, AGENT_USER};
use cordon_core::variable::{substitute, substitute_map, SubstitutionContext};
use cordon_core::workspace::Workspace;
use std::path::Path;

/// Where the persistent volumes land inside the container.
const CONFIG_MOUNT: &str = "/home/agent/.config";
const HISTORY_MOUNT: &str = "/home/agent/.local/state";

/// Default interactive shell when neither the config nor `--shell` names one.
const DEFAULT_SHELL: &str = "/bin/bash";

pub(crate) struct PlanInputs<'a> {
    pub config: &'a CordonConfig,
    pub identity: &'a AgentIdentity,
    pub workspace: &'a Workspace,
    pub project_dir: &'a Path,
    pub image: &'a str,
    pub publish: Vec<PortMapping>,
    pub interactive: bool,
    /// Explicit command (from `run -- ...`); empty means shell.
    pub command: Vec<String>,
    /// `--shell` override.
    pub shell: Option<String>,
    /// Socket bridge configuration for the forwarder, when any socket is
    /// tunnelled.
    pub bridge_env: Option<String>,
}

pub(crate) fn container_spec(inputs: PlanInputs<'_>) -> Result<ContainerSpec> {
    let config = inputs.config;

    let mut mounts = inputs.workspace.mounts();
    mounts.push(MountSpec::volume(
        inputs.identity.volume_name(VolumeKind::Config),
        CONFIG_MOUNT,
    ));
    mounts.push(MountSpec::volume(
        inputs.identity.volume_name(VolumeKind::History),
        HISTORY_MOUNT,
    ));

    let substitution = SubstitutionContext::new(
        inputs.project_dir,
        &config.project,
        &inputs.identity.agent,
    );
    let agent_env = substitute_map(&config.agent.env, &substitution);

    let mut env = container_env::assemble(inputs.project_dir, &agent_env);
    if config.security.enable_firewall {
        env.push("CORDON_FIREWALL=1".to_string());
        if !config.security.allowed_domains.is_empty() {
            let domains: Vec<String> = config
                .security
                .allowed_domains
                .iter()
                .map(|d| substitute(d, &substitution))
                .collect();
            env.push(format!("CORDON_ALLOWED_DOMAINS={}", domains.join(",")));
        }
    }
    if let Some(bridge_env) = inputs.bridge_env {
        env.push(format!(
            "{}={}",
            cordon_core::bridge::SOCKETS_ENV,
            bridge_env
        ));
    }
    env.sort();

    let mut cap_add = config.security.cap_add.clone();
    if config.security.enable_firewall {
        // The firewall init script programs iptables from inside.
        for cap in ["NET_ADMIN", "NET_RAW"] {
            if !cap_add.iter().any(|c| c == cap) {
                cap_add.push(cap.to_string());
            }
        }
    }

    let command = resolve_command(config, inputs.command, inputs.shell, inputs.interactive)?;

    Ok(ContainerSpec {
        name: inputs.identity.container_name(),
        image: inputs.image.to_string(),
        cmd: command,
        env,
        mounts,
        cap_add,
        user: Some(AGENT_USER.to_string()),
        workdir: Some(config.workspace.remote_path.clone()),
        network: Some(NETWORK_NAME.to_string()),
        labels: inputs
            .identity
            .labels(TOOL_VERSION, &inputs.project_dir.to_string_lossy()),
        tty: inputs.interactive,
        open_stdin: inputs.interactive,
        ports: inputs.publish,
        memory_bytes: config
            .agent
            .memory
            .as_deref()
            .and_then(parse_memory_bytes),
    })
}

/// An explicit command or `--shell` override wins. Otherwise interactive
/// sessions get a login shell, while detached containers keep an empty
/// command vector so the entrypoint's keep-alive default fires.
fn resolve_command(
    config: &CordonConfig,
    command: Vec<String>,
    shell_override: Option<String>,
    interactive: bool,
) -> Result<Vec<String>> {
    if !command.is_empty() {
        return Ok(command);
    }
    if let Some(raw) = shell_override {
        return shell_words::split(&raw).context("invalid --shell value");
    }
    if !interactive {
        return Ok(Vec::new());
    }
    let shell = config
        .agent
        .shell
        .clone()
        .unwrap_or_else(|| DEFAULT_SHELL.to_string());
    Ok(vec![shell, "-l".to_string()])
}

/// Home directory inside the container, exposed for gpg socket paths.
pub(crate) fn agent_home() -> &'static str {
    AGENT_HOME
}
