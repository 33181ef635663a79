//! Start command: bring up an agent container and, unless detached, stream
//! an interactive session into it.
//!
//! ## Module organisation
//!
//! - `plan` - container spec assembly (mounts, environment, labels)
//! - `session` - interactive attach/stream/wait loop and the socket bridge
//!
//! The `run` command reuses everything here through [`SessionRequest`].

pub(crate) mod plan;
pub(crate) mod session;

use super::{connect, load_config, NETWORK_NAME, TOOL_VERSION};
use anyhow::Result;
use cordon_core::engine::{ContainerOps, PortMapping, VolumeOps};
use cordon_core::image::{ensure_image, EnsureImageOptions};
use cordon_core::lifecycle::{find_or_create, remove_agent};
use cordon_core::naming::{project_labels, AgentIdentity, VolumeKind};
use cordon_core::workspace::{Workspace, WorkspaceMode};
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(clap::Args, Debug)]
pub struct StartArgs {
    /// Workspace mode (bind or snapshot); defaults to the config value
    #[arg(long)]
    pub mode: Option<WorkspaceMode>,

    /// Agent name; a random name is generated when omitted
    #[arg(long)]
    pub agent: Option<String>,

    /// Start in the background and print the container name
    #[arg(long)]
    pub detach: bool,

    /// Remove the existing container and volumes first
    #[arg(long)]
    pub clean: bool,

    /// Rebuild the image even on a fingerprint cache hit
    #[arg(long)]
    pub force_build: bool,

    /// Disable the daemon's layer cache for this build
    #[arg(long)]
    pub no_cache: bool,

    /// Publish a container port as host:container[/proto] (repeatable)
    #[arg(long = "publish", short = 'p')]
    pub publish: Vec<String>,

    /// Run this shell instead of the configured agent shell
    #[arg(long)]
    pub shell: Option<String>,
}

/// Normalised inputs shared by `start` and `run`.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionRequest {
    pub mode: Option<WorkspaceMode>,
    pub agent: Option<String>,
    pub detach: bool,
    pub clean: bool,
    /// Remove the container and the agent's volumes when the session ends.
    pub remove: bool,
    pub force_build: bool,
    pub no_cache: bool,
    pub publish: Vec<String>,
    pub shell: Option<String>,
    /// Explicit command; empty means the configured interactive shell.
    pub command: Vec<String>,
}

pub async fn execute(cancel: &CancellationToken, args: StartArgs) -> Result<i32> {
    launch(
        cancel,
        SessionRequest {
            mode: args.mode,
            agent: args.agent,
            detach: args.detach,
            clean: args.clean,
            force_build: args.force_build,
            no_cache: args.no_cache,
            publish: args.publish,
            shell: args.shell,
            ..Default::default()
        },
    )
    .await
}

/// Shared start/run path: config -> image -> workspace -> container ->
/// (optionally) interactive session. Returns the process exit code.
pub(crate) async fn launch(cancel: &CancellationToken, request: SessionRequest) -> Result<i32> {
    let (dir, config) = load_config()?;
    let mode = request.mode.unwrap_or(config.workspace.default_mode);
    let identity = AgentIdentity::new(&config.project, request.agent.as_deref());
    let publish = request
        .publish
        .iter()
        .map(|raw| raw.parse::<PortMapping>())
        .collect::<cordon_core::errors::Result<Vec<_>>>()?;

    let engine = connect()?;
    engine.ping(cancel).await?;

    let mut print_line = |line: &str| {
        print!("{line}");
        let _ = std::io::stdout().flush();
    };
    let ensured = ensure_image(
        cancel,
        &engine,
        &config,
        &dir,
        TOOL_VERSION,
        EnsureImageOptions {
            force_build: request.force_build,
            no_cache: request.no_cache,
            pull: false,
        },
        &mut print_line,
    )
    .await?;

    let labels = project_labels(&config.project, TOOL_VERSION);
    engine
        .ensure_network(cancel, NETWORK_NAME, labels.clone())
        .await?;

    if request.clean {
        debug!("clean requested; removing existing container and volumes");
        remove_agent(cancel, &engine, &identity, true).await?;
    }

    let workspace = Workspace::select(
        mode,
        &dir,
        &config.workspace.remote_path,
        identity.volume_name(VolumeKind::Workspace),
        ensured.tag.clone(),
        labels.clone(),
    );
    workspace.prepare(cancel, &engine).await?;

    // Config and history volumes persist across runs; create on demand.
    for kind in [VolumeKind::Config, VolumeKind::History] {
        let name = identity.volume_name(kind);
        if !engine.volume_exists(cancel, &name).await? {
            engine.create_volume(cancel, &name, labels.clone()).await?;
        }
    }

    let bridge_plan = session::bridge_plan(&config);
    let spec = plan::container_spec(plan::PlanInputs {
        config: &config,
        identity: &identity,
        workspace: &workspace,
        project_dir: &dir,
        image: &ensured.tag,
        publish,
        interactive: !request.detach,
        command: request.command.clone(),
        shell: request.shell.clone(),
        bridge_env: (!bridge_plan.is_empty()).then(|| bridge_plan.env_value()),
    })?;

    let container = find_or_create(cancel, &engine, &spec).await?;
    info!(
        name = %spec.name,
        id = %container.id,
        created = container.created,
        "container ready"
    );

    if request.detach {
        engine.start_container(cancel, &spec.name).await?;
        println!("{}", spec.name);
        return Ok(0);
    }

    let exit_code = session::interactive(
        cancel,
        &engine,
        &spec.name,
        bridge_plan,
    )
    .await?;

    if request.remove {
        debug!("ephemeral run; removing container and volumes");
        remove_agent(cancel, &engine, &identity, true).await?;
    } else {
        workspace.cleanup(cancel, &engine, false).await?;
    }

    Ok(exit_code)
}
