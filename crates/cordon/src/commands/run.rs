//! Run command: a one-off command in an agent container, optionally
//! ephemeral.

use super::start::{launch, SessionRequest};
use anyhow::Result;
use cordon_core::workspace::WorkspaceMode;
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Workspace mode (bind or snapshot); defaults to the config value
    #[arg(long)]
    pub mode: Option<WorkspaceMode>,

    /// Agent name; a random name is generated when omitted
    #[arg(long)]
    pub agent: Option<String>,

    /// Remove the existing container and volumes first
    #[arg(long)]
    pub clean: bool,

    /// Remove the container and the agent's volumes when the command exits
    #[arg(long)]
    pub remove: bool,

    /// Rebuild the image even on a fingerprint cache hit
    #[arg(long)]
    pub force_build: bool,

    /// Publish a container port as host:container[/proto] (repeatable)
    #[arg(long = "publish", short = 'p')]
    pub publish: Vec<String>,

    /// Command to run inside the container
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

pub async fn execute(cancel: &CancellationToken, args: RunArgs) -> Result<i32> {
    launch(
        cancel,
        SessionRequest {
            mode: args.mode,
            agent: args.agent,
            clean: args.clean,
            remove: args.remove,
            force_build: args.force_build,
            publish: args.publish,
            command: args.command,
            ..Default::default()
        },
    )
    .await
}
