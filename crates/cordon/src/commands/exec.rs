//! Exec command: run a command in a running agent container and propagate
//! its exit code.

use super::{connect, load_config};
use anyhow::{bail, Result};
use cordon_core::engine::ExecSpec;
use cordon_core::lifecycle::select_agent;
use cordon_core::pty::PtySession;
use cordon_core::recipe::AGENT_USER;
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct ExecArgs {
    /// Agent to run in; required when several are running
    #[arg(long)]
    pub agent: Option<String>,

    /// Allocate a TTY even when stdin is not a terminal
    #[arg(long, short = 't')]
    pub tty: bool,

    /// Command to run inside the container
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

pub async fn execute(cancel: &CancellationToken, args: ExecArgs) -> Result<i32> {
    let (_dir, config) = load_config()?;
    let engine = connect()?;
    engine.ping(cancel).await?;

    let selected = select_agent(cancel, &engine, &config.project, args.agent.as_deref()).await?;
    if !selected.state.is_running() {
        bail!("{} is not running; start it with `cordon start`", selected.name);
    }

    let pty = PtySession::setup()?;
    let use_tty = args.tty || pty.is_terminal();

    let session = async {
        let channel = engine
            .exec(
                cancel,
                &selected.name,
                ExecSpec {
                    cmd: args.command,
                    user: Some(AGENT_USER.to_string()),
                    workdir: Some(config.workspace.remote_path.clone()),
                    tty: use_tty,
                    ..Default::default()
                },
            )
            .await?;
        let exec_id = channel.id.clone();
        pty.stream(channel.io, cancel).await?;
        if cancel.is_cancelled() {
            return Ok(130);
        }
        engine.exec_exit_code(cancel, &exec_id).await
    }
    .await;

    PtySession::restore();
    Ok(session? as i32)
}
