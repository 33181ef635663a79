//! Shell command: attach a login shell to a running agent container.

use super::{connect, load_config};
use anyhow::Result;
use cordon_core::engine::{ContainerOps, ExecSpec};
use cordon_core::lifecycle::select_agent;
use cordon_core::pty::PtySession;
use cordon_core::recipe::AGENT_USER;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(clap::Args, Debug)]
pub struct ShellArgs {
    /// Agent to attach to; required when several are running
    #[arg(long)]
    pub agent: Option<String>,

    /// Shell to run instead of the configured one
    #[arg(long)]
    pub shell: Option<String>,
}

pub async fn execute(cancel: &CancellationToken, args: ShellArgs) -> Result<i32> {
    let (_dir, config) = load_config()?;
    let engine = connect()?;
    engine.ping(cancel).await?;

    let selected = select_agent(cancel, &engine, &config.project, args.agent.as_deref()).await?;
    if !selected.state.is_running() {
        debug!(name = %selected.name, "container stopped; starting for shell");
        engine.start_container(cancel, &selected.name).await?;
    }

    let shell = args
        .shell
        .or_else(|| config.agent.shell.clone())
        .unwrap_or_else(|| "/bin/bash".to_string());
    let command = {
        let mut parts = shell_words::split(&shell)?;
        parts.push("-l".to_string());
        parts
    };

    let pty = PtySession::setup()?;
    let session = async {
        let channel = engine
            .exec(
                cancel,
                &selected.name,
                ExecSpec {
                    cmd: command,
                    user: Some(AGENT_USER.to_string()),
                    workdir: Some(config.workspace.remote_path.clone()),
                    tty: pty.is_terminal(),
                    ..Default::default()
                },
            )
            .await?;
        let exec_id = channel.id.clone();

        if pty.is_terminal() {
            let resize_engine = engine.clone();
            let resize_id = exec_id.clone();
            let resize_cancel = cancel.clone();
            pty.stream_with_resize(channel.io, cancel, move |rows, cols| {
                let engine = resize_engine.clone();
                let id = resize_id.clone();
                let cancel = resize_cancel.clone();
                async move { engine.resize_exec(&cancel, &id, rows, cols).await }
            })
            .await?;
        } else {
            pty.stream(channel.io, cancel).await?;
        }

        if cancel.is_cancelled() {
            return Ok(130);
        }
        engine.exec_exit_code(cancel, &exec_id).await
    }
    .await;

    PtySession::restore();
    Ok(session? as i32)
}
