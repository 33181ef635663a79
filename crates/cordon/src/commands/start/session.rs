//! Interactive session driving: attach-then-start, PTY streaming, the
//! socket bridge sidecar, and exit-code propagation.

use anyhow::Result;
use cordon_core::bridge::host::{run as run_bridge_host, BridgePlan};
use cordon_core::config::CordonConfig;
use cordon_core::engine::{ContainerOps, Engine, ExecSpec};
use cordon_core::lifecycle::attach_and_start;
use cordon_core::pty::PtySession;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sockets to tunnel for this session.
pub(crate) fn bridge_plan(config: &CordonConfig) -> BridgePlan {
    BridgePlan::discover(config.security.docker_socket, super::plan::agent_home())
}

/// Drive an interactive session to completion and return the container's
/// exit code.
pub(crate) async fn interactive(
    cancel: &CancellationToken,
    engine: &Engine,
    name: &str,
    bridge: BridgePlan,
) -> Result<i32> {
    let pty = PtySession::setup()?;

    // Attach before start so output from fast-finishing commands is never
    // lost, then bring up the bridge sidecar once the container runs.
    let session_result = async {
        let attached = attach_and_start(cancel, engine, name).await?;

        let bridge_guard = if bridge.is_empty() {
            None
        } else {
            spawn_bridge(cancel, engine, name, bridge).await
        };

        let streamed = if pty.is_terminal() {
            let resize_engine = engine.clone();
            let resize_name = name.to_string();
            let resize_cancel = cancel.clone();
            pty.stream_with_resize(attached, cancel, move |rows, cols| {
                let engine = resize_engine.clone();
                let name = resize_name.clone();
                let cancel = resize_cancel.clone();
                async move { engine.resize_container(&cancel, &name, rows, cols).await }
            })
            .await
        } else {
            pty.stream(attached, cancel).await
        };

        if let Some(guard) = bridge_guard {
            guard.cancel();
        }
        streamed?;

        // An interrupt initiated by the user is not an error; exit with the
        // conventional signal code instead of waiting on the container.
        if cancel.is_cancelled() {
            return Ok(130);
        }

        let code = engine.wait_container(cancel, name).await?;
        Ok::<i64, anyhow::Error>(code)
    }
    .await;

    // Restore before any output about the session's end; main restores
    // again before process exit, which is a no-op by then.
    PtySession::restore();

    let code = session_result?;
    debug!(code, "container exited");
    Ok(code as i32)
}

/// Launch the in-container forwarder over an exec channel and serve the
/// host side in the background. A missing forwarder binary inside the
/// image degrades to a warning; the session runs without socket
/// passthrough.
async fn spawn_bridge(
    cancel: &CancellationToken,
    engine: &Engine,
    name: &str,
    plan: BridgePlan,
) -> Option<CancellationToken> {
    let spec = ExecSpec {
        cmd: vec!["cordon".to_string(), "__bridge-forwarder".to_string()],
        env: vec![format!(
            "{}={}",
            cordon_core::bridge::SOCKETS_ENV,
            plan.env_value()
        )],
        ..Default::default()
    };

    match engine.exec(cancel, name, spec).await {
        Ok(channel) => {
            let token = cancel.child_token();
            let task_token = token.clone();
            let (reader, writer) = channel.io.into_split();
            tokio::spawn(async move {
                if let Err(e) = run_bridge_host(reader, writer, plan, &task_token).await {
                    debug!(error = %e, "socket bridge ended");
                }
            });
            Some(token)
        }
        Err(e) => {
            warn!(error = %e, "socket passthrough unavailable for this session");
            None
        }
    }
}
