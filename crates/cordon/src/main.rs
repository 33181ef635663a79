use clap::Parser;
use cordon_core::pty::PtySession;
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod cli;
mod commands;
mod logging;

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init() {
        eprintln!("cordon: failed to initialise logging: {e}");
        std::process::exit(1);
    }

    let parsed = cli::Cli::parse();

    // Root cancellation, bound to the usual termination signals. Every
    // suspending operation below inherits this token.
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let code = match parsed.dispatch(&cancel).await {
        Ok(code) => code,
        Err(error) => {
            render_error(&error);
            1
        }
    };

    // `process::exit` skips destructors, so the terminal is restored
    // explicitly before any exit path reaches it.
    PtySession::restore();
    std::process::exit(code);
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = interrupt.recv() => debug!("interrupt received"),
            _ = terminate.recv() => debug!("termination signal received"),
        }
        cancel.cancel();
    });
}

/// Print an error and, for domain errors, its next-step hints.
fn render_error(error: &anyhow::Error) {
    eprintln!("Error: {error:#}");
    if let Some(domain) = error.downcast_ref::<cordon_core::errors::Error>() {
        let hints = domain.hints();
        if !hints.is_empty() {
            eprintln!("\nNext steps:");
            for hint in hints {
                eprintln!("  - {hint}");
            }
        }
    }
}
