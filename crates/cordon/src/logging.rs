use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialise the process-wide tracing subscriber. Level comes from
/// `RUST_LOG` (default `warn` so interactive sessions stay quiet); ANSI is
/// disabled under `NO_COLOR` or when stderr is not a terminal.
pub fn init() -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;

    let ansi = std::env::var_os("NO_COLOR").is_none() && atty::is(atty::Stream::Stderr);
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi);

    let error_layer = tracing_error::ErrorLayer::default();

    tracing_subscriber::registry()
        .with(filter)
        .with(error_layer)
        .with(fmt_layer)
        .init();
    Ok(())
}
