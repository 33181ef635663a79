//! CLI subcommand implementations
//!
//! Each submodule owns one subcommand: its clap argument struct and its
//! execution glue over the core crate. Shared helpers (project directory,
//! configuration loading, engine connection) live here.

pub mod build;
pub mod config;
pub mod doctor;
pub mod exec;
pub mod forwarder;
pub mod init;
pub mod logs;
pub mod ls;
pub mod monitor;
pub mod prune;
pub mod restart;
pub mod rm;
pub mod run;
pub mod shell;
pub mod start;
pub mod stop;
pub mod volumes;

use anyhow::{Context, Result};
use cordon_core::config::CordonConfig;
use cordon_core::engine::Engine;
use std::path::PathBuf;

/// Version stamped into labels and reported to the release feed.
pub(crate) const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Repository whose releases the update checker follows.
pub(crate) const RELEASE_REPO: &str = "cordon-dev/cordon";

/// Network every agent container joins.
pub(crate) const NETWORK_NAME: &str = "cordon-net";

pub(crate) fn project_dir() -> Result<PathBuf> {
    std::env::current_dir().context("cannot determine the current directory")
}

pub(crate) fn load_config() -> Result<(PathBuf, CordonConfig)> {
    let dir = project_dir()?;
    let config = CordonConfig::load(&dir)?;
    Ok((dir, config))
}

pub(crate) fn connect() -> Result<Engine> {
    Ok(Engine::connect()?)
}
