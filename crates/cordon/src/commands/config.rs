//! Config command: validate or display the project configuration.

use super::load_config;
use anyhow::{Context, Result};

#[derive(clap::Subcommand, Debug)]
pub enum ConfigCommand {
    /// Load the configuration and report validation problems
    Validate,
    /// Print the resolved configuration as YAML
    Show,
}

pub fn execute(command: ConfigCommand) -> Result<()> {
    let (_dir, config) = load_config()?;
    match command {
        ConfigCommand::Validate => {
            println!("cordon.yaml is valid (project {})", config.project);
        }
        ConfigCommand::Show => {
            let rendered =
                serde_yaml::to_string(&config).context("cannot render configuration")?;
            print!("{rendered}");
        }
    }
    Ok(())
}
