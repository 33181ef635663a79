//! Init command: scaffold a project configuration.

use super::project_dir;
use anyhow::{bail, Context, Result};
use cordon_core::config::{starter_config, starter_ignore, CONFIG_FILE_NAME, IGNORE_FILE_NAME};

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Project slug; defaults to a sanitised form of the directory name
    #[arg(long)]
    pub project: Option<String>,

    /// Overwrite an existing cordon.yaml
    #[arg(long)]
    pub force: bool,
}

pub fn execute(args: InitArgs) -> Result<()> {
    let dir = project_dir()?;
    let project = match args.project {
        Some(project) => project,
        None => slug_from_dir_name(
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string()),
        ),
    };

    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            CONFIG_FILE_NAME
        );
    }
    std::fs::write(&config_path, starter_config(&project))
        .with_context(|| format!("cannot write {}", config_path.display()))?;

    let ignore_path = dir.join(IGNORE_FILE_NAME);
    if !ignore_path.exists() {
        std::fs::write(&ignore_path, starter_ignore())
            .with_context(|| format!("cannot write {}", ignore_path.display()))?;
    }

    println!("Initialised project {project}.");
    println!("Review {CONFIG_FILE_NAME}, then run `cordon start`.");
    Ok(())
}

/// Turn an arbitrary directory name into a valid project slug.
fn slug_from_dir_name(name: String) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_names_become_valid_slugs() {
        assert_eq!(slug_from_dir_name("My Project".into()), "my-project");
        assert_eq!(slug_from_dir_name("API_v2".into()), "api_v2");
        assert_eq!(slug_from_dir_name("---".into()), "project");
        cordon_core::config::validate_project_slug(&slug_from_dir_name("Weird (Name)".into()))
            .unwrap();
    }
}
