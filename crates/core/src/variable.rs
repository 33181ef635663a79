//! Variable substitution for configuration values
//!
//! Values in `agent.env` (and anywhere else the glue opts in) may reference
//! a small set of variables that are resolved at session start:
//!
//! - `${localWorkspaceFolder}` - absolute host path of the project
//! - `${projectName}` - the project slug
//! - `${agentName}` - the agent name of this session
//! - `${localEnv:VAR}` - a host environment variable
//!
//! Unknown variables are left untouched so configurations stay forward
//! compatible; a referenced-but-unset host variable resolves to the empty
//! string.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::{debug, trace};

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("variable pattern compiles"));

/// Values available for substitution in one session.
#[derive(Debug, Clone)]
pub struct SubstitutionContext {
    pub local_workspace_folder: String,
    pub project: String,
    pub agent: String,
}

impl SubstitutionContext {
    pub fn new(project_dir: &Path, project: &str, agent: &str) -> Self {
        let local_workspace_folder = project_dir
            .canonicalize()
            .unwrap_or_else(|_| project_dir.to_path_buf())
            .to_string_lossy()
            .into_owned();
        Self {
            local_workspace_folder,
            project: project.to_string(),
            agent: agent.to_string(),
        }
    }

    fn resolve(&self, token: &str) -> Option<String> {
        match token {
            "localWorkspaceFolder" => Some(self.local_workspace_folder.clone()),
            "projectName" => Some(self.project.clone()),
            "agentName" => Some(self.agent.clone()),
            _ => token.strip_prefix("localEnv:").map(|name| {
                std::env::var(name).unwrap_or_else(|_| {
                    trace!(variable = name, "host variable unset; substituting empty");
                    String::new()
                })
            }),
        }
    }
}

/// Substitute every known variable token in a string.
pub fn substitute(input: &str, context: &SubstitutionContext) -> String {
    VARIABLE_PATTERN
        .replace_all(input, |captures: &regex::Captures<'_>| {
            let token = &captures[1];
            match context.resolve(token) {
                Some(value) => value,
                // Unknown token: keep the literal text.
                None => captures[0].to_string(),
            }
        })
        .into_owned()
}

/// Substitute across a map's values, preserving order.
pub fn substitute_map(
    map: &IndexMap<String, String>,
    context: &SubstitutionContext,
) -> IndexMap<String, String> {
    let substituted: IndexMap<String, String> = map
        .iter()
        .map(|(key, value)| (key.clone(), substitute(value, context)))
        .collect();
    if substituted != *map {
        debug!("applied variable substitution to configuration values");
    }
    substituted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn context() -> SubstitutionContext {
        SubstitutionContext {
            local_workspace_folder: "/home/dev/demo".to_string(),
            project: "demo".to_string(),
            agent: "alpha".to_string(),
        }
    }

    #[test]
    fn known_tokens_resolve() {
        let ctx = context();
        assert_eq!(
            substitute("${localWorkspaceFolder}/notes", &ctx),
            "/home/dev/demo/notes"
        );
        assert_eq!(
            substitute("${projectName}-${agentName}", &ctx),
            "demo-alpha"
        );
    }

    #[test]
    fn unknown_tokens_are_preserved() {
        let ctx = context();
        assert_eq!(substitute("${containerEnv:PATH}", &ctx), "${containerEnv:PATH}");
        assert_eq!(substitute("plain text", &ctx), "plain text");
    }

    #[test]
    #[serial]
    fn local_env_resolves_and_defaults_to_empty() {
        let ctx = context();
        std::env::set_var("CORDON_TEST_SUBST", "resolved");
        assert_eq!(substitute("${localEnv:CORDON_TEST_SUBST}", &ctx), "resolved");
        std::env::remove_var("CORDON_TEST_SUBST");
        assert_eq!(substitute("x${localEnv:CORDON_TEST_SUBST}y", &ctx), "xy");
    }

    #[test]
    fn map_substitution_preserves_order() {
        let ctx = context();
        let mut map = IndexMap::new();
        map.insert("B_FIRST".to_string(), "${projectName}".to_string());
        map.insert("A_SECOND".to_string(), "literal".to_string());

        let out = substitute_map(&map, &ctx);
        let keys: Vec<&String> = out.keys().collect();
        assert_eq!(keys, ["B_FIRST", "A_SECOND"]);
        assert_eq!(out["B_FIRST"], "demo");
    }
}
