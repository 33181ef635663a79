//! Container environment assembly
//!
//! The agent process receives a controlled environment: a passthrough set
//! copied from the host (locale, editor, git author fields, proxies, and
//! the documented auth prefixes for supported agents), entries from an
//! optional project `.env` file, and the `agent.env` map from the
//! configuration, with later sources winning. A deny set keeps
//! host-specific variables out regardless of other rules, and the output
//! ordering is deterministic so repeated creates produce identical
//! containers.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, trace};

/// Prefix reserved for the tool's own variables; never passed through.
pub const TOOL_ENV_PREFIX: &str = "CORDON_";

/// Host variables copied verbatim when present.
const PASSTHROUGH_EXACT: &[&str] = &[
    "TERM",
    "COLORTERM",
    "LANG",
    "EDITOR",
    "VISUAL",
    "GIT_AUTHOR_NAME",
    "GIT_AUTHOR_EMAIL",
    "GIT_COMMITTER_NAME",
    "GIT_COMMITTER_EMAIL",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
];

/// Prefixes copied when present: locale variants plus the documented auth
/// prefixes of the agents cordon can launch.
const PASSTHROUGH_PREFIXES: &[&str] = &["LC_", "ANTHROPIC_", "OPENAI_", "GEMINI_"];

/// Never passed through, whatever the other rules say: shell prompt state,
/// host agent sockets, display/desktop session variables, and identity
/// variables the container defines for itself.
const DENY_EXACT: &[&str] = &[
    "PS1",
    "PROMPT_COMMAND",
    "SSH_AUTH_SOCK",
    "GPG_AGENT_INFO",
    "DISPLAY",
    "WAYLAND_DISPLAY",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
];

const DENY_PREFIXES: &[&str] = &["XDG_", TOOL_ENV_PREFIX];

fn denied(key: &str) -> bool {
    DENY_EXACT.contains(&key) || DENY_PREFIXES.iter().any(|p| key.starts_with(p))
}

fn passed_through(key: &str) -> bool {
    !denied(key)
        && (PASSTHROUGH_EXACT.contains(&key)
            || PASSTHROUGH_PREFIXES.iter().any(|p| key.starts_with(p)))
}

/// Assemble the container environment as sorted `KEY=VALUE` pairs.
///
/// Precedence, lowest to highest: host passthrough, project `.env` file,
/// `agent.env` from the configuration. The deny set applies only to the
/// host passthrough; explicit configuration is trusted.
pub fn assemble(project_dir: &Path, agent_env: &IndexMap<String, String>) -> Vec<String> {
    let mut merged: BTreeMap<String, String> = std::env::vars().filter(|(k, _)| passed_through(k)).collect();

    // `.env` lexing is delegated entirely to dotenvy.
    let dotenv_path = project_dir.join(".env");
    if dotenv_path.exists() {
        match dotenvy::from_path_iter(&dotenv_path) {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok((key, value)) => {
                            merged.insert(key, value);
                        }
                        Err(e) => trace!(error = %e, "skipping malformed .env entry"),
                    }
                }
            }
            Err(e) => debug!(error = %e, "could not read .env file"),
        }
    }

    for (key, value) in agent_env {
        merged.insert(key.clone(), value.clone());
    }

    merged
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn deny_set_beats_passthrough_rules() {
        assert!(!passed_through("SSH_AUTH_SOCK"));
        assert!(!passed_through("HOME"));
        assert!(!passed_through("XDG_RUNTIME_DIR"));
        assert!(!passed_through("CORDON_BRIDGE_SOCKETS"));
        assert!(!passed_through("PS1"));
    }

    #[test]
    fn passthrough_covers_locale_git_and_auth_prefixes() {
        assert!(passed_through("TERM"));
        assert!(passed_through("LC_ALL"));
        assert!(passed_through("GIT_AUTHOR_NAME"));
        assert!(passed_through("https_proxy"));
        assert!(passed_through("ANTHROPIC_API_KEY"));
        assert!(!passed_through("RANDOM_HOST_VAR"));
    }

    #[test]
    #[serial]
    fn config_env_wins_and_output_is_sorted() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("TERM", "xterm-256color");

        let mut agent_env = IndexMap::new();
        agent_env.insert("TERM".to_string(), "dumb".to_string());
        agent_env.insert("AGENT_MODEL".to_string(), "large".to_string());

        let env = assemble(dir.path(), &agent_env);
        assert!(env.contains(&"TERM=dumb".to_string()));
        assert!(env.contains(&"AGENT_MODEL=large".to_string()));

        let mut sorted = env.clone();
        sorted.sort();
        assert_eq!(env, sorted);
    }

    #[test]
    #[serial]
    fn dotenv_file_sits_between_passthrough_and_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "FROM_DOTENV=yes\nTERM=vt100\n").unwrap();
        std::env::set_var("TERM", "xterm-256color");

        let env = assemble(dir.path(), &IndexMap::new());
        assert!(env.contains(&"FROM_DOTENV=yes".to_string()));
        assert!(env.contains(&"TERM=vt100".to_string()));
    }
}
