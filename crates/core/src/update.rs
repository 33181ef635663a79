//! Background update check
//!
//! Once a day, and only outside CI, cordon asks the release feed whether a
//! newer version exists. The result is shown after the main command
//! completes; the check never delays or fails a command. State lives in a
//! small JSON file written atomically (temp file, then rename) so a crashed
//! run can neither corrupt it nor leave a partial entry behind.

use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Environment variable that disables update checks entirely.
pub const OPT_OUT_ENV: &str = "CORDON_NO_UPDATE_CHECK";

/// Development builds never check.
pub const DEV_VERSION: &str = "0.0.0-dev";

/// Minimum age of the previous check before a new one runs.
pub const CHECK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Total timeout for the release-feed request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Persisted record of the last completed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateState {
    pub checked_at: DateTime<Utc>,
    pub latest_version: String,
    pub latest_url: String,
    pub current_version: String,
}

/// A newer release the user should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub version: String,
    pub url: String,
}

/// Release feed response subset.
#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    tag_name: String,
    html_url: String,
}

/// Configured checker for one repository's release feed.
#[derive(Debug, Clone)]
pub struct UpdateChecker {
    api_base: String,
    state_path: PathBuf,
    current_version: String,
    repo: String,
}

impl UpdateChecker {
    pub fn new(state_path: PathBuf, current_version: &str, repo: &str) -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            state_path,
            current_version: current_version.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Point at a different feed endpoint (used by tests).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Whether a check should run at all: suppressed by the opt-out
    /// variable, by CI markers, for development builds, and while the
    /// previous check is younger than the TTL.
    pub fn should_check(&self) -> bool {
        if std::env::var_os(OPT_OUT_ENV).is_some() || std::env::var_os("CI").is_some() {
            return false;
        }
        if self.current_version == DEV_VERSION {
            return false;
        }
        match read_state(&self.state_path) {
            Some(state) => {
                let age = Utc::now().signed_duration_since(state.checked_at);
                age.to_std().map(|age| age >= CHECK_TTL).unwrap_or(true)
            }
            None => true,
        }
    }

    /// Gate on [`should_check`], then fetch and record.
    ///
    /// [`should_check`]: UpdateChecker::should_check
    pub async fn check(&self, cancel: &CancellationToken) -> Result<Option<Update>> {
        if !self.should_check() {
            return Ok(None);
        }
        self.fetch_and_record(cancel).await
    }

    /// Fetch the latest release, persist the state entry, and return the
    /// update when it is strictly newer than the running version.
    pub async fn fetch_and_record(&self, cancel: &CancellationToken) -> Result<Option<Update>> {
        let url = format!("{}/repos/{}/releases/latest", self.api_base, self.repo);
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(format!("cordon/{}", self.current_version))
            .build()
            .map_err(http_error)?;

        let request = async {
            let response = client.get(&url).send().await.map_err(http_error)?;
            let response = response.error_for_status().map_err(http_error)?;
            response.json::<ReleaseInfo>().await.map_err(http_error)
        };
        let release = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled { op: "update_check" }),
            release = request => release?,
        };

        let latest = release.tag_name.trim_start_matches('v').to_string();
        write_state(
            &self.state_path,
            &UpdateState {
                checked_at: Utc::now(),
                latest_version: latest.clone(),
                latest_url: release.html_url.clone(),
                current_version: self.current_version.clone(),
            },
        )?;
        debug!(latest = %latest, "update check complete");

        if is_newer(&latest, &self.current_version) {
            Ok(Some(Update {
                version: latest,
                url: release.html_url,
            }))
        } else {
            Ok(None)
        }
    }
}

/// Default state file location under the user state directory.
pub fn default_state_path() -> PathBuf {
    let base = std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("cordon").join("update-check.json")
}

fn read_state(path: &Path) -> Option<UpdateState> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Crash-safe write: serialize into a temp file in the target directory,
/// then rename over the final path.
fn write_state(path: &Path, state: &UpdateState) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| state_error(path, e))?;
    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| state_error(path, e))?;
    serde_json::to_writer_pretty(&mut temp, state).map_err(|e| state_error(path, e))?;
    temp.persist(path).map_err(|e| state_error(path, e.error))?;
    Ok(())
}

fn state_error(path: &Path, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::NetworkError {
        op: "update_state_write",
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{}: {}", path.display(), source),
        )),
    }
}

fn http_error(source: reqwest::Error) -> Error {
    if source.is_timeout() {
        Error::Timeout {
            op: "update_check",
            seconds: HTTP_TIMEOUT.as_secs(),
        }
    } else {
        Error::NetworkError {
            op: "update_check",
            source: Box::new(source),
        }
    }
}

/// Strictly-newer comparison on the numeric triple, prerelease stripped.
/// Incomplete versions are padded (`1.2` compares as `1.2.0`), matching how
/// release tags are written in the wild.
pub fn is_newer(latest: &str, current: &str) -> bool {
    match (numeric_triple(latest), numeric_triple(current)) {
        (Some(latest), Some(current)) => latest > current,
        _ => false,
    }
}

fn numeric_triple(version: &str) -> Option<(u64, u64, u64)> {
    let cleaned = version.trim_start_matches('v');
    let cleaned = cleaned.split(['-', '+']).next().unwrap_or(cleaned);
    // Pad major or major.minor tags before handing them to the semver
    // parser.
    for candidate in [
        cleaned.to_string(),
        format!("{cleaned}.0"),
        format!("{cleaned}.0.0"),
    ] {
        if let Ok(parsed) = semver::Version::parse(&candidate) {
            return Some((parsed.major, parsed.minor, parsed.patch));
        }
    }
    None
}

/// Handle to a check running concurrently with the main command.
pub struct BackgroundCheck {
    token: CancellationToken,
    rx: oneshot::Receiver<Option<Update>>,
}

/// Start a check in the background. The result is collected with
/// [`BackgroundCheck::finish`] after the main command returns.
pub fn spawn_check(checker: UpdateChecker, parent: &CancellationToken) -> BackgroundCheck {
    let token = parent.child_token();
    let task_token = token.clone();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = checker.check(&task_token).await;
        let update = match result {
            Ok(update) => update,
            Err(e) => {
                debug!(error = %e, "update check failed");
                None
            }
        };
        if tx.send(update).is_err() {
            warn!("update result dropped");
        }
    });
    BackgroundCheck { token, rx }
}

impl BackgroundCheck {
    /// Cancel any in-flight request and collect the result if one arrived.
    pub async fn finish(self) -> Option<Update> {
        self.token.cancel();
        self.rx.await.ok().flatten()
    }
}
