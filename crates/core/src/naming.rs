//! Container, volume and image naming
//!
//! Every resource cordon creates is namespaced by a project slug and a short
//! agent name so that multiple concurrent agents per project can coexist.
//! The grammar is fixed: containers are `cordon.<project>.<agent>`, volumes
//! append a purpose suffix to the container name, and images are tagged
//! `cordon/<project>:latest` plus a content-addressed fingerprint tag.
//! Ownership and provenance travel as labels; cordon only ever operates on
//! resources carrying the managed-by marker.

use std::collections::HashMap;
use std::fmt;

/// Tool prefix used in every resource name.
pub const TOOL_NAME: &str = "cordon";

/// Marker label identifying resources created by cordon.
pub const LABEL_MANAGED: &str = "com.cordon.managed";
/// Project slug label.
pub const LABEL_PROJECT: &str = "com.cordon.project";
/// Agent name label (containers only).
pub const LABEL_AGENT: &str = "com.cordon.agent";
/// Tool version that created the resource.
pub const LABEL_VERSION: &str = "com.cordon.version";
/// Host working directory the project was started from.
pub const LABEL_WORKDIR: &str = "com.cordon.workdir";
/// RFC 3339 creation timestamp.
pub const LABEL_CREATED: &str = "com.cordon.created";

/// Purpose of a named volume within an agent's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeKind {
    /// Isolated workspace copy; exists only in snapshot mode.
    Workspace,
    /// Agent configuration, persists across runs.
    Config,
    /// Shell and agent history, persists across runs.
    History,
}

impl VolumeKind {
    /// All volume kinds, in removal order.
    pub const ALL: [VolumeKind; 3] = [
        VolumeKind::Workspace,
        VolumeKind::Config,
        VolumeKind::History,
    ];

    /// Name suffix appended to the container name.
    pub fn suffix(self) -> &'static str {
        match self {
            VolumeKind::Workspace => "workspace",
            VolumeKind::Config => "config",
            VolumeKind::History => "history",
        }
    }
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Identity of one agent instance within a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Project slug from the configuration.
    pub project: String,
    /// Short agent name; random when the user did not pick one.
    pub agent: String,
}

impl AgentIdentity {
    /// Create an identity, generating a random agent name when unspecified.
    pub fn new(project: &str, agent: Option<&str>) -> Self {
        Self {
            project: project.to_string(),
            agent: agent
                .map(str::to_string)
                .unwrap_or_else(random_agent_name),
        }
    }

    /// Container name: `cordon.<project>.<agent>`.
    pub fn container_name(&self) -> String {
        format!("{}.{}.{}", TOOL_NAME, self.project, self.agent)
    }

    /// Volume name: `<container-name>-<purpose>`.
    pub fn volume_name(&self, kind: VolumeKind) -> String {
        format!("{}-{}", self.container_name(), kind.suffix())
    }

    /// Labels attached to the agent's container.
    pub fn labels(&self, version: &str, workdir: &str) -> HashMap<String, String> {
        let mut labels = project_labels(&self.project, version);
        labels.insert(LABEL_AGENT.to_string(), self.agent.clone());
        labels.insert(LABEL_WORKDIR.to_string(), workdir.to_string());
        labels
    }
}

/// Primary image tag for a project: `cordon/<project>:latest`.
pub fn image_tag(project: &str) -> String {
    format!("{}/{}:latest", TOOL_NAME, project)
}

/// Content-addressed image tag: `cordon/<project>:<fingerprint>`.
pub fn hash_image_tag(project: &str, fingerprint: &str) -> String {
    format!("{}/{}:{}", TOOL_NAME, project, fingerprint)
}

/// Repository part of the image tags: `cordon/<project>`.
pub fn image_repo(project: &str) -> String {
    format!("{}/{}", TOOL_NAME, project)
}

/// Labels shared by every resource cordon creates for a project.
pub fn project_labels(project: &str, version: &str) -> HashMap<String, String> {
    HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_PROJECT.to_string(), project.to_string()),
        (LABEL_VERSION.to_string(), version.to_string()),
        (
            LABEL_CREATED.to_string(),
            chrono::Utc::now().to_rfc3339(),
        ),
    ])
}

/// Whether a label map carries the managed-by marker.
pub fn is_managed(labels: &HashMap<String, String>) -> bool {
    labels.get(LABEL_MANAGED).map(String::as_str) == Some("true")
}

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "calm", "deft", "eager", "fleet", "keen", "lucid", "mellow", "nimble",
    "quiet", "rapid", "sly", "tidy", "vivid", "wry",
];

const NOUNS: &[&str] = &[
    "crane", "dingo", "egret", "finch", "gecko", "heron", "ibex", "koala", "lemur", "marten",
    "newt", "otter", "puffin", "raven", "stoat", "wren",
];

/// Generate a short random agent name like `nimble-otter`.
pub fn random_agent_name() -> String {
    let adjective = ADJECTIVES[fastrand::usize(..ADJECTIVES.len())];
    let noun = NOUNS[fastrand::usize(..NOUNS.len())];
    format!("{}-{}", adjective, noun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_grammar() {
        let identity = AgentIdentity::new("myproj", Some("alpha"));
        assert_eq!(identity.container_name(), "cordon.myproj.alpha");
    }

    #[test]
    fn volume_name_grammar() {
        let identity = AgentIdentity::new("myproj", Some("alpha"));
        assert_eq!(
            identity.volume_name(VolumeKind::Workspace),
            "cordon.myproj.alpha-workspace"
        );
        assert_eq!(
            identity.volume_name(VolumeKind::History),
            "cordon.myproj.alpha-history"
        );
    }

    #[test]
    fn image_tag_grammar() {
        assert_eq!(image_tag("myproj"), "cordon/myproj:latest");
        assert_eq!(
            hash_image_tag("myproj", "0123456789ab"),
            "cordon/myproj:0123456789ab"
        );
    }

    #[test]
    fn random_names_are_well_formed() {
        for _ in 0..32 {
            let name = random_agent_name();
            let (adjective, noun) = name.split_once('-').expect("two dash-joined tokens");
            assert!(ADJECTIVES.contains(&adjective));
            assert!(NOUNS.contains(&noun));
        }
    }

    #[test]
    fn labels_carry_ownership_and_provenance() {
        let identity = AgentIdentity::new("myproj", Some("alpha"));
        let labels = identity.labels("0.3.1", "/home/dev/myproj");
        assert!(is_managed(&labels));
        assert_eq!(labels.get(LABEL_PROJECT).unwrap(), "myproj");
        assert_eq!(labels.get(LABEL_AGENT).unwrap(), "alpha");
        assert_eq!(labels.get(LABEL_VERSION).unwrap(), "0.3.1");
        assert!(labels.contains_key(LABEL_CREATED));
    }

    #[test]
    fn unmanaged_labels_are_rejected() {
        assert!(!is_managed(&HashMap::new()));
        let foreign = HashMap::from([(LABEL_MANAGED.to_string(), "false".to_string())]);
        assert!(!is_managed(&foreign));
    }
}
