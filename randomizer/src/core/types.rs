//! Shared deterministic types for randomizer core logic.
//!
//! These types define stable contracts between the catalog, selector, store
//! and orchestrator. Their serialized names are part of the on-disk format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// MITRE ATT&CK tactic used to classify and filter techniques.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tactic {
    InitialAccess,
    Execution,
    Persistence,
    PrivilegeEscalation,
    DefenseEvasion,
    CredentialAccess,
    Discovery,
    LateralMovement,
    Collection,
    Exfiltration,
    Impact,
}

impl Tactic {
    pub const ALL: [Tactic; 11] = [
        Tactic::InitialAccess,
        Tactic::Execution,
        Tactic::Persistence,
        Tactic::PrivilegeEscalation,
        Tactic::DefenseEvasion,
        Tactic::CredentialAccess,
        Tactic::Discovery,
        Tactic::LateralMovement,
        Tactic::Collection,
        Tactic::Exfiltration,
        Tactic::Impact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tactic::InitialAccess => "initial-access",
            Tactic::Execution => "execution",
            Tactic::Persistence => "persistence",
            Tactic::PrivilegeEscalation => "privilege-escalation",
            Tactic::DefenseEvasion => "defense-evasion",
            Tactic::CredentialAccess => "credential-access",
            Tactic::Discovery => "discovery",
            Tactic::LateralMovement => "lateral-movement",
            Tactic::Collection => "collection",
            Tactic::Exfiltration => "exfiltration",
            Tactic::Impact => "impact",
        }
    }
}

impl fmt::Display for Tactic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tactic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tactic::ALL
            .into_iter()
            .find(|tactic| tactic.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Tactic::ALL.iter().map(|t| t.as_str()).collect();
                format!("unknown tactic '{s}' (expected one of: {})", valid.join(", "))
            })
    }
}

/// Whether detonation artifacts are left in place for investigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Leave artifacts for a full IR exercise; cleanup is an explicit command.
    #[default]
    Train,
    /// Revert and clean up right after detonation (detection validation loops).
    Validate,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Train => "train",
            RunMode::Validate => "validate",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(RunMode::Train),
            "validate" => Ok(RunMode::Validate),
            other => Err(format!("unknown mode '{other}' (expected train or validate)")),
        }
    }
}

/// Lifecycle status of a run.
///
/// Success statuses advance one step at a time; `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    WarmupComplete,
    Detonated,
    Cleaned,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::WarmupComplete => "warmup_complete",
            RunStatus::Detonated => "detonated",
            RunStatus::Cleaned => "cleaned",
            RunStatus::Failed => "failed",
        }
    }

    /// Position on the success path, `None` for `Failed`.
    fn rank(self) -> Option<u8> {
        match self {
            RunStatus::Started => Some(0),
            RunStatus::WarmupComplete => Some(1),
            RunStatus::Detonated => Some(2),
            RunStatus::Cleaned => Some(3),
            RunStatus::Failed => None,
        }
    }

    /// Returns true if `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self.rank(), next.rank()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(from), Some(to)) => to == from + 1,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Cleaned | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One primitive of the external simulation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStep {
    Warmup,
    Detonate,
    Revert,
    Cleanup,
}

impl ToolStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStep::Warmup => "warmup",
            ToolStep::Detonate => "detonate",
            ToolStep::Revert => "revert",
            ToolStep::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ToolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const DOCS_BASE_URL: &str = "https://stratus-red-team.cloud/attack-techniques";

/// A simulation technique from the tool's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technique {
    /// Namespaced identifier, `<provider>.<tactic>.<name>`.
    pub id: String,
    /// Human-readable title as printed by the tool.
    pub name: String,
    pub tactic: Tactic,
}

impl Technique {
    /// Build a technique from its id, deriving the tactic from the second segment.
    ///
    /// Returns `None` when the id is not namespaced or the tactic is unknown.
    pub fn from_id(id: &str, name: &str) -> Option<Self> {
        let mut segments = id.splitn(3, '.');
        let _provider = segments.next().filter(|s| !s.is_empty())?;
        let tactic = segments.next()?.parse().ok()?;
        segments.next().filter(|s| !s.is_empty())?;
        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            tactic,
        })
    }
}

/// Documentation link for a technique id.
pub fn docs_url(technique_id: &str) -> String {
    format!("{DOCS_BASE_URL}/{}/", technique_id.replace('.', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tactic_parses_its_own_display() {
        for tactic in Tactic::ALL {
            assert_eq!(tactic.to_string().parse::<Tactic>(), Ok(tactic));
        }
        assert!("lateral_movement".parse::<Tactic>().is_err());
    }

    #[test]
    fn status_transitions_are_monotonic_and_failed_absorbs() {
        use RunStatus::{Cleaned, Detonated, Failed, Started, WarmupComplete};
        assert!(Started.can_transition_to(WarmupComplete));
        assert!(WarmupComplete.can_transition_to(Detonated));
        assert!(Detonated.can_transition_to(Cleaned));
        assert!(!Started.can_transition_to(Detonated));
        assert!(!Detonated.can_transition_to(WarmupComplete));
        assert!(!Cleaned.can_transition_to(Cleaned));
        assert!(Cleaned.can_transition_to(Failed));
        assert!(Started.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Cleaned));
    }

    #[test]
    fn technique_from_id_derives_tactic() {
        let t = Technique::from_id("aws.persistence.iam-create-admin-user", "Create admin")
            .expect("technique");
        assert_eq!(t.tactic, Tactic::Persistence);
        assert_eq!(
            docs_url(&t.id),
            "https://stratus-red-team.cloud/attack-techniques/aws/persistence/iam-create-admin-user/"
        );
        assert!(Technique::from_id("aws.not-a-tactic.x", "").is_none());
        assert!(Technique::from_id("aws.persistence", "").is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::WarmupComplete).expect("serialize");
        assert_eq!(json, "\"warmup_complete\"");
    }
}
