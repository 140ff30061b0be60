//! # Status Types
//!
//! Status subresource of the CdkTsStack resource and the phase machine it
//! carries. The phase is a plain string on the wire so existing consumers
//! keep working; inside the controller it is parsed into [`Phase`] and
//! matched exhaustively.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a CdkTsStack resource.
///
/// The phase machine is the controller's coordination primitive: sweepers
/// claim a resource by moving it into an owned phase, and the event-driven
/// reconciler refuses to touch owned phases.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CdkTsStackStatus {
    /// Current phase of reconciliation. One of "", Cloning, Installing,
    /// Deploying, Succeeded, Failed, Deleting, DriftChecking,
    /// GitSyncChecking.
    #[serde(default)]
    pub phase: Option<String>,
    /// Short human description of the current phase.
    #[serde(default)]
    pub message: Option<String>,
    /// RFC3339 timestamp of the last successful deploy.
    #[serde(default)]
    pub last_deploy: Option<String>,
    /// RFC3339 timestamp of the last completed drift check.
    #[serde(default)]
    pub last_drift_check: Option<String>,
    /// Whether the last drift check found AWS resources modified outside
    /// the CDK control plane. Never triggers an automatic remediation.
    #[serde(default)]
    pub drift_detected: Option<bool>,
}

/// Reconciliation phase of a CdkTsStack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initial phase: the resource has never been reconciled (empty string
    /// on the wire).
    Initial,
    Cloning,
    Installing,
    Deploying,
    Succeeded,
    Failed,
    Deleting,
    DriftChecking,
    GitSyncChecking,
}

impl Phase {
    /// Parse a wire phase string. `None` means the value is not a phase this
    /// controller knows; the engine logs and skips such resources.
    pub fn parse(raw: &str) -> Option<Phase> {
        match raw {
            "" => Some(Phase::Initial),
            "Cloning" => Some(Phase::Cloning),
            "Installing" => Some(Phase::Installing),
            "Deploying" => Some(Phase::Deploying),
            "Succeeded" => Some(Phase::Succeeded),
            "Failed" => Some(Phase::Failed),
            "Deleting" => Some(Phase::Deleting),
            "DriftChecking" => Some(Phase::DriftChecking),
            "GitSyncChecking" => Some(Phase::GitSyncChecking),
            _ => None,
        }
    }

    /// Wire representation of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initial => "",
            Phase::Cloning => "Cloning",
            Phase::Installing => "Installing",
            Phase::Deploying => "Deploying",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Deleting => "Deleting",
            Phase::DriftChecking => "DriftChecking",
            Phase::GitSyncChecking => "GitSyncChecking",
        }
    }

    /// Owned phases act as cooperative locks: only the subsystem that set
    /// one may transition out of it.
    pub fn is_owned(&self) -> bool {
        matches!(
            self,
            Phase::DriftChecking | Phase::GitSyncChecking | Phase::Deleting
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_every_phase() {
        for phase in [
            Phase::Initial,
            Phase::Cloning,
            Phase::Installing,
            Phase::Deploying,
            Phase::Succeeded,
            Phase::Failed,
            Phase::Deleting,
            Phase::DriftChecking,
            Phase::GitSyncChecking,
        ] {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
    }

    #[test]
    fn test_parse_rejects_unknown_phase() {
        assert_eq!(Phase::parse("Terminating"), None);
        assert_eq!(Phase::parse("succeeded"), None);
    }

    #[test]
    fn test_empty_string_is_initial() {
        assert_eq!(Phase::parse(""), Some(Phase::Initial));
        assert_eq!(Phase::Initial.as_str(), "");
    }

    #[test]
    fn test_owned_phases() {
        assert!(Phase::DriftChecking.is_owned());
        assert!(Phase::GitSyncChecking.is_owned());
        assert!(Phase::Deleting.is_owned());
        assert!(!Phase::Deploying.is_owned());
        assert!(!Phase::Succeeded.is_owned());
    }
}
