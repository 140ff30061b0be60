//! # Custom Resource Definitions
//!
//! CRD types for the CdkTsStack controller.
//!
//! A `CdkTsStack` describes a Git-hosted AWS CDK project and the AWS-side
//! actions the controller is permitted to take for it. The controller
//! converges the real CloudFormation stack to match and tracks progress in
//! the status subresource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants;

pub mod status;

pub use status::{CdkTsStackStatus, Phase};

/// CdkTsStack Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: awscdk.dev/v1alpha1
/// kind: CdkTsStack
/// metadata:
///   name: billing-stack
///   namespace: platform
/// spec:
///   stackName: BillingStack
///   credentialsSecretName: aws-billing-creds
///   awsRegion: eu-west-1
///   source:
///     git:
///       repository: https://github.com/example/billing-cdk.git
///       ref: main
///   path: infra
///   cdkContext:
///     - environment=production
///   actions:
///     deploy: true
///     destroy: true
///     driftDetection: true
///     autoRedeploy: false
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "CdkTsStack",
    group = "awscdk.dev",
    version = "v1alpha1",
    namespaced,
    status = "CdkTsStackStatus",
    shortname = "cdk",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Message", "type":"string", "jsonPath":".status.message"}, {"name":"Drift", "type":"boolean", "jsonPath":".status.driftDetected"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CdkTsStackSpec {
    /// CloudFormation stack identifier. Empty means "all stacks" in the CDK
    /// app, which translates to `--all` on every CDK invocation.
    #[serde(default)]
    pub stack_name: String,
    /// Name of an opaque secret in the resource's namespace holding
    /// AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and optionally
    /// AWS_SESSION_TOKEN.
    pub credentials_secret_name: String,
    /// AWS region to deploy into.
    #[serde(default = "default_aws_region")]
    pub aws_region: String,
    /// Where the CDK project comes from.
    pub source: SourceSpec,
    /// Subdirectory inside the repository holding the CDK project.
    #[serde(default = "default_project_path")]
    pub path: String,
    /// Ordered `key=value` pairs passed as `--context` flags to the CDK CLI.
    #[serde(default)]
    pub cdk_context: Vec<String>,
    /// Permission gates for AWS-side actions.
    #[serde(default)]
    pub actions: Actions,
    /// User-supplied shell script bodies run at named lifecycle stages.
    #[serde(default)]
    pub lifecycle_hooks: LifecycleHooks,
}

/// Source configuration. Only Git sources are supported.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Git repository holding the CDK project.
    pub git: GitSource,
}

/// Git repository coordinates.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// Repository URL (https or ssh).
    pub repository: String,
    /// Branch, tag, or commit to check out.
    #[serde(default = "default_git_ref")]
    pub r#ref: String,
    /// Optional `kubernetes.io/ssh-auth` secret for private repositories.
    #[serde(default)]
    pub ssh_secret_name: Option<String>,
}

/// Boolean permission gates for the operations the controller may perform.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Actions {
    /// Allow `cdk deploy`.
    #[serde(default = "default_true")]
    pub deploy: bool,
    /// Allow `cdk destroy` when the resource is deleted. When false the AWS
    /// stack is intentionally orphaned on deletion.
    #[serde(default = "default_true")]
    pub destroy: bool,
    /// Allow the scheduled drift sweeper to inspect this resource.
    #[serde(default = "default_true")]
    pub drift_detection: bool,
    /// Allow the Git-sync sweeper to redeploy automatically when the
    /// deployed template lags the Git ref.
    #[serde(default)]
    pub auto_redeploy: bool,
}

impl Default for Actions {
    fn default() -> Self {
        Actions {
            deploy: true,
            destroy: true,
            drift_detection: true,
            auto_redeploy: false,
        }
    }
}

/// Optional shell script bodies run at the eight lifecycle stages.
///
/// Hooks are user-owned: a failing hook is logged and eventized but never
/// fails the surrounding operation.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleHooks {
    #[serde(default)]
    pub before_deploy: Option<String>,
    #[serde(default)]
    pub after_deploy: Option<String>,
    #[serde(default)]
    pub before_destroy: Option<String>,
    #[serde(default)]
    pub after_destroy: Option<String>,
    #[serde(default)]
    pub before_drift_detection: Option<String>,
    #[serde(default)]
    pub after_drift_detection: Option<String>,
    #[serde(default)]
    pub before_git_sync: Option<String>,
    #[serde(default)]
    pub after_git_sync: Option<String>,
}

fn default_aws_region() -> String {
    constants::DEFAULT_AWS_REGION.to_string()
}

fn default_git_ref() -> String {
    constants::DEFAULT_GIT_REF.to_string()
}

fn default_project_path() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

impl CdkTsStack {
    /// Namespace of the object, defaulting to `default` for robustness.
    pub fn namespace_or_default(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Name of the object. Objects delivered by the watch always carry one.
    pub fn name_or_unknown(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Effective AWS region: the spec value unless it is explicitly empty.
    pub fn effective_region<'a>(&'a self, fallback: Option<&'a str>) -> &'a str {
        if self.spec.aws_region.is_empty() {
            fallback.unwrap_or(constants::DEFAULT_AWS_REGION)
        } else {
            &self.spec.aws_region
        }
    }

    /// Current phase, parsed from the status subresource.
    ///
    /// A missing status or empty phase string is the initial phase. Returns
    /// `None` for a phase value this controller does not know, which the
    /// engine logs and skips.
    pub fn phase(&self) -> Option<Phase> {
        let raw = self
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("");
        Phase::parse(raw)
    }

    /// Current status message, if any.
    pub fn status_message(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.message.as_deref())
            .unwrap_or("")
    }

    /// Whether the controller's finalizer is present.
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|s| s == constants::FINALIZER))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spec_json() -> serde_json::Value {
        serde_json::json!({
            "credentialsSecretName": "aws-creds",
            "source": {
                "git": { "repository": "https://github.com/example/app.git" }
            }
        })
    }

    #[test]
    fn test_spec_defaults_materialize_at_read_time() {
        let spec: CdkTsStackSpec = serde_json::from_value(minimal_spec_json()).unwrap();
        assert_eq!(spec.stack_name, "");
        assert_eq!(spec.aws_region, "us-east-1");
        assert_eq!(spec.source.git.r#ref, "main");
        assert_eq!(spec.path, ".");
        assert!(spec.cdk_context.is_empty());
    }

    #[test]
    fn test_action_defaults() {
        let spec: CdkTsStackSpec = serde_json::from_value(minimal_spec_json()).unwrap();
        assert!(spec.actions.deploy);
        assert!(spec.actions.destroy);
        assert!(spec.actions.drift_detection);
        assert!(!spec.actions.auto_redeploy);
    }

    #[test]
    fn test_explicit_actions_override_defaults() {
        let mut json = minimal_spec_json();
        json["actions"] = serde_json::json!({ "deploy": false, "autoRedeploy": true });
        let spec: CdkTsStackSpec = serde_json::from_value(json).unwrap();
        assert!(!spec.actions.deploy);
        assert!(spec.actions.auto_redeploy);
        // Unspecified gates keep their defaults
        assert!(spec.actions.destroy);
        assert!(spec.actions.drift_detection);
    }

    #[test]
    fn test_lifecycle_hooks_deserialize_camel_case() {
        let mut json = minimal_spec_json();
        json["lifecycleHooks"] = serde_json::json!({
            "beforeDeploy": "echo before",
            "afterDriftDetection": "echo drift is $DRIFT_DETECTED"
        });
        let spec: CdkTsStackSpec = serde_json::from_value(json).unwrap();
        assert_eq!(
            spec.lifecycle_hooks.before_deploy.as_deref(),
            Some("echo before")
        );
        assert!(spec.lifecycle_hooks.after_deploy.is_none());
        assert!(spec.lifecycle_hooks.after_drift_detection.is_some());
    }
}
