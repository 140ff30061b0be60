//! # Deploy Failure Classification
//!
//! Maps raw CDK/npm output to an operator-friendly summary for the status
//! message. Substring checks are ordered: the first match wins.

/// Classified reason for a failed `cdk deploy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployFailureReason {
    /// No usable AWS credentials were available to the CLI.
    CredentialsMissing,
    /// Caller identity / account resolution failed.
    AccountResolution,
    /// The credentials lack required permissions.
    AccessDenied,
    /// CloudFormation rejected the template.
    TemplateValidation,
    /// npm or a package dependency failed.
    DependencyInstall,
    /// Region misconfiguration.
    RegionInvalid,
    /// Anything else; the exit code is included in the summary.
    Generic,
}

impl DeployFailureReason {
    /// Classify by output substring, first match wins.
    pub fn classify(output: &str) -> DeployFailureReason {
        if output.contains("no credentials have been configured") {
            DeployFailureReason::CredentialsMissing
        } else if output.contains("Unable to resolve AWS account") {
            DeployFailureReason::AccountResolution
        } else if output.contains("AccessDenied") {
            DeployFailureReason::AccessDenied
        } else if output.contains("ValidationError") {
            DeployFailureReason::TemplateValidation
        } else if output.contains("npm ERR") || output.contains("dependency") {
            DeployFailureReason::DependencyInstall
        } else if output.contains("Region") {
            DeployFailureReason::RegionInvalid
        } else {
            DeployFailureReason::Generic
        }
    }
}

/// Operator-friendly summary of a failed deploy, surfaced in the status
/// message and the failure event.
pub fn error_summary(output: &str, exit_code: i32) -> String {
    match DeployFailureReason::classify(output) {
        DeployFailureReason::CredentialsMissing => {
            "Credentials secret missing or invalid - no AWS credentials were available to the CDK CLI"
                .to_string()
        }
        DeployFailureReason::AccountResolution => {
            "Unable to resolve AWS account - caller identity resolution failed, check credentials and CDK bootstrap"
                .to_string()
        }
        DeployFailureReason::AccessDenied => {
            "Access denied - the provided AWS credentials lack required permissions".to_string()
        }
        DeployFailureReason::TemplateValidation => {
            "CloudFormation template validation failed".to_string()
        }
        DeployFailureReason::DependencyInstall => {
            "Dependency installation failed - check package.json and the npm log".to_string()
        }
        DeployFailureReason::RegionInvalid => {
            "AWS region misconfiguration - check spec.awsRegion".to_string()
        }
        DeployFailureReason::Generic => {
            format!("cdk deploy failed with exit code {}", exit_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_missing() {
        let output = "Error: no credentials have been configured for this environment";
        assert_eq!(
            DeployFailureReason::classify(output),
            DeployFailureReason::CredentialsMissing
        );
        assert!(error_summary(output, 1).contains("Credentials secret"));
    }

    #[test]
    fn test_account_resolution() {
        assert_eq!(
            DeployFailureReason::classify("Unable to resolve AWS account to use"),
            DeployFailureReason::AccountResolution
        );
    }

    #[test]
    fn test_access_denied() {
        assert_eq!(
            DeployFailureReason::classify("User is not authorized: AccessDenied"),
            DeployFailureReason::AccessDenied
        );
    }

    #[test]
    fn test_validation_error() {
        assert_eq!(
            DeployFailureReason::classify("An error occurred (ValidationError) during deploy"),
            DeployFailureReason::TemplateValidation
        );
    }

    #[test]
    fn test_npm_and_dependency_failures() {
        assert_eq!(
            DeployFailureReason::classify("npm ERR! code ERESOLVE"),
            DeployFailureReason::DependencyInstall
        );
        assert_eq!(
            DeployFailureReason::classify("could not satisfy dependency tree"),
            DeployFailureReason::DependencyInstall
        );
    }

    #[test]
    fn test_region_misconfiguration() {
        assert_eq!(
            DeployFailureReason::classify("Could not connect: invalid Region configured"),
            DeployFailureReason::RegionInvalid
        );
    }

    #[test]
    fn test_generic_includes_exit_code() {
        let summary = error_summary("something unexpected happened", 2);
        assert_eq!(summary, "cdk deploy failed with exit code 2");
    }

    #[test]
    fn test_classification_order_first_match_wins() {
        // Both the credentials and region markers are present; the
        // credentials check comes first in the table.
        let output = "no credentials have been configured for Region us-east-1";
        assert_eq!(
            DeployFailureReason::classify(output),
            DeployFailureReason::CredentialsMissing
        );
    }
}
