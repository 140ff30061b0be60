//! # CDK Invocation Assembly
//!
//! Builds argument vectors for the CDK CLI. An empty `stackName` targets
//! all stacks in the app via `--all`; each `cdkContext` entry becomes one
//! `--context` flag, in spec order.

use crate::crd::CdkTsStackSpec;

/// Positional target: the configured stack or `--all`.
fn target(spec: &CdkTsStackSpec) -> Vec<String> {
    if spec.stack_name.is_empty() {
        vec!["--all".to_string()]
    } else {
        vec![spec.stack_name.clone()]
    }
}

fn context_flags(spec: &CdkTsStackSpec) -> impl Iterator<Item = String> + '_ {
    spec.cdk_context
        .iter()
        .flat_map(|entry| ["--context".to_string(), entry.clone()])
}

/// `cdk deploy <target> --require-approval never [--context k=v]...`
pub fn deploy_args(spec: &CdkTsStackSpec) -> Vec<String> {
    let mut args = vec!["deploy".to_string()];
    args.extend(target(spec));
    args.push("--require-approval".to_string());
    args.push("never".to_string());
    args.extend(context_flags(spec));
    args
}

/// `cdk destroy <target> --force [--context k=v]...`
pub fn destroy_args(spec: &CdkTsStackSpec) -> Vec<String> {
    let mut args = vec!["destroy".to_string()];
    args.extend(target(spec));
    args.push("--force".to_string());
    args.extend(context_flags(spec));
    args
}

/// `cdk diff <target> --fail [--context k=v]...`
///
/// Exit 0 means no differences, exit 1 means differences pending or the
/// command failed; the caller disambiguates.
pub fn diff_args(spec: &CdkTsStackSpec) -> Vec<String> {
    let mut args = vec!["diff".to_string()];
    args.extend(target(spec));
    args.push("--fail".to_string());
    args.extend(context_flags(spec));
    args
}

/// `cdk drift <target> --fail [--context k=v]...`
pub fn drift_args(spec: &CdkTsStackSpec) -> Vec<String> {
    let mut args = vec!["drift".to_string()];
    args.extend(target(spec));
    args.push("--fail".to_string());
    args.extend(context_flags(spec));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(stack_name: &str, context: &[&str]) -> CdkTsStackSpec {
        serde_json::from_value(serde_json::json!({
            "stackName": stack_name,
            "credentialsSecretName": "aws-creds",
            "cdkContext": context,
            "source": { "git": { "repository": "https://github.com/example/app.git" } }
        }))
        .unwrap()
    }

    #[test]
    fn test_named_stack_is_positional() {
        let args = deploy_args(&spec("BillingStack", &[]));
        assert_eq!(
            args,
            vec!["deploy", "BillingStack", "--require-approval", "never"]
        );
    }

    #[test]
    fn test_empty_stack_name_targets_all() {
        assert_eq!(deploy_args(&spec("", &[]))[1], "--all");
        assert_eq!(destroy_args(&spec("", &[]))[1], "--all");
        assert_eq!(diff_args(&spec("", &[]))[1], "--all");
        assert_eq!(drift_args(&spec("", &[]))[1], "--all");
    }

    #[test]
    fn test_context_entries_become_flags_in_order() {
        let args = deploy_args(&spec("S", &["env=prod", "tier=gold"]));
        let tail: Vec<&str> = args.iter().map(String::as_str).skip(4).collect();
        assert_eq!(tail, vec!["--context", "env=prod", "--context", "tier=gold"]);
    }

    #[test]
    fn test_empty_context_adds_no_flags() {
        let args = deploy_args(&spec("S", &[]));
        assert!(!args.iter().any(|a| a == "--context"));
    }

    #[test]
    fn test_destroy_is_forced() {
        assert!(destroy_args(&spec("S", &[])).contains(&"--force".to_string()));
    }

    #[test]
    fn test_checks_carry_fail_flag() {
        assert!(diff_args(&spec("S", &[])).contains(&"--fail".to_string()));
        assert!(drift_args(&spec("S", &[])).contains(&"--fail".to_string()));
    }
}
