//! # CDK Argument Assembly Tests
//!
//! Boundary behaviors of the invocation surface: empty stack name targets
//! all stacks, empty context adds no flags, and the deploy gate produces
//! the documented failure message without any workspace activity.

use cdkstack_controller::controller::reconciler::cdk;
use cdkstack_controller::controller::reconciler::classify;
use cdkstack_controller::crd::CdkTsStackSpec;

fn spec_json(value: serde_json::Value) -> CdkTsStackSpec {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_full_deploy_vector() {
    let spec = spec_json(serde_json::json!({
        "stackName": "BillingStack",
        "credentialsSecretName": "aws-creds",
        "cdkContext": ["environment=prod", "owner=platform"],
        "source": { "git": { "repository": "https://github.com/example/app.git" } }
    }));
    assert_eq!(
        cdk::deploy_args(&spec),
        vec![
            "deploy",
            "BillingStack",
            "--require-approval",
            "never",
            "--context",
            "environment=prod",
            "--context",
            "owner=platform",
        ]
    );
}

#[test]
fn test_empty_stack_name_means_all_on_every_invocation() {
    let spec = spec_json(serde_json::json!({
        "credentialsSecretName": "aws-creds",
        "source": { "git": { "repository": "https://github.com/example/app.git" } }
    }));
    for args in [
        cdk::deploy_args(&spec),
        cdk::destroy_args(&spec),
        cdk::diff_args(&spec),
        cdk::drift_args(&spec),
    ] {
        assert_eq!(args[1], "--all", "vector: {:?}", args);
    }
}

#[test]
fn test_empty_context_means_no_context_flags() {
    let spec = spec_json(serde_json::json!({
        "stackName": "S",
        "credentialsSecretName": "aws-creds",
        "source": { "git": { "repository": "https://github.com/example/app.git" } }
    }));
    for args in [
        cdk::deploy_args(&spec),
        cdk::destroy_args(&spec),
        cdk::diff_args(&spec),
        cdk::drift_args(&spec),
    ] {
        assert!(!args.contains(&"--context".to_string()), "vector: {:?}", args);
    }
}

#[test]
fn test_error_summary_table_round_trip() {
    let cases = [
        (
            "Need to perform AWS calls but no credentials have been configured",
            "Credentials secret",
        ),
        ("Unable to resolve AWS account to use", "Unable to resolve AWS account"),
        ("AccessDenied when calling CreateChangeSet", "Access denied"),
        ("ValidationError: template format error", "validation failed"),
        ("npm ERR! peer dep missing", "Dependency installation failed"),
        ("Could not find a Region for this profile", "region misconfiguration"),
    ];
    for (output, expected_fragment) in cases {
        let summary = classify::error_summary(output, 1);
        assert!(
            summary.contains(expected_fragment),
            "output {:?} produced summary {:?}",
            output,
            summary
        );
    }
}
