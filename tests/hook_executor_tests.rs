//! # Hook Executor Tests
//!
//! Runs synthesized hook scripts under a real bash and checks the strict
//! shell options and the environment contract.

use tokio::sync::watch;

use cdkstack_controller::controller::hooks::{execute_script, HookName};

fn idle_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[tokio::test]
async fn test_hook_sees_contract_environment() {
    let (_tx, rx) = idle_shutdown();
    let env = vec![
        ("CDK_STACK_NAME".to_string(), "BillingStack".to_string()),
        ("CDK_OPERATION".to_string(), "beforeDeploy".to_string()),
    ];
    let result = execute_script(
        HookName::BeforeDeploy,
        "echo stack=$CDK_STACK_NAME op=$CDK_OPERATION",
        env,
        rx,
    )
    .await
    .unwrap();
    assert!(result.success());
    assert!(result.output.contains("stack=BillingStack"));
    assert!(result.output.contains("op=beforeDeploy"));
}

#[tokio::test]
async fn test_hook_exit_code_is_propagated() {
    let (_tx, rx) = idle_shutdown();
    let result = execute_script(HookName::AfterDeploy, "exit 7", vec![], rx)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 7);
}

#[tokio::test]
async fn test_errexit_stops_the_script() {
    let (_tx, rx) = idle_shutdown();
    let result = execute_script(
        HookName::BeforeDestroy,
        "false\necho should-not-print",
        vec![],
        rx,
    )
    .await
    .unwrap();
    assert!(!result.success());
    assert!(!result.output.contains("should-not-print"));
}

#[tokio::test]
async fn test_nounset_rejects_undefined_variables() {
    let (_tx, rx) = idle_shutdown();
    let result = execute_script(
        HookName::AfterGitSync,
        "echo $CDK_DEFINITELY_UNDEFINED_VARIABLE",
        vec![],
        rx,
    )
    .await
    .unwrap();
    assert!(!result.success());
}

#[tokio::test]
async fn test_stage_extras_reach_the_script() {
    let (_tx, rx) = idle_shutdown();
    let env = vec![("DRIFT_DETECTED".to_string(), "true".to_string())];
    let result = execute_script(
        HookName::AfterDriftDetection,
        r#"[ "$DRIFT_DETECTED" = "true" ]"#,
        env,
        rx,
    )
    .await
    .unwrap();
    assert!(result.success());
}
