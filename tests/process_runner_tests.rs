//! # Process Runner Tests
//!
//! Exercises the process runner against real shell processes: exit-code
//! semantics, merged output capture, environment overlay, and deadline
//! enforcement.

use std::time::Duration;

use tokio::sync::watch;

use cdkstack_controller::controller::process::{
    run_command, CommandSpec, TIMEOUT_EXIT_CODE,
};

fn sh(script: &str, label: &str, timeout: Duration) -> CommandSpec {
    CommandSpec::new(
        "sh",
        vec!["-c".to_string(), script.to_string()],
        label,
        timeout,
    )
}

fn idle_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[tokio::test]
async fn test_zero_exit_code() {
    let (_tx, rx) = idle_shutdown();
    let result = run_command(sh("exit 0", "TEST", Duration::from_secs(10)), rx)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(result.success());
}

#[tokio::test]
async fn test_non_zero_exit_is_not_an_error() {
    let (_tx, rx) = idle_shutdown();
    let result = run_command(sh("exit 3", "TEST", Duration::from_secs(10)), rx)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 3);
    assert!(!result.success());
}

#[tokio::test]
async fn test_stdout_and_stderr_are_merged() {
    let (_tx, rx) = idle_shutdown();
    let result = run_command(
        sh("echo out-line; echo err-line >&2", "TEST", Duration::from_secs(10)),
        rx,
    )
    .await
    .unwrap();
    assert!(result.output.contains("out-line"));
    assert!(result.output.contains("err-line"));
}

#[tokio::test]
async fn test_environment_overlay_is_applied() {
    let (_tx, rx) = idle_shutdown();
    let spec = sh("echo value=$CDK_TEST_VARIABLE", "TEST", Duration::from_secs(10))
        .envs([("CDK_TEST_VARIABLE".to_string(), "overlay".to_string())]);
    let result = run_command(spec, rx).await.unwrap();
    assert!(result.output.contains("value=overlay"));
}

#[tokio::test]
async fn test_working_directory_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let (_tx, rx) = idle_shutdown();
    let spec = sh("pwd", "TEST", Duration::from_secs(10)).cwd(dir.path());
    let result = run_command(spec, rx).await.unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    assert!(result.output.contains(canonical.to_str().unwrap()));
}

#[tokio::test]
async fn test_deadline_terminates_the_process() {
    let (_tx, rx) = idle_shutdown();
    let started = std::time::Instant::now();
    let result = run_command(sh("sleep 30", "TEST", Duration::from_secs(1)), rx)
        .await
        .unwrap();
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    // SIGTERM should end a sleeping shell well inside the kill grace period.
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn test_spawn_failure_is_an_error() {
    let (_tx, rx) = idle_shutdown();
    let spec = CommandSpec::new(
        "definitely-not-a-real-binary-name",
        vec![],
        "TEST",
        Duration::from_secs(5),
    );
    assert!(run_command(spec, rx).await.is_err());
}
