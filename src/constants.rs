//! # Constants
//!
//! Controller-wide constants: API group identity, finalizer name, workspace
//! layout, and default timeouts for external commands.

/// API group of the CdkTsStack custom resource.
pub const API_GROUP: &str = "awscdk.dev";

/// API version of the CdkTsStack custom resource.
pub const API_VERSION: &str = "v1alpha1";

/// Finalizer that blocks deletion until `cdk destroy` has been attempted.
pub const FINALIZER: &str = "cdkstack.awscdk.dev/finalizer";

/// Field manager / event source component name.
pub const CONTROLLER_NAME: &str = "cdkstack-controller";

/// Prefix of every workspace directory the controller creates.
pub const WORKSPACE_PREFIX: &str = "/tmp/cdk";

/// Default AWS region when the resource does not specify one.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Default Git ref when the resource does not specify one.
pub const DEFAULT_GIT_REF: &str = "main";

/// Default metric name prefix.
pub const DEFAULT_METRICS_PREFIX: &str = "cdktsstack";

/// Default path for line-JSON metric records.
pub const DEFAULT_METRICS_PATH: &str = "/tmp/cdk-metrics/records.jsonl";

/// Default cron expression for the drift-check sweeper.
pub const DEFAULT_DRIFT_CHECK_CRON: &str = "*/30 * * * *";

/// Default cron expression for the Git-sync sweeper.
pub const DEFAULT_GIT_SYNC_CHECK_CRON: &str = "*/5 * * * *";

/// Default number of reconciles that may run concurrently (distinct keys).
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 4;

/// Default retry budget per resource key before waiting for the next resync.
pub const DEFAULT_RECONCILE_MAX_RETRIES: u32 = 3;

/// Default backoff between retries of a failed reconcile, in seconds.
pub const DEFAULT_RECONCILE_BACKOFF_SECS: u64 = 30;

/// Timeout for `git clone`, in seconds.
pub const GIT_CLONE_TIMEOUT_SECS: u64 = 300;

/// Timeout for `npm ci`, in seconds.
pub const NPM_INSTALL_TIMEOUT_SECS: u64 = 600;

/// Timeout for `cdk deploy` and `cdk destroy`, in seconds.
pub const CDK_DEPLOY_TIMEOUT_SECS: u64 = 1800;

/// Timeout for `cdk diff` and `cdk drift`, in seconds.
pub const CDK_CHECK_TIMEOUT_SECS: u64 = 900;

/// Timeout for a lifecycle hook script, in seconds.
pub const HOOK_TIMEOUT_SECS: u64 = 300;

/// Grace period between SIGTERM and SIGKILL when tearing down a child
/// process group, in seconds.
pub const PROCESS_KILL_GRACE_SECS: u64 = 10;

/// Maximum number of tool-output characters embedded in a status message.
pub const STATUS_LOG_TRUNCATE_CHARS: usize = 600;

/// Transient-from-sweeper marker: an auto-redeploy failed and the Git-sync
/// sweeper owns the retry cadence. The event reconciler must not retry a
/// `Failed` status whose message contains this string.
pub const AUTO_REDEPLOY_FAILED_MARKER: &str = "Auto deployment failed";

/// Transient-from-sweeper marker for Git-sync check failures.
pub const GIT_SYNC_MARKER: &str = "Git sync";

/// Gauge group for drift status records.
pub const DRIFT_STATUS_GROUP: &str = "drift-status";

/// Gauge group for Git-sync status records.
pub const GIT_SYNC_STATUS_GROUP: &str = "git-sync-status";
