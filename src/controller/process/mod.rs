//! # Process Runner
//!
//! Uniform invocation of external commands: `git clone`, `npm ci`,
//! `cdk deploy|destroy|diff|drift`, and user hook scripts.
//!
//! Contract: merged stdout+stderr string plus the verbatim exit code. A
//! non-zero exit is never an error at this layer; callers interpret the
//! code (`cdk diff --fail` and `cdk drift --fail` deliberately use exit 1
//! for "differences found"). Spawn failure is the only error path.
//!
//! Children are placed in their own process group so that terminating `cdk`
//! also terminates the `node`/`npm` descendants it spawns. On timeout or
//! shutdown the group receives SIGTERM, then SIGKILL after a grace period.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::constants;

/// Synthesized exit code for a command that exceeded its deadline
/// (GNU timeout convention).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Synthesized exit code for a command cancelled by controller shutdown
/// (128 + SIGTERM).
pub const CANCELLED_EXIT_CODE: i32 = 143;

/// One external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Environment overlay applied on top of the controller's environment.
    /// Credentials travel here and only here; they never enter the
    /// controller's own process environment.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Phase label used in the `=== <PHASE> OUTPUT START/END ===` markers.
    pub label: String,
}

impl CommandSpec {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        label: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        CommandSpec {
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
            timeout,
            label: label.into(),
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }
}

/// Result of a completed (or terminated) command.
#[derive(Debug)]
pub struct CommandOutput {
    /// Merged stdout and stderr.
    pub output: String,
    /// Verbatim exit code, or a synthesized one for timeout/cancellation.
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether the command was cancelled by controller shutdown rather
    /// than finishing on its own.
    pub fn cancelled(&self) -> bool {
        self.exit_code == CANCELLED_EXIT_CODE
    }

    /// Last portion of the output, bounded for embedding in a status
    /// message.
    pub fn tail(&self) -> String {
        tail_chars(&self.output, constants::STATUS_LOG_TRUNCATE_CHARS)
    }
}

/// Keep the last `max` characters of `text`, on a char boundary.
pub fn tail_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim_end();
    let count = trimmed.chars().count();
    if count <= max {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max).collect()
}

/// Run one external command to completion.
///
/// Returns `Err` only when the process cannot be spawned. Every other
/// outcome, including timeout and cancellation, comes back as a
/// [`CommandOutput`] with a meaningful exit code.
/// Resolve only when shutdown is actually signalled. A dropped sender
/// means shutdown can no longer be requested, not that it was.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    loop {
        match shutdown.changed().await {
            Ok(()) if *shutdown.borrow() => return,
            Ok(()) => {}
            Err(_) => futures::future::pending::<()>().await,
        }
    }
}

pub async fn run_command(
    spec: CommandSpec,
    shutdown: watch::Receiver<bool>,
) -> Result<CommandOutput> {
    debug!(
        "Running command: {} {:?} (cwd: {:?}, timeout: {}s)",
        spec.program,
        spec.args,
        spec.cwd,
        spec.timeout.as_secs()
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    // Own process group so group-wide signals reach node/npm descendants.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", spec.program))?;
    let pid = child.id().map(|p| p as i32);

    info!("=== {} OUTPUT START ===", spec.label);

    // Drain both pipes concurrently with the wait so a full pipe can never
    // deadlock the child.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let label_out = spec.label.clone();
    let label_err = spec.label.clone();
    let out_task = tokio::spawn(async move { read_lines(stdout, &label_out).await });
    let err_task = tokio::spawn(async move { read_lines(stderr, &label_err).await });

    let exit_code = tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("Failed to wait for {}", spec.program))?;
            exit_code_of(&status)
        }
        _ = tokio::time::sleep(spec.timeout) => {
            warn!(
                "{} exceeded its {}s deadline, terminating process group",
                spec.label,
                spec.timeout.as_secs()
            );
            terminate(&mut child, pid).await;
            TIMEOUT_EXIT_CODE
        }
        _ = wait_for_shutdown(shutdown) => {
            warn!("{} cancelled by controller shutdown, terminating process group", spec.label);
            terminate(&mut child, pid).await;
            CANCELLED_EXIT_CODE
        }
    };

    let mut output = out_task.await.unwrap_or_default();
    let err_output = err_task.await.unwrap_or_default();
    if !err_output.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&err_output);
    }

    info!("=== {} OUTPUT END ===", spec.label);
    debug!("{} exited with code {}", spec.label, exit_code);

    Ok(CommandOutput { output, exit_code })
}

async fn read_lines<R: AsyncRead + Unpin>(reader: Option<R>, label: &str) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    let mut lines = BufReader::new(reader).lines();
    let mut buf = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        info!("[{}] {}", label, line);
        buf.push_str(&line);
        buf.push('\n');
    }
    buf
}

#[cfg(unix)]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// SIGTERM the child's process group, escalate to SIGKILL after the grace
/// period, and reap the child.
async fn terminate(child: &mut Child, pid: Option<i32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid, libc::SIGTERM);
        }
        let grace = Duration::from_secs(constants::PROCESS_KILL_GRACE_SECS);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
        unsafe {
            libc::killpg(pid, libc::SIGKILL);
        }
        let _ = child.wait().await;
        return;
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_chars_short_input_unchanged() {
        assert_eq!(tail_chars("hello\n", 10), "hello");
    }

    #[test]
    fn test_tail_chars_keeps_the_end() {
        let text = "abcdefghij";
        assert_eq!(tail_chars(text, 4), "ghij");
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            output: String::new(),
            exit_code: 0,
        };
        let failed = CommandOutput {
            output: String::new(),
            exit_code: 1,
        };
        assert!(ok.success());
        assert!(!failed.success());
    }
}
