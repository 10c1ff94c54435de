//! Deadline-bounded subprocess execution with merged line capture.

use cloudlink::config::CommandSpec;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use zeroize::Zeroizing;

const REDACTED: &str = "[redacted]";

/// Ordered, append-only build log that masks known secrets.
#[derive(Default)]
pub struct BuildLog {
    lines: Vec<String>,
    secrets: Vec<Zeroizing<String>>,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Masks `secret` in every line pushed from now on.
    pub fn add_secret(&mut self, secret: &str) {
        if !secret.is_empty() {
            self.secrets.push(Zeroizing::new(secret.to_string()));
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let mut line = line.into();
        for secret in &self.secrets {
            if line.contains(secret.as_str()) {
                line = line.replace(secret.as_str(), REDACTED);
            }
        }
        self.lines.push(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },

    #[error("{program} was killed at the build deadline")]
    DeadlineExceeded { program: String },

    #[error("lost contact with {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// One command to run: the configured program plus per-call arguments.
pub struct Invocation<'a> {
    pub spec: &'a CommandSpec,
    pub args: Vec<String>,
    pub cwd: &'a Path,
    pub env: Vec<(String, String)>,
}

impl<'a> Invocation<'a> {
    pub fn new(spec: &'a CommandSpec, cwd: &'a Path) -> Self {
        Self {
            spec,
            args: Vec::new(),
            cwd,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn display(&self) -> String {
        let mut parts = vec![self.spec.program.clone()];
        parts.extend(self.spec.args.iter().cloned());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Runs `invocation` to completion, appending its stdout and stderr to `log`
/// line by line in arrival order.
///
/// The child runs in its own process group. The whole group is killed if it
/// is still running at `deadline`, and any background stragglers are killed
/// once the child exits. A non-zero exit is an error.
pub async fn run(invocation: Invocation<'_>, deadline: Instant, log: &mut BuildLog) -> Result<(), RunError> {
    let program = invocation.spec.program.clone();
    log.push(format!("$ {}", invocation.display()));

    let mut command = Command::new(&invocation.spec.program);
    command
        .args(&invocation.spec.args)
        .args(&invocation.args)
        .current_dir(invocation.cwd)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so wrappers like `npx` or `sh -c` take their
    // descendants down with them.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    debug!(program = %program, pid = ?pid, "Spawned subprocess");

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        kill_group(&program, pid);
        let _ = child.kill().await;
        return Err(RunError::Io {
            program,
            source: std::io::Error::new(std::io::ErrorKind::Other, "output pipes unavailable"),
        });
    };

    let status = match timeout_at(deadline, pump(&mut child, stdout, stderr, log)).await {
        Ok(Ok(status)) => {
            // Anything the step left running in the background.
            kill_group(&program, pid);
            status
        }
        Ok(Err(source)) => {
            kill_group(&program, pid);
            let _ = child.kill().await;
            return Err(RunError::Io { program, source });
        }
        Err(_) => {
            warn!(program = %program, "Deadline reached, killing subprocess");
            kill_group(&program, pid);
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "Failed to kill subprocess");
            }
            return Err(RunError::DeadlineExceeded { program });
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(RunError::Failed { program, status })
    }
}

/// SIGKILL to the process group led by `pid`. A group that is already gone
/// is not an error.
#[cfg(unix)]
fn kill_group(program: &str, pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(program = %program, pgid = pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_program: &str, _pid: Option<u32>) {}

async fn pump(
    child: &mut Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    log: &mut BuildLog,
) -> std::io::Result<ExitStatus> {
    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            line = out.next_line(), if out_open => match line? {
                Some(line) => log.push(line),
                None => out_open = false,
            },
            line = err.next_line(), if err_open => match line? {
                Some(line) => log.push(line),
                None => err_open = false,
            },
        }
    }

    child.wait().await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", &["-c", script])
    }

    fn soon(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn test_log_masks_secrets() {
        let mut log = BuildLog::new();
        log.add_secret("tok_123");
        log.add_secret("");
        log.push("pushing with tok_123 now");
        assert_eq!(log.lines(), &["pushing with [redacted] now".to_string()]);
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let spec = sh("echo out-1; echo err-1 >&2; echo out-2");
        let dir = std::env::temp_dir();
        let mut log = BuildLog::new();

        run(Invocation::new(&spec, &dir), soon(10), &mut log)
            .await
            .unwrap();

        let lines = log.lines();
        assert!(lines[0].starts_with("$ sh -c"));
        assert!(lines.contains(&"out-1".to_string()));
        assert!(lines.contains(&"err-1".to_string()));
        let first = lines.iter().position(|l| l == "out-1").unwrap();
        let second = lines.iter().position(|l| l == "out-2").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_env_and_cwd() {
        let spec = sh("echo \"$GREETING from $(pwd)\"");
        let dir = tempfile::TempDir::new().unwrap();
        let cwd = dir.path().canonicalize().unwrap();
        let mut log = BuildLog::new();
        log.add_secret("hello");

        run(
            Invocation::new(&spec, &cwd).env("GREETING", "hello"),
            soon(10),
            &mut log,
        )
        .await
        .unwrap();

        assert_eq!(
            log.lines().last().unwrap(),
            &format!("[redacted] from {}", cwd.display())
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let spec = sh("echo failing; exit 3");
        let dir = std::env::temp_dir();
        let mut log = BuildLog::new();

        let err = run(Invocation::new(&spec, &dir), soon(10), &mut log)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Failed { ref status, .. } if status.code() == Some(3)));
        assert!(log.lines().contains(&"failing".to_string()));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz", &[]);
        let dir = std::env::temp_dir();
        let mut log = BuildLog::new();

        let err = run(Invocation::new(&spec, &dir), soon(10), &mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_deadline_kills_process() {
        let spec = sh("echo started; sleep 30");
        let dir = std::env::temp_dir();
        let mut log = BuildLog::new();
        let started = std::time::Instant::now();

        let err = run(
            Invocation::new(&spec, &dir),
            Instant::now() + Duration::from_millis(300),
            &mut log,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RunError::DeadlineExceeded { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_deadline_kills_descendants() {
        let spec = sh("(sleep 1; touch marker); echo done");
        let dir = tempfile::TempDir::new().unwrap();
        let mut log = BuildLog::new();

        let err = run(
            Invocation::new(&spec, dir.path()),
            Instant::now() + Duration::from_millis(300),
            &mut log,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::DeadlineExceeded { .. }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!dir.path().join("marker").exists());
        assert!(!log.lines().contains(&"done".to_string()));
    }

    #[tokio::test]
    async fn test_background_leftovers_are_killed() {
        let spec = sh("(sleep 1; touch marker) >/dev/null 2>&1 & echo started");
        let dir = tempfile::TempDir::new().unwrap();
        let mut log = BuildLog::new();

        run(Invocation::new(&spec, dir.path()), soon(10), &mut log)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!dir.path().join("marker").exists());
    }
}
