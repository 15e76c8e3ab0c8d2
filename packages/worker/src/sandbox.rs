//! Shells out to the fixed sandbox command template and parses the
//! companion timing report.
//!
//! The template is `timeout <T>s <sandbox> --quiet /bin/bash -c
//! "ulimit -s <stack> && { time ./program < in.txt; } 2> time.txt"`, run
//! inside the scratch directory. Exit code 124 means the wall-clock timeout
//! fired; exceeding the captured-output cap kills the child and is reported
//! separately; any other non-zero exit is an abnormal run.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

/// Exit code coreutils `timeout` uses when it kills the command.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Extra wall time allowed for the wrapper itself before the in-process
/// backstop kills the child.
const WAIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to run sandboxed process: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to capture sandboxed process output: {0}")]
    Capture(String),
}

/// Whether the run is wrapped in the OS-level sandbox. Reference runs are
/// not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Isolation {
    Sandboxed,
    None,
}

/// Resource caps for one run.
#[derive(Clone, Debug)]
pub struct RunLimits {
    pub wall_timeout: Duration,
    pub stack_kib: u32,
    pub output_cap_bytes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    Timeout,
    OutputCap,
    /// Non-zero exit code, or -1 when the process died to a signal.
    Failed(i32),
}

/// Timing report parsed from `time.txt`, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeReport {
    pub real_ms: f64,
    pub user_ms: f64,
    pub sys_ms: f64,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub exit: ExitKind,
    pub stdout: String,
    /// Wrapper-level stderr; the program's own stderr lands in `time.txt`
    /// with the timing report.
    pub stderr: String,
    /// None when the report could not be parsed (e.g. the process never
    /// started).
    pub timing: Option<TimeReport>,
}

pub struct Sandbox {
    bin: String,
}

impl Sandbox {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Handle for reference runs; the wrapper binary is never invoked with
    /// [`Isolation::None`].
    pub fn unsandboxed() -> Self {
        Self { bin: String::new() }
    }

    /// Run `./program < in.txt` inside `dir` under the command template.
    pub async fn run(
        &self,
        dir: &Path,
        limits: &RunLimits,
        isolation: Isolation,
    ) -> Result<RunOutcome, SandboxError> {
        let timeout_secs = limits.wall_timeout.as_secs().max(1);
        let inner = format!(
            "ulimit -s {} && {{ time ./program < in.txt; }} 2> time.txt",
            limits.stack_kib
        );

        let mut command = Command::new("timeout");
        command.arg(format!("{timeout_secs}s"));
        if isolation == Isolation::Sandboxed {
            command.arg(&self.bin).arg("--quiet");
        }
        command
            .arg("/bin/bash")
            .arg("-c")
            .arg(&inner)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;

        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Capture("stderr pipe missing".into()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Capture("stdout pipe missing".into()))?;

        let mut stdout_buf: Vec<u8> = Vec::new();
        let mut capped = false;
        let mut chunk = [0u8; 8192];
        loop {
            let n = stdout_pipe.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            if stdout_buf.len() + n > limits.output_cap_bytes {
                capped = true;
                let _ = child.start_kill();
                break;
            }
            stdout_buf.extend_from_slice(&chunk[..n]);
        }
        drop(stdout_pipe);

        // `timeout` enforces the wall clock; the in-process backstop only
        // fires if the wrapper itself wedges.
        let status = match tokio::time::timeout(limits.wall_timeout + WAIT_GRACE, child.wait())
            .await
        {
            Ok(status) => Some(status?),
            Err(_) => {
                warn!(dir = %dir.display(), "Sandbox wrapper missed its own timeout, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        let stderr_buf = stderr_task
            .await
            .map_err(|e| SandboxError::Capture(e.to_string()))?;

        let exit = if capped {
            ExitKind::OutputCap
        } else {
            match status {
                None => ExitKind::Timeout,
                Some(s) if s.success() => ExitKind::Success,
                Some(s) => match s.code() {
                    Some(TIMEOUT_EXIT_CODE) => ExitKind::Timeout,
                    Some(code) => ExitKind::Failed(code),
                    None => ExitKind::Failed(-1),
                },
            }
        };

        let report = tokio::fs::read_to_string(dir.join("time.txt"))
            .await
            .unwrap_or_default();

        Ok(RunOutcome {
            exit,
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            timing: parse_time_report(&report),
        })
    }
}

/// Parse the `real`/`user`/`sys` lines bash's `time` writes. The program's
/// own stderr shares the file, so unrelated lines are skipped.
pub fn parse_time_report(content: &str) -> Option<TimeReport> {
    let mut real = None;
    let mut user = None;
    let mut sys = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("real"), Some(value)) => real = parse_minutes_seconds(value),
            (Some("user"), Some(value)) => user = parse_minutes_seconds(value),
            (Some("sys"), Some(value)) => sys = parse_minutes_seconds(value),
            _ => {}
        }
    }

    Some(TimeReport {
        real_ms: real?,
        user_ms: user?,
        sys_ms: sys?,
    })
}

/// "1m2.345s" -> 62345.0 ms.
fn parse_minutes_seconds(value: &str) -> Option<f64> {
    let rest = value.strip_suffix('s')?;
    let (minutes, seconds) = rest.split_once('m')?;
    let minutes: f64 = minutes.parse().ok()?;
    let seconds: f64 = seconds.parse().ok()?;
    Some((minutes * 60.0 + seconds) * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_program(dir: &Path, script: &str) {
        let path = dir.join("program");
        std::fs::write(&path, format!("#!/bin/bash\n{script}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    fn limits(timeout_secs: u64, cap: usize) -> RunLimits {
        RunLimits {
            wall_timeout: Duration::from_secs(timeout_secs),
            stack_kib: 16384,
            output_cap_bytes: cap,
        }
    }

    #[test]
    fn test_parse_minutes_seconds() {
        assert_eq!(parse_minutes_seconds("0m0.003s"), Some(3.0));
        assert_eq!(parse_minutes_seconds("1m2.345s"), Some(62345.0));
        assert_eq!(parse_minutes_seconds("garbage"), None);
    }

    #[test]
    fn test_parse_time_report() {
        let report = "\nreal\t0m1.500s\nuser\t0m0.250s\nsys\t0m0.050s\n";
        let timing = parse_time_report(report).unwrap();
        assert_eq!(timing.real_ms, 1500.0);
        assert_eq!(timing.user_ms, 250.0);
        assert_eq!(timing.sys_ms, 50.0);
    }

    #[test]
    fn test_parse_time_report_skips_program_stderr() {
        let report = "warning: something\nreal\t0m0.010s\nuser\t0m0.000s\nsys\t0m0.000s";
        assert!(parse_time_report(report).is_some());
    }

    #[test]
    fn test_parse_time_report_incomplete() {
        assert_eq!(parse_time_report(""), None);
        assert_eq!(parse_time_report("real\t0m1.000s"), None);
    }

    #[tokio::test]
    async fn test_run_echoes_stdin() {
        let dir = tempfile::tempdir().unwrap();
        write_program(dir.path(), "cat in.txt");
        std::fs::write(dir.path().join("in.txt"), "hello\n").unwrap();

        let sandbox = Sandbox::unsandboxed();
        let outcome = sandbox
            .run(dir.path(), &limits(10, 1024 * 1024), Isolation::None)
            .await
            .unwrap();

        assert_eq!(outcome.exit, ExitKind::Success);
        assert_eq!(outcome.stdout, "hello\n");
        let timing = outcome.timing.unwrap();
        assert!(timing.real_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_run_reports_failure_code() {
        let dir = tempfile::tempdir().unwrap();
        write_program(dir.path(), "exit 3");
        std::fs::write(dir.path().join("in.txt"), "").unwrap();

        let sandbox = Sandbox::unsandboxed();
        let outcome = sandbox
            .run(dir.path(), &limits(10, 1024), Isolation::None)
            .await
            .unwrap();

        assert_eq!(outcome.exit, ExitKind::Failed(3));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        write_program(dir.path(), "sleep 30");
        std::fs::write(dir.path().join("in.txt"), "").unwrap();

        let sandbox = Sandbox::unsandboxed();
        let outcome = sandbox
            .run(dir.path(), &limits(1, 1024), Isolation::None)
            .await
            .unwrap();

        assert_eq!(outcome.exit, ExitKind::Timeout);
    }

    #[tokio::test]
    async fn test_run_enforces_output_cap() {
        let dir = tempfile::tempdir().unwrap();
        write_program(dir.path(), "yes capped | head -c 100000");
        std::fs::write(dir.path().join("in.txt"), "").unwrap();

        let sandbox = Sandbox::unsandboxed();
        let outcome = sandbox
            .run(dir.path(), &limits(10, 4096), Isolation::None)
            .await
            .unwrap();

        assert_eq!(outcome.exit, ExitKind::OutputCap);
    }
}
