//! Bounded `sh -c` execution shared by the command handler and the
//! command probe.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const MAX_OUTPUT: usize = 10 * 1024;
const POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq)]
pub enum ShellOutcome {
    Exited { success: bool, code: Option<i32>, output: String },
    TimedOut { after: Duration },
    SpawnFailed(String),
}

impl ShellOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ShellOutcome::Exited { success: true, .. })
    }

    /// One-line description for error messages.
    pub fn describe(&self) -> String {
        match self {
            ShellOutcome::Exited { code, output, .. } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                if output.is_empty() {
                    format!("exit {code}")
                } else {
                    format!("exit {code}: {output}")
                }
            }
            ShellOutcome::TimedOut { after } => format!("timed out after {}s", after.as_secs()),
            ShellOutcome::SpawnFailed(e) => format!("failed to spawn: {e}"),
        }
    }
}

/// Run `command` through `sh -c`. `None` timeout waits indefinitely.
///
/// stdout and stderr are drained on their own threads so a chatty child can
/// never fill a pipe and stall. The shell leads its own process group; on
/// timeout the whole group is killed so backgrounded grandchildren release
/// the pipes and the drain threads can be joined.
pub fn run_shell(command: &str, timeout: Option<Duration>) -> ShellOutcome {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return ShellOutcome::SpawnFailed(e.to_string()),
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_thread = std::thread::spawn(move || drain(stdout));
    let stderr_thread = std::thread::spawn(move || drain(stderr));

    let started = Instant::now();
    let status: std::io::Result<ExitStatus> = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {}
            Err(e) => break Err(e),
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                kill_group(child.id());
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout_thread.join();
                let _ = stderr_thread.join();
                return ShellOutcome::TimedOut { after: limit };
            }
        }
        std::thread::sleep(POLL);
    };

    let out = stdout_thread.join().unwrap_or_default();
    let err = stderr_thread.join().unwrap_or_default();

    match status {
        Ok(status) => ShellOutcome::Exited {
            success: status.success(),
            code: status.code(),
            output: combine(&out, &err),
        },
        Err(e) => ShellOutcome::SpawnFailed(format!("wait failed: {e}")),
    }
}

/// SIGKILL every process in the group led by `pid`. Best-effort.
fn kill_group(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg("--")
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

fn drain<R: Read>(reader: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut r) = reader {
        let _ = r.read_to_string(&mut buf);
    }
    buf
}

/// Combine stdout/stderr and cap to 10KB (keeping the tail).
fn combine(stdout: &str, stderr: &str) -> String {
    let output = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.trim().to_string(),
        (true, false) => stderr.trim().to_string(),
        (false, false) => format!("{}\n{}", stdout.trim(), stderr.trim()),
    };
    if output.len() <= MAX_OUTPUT {
        return output;
    }
    let mut start = output.len() - MAX_OUTPUT;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    output[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_success_and_output() {
        let out = run_shell("echo hello", Some(Duration::from_secs(10)));
        assert!(out.success());
        match out {
            ShellOutcome::Exited { output, code, .. } => {
                assert_eq!(output, "hello");
                assert_eq!(code, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nonzero_exit_is_not_success() {
        let out = run_shell("echo oops >&2; exit 3", None);
        assert!(!out.success());
        assert_eq!(out.describe(), "exit 3: oops");
    }

    #[test]
    fn timeout_kills_child() {
        let started = Instant::now();
        let out = run_shell("sleep 30", Some(Duration::from_millis(200)));
        assert!(matches!(out, ShellOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn timeout_kills_backgrounded_grandchildren() {
        let started = Instant::now();
        let out = run_shell("sleep 30 & sleep 30", Some(Duration::from_millis(200)));
        assert!(matches!(out, ShellOutcome::TimedOut { .. }));
        // joining the drain threads would block here if the background
        // sleep still held the pipes
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn output_is_capped() {
        let long = "x".repeat(MAX_OUTPUT * 2);
        assert_eq!(combine(&long, "").len(), MAX_OUTPUT);
    }
}
