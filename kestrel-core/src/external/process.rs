//! External process execution with line streaming and cooperative cancel.
//!
//! Every external binary the pipeline touches goes through [`run_streaming`].
//! The contract: spawn a child, stream its stdout and stderr line by line,
//! keep a bounded stderr tail for failure reports, and guarantee the child is
//! reaped on every exit path. On cancellation or timeout the child gets a
//! terminate signal, a 5 second grace window, then a kill.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use log::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::error::{launch_error, CoreError, CoreResult};

/// Number of stderr lines retained for failure reports.
const STDERR_TAIL_LINES: usize = 50;

/// Grace window between terminate and kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Poll interval for child exit and cancellation checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An argument vector for one external tool invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Binary name, also used in error messages.
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render for log lines; arguments are space-joined without quoting.
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Result of a completed child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    /// Last [`STDERR_TAIL_LINES`] lines of stderr.
    pub stderr_tail: String,
}

/// Which stream a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Child handle that is reaped on drop, whatever the exit path.
struct ChildGuard {
    child: Child,
    program: String,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child, program: &str) -> Self {
        Self {
            child,
            program: program.to_string(),
            reaped: false,
        }
    }

    /// Send a termination signal, grant the grace window, then kill.
    fn stop(&mut self) {
        terminate(&self.child);
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => {
                    self.reaped = true;
                    return;
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
        warn!(
            "{} did not exit within {:?} of terminate, killing",
            self.program, TERMINATE_GRACE
        );
        let _ = self.child.kill();
        if self.child.wait().is_ok() {
            self.reaped = true;
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Deliver SIGTERM on unix so ffmpeg can flush trailers; elsewhere fall back
/// to an immediate kill.
#[cfg(unix)]
fn terminate(child: &Child) {
    // SAFETY: kill(2) with a pid we own and a valid signal number.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(child: &Child) {
    let _ = child.id();
}

/// Spawn `spec` and stream its output.
///
/// `on_stdout`/`on_stderr` receive each line as it arrives, on the calling
/// thread. `timeout` bounds the total wall-clock runtime. Returns
/// [`CoreError::Cancelled`] if the token fires, [`CoreError::ProcessExit`]
/// on a non-zero exit, and the captured output otherwise.
pub fn run_streaming(
    spec: &CommandSpec,
    cancel: &CancelToken,
    timeout: Option<Duration>,
    mut on_stdout: Option<&mut dyn FnMut(&str)>,
    mut on_stderr: Option<&mut dyn FnMut(&str)>,
) -> CoreResult<ProcessOutput> {
    trace!("spawning: {}", spec.display());

    let child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| launch_error(&spec.program, e))?;

    let mut guard = ChildGuard::new(child, &spec.program);

    let (line_tx, line_rx) = unbounded::<(StreamKind, String)>();

    // One blocking reader thread per stream; each drops its sender at EOF.
    let mut readers = Vec::new();
    if let Some(stdout) = guard.child.stdout.take() {
        let tx = line_tx.clone();
        readers.push(std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if tx.send((StreamKind::Stdout, line)).is_err() {
                    break;
                }
            }
        }));
    }
    if let Some(stderr) = guard.child.stderr.take() {
        let tx = line_tx.clone();
        readers.push(std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if tx.send((StreamKind::Stderr, line)).is_err() {
                    break;
                }
            }
        }));
    }
    drop(line_tx);

    let started = Instant::now();
    let mut tail: std::collections::VecDeque<String> =
        std::collections::VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut interrupted: Option<CoreError> = None;

    loop {
        if interrupted.is_none() {
            if cancel.is_cancelled() {
                debug!("cancel requested, stopping {}", spec.program);
                guard.stop();
                interrupted = Some(CoreError::Cancelled);
            } else if let Some(limit) = timeout {
                if started.elapsed() > limit {
                    warn!(
                        "{} exceeded its {:.0}s timeout, stopping",
                        spec.program,
                        limit.as_secs_f64()
                    );
                    guard.stop();
                    interrupted = Some(CoreError::RetryableEncode {
                        segment: usize::MAX,
                        reason: format!("{} timed out after {:?}", spec.program, limit),
                    });
                }
            }
        }

        match line_rx.recv_timeout(POLL_INTERVAL) {
            Ok((StreamKind::Stdout, line)) => {
                if let Some(cb) = on_stdout.as_deref_mut() {
                    cb(&line);
                }
            }
            Ok((StreamKind::Stderr, line)) => {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
                if let Some(cb) = on_stderr.as_deref_mut() {
                    cb(&line);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // Both reader threads finished; the child has closed its pipes.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for reader in readers {
        let _ = reader.join();
    }

    let status = guard.child.wait().map_err(|e| launch_error(&spec.program, e))?;
    guard.reaped = true;

    if let Some(err) = interrupted {
        return Err(err);
    }

    let exit_code = status.code().unwrap_or(-1);
    let stderr_tail = tail.iter().cloned().collect::<Vec<_>>().join("\n");

    if !status.success() {
        return Err(CoreError::ProcessExit {
            tool: spec.program.clone(),
            code: exit_code,
            tail: stderr_tail,
        });
    }

    Ok(ProcessOutput {
        exit_code,
        stderr_tail,
    })
}

/// Run to completion, collecting all stdout into a string.
pub fn run_capture(spec: &CommandSpec, cancel: &CancelToken) -> CoreResult<String> {
    let mut captured = String::new();
    let mut collect = |line: &str| {
        captured.push_str(line);
        captured.push('\n');
    };
    run_streaming(spec, cancel, None, Some(&mut collect), None)?;
    Ok(captured)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_spec_builder() {
        let spec = CommandSpec::new("ffmpeg")
            .arg("-i")
            .arg("in.mkv")
            .args(["-c:v", "copy"]);
        assert_eq!(spec.program, "ffmpeg");
        assert_eq!(spec.args, vec!["-i", "in.mkv", "-c:v", "copy"]);
        assert_eq!(spec.display(), "ffmpeg -i in.mkv -c:v copy");
    }

    #[test]
    fn missing_binary_is_a_launch_error() {
        let spec = CommandSpec::new("kestrel-test-no-such-binary");
        let err = run_capture(&spec, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, CoreError::ProcessLaunch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_lines() {
        let spec = CommandSpec::new("sh").args(["-c", "echo one; echo two"]);
        let out = run_capture(&spec, &CancelToken::new()).unwrap();
        assert_eq!(out, "one\ntwo\n");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_carries_stderr_tail() {
        let spec = CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let err = run_capture(&spec, &CancelToken::new()).unwrap_err();
        match err {
            CoreError::ProcessExit { tool, code, tail } => {
                assert_eq!(tool, "sh");
                assert_eq!(code, 3);
                assert!(tail.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn pre_cancelled_token_stops_long_process() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let spec = CommandSpec::new("sleep").arg("30");
        let started = Instant::now();
        let err = run_capture(&spec, &cancel).unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
