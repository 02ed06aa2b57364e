//! Bounded-wait supervision of external programs.
//!
//! A [`Program`] runs one external command with captured output and a
//! deadline. The process wait happens on a worker thread reporting through
//! a channel, so the deadline races completion without polling. On timeout
//! the supervisor escalates SIGTERM → SIGKILL with a fixed grace period and
//! still reaps the process; a timeout always manifests as signals, never as
//! silent abandonment. A [`Daemon`] is the long-lived variant stopped at
//! suite end with a TERM → INT → KILL escalation and doubling grace.

use std::io::{self, Write};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use regex::Regex;

use crate::report::Report;
use crate::{Error, HarnessConfig, Result};

/// Default deadline on a supervised program.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Fixed grace period between escalation signals.
const GRACE_PERIOD: Duration = Duration::from_secs(3);

/// One supervised invocation: argument vector plus recognized options.
#[derive(Debug, Clone, Default)]
pub struct ProgramSpec {
    args: Vec<String>,
    stdin: Option<String>,
    timeout: Duration,
    expect: Option<Regex>,
    quiet: bool,
}

impl ProgramSpec {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Feed the given text on stdin instead of the default null stream.
    pub fn stdin(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }

    /// Wait up to `timeout` instead of [`DEFAULT_TIMEOUT`]. A zero duration
    /// keeps the default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Require stdout to match `pattern` for the run to count as a success.
    pub fn expect(mut self, pattern: Regex) -> Self {
        self.expect = Some(pattern);
        self
    }

    /// Don't surface captured output, even on failure.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Signal-escalation states for a timed-out program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    Running,
    TermSent,
    KillSent,
}

/// A started external program with captured output.
pub struct Program<'a> {
    report: &'a dyn Report,
    config: &'a HarnessConfig,
    args: Vec<String>,
    expect: Option<Regex>,
    quiet: bool,
    timeout: Duration,
    pid: u32,
    rx: Receiver<io::Result<Output>>,
    reaped: bool,
}

impl<'a> Program<'a> {
    /// Start the program described by `spec`.
    ///
    /// Fails with [`Error::EmptySpec`] on an empty argument vector and with
    /// an IO error if the binary cannot be spawned.
    pub fn start(
        spec: ProgramSpec,
        report: &'a dyn Report,
        config: &'a HarnessConfig,
    ) -> Result<Self> {
        let ProgramSpec {
            args,
            stdin,
            timeout,
            expect,
            quiet,
        } = spec;
        if args.is_empty() {
            return Err(Error::EmptySpec);
        }
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        if config.verbosity.log_exec() {
            report.log(&format!("{args:?}"));
        }

        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..])
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        let pid = child.id();

        if let Some(text) = stdin {
            let mut pipe = child.stdin.take().expect("stdin was piped");
            thread::spawn(move || {
                let _ = pipe.write_all(text.as_bytes());
            });
        }

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });

        Ok(Self {
            report,
            config,
            args,
            expect,
            quiet,
            timeout,
            pid,
            rx,
            reaped: false,
        })
    }

    /// The process identifier.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// SIGTERM the program, then run the end sequence, logging any error
    /// instead of returning it. For voluntarily started background programs.
    pub fn quit(self) {
        let report = self.report;
        send_signal(self.pid, "TERM");
        if let Err(err) = self.end() {
            report.log(&err.to_string());
        }
    }

    /// Wait for the program to finish or time out, then classify.
    ///
    /// Natural completion: non-empty stderr is the failure text (even on
    /// exit 0); else a non-zero exit; else an unmatched expected pattern.
    /// Timeout: SIGTERM, one grace period, SIGKILL, unconditional reap;
    /// the reported error is the timeout regardless of how the process
    /// eventually exited. Returns captured stdout on success.
    pub fn end(mut self) -> Result<String> {
        self.reaped = true;
        let mut state = Escalation::Running;
        let mut timed_out = false;
        let received = loop {
            let waited = match state {
                Escalation::Running => self.rx.recv_timeout(self.timeout),
                Escalation::TermSent => self.rx.recv_timeout(GRACE_PERIOD),
                Escalation::KillSent => {
                    // nothing left to escalate; reap unconditionally
                    break self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected);
                }
            };
            match waited {
                Ok(output) => break Ok(output),
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(RecvTimeoutError::Disconnected)
                }
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    let signal = match state {
                        Escalation::Running => "TERM",
                        _ => "KILL",
                    };
                    if self.config.verbosity.log_output() || !self.quiet {
                        self.report.log(&format!(
                            "SIG{signal} process {} {:?}",
                            self.pid, self.args
                        ));
                    }
                    send_signal(self.pid, signal);
                    state = match state {
                        Escalation::Running => Escalation::TermSent,
                        _ => Escalation::KillSent,
                    };
                }
            }
        };
        let output = received
            .map_err(|_| io::Error::other("wait worker disconnected"))?
            .map_err(Error::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let verdict = if timed_out {
            Err(Error::Timeout)
        } else if !stderr.trim().is_empty() {
            Err(Error::Stderr(stderr))
        } else if !output.status.success() {
            Err(Error::ExitStatus(output.status.code().unwrap_or(-1)))
        } else if let Some(re) = self.expect.as_ref().filter(|re| !re.is_match(&stdout)) {
            Err(Error::Mismatch(re.to_string()))
        } else {
            Ok(())
        };

        if !self.quiet && (self.config.verbosity.log_output() || verdict.is_err()) {
            let trimmed = stdout.trim_end_matches('\n');
            if !trimmed.is_empty() {
                self.report.log(trimmed);
            }
        }
        verdict.map(|()| stdout)
    }
}

impl Drop for Program<'_> {
    fn drop(&mut self) {
        // dropped without end(): don't leave the child running
        if !self.reaped {
            send_signal(self.pid, "KILL");
            let _ = self.rx.recv();
        }
    }
}

/// A background program started at suite setup and stopped at suite end.
///
/// Construction faults here are deliberate panics: a daemon is started
/// before any supervisor or assertion instance exists to report through.
pub struct Daemon {
    args: Vec<String>,
    pid: u32,
    rx: Receiver<io::Result<Output>>,
}

impl Daemon {
    /// Start the daemon program; panics if it cannot be spawned.
    pub fn start<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        assert!(!args.is_empty(), "missing command args");
        tracing::debug!(?args, "starting daemon");
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => panic!("{args:?}: {err}"),
        };
        let pid = child.id();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(child.wait_with_output());
        });
        Self { args, pid, rx }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop the running daemon with a TERM, INT, then KILL signal, doubling
    /// the grace period at each step. Tolerates a process that has already
    /// exited.
    pub fn stop(self) {
        let mut grace = GRACE_PERIOD;
        let mut timed_out = false;
        send_signal(self.pid, "TERM");
        let mut received = None;
        for signal in ["INT", "KILL"] {
            match self.rx.recv_timeout(grace) {
                Ok(output) => {
                    received = Some(output);
                    break;
                }
                Err(_) => {
                    timed_out = true;
                    grace *= 2;
                    send_signal(self.pid, signal);
                }
            }
        }
        let output = match received {
            Some(output) => output,
            None => match self.rx.recv_timeout(grace) {
                Ok(output) => output,
                Err(_) => {
                    tracing::warn!(pid = self.pid, args = ?self.args, "won't die!");
                    return;
                }
            },
        };
        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if timed_out || !output.status.success() {
                    tracing::warn!(
                        args = ?self.args,
                        status = %output.status,
                        %stdout,
                        %stderr,
                        "daemon stopped",
                    );
                } else if !stdout.trim().is_empty() {
                    tracing::debug!(args = ?self.args, %stdout, "daemon stopped");
                }
            }
            Err(err) => tracing::warn!(args = ?self.args, %err, "daemon wait failed"),
        }
    }
}

/// Run a program to completion, usually from suite setup, and panic on
/// any error.
pub fn run<I, S>(args: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    assert!(!args.is_empty(), "missing command args");
    tracing::debug!(?args, "run");
    let output = match Command::new(&args[0]).args(&args[1..]).output() {
        Ok(output) => output,
        Err(err) => panic!("{args:?}: {err}"),
    };
    if !output.status.success() {
        panic!(
            "{args:?}: {}\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        tracing::debug!(%stdout);
    }
}

/// Deliver a signal by name to a process, best effort.
pub(crate) fn send_signal(pid: u32, signal: &str) {
    let _ = Command::new("kill")
        .args([format!("-{signal}"), pid.to_string()])
        .output();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Recorder;
    use std::time::Instant;

    fn start(spec: ProgramSpec, report: &Recorder) -> Program<'_> {
        // leak: each test config lives for the test duration anyway
        let config: &'static HarnessConfig = Box::leak(Box::default());
        Program::start(spec, report, config).expect("start")
    }

    #[test]
    fn empty_args_is_a_config_error() {
        let report = Recorder::new();
        let config = HarnessConfig::default();
        let err = Program::start(ProgramSpec::default(), &report, &config).err();
        assert!(matches!(err, Some(Error::EmptySpec)));
    }

    #[test]
    fn clean_exit_is_success() {
        let report = Recorder::new();
        let out = start(ProgramSpec::new(["echo", "hi"]), &report)
            .end()
            .expect("echo");
        assert_eq!(out, "hi\n");
    }

    #[test]
    fn stderr_text_is_the_failure_even_on_exit_zero() {
        let report = Recorder::new();
        let err = start(ProgramSpec::new(["sh", "-c", "echo oops >&2"]), &report)
            .end()
            .unwrap_err();
        match err {
            Error::Stderr(text) => assert_eq!(text.trim(), "oops"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn silent_nonzero_exit_reports_status() {
        let report = Recorder::new();
        let err = start(ProgramSpec::new(["sh", "-c", "exit 2"]), &report)
            .end()
            .unwrap_err();
        assert!(matches!(err, Error::ExitStatus(2)));
    }

    #[test]
    fn expected_pattern_gates_success() {
        let report = Recorder::new();
        let re = Regex::new("hel+o").unwrap();
        start(ProgramSpec::new(["echo", "hello"]).expect(re), &report)
            .end()
            .expect("match");

        let re = Regex::new("absent").unwrap();
        let err = start(ProgramSpec::new(["echo", "hello"]).expect(re), &report)
            .end()
            .unwrap_err();
        assert!(matches!(err, Error::Mismatch(_)));
    }

    #[test]
    fn stdin_text_reaches_the_program() {
        let report = Recorder::new();
        let out = start(ProgramSpec::new(["cat"]).stdin("over here"), &report)
            .end()
            .expect("cat");
        assert_eq!(out, "over here");
    }

    #[test]
    fn timeout_terminates_and_reports_timer_expired() {
        let report = Recorder::new();
        let began = Instant::now();
        let err = start(
            ProgramSpec::new(["sleep", "30"]).timeout(Duration::from_millis(100)),
            &report,
        )
        .end()
        .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "timer expired");
        // sleep dies on the first TERM, well before its natural end
        assert!(began.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn sigterm_immune_program_is_killed() {
        let report = Recorder::new();
        let began = Instant::now();
        let err = start(
            ProgramSpec::new(["sh", "-c", "trap '' TERM; exec sleep 30"])
                .timeout(Duration::from_millis(100)),
            &report,
        )
        .end()
        .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        let elapsed = began.elapsed();
        // survived the TERM grace period, then KILL took it down
        assert!(elapsed >= GRACE_PERIOD, "killed too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(20), "not killed: {elapsed:?}");
    }

    #[test]
    fn daemon_stop_tolerates_an_exited_process() {
        let daemon = Daemon::start(["sleep", "0.1"]);
        thread::sleep(Duration::from_millis(400));
        let began = Instant::now();
        daemon.stop();
        assert!(began.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn daemon_stop_terminates_a_live_process() {
        let daemon = Daemon::start(["sleep", "30"]);
        let began = Instant::now();
        daemon.stop();
        // TERM is enough for sleep; no need to ride out the escalation
        assert!(began.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn quit_logs_instead_of_failing() {
        let report = Recorder::new();
        let program = start(ProgramSpec::new(["sleep", "30"]), &report);
        program.quit();
        // TERM before a natural exit means the run logs its error
        assert!(!report.messages().is_empty());
    }
}
