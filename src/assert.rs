//! Fail-fast checks over the reporting capability.
//!
//! Every check is silent on success (unless verbose logging is enabled)
//! and terminates the enclosing test unit on violation. This layer is the
//! only place errors become fatal: the supervisor and the topology builder
//! return error values, assertions turn them into terminated units.

use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use regex::Regex;

use crate::program::{Program, ProgramSpec};
use crate::report::Report;
use crate::{Error, HarnessConfig, Result};

/// What a produced error is required to look like.
#[derive(Debug, Clone)]
pub enum ErrorMatch {
    /// The error's display text, exactly.
    Exact(String),
    /// A pattern the error's display text must match.
    Pattern(Regex),
    /// `true`: any error will do; `false`: there must be none.
    Present(bool),
}

/// Assertion surface for one test unit.
#[derive(Clone, Copy)]
pub struct Assert<'a> {
    report: &'a dyn Report,
    config: &'a HarnessConfig,
}

impl<'a> Assert<'a> {
    pub fn new(report: &'a dyn Report, config: &'a HarnessConfig) -> Self {
        Self { report, config }
    }

    pub fn report(&self) -> &'a dyn Report {
        self.report
    }

    pub fn config(&self) -> &'a HarnessConfig {
        self.config
    }

    /// Log a message only when verbose output is enabled.
    pub fn comment(&self, msg: &str) {
        if self.config.verbosity.log_output() {
            self.report.log(msg);
        }
    }

    /// Require success, returning the value.
    pub fn ok<T>(&self, result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => self.report.fail_now(&err.to_string()),
        }
    }

    /// Require an error.
    pub fn err<T>(&self, result: Result<T>) {
        if result.is_ok() {
            self.report.fail_now("not error");
        }
    }

    /// Require the result's error to satisfy `matcher`.
    pub fn error_matches<T>(&self, result: Result<T>, matcher: &ErrorMatch) {
        let err = result.err();
        match matcher {
            ErrorMatch::Exact(want) => {
                if err.as_ref().map(|e| e.to_string()).as_deref() != Some(want) {
                    self.report.fail_now(&format!("expected {want:?}"));
                }
            }
            ErrorMatch::Pattern(re) => {
                if !err.as_ref().is_some_and(|e| re.is_match(&e.to_string())) {
                    self.report.fail_now(&format!("expected {:?}", re.as_str()));
                }
            }
            ErrorMatch::Present(true) => {
                if err.is_none() {
                    self.report.fail_now("not error");
                }
            }
            ErrorMatch::Present(false) => {
                if let Some(err) = err {
                    self.report.fail_now(&err.to_string());
                }
            }
        }
    }

    /// Require string equality.
    pub fn equal(&self, s: &str, expect: &str) {
        if s != expect {
            self.report.fail_now(&format!("{s:?}\n\t!= {expect:?}"));
        }
    }

    /// Require the string to match the pattern.
    pub fn matches(&self, s: &str, pattern: &str) {
        if !self.matches_non_fatal(s, pattern) {
            self.report.fail_now(&format!("{s:?}\n\t!= @({pattern})"));
        }
    }

    pub fn matches_non_fatal(&self, s: &str, pattern: &str) -> bool {
        match Regex::new(pattern) {
            Ok(re) => re.is_match(s),
            Err(err) => self.report.fail_now(&format!("bad pattern {pattern:?}: {err}")),
        }
    }

    pub fn is_true(&self, t: bool) {
        if !t {
            self.report.fail_now("not true");
        }
    }

    pub fn is_false(&self, t: bool) {
        if t {
            self.report.fail_now("not false");
        }
    }

    /// Require the program to run without error.
    pub fn program(&self, spec: ProgramSpec) {
        let run = self.begin(spec).and_then(Program::end);
        if let Err(err) = run {
            self.report.fail_now(&err.to_string());
        }
    }

    /// Like [`Assert::program`] but reports the outcome instead of failing.
    pub fn program_non_fatal(&self, spec: ProgramSpec) -> bool {
        self.begin(spec).and_then(Program::end).is_ok()
    }

    /// Require the program to fail with an error satisfying `matcher`.
    pub fn program_err(&self, matcher: &ErrorMatch, spec: ProgramSpec) {
        let run = self.begin(spec).and_then(Program::end);
        self.error_matches(run, matcher);
    }

    /// Run the program up to `tries` times, one second apart, until it
    /// succeeds; fatal only after every attempt failed.
    pub fn program_retry(&self, tries: usize, spec: ProgramSpec) {
        let mut last = None;
        for attempt in 0..tries {
            if attempt > 0 {
                thread::sleep(Duration::from_secs(1));
            }
            match self.begin(spec.clone()).and_then(Program::end) {
                Ok(_) => return,
                Err(err) => last = Some(err),
            }
        }
        let Some(err) = last else {
            return;
        };
        self.report
            .fail_now(&format!("{:?} after {tries} tries: {err}", spec.args()));
    }

    /// Start a program in the background, for a later `quit`.
    pub fn background(&self, spec: ProgramSpec) -> Program<'a> {
        match self.begin(spec) {
            Ok(program) => program,
            Err(err) => self.report.fail_now(&err.to_string()),
        }
    }

    fn begin(&self, spec: ProgramSpec) -> Result<Program<'a>> {
        Program::start(spec, self.report, self.config)
    }

    /// Require a ping response from `addr` within one second.
    ///
    /// Issues up to 4 echo requests 250 ms apart, scoped into `netns` when
    /// one is named. Offers the interactive pause hook before the fatal
    /// report so an operator can inspect the live topology.
    pub fn ping(&self, netns: &str, addr: &str) {
        const PERIOD: Duration = Duration::from_millis(250);
        let args = ping_args(netns, addr);
        if self.config.verbosity.log_exec() {
            self.report.log(&format!("{args:?}"));
        }
        for _ in 0..4 {
            if quiet_run(&args) {
                return;
            }
            thread::sleep(PERIOD);
        }
        let _ = self.config.pause.prompt(&format!("failed {netns} ping {addr}"));
        self.report.fail_now(&Error::NoResponse(addr.to_string()).to_string());
    }

    /// One echo request; reports reachability instead of failing.
    pub fn ping_non_fatal(&self, netns: &str, addr: &str) -> bool {
        quiet_run(&ping_args(netns, addr))
    }

    /// Require the named interface to report carrier within 3 seconds.
    pub fn carrier(&self, netns: &str, ifname: &str) {
        if let Err(err) = carrier(netns, ifname) {
            self.report.fail_now(&err.to_string());
        }
    }

    /// Require that nothing is listening on the named Unix-domain socket.
    ///
    /// Checked against the kernel's socket table; an unreadable table
    /// passes silently.
    pub fn no_listener(&self, atsockname: &str) {
        let Ok(table) = std::fs::read_to_string("/proc/net/unix") else {
            return;
        };
        if table.contains(atsockname) {
            self.report.fail_now(&format!("{atsockname} in use"));
        }
    }
}

/// Poll the carrier file of the named interface every 250 ms for up to
/// 3 seconds; `"1\n"` is carrier.
pub fn carrier(netns: &str, ifname: &str) -> Result<()> {
    const PERIOD: Duration = Duration::from_millis(250);
    let file = Path::new("/sys/class/net").join(ifname).join("carrier");
    let mut args = vec!["cat".to_string(), file.display().to_string()];
    if in_namespace(netns) {
        args = namespace_wrap(netns, args);
    }
    for _ in 0..12 {
        let output = Command::new(&args[0]).args(&args[1..]).output()?;
        if !output.status.success() {
            return Err(Error::Stderr(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        if output.stdout == b"1\n" {
            return Ok(());
        }
        thread::sleep(PERIOD);
    }
    Err(Error::NoCarrier(ifname.to_string()))
}

fn ping_args(netns: &str, addr: &str) -> Vec<String> {
    let args = ["ping", "-q", "-c", "1", "-W", "1", addr]
        .map(String::from)
        .to_vec();
    if in_namespace(netns) {
        namespace_wrap(netns, args)
    } else {
        args
    }
}

fn in_namespace(netns: &str) -> bool {
    !netns.is_empty() && netns != "default"
}

fn namespace_wrap(netns: &str, args: Vec<String>) -> Vec<String> {
    let mut wrapped = ["ip", "netns", "exec", netns].map(String::from).to_vec();
    wrapped.extend(args);
    wrapped
}

fn quiet_run(args: &[String]) -> bool {
    Command::new(&args[0])
        .args(&args[1..])
        .output()
        .is_ok_and(|out| out.status.success())
}
