//! Test harness for validating network-device configuration on a switch
//! platform.
//!
//! This crate provides the pieces a configuration test needs: a bounded-wait
//! process supervisor with signal-escalation teardown, fail-fast assertions,
//! a LIFO rollback registry, and a declarative builder for virtual network
//! topologies (namespaces, VLANs, bridges), plus a container-backed variant
//! for tests that route through containerized daemons.

pub mod assert;
pub mod builder;
pub mod cleanup;
pub mod docker;
pub mod ethtool;
pub mod netport;
pub mod nets;
pub mod program;
pub mod prompt;
pub mod report;
pub mod suite;

pub use assert::{Assert, ErrorMatch};
pub use builder::{BuildOptions, NetTest};
pub use cleanup::{Cleanup, CleanupAction};
pub use docker::{ContainerConfig, ContainerDriver, ContainerTest, RouterIntf, RouterSpec};
pub use netport::{DevKind, DummyIf, NetDev, PortMap, Route, Topology};
pub use program::{Daemon, Program, ProgramSpec, DEFAULT_TIMEOUT};
pub use prompt::{Prompt, PromptOutcome};
pub use report::{Report, TracingReport};
pub use suite::{Suite, TestCtx, Tester};

use std::io::IsTerminal;
use std::sync::Arc;

/// Result type used throughout this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when supervising programs or provisioning topologies
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A program was begun with an empty argument vector.
    #[error("missing command args")]
    EmptySpec,

    /// The program wrote to stderr; the text is the failure, even on exit 0.
    #[error("{0}")]
    Stderr(String),

    /// Non-zero exit with nothing on stderr.
    #[error("exit status {0}")]
    ExitStatus(i32),

    /// The program outlived its timeout and the full signal escalation.
    #[error("timer expired")]
    Timeout,

    /// Stdout did not match the expected pattern.
    #[error("mismatch {0:?}")]
    Mismatch(String),

    /// An interface never reported carrier within the polling window.
    #[error("{0} no carrier")]
    NoCarrier(String),

    /// An address never answered a ping within the attempt budget.
    #[error("{0} no response")]
    NoResponse(String),

    /// Malformed topology or harness configuration.
    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How chatty supervised programs are about what they run and print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Output surfaces only on failure.
    #[default]
    Normal,
    /// Also log captured output of successful programs.
    Output,
    /// Also log every command before it runs.
    Exec,
}

impl Verbosity {
    /// Log captured output even when the program succeeded.
    pub fn log_output(self) -> bool {
        self >= Verbosity::Output
    }

    /// Log each command line as it is executed.
    pub fn log_exec(self) -> bool {
        self >= Verbosity::Exec
    }
}

/// Run-wide flags, read once at startup and threaded through constructors.
///
/// The pause and step prompts carry their own interior state because
/// answering "yes" at a prompt disables it for the rest of the run.
#[derive(Debug, Default)]
pub struct HarnessConfig {
    pub verbosity: Verbosity,
    /// Skip topology builds and test units entirely, reporting them skipped.
    pub dry_run: bool,
    /// Prompt before and after suites and units.
    pub pause: prompt::Prompt,
    /// Prompt before every step.
    pub step: prompt::Prompt,
}

impl HarnessConfig {
    /// Read flags from `SWITCH_TEST_*` environment variables.
    ///
    /// `SWITCH_TEST_VERBOSE=1` logs program output, `=2` also logs
    /// execution; `SWITCH_TEST_DRYRUN`, `SWITCH_TEST_PAUSE`, and
    /// `SWITCH_TEST_STEP` enable the corresponding flag when set.
    /// Pause and step are ignored when stdin is not a terminal.
    pub fn from_env() -> Arc<Self> {
        let verbosity = match std::env::var("SWITCH_TEST_VERBOSE").as_deref() {
            Ok("2") => Verbosity::Exec,
            Ok(v) if !v.is_empty() && v != "0" => Verbosity::Output,
            _ => Verbosity::Normal,
        };
        let config = Self {
            verbosity,
            dry_run: std::env::var_os("SWITCH_TEST_DRYRUN").is_some(),
            pause: prompt::Prompt::new("pause"),
            step: prompt::Prompt::new("step"),
        };
        if std::io::stdin().is_terminal() {
            if std::env::var_os("SWITCH_TEST_PAUSE").is_some() {
                config.pause.set();
            }
            if std::env::var_os("SWITCH_TEST_STEP").is_some() {
                config.step.set();
            }
        }
        Arc::new(config)
    }
}

/// An address literal containing ':' is IPv6; everything else is IPv4.
pub fn is_ipv6(addr: &str) -> bool {
    addr.contains(':')
}
