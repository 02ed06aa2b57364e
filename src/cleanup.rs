//! Deferred rollback actions, unwound in reverse registration order.
//!
//! Every successful provisioning step pushes its inverse here. The registry
//! is a true stack: teardown order is exactly the reverse of build order,
//! which is what makes "members before bridges, interfaces before
//! namespaces" hold without a separately coded reverse walk. Rollback is
//! exhaustive (one failing action never prevents the rest from running)
//! and it runs even when the owning test unit unwinds, because dropping an
//! undrained registry drains it.

use crate::program::{Program, ProgramSpec};
use crate::report::Report;
use crate::HarnessConfig;

/// One deferred command, owned by the registry that will run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupAction {
    pub args: Vec<String>,
    /// Failures of a best-effort action are logged, not reported.
    pub best_effort: bool,
}

/// LIFO registry of rollback actions for one topology build.
pub struct Cleanup<'a> {
    report: &'a dyn Report,
    config: &'a HarnessConfig,
    actions: Vec<CleanupAction>,
}

impl<'a> Cleanup<'a> {
    pub fn new(report: &'a dyn Report, config: &'a HarnessConfig) -> Self {
        Self {
            report,
            config,
            actions: Vec::new(),
        }
    }

    /// Register a rollback command whose failure should be reported.
    pub fn push<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.push(CleanupAction {
            args: args.into_iter().map(Into::into).collect(),
            best_effort: false,
        });
    }

    /// Register a rollback command whose failure is only logged.
    pub fn push_best_effort<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.push(CleanupAction {
            args: args.into_iter().map(Into::into).collect(),
            best_effort: true,
        });
    }

    /// The registered actions, oldest first.
    pub fn actions(&self) -> &[CleanupAction] {
        &self.actions
    }

    /// Run every registered action in reverse registration order.
    pub fn drain(&mut self) {
        while let Some(action) = self.actions.pop() {
            let run = Program::start(
                ProgramSpec::new(action.args.iter().cloned()),
                self.report,
                self.config,
            )
            .and_then(Program::end);
            if let Err(err) = run {
                if action.best_effort {
                    tracing::debug!(args = ?action.args, %err, "best-effort rollback failed");
                } else {
                    self.report.fail(&format!("{:?}: {err}", action.args));
                }
            }
        }
    }
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            self.drain();
        }
    }
}
