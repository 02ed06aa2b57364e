//! The reporting capability consumed by assertions, cleanup, and the suite
//! runner.
//!
//! Fatal reports terminate the enclosing test unit by unwinding with a
//! typed payload; the suite runner catches the unwind at the unit boundary
//! and tells a failure apart from a skip by downcasting.

use std::panic::panic_any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Panic payload marking a failed test unit.
#[derive(Debug)]
pub struct Failure(pub String);

/// Panic payload marking a skipped test unit.
#[derive(Debug)]
pub struct Skipped(pub String);

/// Test-reporting interface: log, record a failure, terminate the unit,
/// or skip it.
pub trait Report: Sync {
    /// Record a message without affecting the outcome.
    fn log(&self, msg: &str);

    /// Mark the unit failed but keep executing (rollback reporting).
    fn fail(&self, msg: &str);

    /// Mark the unit failed and terminate it immediately.
    fn fail_now(&self, msg: &str) -> ! {
        self.fail(msg);
        panic_any(Failure(msg.to_string()))
    }

    /// Terminate the unit, reporting it skipped rather than failed.
    fn skip_now(&self, msg: &str) -> ! {
        self.log(msg);
        panic_any(Skipped(msg.to_string()))
    }
}

/// Default reporter routing through `tracing`.
#[derive(Debug, Default)]
pub struct TracingReport;

impl Report for TracingReport {
    fn log(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn fail(&self, msg: &str) {
        tracing::error!("{msg}");
    }
}

/// Reporter that records everything, for testing the layers above it.
#[derive(Debug, Default)]
pub struct Recorder {
    messages: Mutex<Vec<String>>,
    failed: AtomicBool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

impl Report for Recorder {
    fn log(&self, msg: &str) {
        self.messages.lock().unwrap().push(msg.to_string());
    }

    fn fail(&self, msg: &str) {
        self.messages.lock().unwrap().push(msg.to_string());
        self.failed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn fail_now_unwinds_with_failure_payload() {
        let rec = Recorder::new();
        let err = catch_unwind(AssertUnwindSafe(|| rec.fail_now("bad"))).unwrap_err();
        assert!(err.downcast_ref::<Failure>().is_some());
        assert!(rec.failed());
        assert_eq!(rec.messages(), vec!["bad".to_string()]);
    }

    #[test]
    fn skip_now_unwinds_with_skip_payload() {
        let rec = Recorder::new();
        let err = catch_unwind(AssertUnwindSafe(|| rec.skip_now("later"))).unwrap_err();
        assert!(err.downcast_ref::<Skipped>().is_some());
        assert!(!rec.failed());
    }
}
