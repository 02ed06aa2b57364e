//! Ordered, nestable execution of named test units.
//!
//! Units run sequentially; a failing unit short-circuits its remaining
//! siblings, while sibling suites at the caller's level still run (each
//! top-level suite goes through [`run_unit`], which contains the failure).
//! Failure and skip travel as typed unwind payloads from the reporting
//! capability and are told apart at the unit boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::prompt::PromptOutcome;
use crate::report::{Failure, Report, Skipped};
use crate::HarnessConfig;

/// Context threaded through every running unit.
pub struct TestCtx<'a> {
    pub report: &'a dyn Report,
    pub config: &'a HarnessConfig,
}

/// A named, runnable test unit.
pub trait Tester {
    fn name(&self) -> &str;
    fn run(&mut self, cx: &mut TestCtx<'_>);
}

/// How a unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// A named, ordered set of test units.
pub struct Suite {
    pub name: String,
    pub tests: Vec<Box<dyn Tester>>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    pub fn with(mut self, test: Box<dyn Tester>) -> Self {
        self.tests.push(test);
        self
    }
}

impl Tester for Suite {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, cx: &mut TestCtx<'_>) {
        run_ordered(&mut self.tests, cx);
    }
}

/// Run `tests` in order inside an already-running unit, short-circuiting
/// on the first failure and propagating it to the enclosing unit.
pub fn run_ordered(tests: &mut [Box<dyn Tester>], cx: &mut TestCtx<'_>) {
    pause(cx, "before tests");
    for test in tests {
        let name = test.name().to_string();
        if cx.config.dry_run {
            cx.report.log(&format!("skip {name}: dry run"));
            continue;
        }
        pause(cx, &format!("before {name}"));
        match run_unit(test.as_mut(), cx) {
            Outcome::Passed => {}
            Outcome::Skipped => {
                cx.report.log(&format!("skip {name}"));
            }
            Outcome::Failed => {
                // remaining siblings are skipped; the enclosing unit fails
                cx.report.fail(&format!("{name} failed"));
                std::panic::panic_any(Failure(format!("{name} failed")));
            }
        }
        pause(cx, &format!("after {name}"));
    }
    pause(cx, "after tests");
}

/// Run one unit to an [`Outcome`], containing its unwind.
pub fn run_unit(test: &mut dyn Tester, cx: &mut TestCtx<'_>) -> Outcome {
    let result = catch_unwind(AssertUnwindSafe(|| test.run(cx)));
    match result {
        Ok(()) => Outcome::Passed,
        Err(payload) => {
            if payload.downcast_ref::<Skipped>().is_some() {
                Outcome::Skipped
            } else {
                if payload.downcast_ref::<Failure>().is_none() {
                    // a plain panic from inside the unit, not an assertion
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "panic".to_string());
                    cx.report.fail(&msg);
                }
                Outcome::Failed
            }
        }
    }
}

fn pause(cx: &mut TestCtx<'_>, at: &str) {
    if let Ok(PromptOutcome::Quit) = cx.config.pause.prompt(at) {
        cx.report.skip_now("quit");
    }
}

/// A unit backed by a closure, for inline test bodies.
pub struct TestFn<F> {
    name: String,
    f: F,
}

/// Package a closure as a boxed [`Tester`].
pub fn test<F>(name: impl Into<String>, f: F) -> Box<dyn Tester>
where
    F: FnMut(&mut TestCtx<'_>) + 'static,
{
    Box::new(TestFn {
        name: name.into(),
        f,
    })
}

impl<F> Tester for TestFn<F>
where
    F: FnMut(&mut TestCtx<'_>),
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, cx: &mut TestCtx<'_>) {
        (self.f)(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Recorder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_test(name: &str, hits: Arc<AtomicUsize>) -> Box<dyn Tester> {
        test(name, move |_cx| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn units_run_in_order() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut suite = Suite::new("ordered")
            .with(counter_test("one", hits.clone()))
            .with(counter_test("two", hits.clone()));
        let report = Recorder::new();
        let config = HarnessConfig::default();
        let mut cx = TestCtx {
            report: &report,
            config: &config,
        };
        assert_eq!(run_unit(&mut suite, &mut cx), Outcome::Passed);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_skips_remaining_siblings_but_not_sibling_suites() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut failing = Suite::new("failing")
            .with(test("boom", |cx: &mut TestCtx<'_>| {
                cx.report.fail_now("boom")
            }))
            .with(counter_test("after-boom", hits.clone()));
        let mut healthy = Suite::new("healthy").with(counter_test("runs", hits.clone()));

        let report = Recorder::new();
        let config = HarnessConfig::default();
        let mut cx = TestCtx {
            report: &report,
            config: &config,
        };
        assert_eq!(run_unit(&mut failing, &mut cx), Outcome::Failed);
        assert_eq!(hits.load(Ordering::SeqCst), 0, "sibling after failure ran");
        assert_eq!(run_unit(&mut healthy, &mut cx), Outcome::Passed);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn skipped_units_do_not_fail_the_suite() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut suite = Suite::new("skippy")
            .with(test("skipped", |cx: &mut TestCtx<'_>| {
                cx.report.skip_now("not today")
            }))
            .with(counter_test("still-runs", hits.clone()));
        let report = Recorder::new();
        let config = HarnessConfig::default();
        let mut cx = TestCtx {
            report: &report,
            config: &config,
        };
        assert_eq!(run_unit(&mut suite, &mut cx), Outcome::Passed);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dry_run_reports_units_skipped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut suite = Suite::new("dry").with(counter_test("unit", hits.clone()));
        let report = Recorder::new();
        let config = HarnessConfig {
            dry_run: true,
            ..HarnessConfig::default()
        };
        let mut cx = TestCtx {
            report: &report,
            config: &config,
        };
        assert_eq!(run_unit(&mut suite, &mut cx), Outcome::Passed);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(report.messages().iter().any(|m| m.contains("dry run")));
    }

    #[test]
    fn plain_panics_count_as_failures() {
        let mut suite =
            Suite::new("panicky").with(test("kaboom", |_cx: &mut TestCtx<'_>| {
                panic!("unexpected")
            }));
        let report = Recorder::new();
        let config = HarnessConfig::default();
        let mut cx = TestCtx {
            report: &report,
            config: &config,
        };
        assert_eq!(run_unit(&mut suite, &mut cx), Outcome::Failed);
        assert!(report.failed());
    }
}
