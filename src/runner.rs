//! Test execution engine.
//!
//! Runs resolved cases one at a time with their hook chains and injected
//! globals, classifies each outcome and reports it on the event bus.

use crate::case::{AssertionKind, Body, Case, Failure, Outcome, RunState};
use crate::dsl::{DeclarationError, panic_message};
use crate::events::Event;
use crate::globals::InjectedGlobals;
use crate::results::{ResultState, Results, TestResult};
use crate::setup::Setup;
use chrono::Utc;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use tracing::debug;

/// Runs every case in `setup.tests` in order, appending one result per case.
///
/// Failures inside a case never stop the run. Async bodies are driven on a
/// private current-thread runtime, so this must not be called from inside
/// another tokio runtime when any case is async.
pub fn run_tests(setup: &Setup, results: &mut Results) {
    let mut executor = Executor {
        runtime: None,
        assertion_kinds: &setup.assertion_kinds,
    };
    for case in &setup.tests {
        let result = executor.run_case(setup, case);
        debug!(description = %result.description, state = %result.state, "case finished");
        setup.events.emit(&Event::TestResult(&result));
        results.push(result);
    }
}

struct Executor<'a> {
    runtime: Option<tokio::runtime::Runtime>,
    assertion_kinds: &'a [AssertionKind],
}

impl Executor<'_> {
    fn run_case(&mut self, setup: &Setup, case: &Case) -> TestResult {
        setup.events.emit(&Event::TestStart(case));
        let start = Utc::now();

        let (state, error) = match case.run_state {
            RunState::Skip | RunState::Todo => (ResultState::Skipped, None),
            RunState::Run => match self.run_body(case) {
                Ok(()) => (ResultState::Passed, None),
                Err(failure) if failure.is_assertion() => (ResultState::Failed, Some(failure)),
                Err(failure) => (ResultState::Errored, Some(failure)),
            },
        };

        let result = TestResult {
            test_file_path: case.test_file_path.clone(),
            description: case.description.clone(),
            state,
            error,
            start,
            end: Utc::now(),
        };

        match result.state {
            ResultState::Skipped => setup.events.emit(&Event::TestSkip(&result)),
            ResultState::Failed => setup.events.emit(&Event::TestFailure(&result)),
            ResultState::Errored => setup.events.emit(&Event::TestError(&result)),
            ResultState::Passed => {}
        }
        result
    }

    /// Setup hooks, body, then every teardown hook. The first failure wins.
    fn run_body(&mut self, case: &Case) -> Outcome {
        let _globals = InjectedGlobals::inject(&case.globals).map_err(Failure::Error)?;

        let mut failure = case
            .setup_hooks
            .iter()
            .find_map(|hook| self.invoke(hook).err());

        if failure.is_none()
            && let Some(body) = &case.body
        {
            failure = self.invoke(body).err();
        }

        for hook in &case.teardown_hooks {
            if let Err(f) = self.invoke(hook)
                && failure.is_none()
            {
                failure = Some(f);
            }
        }

        match failure {
            Some(f) => Err(f),
            None => Ok(()),
        }
    }

    fn invoke(&mut self, body: &Body) -> Outcome {
        let _quiet = QuietPanics::enter();
        panic::catch_unwind(AssertUnwindSafe(|| match body {
            Body::Sync(f) => f(),
            Body::Async(f) => {
                let runtime = self.runtime()?;
                runtime.block_on(f())
            }
        }))
        .unwrap_or_else(|payload| Err(classify_panic(payload, self.assertion_kinds)))
    }

    fn runtime(&mut self) -> Result<&tokio::runtime::Runtime, Failure> {
        if self.runtime.is_none() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| Failure::error(format!("Failed to create runtime: {e}")))?;
            self.runtime = Some(runtime);
        }
        self.runtime
            .as_ref()
            .ok_or_else(|| Failure::error("runtime unavailable"))
    }
}

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Silences the panic hook on this thread while a body runs.
///
/// The failure is still reported through the result. Panics on other threads,
/// or outside a body, reach the previously installed hook.
struct QuietPanics {
    was_capturing: bool,
}

impl QuietPanics {
    fn enter() -> Self {
        QUIET_HOOK.call_once(|| {
            let previous = panic::take_hook();
            panic::set_hook(Box::new(move |info| {
                if !CAPTURING.with(Cell::get) {
                    previous(info);
                }
            }));
        });
        Self {
            was_capturing: CAPTURING.with(|c| c.replace(true)),
        }
    }
}

impl Drop for QuietPanics {
    fn drop(&mut self) {
        CAPTURING.with(|c| c.set(self.was_capturing));
    }
}

/// Maps a panic payload to a failure.
///
/// `assert!`-family panics, `panic_any(Failure::Assertion(..))` and panics
/// matching one of `kinds` are assertion failures. Declaration misuse and
/// every other panic are errors.
fn classify_panic(payload: Box<dyn Any + Send>, kinds: &[AssertionKind]) -> Failure {
    if let Some(failure) = payload.downcast_ref::<Failure>() {
        return failure.clone();
    }
    let message = panic_message(payload.as_ref());
    if payload.is::<DeclarationError>() {
        return Failure::Error(message);
    }
    let registered = kinds.iter().any(|k| k.matches(payload.as_ref(), &message));
    if registered || message.starts_with("assertion") {
        Failure::Assertion(message)
    } else {
        Failure::Error(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::*;
    use crate::events::EventKind;
    use crate::interpreter::{Registry, interpret};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn setup_for(module: impl Fn() + 'static) -> Setup {
        let mut setup = Setup::new();
        setup.test_file_paths = vec![PathBuf::from("runner_spec.rs")];
        let registry = Registry::new().module("runner_spec.rs", module);
        interpret(&mut setup, &registry).unwrap();
        setup
    }

    fn run(setup: &Setup) -> Results {
        let mut results = Vec::new();
        run_tests(setup, &mut results);
        results
    }

    thread_local! {
        static CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    }

    fn record(tag: &'static str) -> impl Fn() + 'static {
        move || CALLS.with(|c| c.borrow_mut().push(tag))
    }

    fn calls() -> Vec<&'static str> {
        CALLS.with(|c| c.borrow_mut().drain(..).collect())
    }

    fn boom() {
        panic!("boom");
    }

    fn custom_assertion() {
        std::panic::panic_any(Failure::assertion("custom"));
    }

    #[test]
    fn passing_case() {
        let setup = setup_for(|| it("adds", || assert_eq!(1 + 1, 2)));
        let results = run(&setup);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, ResultState::Passed);
        assert_eq!(results[0].description, "adds");
        assert!(results[0].error.is_none());
        assert!(results[0].start <= results[0].end);
    }

    #[test]
    fn assert_panics_are_failures() {
        let setup = setup_for(|| {
            it("eq", || assert_eq!(1, 2));
            it("plain", || assert!(1 > 2));
        });
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Failed);
        assert_eq!(results[1].state, ResultState::Failed);
    }

    #[test]
    fn returned_assertion_is_a_failure() {
        let setup = setup_for(|| {
            it("explicit", || Err::<(), _>(Failure::assertion("expected 3")))
        });
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Failed);
        assert_eq!(results[0].error, Some(Failure::assertion("expected 3")));
    }

    #[test]
    fn assertion_payload_is_a_failure() {
        let setup = setup_for(|| it("payload", custom_assertion));
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Failed);
    }

    #[test]
    fn other_errors_are_errored() {
        let setup = setup_for(|| {
            it("returns error", || -> Result<(), Failure> {
                std::fs::read_to_string("/definitely/not/here")?;
                Ok(())
            });
            it("panics", boom);
        });
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Errored);
        assert_eq!(results[1].state, ResultState::Errored);
        assert_eq!(results[1].error, Some(Failure::error("boom")));
    }

    #[test]
    fn failures_do_not_stop_later_cases() {
        let setup = setup_for(|| {
            it("first", boom);
            it("second", || {});
        });
        let results = run(&setup);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].state, ResultState::Passed);
    }

    #[test]
    fn declaring_inside_a_case_is_a_reference_error() {
        let setup = setup_for(|| {
            describe("describe", || {
                it("test", || describe("", || {}));
            });
        });
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Errored);
        let message = results[0].error.as_ref().unwrap().message().to_string();
        assert!(message.starts_with("ReferenceError"), "{message}");
    }

    #[test]
    fn skipped_and_todo_cases_run_nothing() {
        let setup = setup_for(|| {
            before_each(record("before"));
            after_each(record("after"));
            it_skip("skipped", record("body"));
            it_todo("todo");
        });
        calls();
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Skipped);
        assert_eq!(results[1].state, ResultState::Skipped);
        assert!(calls().is_empty());
    }

    #[test]
    fn hooks_wrap_the_body() {
        let setup = setup_for(|| {
            before_each(record("outer before"));
            after_each(record("outer after"));
            describe("", || {
                before_each(record("inner before"));
                after_each(record("inner after"));
                it("", record("body"));
            });
        });
        calls();
        run(&setup);
        assert_eq!(
            calls(),
            vec![
                "outer before",
                "inner before",
                "body",
                "inner after",
                "outer after"
            ]
        );
    }

    #[test]
    fn failing_setup_hook_skips_body_but_not_teardown() {
        let setup = setup_for(|| {
            before_each(|| Err::<(), _>(Failure::error("no fixture")));
            before_each(record("second before"));
            after_each(record("after"));
            it("", record("body"));
        });
        calls();
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Errored);
        assert_eq!(calls(), vec!["after"]);
    }

    #[test]
    fn teardown_failure_fails_a_passing_case() {
        let setup = setup_for(|| {
            after_each(|| Err::<(), _>(Failure::error("cleanup failed")));
            it("", || {});
        });
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Errored);
    }

    #[test]
    fn teardown_failure_keeps_the_body_failure() {
        let setup = setup_for(|| {
            after_each(|| Err::<(), _>(Failure::error("cleanup")));
            after_each(record("second after"));
            it("", || Err::<(), _>(Failure::assertion("body")));
        });
        calls();
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Failed);
        assert_eq!(results[0].error, Some(Failure::assertion("body")));
        assert_eq!(calls(), vec!["second after"]);
    }

    #[test]
    fn globals_are_visible_only_while_a_case_runs() {
        let mut setup = Setup::new();
        setup
            .globals
            .insert("TESTFRAME_RUNNER_GLOBAL".to_string(), "on".to_string());
        setup.test_file_paths = vec![PathBuf::from("g_spec.rs")];
        let registry = Registry::new().module("g_spec.rs", || {
            before_each(|| {
                assert_eq!(std::env::var("TESTFRAME_RUNNER_GLOBAL").as_deref(), Ok("on"))
            });
            it("sees global", || {
                assert_eq!(std::env::var("TESTFRAME_RUNNER_GLOBAL").as_deref(), Ok("on"))
            });
        });
        interpret(&mut setup, &registry).unwrap();

        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Passed);
        assert!(std::env::var_os("TESTFRAME_RUNNER_GLOBAL").is_none());
    }

    #[test]
    fn async_bodies_are_awaited() {
        let setup = setup_for(|| {
            before_each_async(|| async { record("async before")() });
            it_async("async ok", || async {
                tokio::task::yield_now().await;
                record("async body")();
            });
            it_async("async fails", || async { Err::<(), _>(Failure::assertion("late")) });
        });
        calls();
        let results = run(&setup);
        assert_eq!(results[0].state, ResultState::Passed);
        assert_eq!(results[1].state, ResultState::Failed);
        assert_eq!(
            calls(),
            vec!["async before", "async body", "async before"]
        );
    }

    #[test]
    fn emits_lifecycle_events_in_order() {
        let setup = setup_for(|| {
            it("pass", || {});
            it("fail", || assert_eq!(1, 2));
            it("error", boom);
            it_skip("skip", || {});
        });
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [
            EventKind::TestStart,
            EventKind::TestSkip,
            EventKind::TestFailure,
            EventKind::TestError,
            EventKind::TestResult,
        ] {
            let log = Rc::clone(&log);
            setup
                .events
                .on(kind, move |event| log.borrow_mut().push(event.kind().name()));
        }

        run(&setup);
        assert_eq!(
            *log.borrow(),
            vec![
                "test:start",
                "test:result",
                "test:start",
                "test:failure",
                "test:result",
                "test:start",
                "test:error",
                "test:result",
                "test:start",
                "test:skip",
                "test:result",
            ]
        );
    }

    #[test]
    fn classify_panic_payloads() {
        let reference: Box<dyn Any + Send> =
            Box::new(DeclarationError::Reference { primitive: "it" });
        assert!(!classify_panic(reference, &[]).is_assertion());

        let assertion: Box<dyn Any + Send> = Box::new("assertion failed: x".to_string());
        assert!(classify_panic(assertion, &[]).is_assertion());

        let other: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert!(!classify_panic(other, &[]).is_assertion());
    }

    struct Mismatch;

    fn mismatch() {
        std::panic::panic_any(Mismatch);
    }

    fn expectation_panic() {
        panic!("expected 3 but got 2");
    }

    #[test]
    fn registered_assertion_kinds_classify_panics() {
        let mut setup = setup_for(|| {
            it("typed", mismatch);
            it("message", expectation_panic);
            it("other", boom);
        });
        setup.assertion_kinds = vec![
            AssertionKind::payload::<Mismatch>(),
            AssertionKind::message(regex::Regex::new("^expected").unwrap()),
        ];
        let results = run(&setup);
        let states: Vec<ResultState> = results.iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![ResultState::Failed, ResultState::Failed, ResultState::Errored]
        );
    }

    #[test]
    fn unregistered_kinds_stay_errors() {
        let setup = setup_for(|| it("typed", mismatch));
        assert_eq!(run(&setup)[0].state, ResultState::Errored);
    }

    #[test]
    fn unusable_global_errors_the_case_instead_of_the_run() {
        let mut setup = setup_for(|| {
            it("first", || {});
            it("second", || {});
        });
        for case in &mut setup.tests {
            case.globals.insert("BAD=KEY".to_string(), "x".to_string());
        }
        let results = run(&setup);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.state == ResultState::Errored));
        assert!(
            results[0]
                .error
                .as_ref()
                .unwrap()
                .message()
                .contains("BAD=KEY")
        );
    }

    #[test]
    fn panic_hook_is_quiet_only_while_a_body_runs() {
        let setup = setup_for(|| it("inside", || assert!(CAPTURING.with(Cell::get))));
        assert_eq!(run(&setup)[0].state, ResultState::Passed);
        assert!(!CAPTURING.with(Cell::get));
    }
}
