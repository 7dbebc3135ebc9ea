//! A pluggable test-execution engine.
//!
//! Test modules declare nested groups, cases and hooks with the ambient
//! primitives in [`dsl`]. The [`interpreter`] flattens them into resolved
//! [`Case`]s, the [`runner`] executes those with their hook chains and
//! injected globals, and a [`Pipeline`] of [`Stage`]s ties discovery,
//! interpretation, execution and reporting together and decides the exit code.
//!
//! ```no_run
//! use testframe::dsl::*;
//! use testframe::{Pipeline, Registry, stages};
//!
//! fn math() {
//!     describe("addition", || {
//!         it("adds", || assert_eq!(1 + 1, 2));
//!     });
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     let registry = Registry::new().module("tests/math_spec.rs", math);
//!     testframe::run(Pipeline::new().stages(stages::defaults(registry)))
//! }
//! ```

pub mod case;
pub mod compose;
pub mod dsl;
pub mod events;
pub mod globals;
pub mod interpreter;
pub mod loader;
pub mod report;
pub mod results;
pub mod runner;
pub mod schema;
pub mod setup;
pub mod stages;

pub use case::{AssertionKind, Body, Case, Failure, IntoOutcome, Outcome, RunState};
pub use compose::{
    Pipeline, ResultExecutor, Stage, StageError, StageResult, compose, executor, lowest_non_zero,
};
pub use events::{Event, EventBus, EventKind};
pub use interpreter::{ModuleLoader, Registry, interpret};
pub use results::{ResultState, Results, Summary, TestResult};
pub use setup::{Args, OutputFormat, Setup};

/// Runs `pipeline` and converts its outcome into a process exit status.
///
/// A stage error is printed to stderr and exits with status 1.
pub fn run(pipeline: Pipeline) -> std::process::ExitCode {
    match pipeline.run() {
        Ok(code) => std::process::ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
