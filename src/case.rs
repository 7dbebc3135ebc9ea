//! Resolved test cases and the bodies they run.

use regex::Regex;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::rc::Rc;

/// Why a body did not complete successfully.
///
/// `Failure` deliberately does not implement [`std::error::Error`], so any
/// error type converts into it with `?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Failure {
    /// An expectation did not hold.
    Assertion(String),
    /// Anything else went wrong.
    Error(String),
}

impl Failure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Failure::Assertion(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Failure::Error(message.into())
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, Failure::Assertion(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Failure::Assertion(m) | Failure::Error(m) => m,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Assertion(m) => write!(f, "assertion failed: {m}"),
            Failure::Error(m) => write!(f, "error: {m}"),
        }
    }
}

impl<E: std::error::Error> From<E> for Failure {
    fn from(e: E) -> Self {
        Failure::Error(e.to_string())
    }
}

/// An extra rule under which a panic counts as an assertion failure.
///
/// `assert!`-family panics and [`Failure::Assertion`] payloads always do.
#[derive(Debug, Clone)]
pub enum AssertionKind {
    /// Panics whose payload is of one type.
    Payload {
        type_name: &'static str,
        is_type: fn(&(dyn Any + Send)) -> bool,
    },
    /// Panics whose message matches a pattern.
    Message(Regex),
}

impl AssertionKind {
    /// Matches panics raised with `std::panic::panic_any(value)` where `value: T`.
    pub fn payload<T: Any>() -> Self {
        AssertionKind::Payload {
            type_name: std::any::type_name::<T>(),
            is_type: |payload| payload.is::<T>(),
        }
    }

    pub fn message(pattern: Regex) -> Self {
        AssertionKind::Message(pattern)
    }

    pub fn matches(&self, payload: &(dyn Any + Send), message: &str) -> bool {
        match self {
            AssertionKind::Payload { is_type, .. } => is_type(payload),
            AssertionKind::Message(pattern) => pattern.is_match(message),
        }
    }
}

/// Outcome of running one body.
pub type Outcome = Result<(), Failure>;

/// Values a body may return.
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome {
        Ok(())
    }
}

impl<E: Into<Failure>> IntoOutcome for Result<(), E> {
    fn into_outcome(self) -> Outcome {
        self.map_err(Into::into)
    }
}

pub type LocalFuture = Pin<Box<dyn Future<Output = Outcome>>>;

/// Executable code attached to a case or hook.
#[derive(Clone)]
pub enum Body {
    Sync(Rc<dyn Fn() -> Outcome>),
    Async(Rc<dyn Fn() -> LocalFuture>),
}

impl Body {
    pub fn from_fn<F, R>(f: F) -> Self
    where
        F: Fn() -> R + 'static,
        R: IntoOutcome,
    {
        Body::Sync(Rc::new(move || f().into_outcome()))
    }

    pub fn from_async<F, Fut, R>(f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: IntoOutcome,
    {
        Body::Async(Rc::new(move || {
            let fut = f();
            Box::pin(async move { fut.await.into_outcome() })
        }))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Sync(_) => f.write_str("Body::Sync"),
            Body::Async(_) => f.write_str("Body::Async"),
        }
    }
}

/// Resolved execution intent for a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Run,
    Skip,
    Todo,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Run => f.write_str("run"),
            RunState::Skip => f.write_str("skip"),
            RunState::Todo => f.write_str("todo"),
        }
    }
}

/// A flattened, fully resolved test case ready for the runner.
#[derive(Debug, Clone)]
pub struct Case {
    pub test_file_path: PathBuf,
    /// Ancestor group descriptions and the case's own, space-joined.
    pub description: String,
    /// `None` only for todo cases, which never run.
    pub body: Option<Body>,
    pub run_state: RunState,
    /// Outermost group first.
    pub setup_hooks: Vec<Body>,
    /// Innermost group first, declaration order within a group.
    pub teardown_hooks: Vec<Body>,
    /// Globals injected while this case runs.
    pub globals: BTreeMap<String, String>,
}
