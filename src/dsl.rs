//! Ambient declaration primitives for test modules.
//!
//! A test module is a plain function that calls [`describe`], [`it`],
//! [`before_each`] and [`after_each`] (and their variants) at load time:
//!
//! ```
//! use testframe::dsl::*;
//!
//! fn math() {
//!     describe("addition", || {
//!         before_each(|| {});
//!         it("adds", || assert_eq!(1 + 1, 2));
//!         it_todo("overflows");
//!     });
//! }
//!
//! let (root, ()) = declare(math).unwrap();
//! assert_eq!(root.children.len(), 1);
//! ```
//!
//! The primitives only exist while [`declare`] is running a module on the
//! current thread. Called at any other time (for example from inside a running
//! case body) they raise a [`DeclarationError::Reference`] panic, which the
//! runner reports as an errored case.

use crate::case::{Body, IntoOutcome};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

/// Declared run intent of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Run,
    Skip,
    Todo,
    Focus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Setup,
    Teardown,
}

/// A `describe` block and everything declared inside it, in order.
#[derive(Debug, Default)]
pub struct GroupNode {
    pub description: String,
    pub skip: bool,
    pub children: Vec<Node>,
}

impl GroupNode {
    fn new(description: &str, skip: bool) -> Self {
        Self {
            description: description.to_string(),
            skip,
            children: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct CaseNode {
    pub description: String,
    pub body: Option<Body>,
    pub intent: Intent,
}

#[derive(Debug)]
pub struct HookNode {
    pub kind: HookKind,
    pub body: Body,
    pub skip: bool,
}

#[derive(Debug)]
pub enum Node {
    Group(GroupNode),
    Case(CaseNode),
    Hook(HookNode),
}

/// Misuse of the declaration primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// A primitive was called outside the declaration phase.
    Reference { primitive: &'static str },
    /// [`declare`] was called while a module was already being declared.
    Nested,
    /// The module panicked while declaring.
    Panicked(String),
}

impl fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclarationError::Reference { primitive } => write!(
                f,
                "ReferenceError: `{primitive}` is not defined outside the declaration phase"
            ),
            DeclarationError::Nested => write!(f, "a module is already being declared"),
            DeclarationError::Panicked(msg) => write!(f, "module panicked while declaring: {msg}"),
        }
    }
}

impl std::error::Error for DeclarationError {}

thread_local! {
    // Open groups, root first. `None` outside the declaration phase.
    static SCOPE: RefCell<Option<Vec<GroupNode>>> = const { RefCell::new(None) };
}

/// Runs `module` with the primitives available and returns the declared tree.
///
/// Each call starts from an empty implicit root group, so declarations never
/// leak between modules.
pub fn declare<F, T>(module: F) -> Result<(GroupNode, T), DeclarationError>
where
    F: FnOnce() -> T,
{
    let opened = SCOPE.with(|s| {
        let mut scope = s.borrow_mut();
        if scope.is_some() {
            return false;
        }
        *scope = Some(vec![GroupNode::default()]);
        true
    });
    if !opened {
        return Err(DeclarationError::Nested);
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(module));
    let stack = SCOPE.with(|s| s.borrow_mut().take());

    let value = outcome.map_err(|payload| match payload.downcast::<DeclarationError>() {
        Ok(err) => *err,
        Err(payload) => DeclarationError::Panicked(panic_message(payload.as_ref())),
    })?;

    // Unbalanced only if a nested `describe` unwound and the panic was caught.
    let mut stack = stack.unwrap_or_default();
    while stack.len() > 1 {
        if let Some(group) = stack.pop()
            && let Some(parent) = stack.last_mut()
        {
            parent.children.push(Node::Group(group));
        }
    }
    let root = stack.pop().unwrap_or_default();
    Ok((root, value))
}

/// True while a module is being declared on this thread.
#[cfg(test)]
fn is_declaring() -> bool {
    SCOPE.with(|s| s.borrow().is_some())
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(err) = payload.downcast_ref::<DeclarationError>() {
        err.to_string()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn raise(primitive: &'static str) -> ! {
    panic::panic_any(DeclarationError::Reference { primitive })
}

fn with_scope<R>(primitive: &'static str, f: impl FnOnce(&mut Vec<GroupNode>) -> R) -> R {
    match SCOPE.with(|s| s.borrow_mut().as_mut().map(f)) {
        Some(r) => r,
        None => raise(primitive),
    }
}

fn push_node(primitive: &'static str, node: Node) {
    with_scope(primitive, |stack| {
        if let Some(top) = stack.last_mut() {
            top.children.push(node);
        }
    });
}

fn group(primitive: &'static str, description: &str, skip: bool, body: impl FnOnce()) {
    with_scope(primitive, |stack| stack.push(GroupNode::new(description, skip)));
    body();
    with_scope(primitive, |stack| {
        if stack.len() > 1
            && let Some(done) = stack.pop()
            && let Some(parent) = stack.last_mut()
        {
            parent.children.push(Node::Group(done));
        }
    });
}

fn case(primitive: &'static str, description: &str, body: Option<Body>, intent: Intent) {
    push_node(
        primitive,
        Node::Case(CaseNode {
            description: description.to_string(),
            body,
            intent,
        }),
    );
}

fn hook(primitive: &'static str, kind: HookKind, body: Body, skip: bool) {
    push_node(primitive, Node::Hook(HookNode { kind, body, skip }));
}

/// Declares a group; `body` runs immediately to declare its contents.
pub fn describe(description: &str, body: impl FnOnce()) {
    group("describe", description, false, body);
}

/// Declares a group whose cases all resolve to skip.
pub fn describe_skip(description: &str, body: impl FnOnce()) {
    group("describe.skip", description, true, body);
}

pub fn it<F, R>(description: &str, body: F)
where
    F: Fn() -> R + 'static,
    R: IntoOutcome,
{
    case("it", description, Some(Body::from_fn(body)), Intent::Run);
}

pub fn it_skip<F, R>(description: &str, body: F)
where
    F: Fn() -> R + 'static,
    R: IntoOutcome,
{
    case("it.skip", description, Some(Body::from_fn(body)), Intent::Skip);
}

/// Declares a case that only runs alongside other focused cases of its file.
pub fn it_only<F, R>(description: &str, body: F)
where
    F: Fn() -> R + 'static,
    R: IntoOutcome,
{
    case("it.only", description, Some(Body::from_fn(body)), Intent::Focus);
}

/// Declares a placeholder case with no body.
pub fn it_todo(description: &str) {
    case("it.todo", description, None, Intent::Todo);
}

pub fn it_async<F, Fut, R>(description: &str, body: F)
where
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: IntoOutcome,
{
    case("it", description, Some(Body::from_async(body)), Intent::Run);
}

pub fn before_each<F, R>(body: F)
where
    F: Fn() -> R + 'static,
    R: IntoOutcome,
{
    hook("beforeEach", HookKind::Setup, Body::from_fn(body), false);
}

pub fn before_each_skip<F, R>(body: F)
where
    F: Fn() -> R + 'static,
    R: IntoOutcome,
{
    hook("beforeEach.skip", HookKind::Setup, Body::from_fn(body), true);
}

pub fn before_each_async<F, Fut, R>(body: F)
where
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: IntoOutcome,
{
    hook("beforeEach", HookKind::Setup, Body::from_async(body), false);
}

pub fn after_each<F, R>(body: F)
where
    F: Fn() -> R + 'static,
    R: IntoOutcome,
{
    hook("afterEach", HookKind::Teardown, Body::from_fn(body), false);
}

pub fn after_each_skip<F, R>(body: F)
where
    F: Fn() -> R + 'static,
    R: IntoOutcome,
{
    hook("afterEach.skip", HookKind::Teardown, Body::from_fn(body), true);
}

pub fn after_each_async<F, Fut, R>(body: F)
where
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: IntoOutcome,
{
    hook("afterEach", HookKind::Teardown, Body::from_async(body), false);
}
