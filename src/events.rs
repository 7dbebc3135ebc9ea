//! Synchronous publish/subscribe channel for run lifecycle events.
//!
//! Handlers fire in subscription order before [`EventBus::emit`] returns, so
//! any state a handler mutates is visible to the emitter right after the call.
//! Handlers may emit further events from inside a callback.

use crate::case::Case;
use crate::results::TestResult;
use crate::setup::Setup;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Name of an event, used to pick which handlers receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TestStart,
    TestSkip,
    TestFailure,
    TestError,
    TestResult,
    Setup,
    Exit,
}

impl EventKind {
    /// The wire name reporters know the event by.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::TestStart => "test:start",
            EventKind::TestSkip => "test:skip",
            EventKind::TestFailure => "test:failure",
            EventKind::TestError => "test:error",
            EventKind::TestResult => "test:result",
            EventKind::Setup => "setup",
            EventKind::Exit => "exit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event together with its payload.
#[derive(Clone, Copy)]
pub enum Event<'a> {
    TestStart(&'a Case),
    TestSkip(&'a TestResult),
    TestFailure(&'a TestResult),
    TestError(&'a TestResult),
    TestResult(&'a TestResult),
    Setup(&'a Setup),
    /// A request to end the process with the given code.
    Exit(i32),
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TestStart(_) => EventKind::TestStart,
            Event::TestSkip(_) => EventKind::TestSkip,
            Event::TestFailure(_) => EventKind::TestFailure,
            Event::TestError(_) => EventKind::TestError,
            Event::TestResult(_) => EventKind::TestResult,
            Event::Setup(_) => EventKind::Setup,
            Event::Exit(_) => EventKind::Exit,
        }
    }
}

type Handler = Rc<dyn Fn(&Event<'_>)>;

/// Process-scoped event channel shared through [`Setup`].
#[derive(Default)]
pub struct EventBus {
    handlers: RefCell<Vec<(EventKind, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for every future event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event<'_>) + 'static,
    {
        self.handlers.borrow_mut().push((kind, Rc::new(handler)));
    }

    /// Delivers `event` to its handlers in subscription order.
    pub fn emit(&self, event: &Event<'_>) {
        let kind = event.kind();
        // Snapshot so handlers can subscribe or emit without a double borrow.
        let targets: Vec<Handler> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| Rc::clone(h))
            .collect();

        for handler in targets {
            handler(event);
        }
    }

    /// Number of handlers subscribed to `kind`.
    #[cfg(test)]
    pub(crate) fn listener_count(&self, kind: EventKind) -> usize {
        self.handlers
            .borrow()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.borrow().len())
            .finish()
    }
}
