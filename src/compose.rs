//! Stage composition and exit-code aggregation.
//!
//! A [`Pipeline`] runs its stages in order against one fresh [`Setup`],
//! collecting the result executors they return. After the `setup` event it
//! checks for exit signals, runs the executors against a shared result list,
//! and checks again. The returned code is the lowest positive signal, or `0`.

use crate::events::{Event, EventKind};
use crate::loader::LoadError;
use crate::results::Results;
use crate::setup::Setup;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

/// Error that aborts a whole run.
#[derive(Debug)]
pub enum StageError {
    /// A test module or config file could not be loaded.
    Load(LoadError),
    /// Command-line arguments were invalid.
    Args(clap::Error),
    /// Filesystem access failed.
    Io(std::io::Error),
    /// Any other stage failure.
    Failed(String),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageError::Load(e) => write!(f, "{e}"),
            StageError::Args(e) => write!(f, "invalid arguments: {e}"),
            StageError::Io(e) => write!(f, "I/O error: {e}"),
            StageError::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StageError::Load(e) => Some(e),
            StageError::Args(e) => Some(e),
            StageError::Io(e) => Some(e),
            StageError::Failed(_) => None,
        }
    }
}

impl From<LoadError> for StageError {
    fn from(e: LoadError) -> Self {
        StageError::Load(e)
    }
}

impl From<clap::Error> for StageError {
    fn from(e: clap::Error) -> Self {
        StageError::Args(e)
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        StageError::Io(e)
    }
}

/// Work a stage defers until every stage has run.
pub type ResultExecutor = Box<dyn FnOnce(&Setup, &mut Results) -> Result<(), StageError>>;

pub type StageResult = Result<Option<ResultExecutor>, StageError>;

/// One pluggable step of a run.
pub trait Stage {
    fn apply(&self, setup: &mut Setup) -> StageResult;
}

impl<F> Stage for F
where
    F: Fn(&mut Setup) -> StageResult,
{
    fn apply(&self, setup: &mut Setup) -> StageResult {
        self(setup)
    }
}

/// Boxes a closure as a [`ResultExecutor`].
pub fn executor<F>(f: F) -> ResultExecutor
where
    F: FnOnce(&Setup, &mut Results) -> Result<(), StageError> + 'static,
{
    Box::new(f)
}

/// An ordered list of stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

/// Builds a pipeline from already boxed stages.
pub fn compose(stages: Vec<Box<dyn Stage>>) -> Pipeline {
    Pipeline { stages }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Appends several boxed stages.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Box<dyn Stage>>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Performs one run and returns its exit code.
    ///
    /// A stage or executor error aborts the run immediately.
    pub fn run(&self) -> Result<i32, StageError> {
        let mut setup = Setup::new();
        let captured = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&captured);
        setup.events.on(EventKind::Exit, move |event| {
            if let Event::Exit(code) = event {
                sink.borrow_mut().push(*code);
            }
        });

        debug!(stages = self.stages.len(), "applying stages");
        let mut executors = Vec::new();
        for stage in &self.stages {
            if let Some(executor) = stage.apply(&mut setup)? {
                executors.push(executor);
            }
        }

        setup.events.emit(&Event::Setup(&setup));

        if let Some(code) = exit_code(&captured.borrow()) {
            info!(code, "run halted before execution");
            return Ok(code);
        }

        let mut results = Results::new();
        for executor in executors {
            executor(&setup, &mut results)?;
        }

        let code = exit_code(&captured.borrow()).unwrap_or(0);
        debug!(code, results = results.len(), "run finished");
        Ok(code)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// `None` when nothing was signalled, otherwise the aggregated code.
fn exit_code(captured: &[i32]) -> Option<i32> {
    if captured.is_empty() {
        None
    } else {
        Some(lowest_non_zero(captured))
    }
}

/// The lowest strictly positive code, or `0` if there is none.
pub fn lowest_non_zero(codes: &[i32]) -> i32 {
    codes.iter().copied().filter(|c| *c > 0).min().unwrap_or(0)
}
