//! Built-in stages: discovery, configuration, interpretation, execution and
//! exit codes.

use crate::case::AssertionKind;
use crate::compose::{Stage, StageError, StageResult, executor};
use crate::events::{Event, EventKind};
use crate::globals::{check_global, interpolate_all};
use crate::interpreter::{ModuleLoader, Registry, interpret};
use crate::loader::{find_test_files as find_files, load_config};
use crate::report::reporter;
use crate::runner;
use crate::setup::{Args, Setup};
use clap::Parser;
use regex::Regex;
use std::any::Any;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Adds an explicit list of test file paths.
pub fn test_files<I, P>(paths: I) -> impl Stage
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
    move |setup: &mut Setup| -> StageResult {
        setup.test_file_paths.extend(paths.iter().cloned());
        Ok(None)
    }
}

/// Adds every file under `root` whose path matches the regex `pattern`.
pub fn find_test_files(root: impl Into<PathBuf>, pattern: &str) -> impl Stage {
    let root = root.into();
    let pattern = pattern.to_string();
    move |setup: &mut Setup| -> StageResult {
        discover(setup, &root, &pattern)?;
        Ok(None)
    }
}

fn discover(setup: &mut Setup, root: &Path, pattern: &str) -> Result<(), StageError> {
    let regex = Regex::new(pattern)
        .map_err(|e| StageError::Failed(format!("invalid test file pattern {pattern:?}: {e}")))?;
    let files = find_files(root, &regex)?;
    debug!(root = %root.display(), found = files.len(), "discovered test files");
    setup.test_file_paths.extend(files);
    Ok(())
}

/// Signals exit code `1` when no test files were found.
pub fn require_test_files() -> impl Stage {
    |setup: &mut Setup| -> StageResult {
        if setup.test_file_paths.is_empty() {
            eprintln!("No test files found");
            setup.exit(1);
        }
        Ok(None)
    }
}

/// Stores `value` under `key` in `setup.components`.
pub fn component(key: impl Into<String>, value: impl Into<serde_json::Value>) -> impl Stage {
    let key = key.into();
    let value = value.into();
    move |setup: &mut Setup| -> StageResult {
        setup.components.insert(key.clone(), value.clone());
        Ok(None)
    }
}

/// Adds globals to inject while each case runs.
///
/// Names that are empty or contain `=` or NUL, and values containing NUL, are
/// rejected with [`StageError::Failed`].
pub fn globals<I, K, V>(entries: I) -> impl Stage
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let entries: Vec<(String, String)> = entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    move |setup: &mut Setup| -> StageResult {
        for (key, value) in &entries {
            check_global(key, value).map_err(StageError::Failed)?;
        }
        setup.globals.extend(entries.iter().cloned());
        Ok(None)
    }
}

/// Subscribes `handler` to every event of `kind`.
pub fn event<F>(kind: EventKind, handler: F) -> impl Stage
where
    F: Fn(&Event<'_>) + 'static,
{
    let handler = Rc::new(handler);
    move |setup: &mut Setup| -> StageResult {
        let handler = Rc::clone(&handler);
        setup.events.on(kind, move |event| handler(event));
        Ok(None)
    }
}

/// Declares the module at `path` ahead of every test file.
///
/// Hooks it declares at its top level wrap every case.
pub fn setup_file(path: impl Into<PathBuf>) -> impl Stage {
    let path = path.into();
    move |setup: &mut Setup| -> StageResult {
        setup.setup_file_paths.push(path.clone());
        Ok(None)
    }
}

/// Counts panics carrying a `T` payload as assertion failures.
pub fn assertion_type<T: Any>() -> impl Stage {
    |setup: &mut Setup| -> StageResult {
        setup.assertion_kinds.push(AssertionKind::payload::<T>());
        Ok(None)
    }
}

/// Counts panics whose message matches the regex `pattern` as assertion failures.
pub fn assertion_message(pattern: &str) -> impl Stage {
    let pattern = pattern.to_string();
    move |setup: &mut Setup| -> StageResult {
        let regex = Regex::new(&pattern).map_err(|e| {
            StageError::Failed(format!("invalid assertion pattern {pattern:?}: {e}"))
        })?;
        setup.assertion_kinds.push(AssertionKind::message(regex));
        Ok(None)
    }
}

/// Parses command-line arguments into `setup.args`.
///
/// The first item is the program name, as with [`std::env::args_os`].
pub fn args<I, T>(argv: I) -> impl Stage
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
    move |setup: &mut Setup| -> StageResult {
        setup.args = Args::try_parse_from(&argv)?;
        Ok(None)
    }
}

/// [`args`] over the process's own arguments.
pub fn args_from_env() -> impl Stage {
    args(std::env::args_os())
}

/// Applies `testframe.yaml`/`.yml`/`.toml` from `dir`, if present.
///
/// Globals are interpolated from globals already set by earlier stages, then
/// the host environment. Components are merged and test files discovered
/// under the configured `test_dir`.
pub fn config_file(dir: impl Into<PathBuf>) -> impl Stage {
    let dir = dir.into();
    move |setup: &mut Setup| -> StageResult {
        let Some(config) = load_config(&dir)? else {
            debug!(dir = %dir.display(), "no config file");
            return Ok(None);
        };

        let globals =
            interpolate_all(&config.globals, &setup.globals).map_err(StageError::Failed)?;
        setup.globals.extend(globals);
        setup
            .components
            .extend(config.components.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(test_dir) = &config.test_dir {
            discover(setup, &dir.join(test_dir), config.pattern())?;
        }
        Ok(None)
    }
}

/// Interprets every test file with `loader`, filling `setup.tests`.
pub fn spec_syntax(loader: impl ModuleLoader + 'static) -> impl Stage {
    move |setup: &mut Setup| -> StageResult {
        interpret(setup, &loader)?;
        Ok(None)
    }
}

/// Drops cases whose description does not contain `args.filter`.
pub fn filter_tests() -> impl Stage {
    |setup: &mut Setup| -> StageResult {
        if let Some(filter) = setup.args.filter.clone() {
            setup.tests.retain(|case| case.description.contains(&filter));
            debug!(%filter, remaining = setup.tests.len(), "filtered cases");
        }
        Ok(None)
    }
}

/// Runs the resolved cases once every stage has been applied.
pub fn run_tests() -> impl Stage {
    |_: &mut Setup| -> StageResult {
        Ok(Some(executor(|setup, results| {
            runner::run_tests(setup, results);
            Ok(())
        })))
    }
}

/// Signals exit code `1` if any result failed or errored.
pub fn failure_exit_code() -> impl Stage {
    |_: &mut Setup| -> StageResult {
        Ok(Some(executor(|setup, results| {
            if results.iter().any(|r| r.is_failure()) {
                setup.exit(1);
            }
            Ok(())
        })))
    }
}

/// The conventional stage list for modules compiled into `registry`.
pub fn defaults(registry: Registry) -> Vec<Box<dyn Stage>> {
    let paths: Vec<PathBuf> = registry.paths().map(Path::to_path_buf).collect();
    vec![
        Box::new(args_from_env()),
        Box::new(test_files(paths)),
        Box::new(require_test_files()),
        Box::new(spec_syntax(registry)),
        Box::new(filter_tests()),
        Box::new(run_tests()),
        Box::new(reporter()),
        Box::new(failure_exit_code()),
    ]
}
