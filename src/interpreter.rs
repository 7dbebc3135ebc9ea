//! Turns declared test modules into a flat, ordered list of resolved cases.
//!
//! Resolution walks each module's declaration tree depth-first:
//!
//! - a case is `todo` if declared with [`it_todo`](crate::dsl::it_todo),
//!   otherwise `skip` if it or any enclosing group is skipped, otherwise `run`;
//! - in a file containing a runnable [`it_only`](crate::dsl::it_only) case,
//!   every other runnable case is skipped;
//! - descriptions join the non-empty group descriptions and the case's own;
//! - a hook applies to the cases declared after it at its level and inside
//!   groups declared after it. Setup hooks run outermost group first,
//!   teardown hooks innermost group first, each level in declaration order.

use crate::case::{Body, Case, RunState};
use crate::dsl::{self, GroupNode, HookKind, Intent, Node};
use crate::loader::LoadError;
use crate::setup::Setup;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Loads a test module by path while the declaration primitives are live.
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<(), LoadError>;
}

impl<F> ModuleLoader for F
where
    F: Fn(&Path) -> Result<(), LoadError>,
{
    fn load(&self, path: &Path) -> Result<(), LoadError> {
        self(path)
    }
}

/// Test modules compiled into the binary, keyed by file path.
///
/// Lookup tries an exact match first, then a registered key the path ends
/// with, so discovered paths like `/repo/tests/math_spec.rs` find a module
/// registered as `tests/math_spec.rs`.
#[derive(Clone, Default)]
pub struct Registry {
    modules: Vec<(PathBuf, Rc<dyn Fn()>)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module<F>(mut self, path: impl Into<PathBuf>, module: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.modules.push((path.into(), Rc::new(module)));
        self
    }

    /// Registered paths in registration order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.modules.iter().map(|(p, _)| p.as_path())
    }

    fn find(&self, path: &Path) -> Option<&Rc<dyn Fn()>> {
        self.modules
            .iter()
            .find(|(key, _)| key == path)
            .or_else(|| self.modules.iter().find(|(key, _)| path.ends_with(key)))
            .map(|(_, module)| module)
    }
}

impl ModuleLoader for Registry {
    fn load(&self, path: &Path) -> Result<(), LoadError> {
        let module = self
            .find(path)
            .ok_or_else(|| LoadError::UnknownModule(path.to_path_buf()))?;
        module();
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|(p, _)| p))
            .finish()
    }
}

/// Loads every file in `setup.test_file_paths` and appends its resolved cases
/// to `setup.tests`.
///
/// Each file is declared after `setup.setup_file_paths`, so hooks those modules
/// declare at their top level wrap every case of the file.
pub fn interpret(setup: &mut Setup, loader: &dyn ModuleLoader) -> Result<(), LoadError> {
    for path in &setup.test_file_paths {
        let setup_files = &setup.setup_file_paths;
        let (root, loaded) = dsl::declare(|| -> Result<(), LoadError> {
            for setup_file in setup_files {
                loader.load(setup_file)?;
            }
            loader.load(path)
        })
        .map_err(|source| LoadError::Declaration {
            path: path.clone(),
            source,
        })?;
        loaded?;

        let cases = resolve(path, &root, &setup.globals);
        debug!(file = %path.display(), cases = cases.len(), "interpreted test module");
        setup.tests.extend(cases);
    }
    Ok(())
}

/// Hooks collected so far at one group level.
#[derive(Default)]
struct Level {
    setup: Vec<Body>,
    teardown: Vec<Body>,
}

struct Walk<'a> {
    path: &'a Path,
    globals: &'a BTreeMap<String, String>,
    descriptions: Vec<&'a str>,
    levels: Vec<Level>,
    cases: Vec<(Case, bool)>,
}

/// Flattens one module's declaration tree into resolved cases.
pub fn resolve(path: &Path, root: &GroupNode, globals: &BTreeMap<String, String>) -> Vec<Case> {
    let mut walk = Walk {
        path,
        globals,
        descriptions: Vec::new(),
        levels: Vec::new(),
        cases: Vec::new(),
    };
    walk.group(root, false);

    let focused = walk
        .cases
        .iter()
        .any(|(case, focus)| *focus && case.run_state == RunState::Run);
    walk.cases
        .into_iter()
        .map(|(mut case, focus)| {
            if focused && !focus && case.run_state == RunState::Run {
                case.run_state = RunState::Skip;
            }
            case
        })
        .collect()
}

impl<'a> Walk<'a> {
    fn group(&mut self, group: &'a GroupNode, inherited_skip: bool) {
        let skip = inherited_skip || group.skip;
        let described = !group.description.is_empty();
        if described {
            self.descriptions.push(&group.description);
        }
        self.levels.push(Level::default());

        for child in &group.children {
            match child {
                Node::Group(inner) => self.group(inner, skip),
                Node::Hook(hook) if !hook.skip => {
                    if let Some(level) = self.levels.last_mut() {
                        match hook.kind {
                            HookKind::Setup => level.setup.push(hook.body.clone()),
                            HookKind::Teardown => level.teardown.push(hook.body.clone()),
                        }
                    }
                }
                Node::Hook(_) => {}
                Node::Case(case) => {
                    let run_state = match case.intent {
                        Intent::Todo => RunState::Todo,
                        Intent::Skip => RunState::Skip,
                        Intent::Run | Intent::Focus if skip => RunState::Skip,
                        Intent::Run | Intent::Focus => RunState::Run,
                    };
                    let resolved = Case {
                        test_file_path: self.path.to_path_buf(),
                        description: self.describe(&case.description),
                        body: case.body.clone(),
                        run_state,
                        setup_hooks: self.levels.iter().flat_map(|l| l.setup.clone()).collect(),
                        teardown_hooks: self
                            .levels
                            .iter()
                            .rev()
                            .flat_map(|l| l.teardown.clone())
                            .collect(),
                        globals: self.globals.clone(),
                    };
                    self.cases.push((resolved, case.intent == Intent::Focus));
                }
            }
        }

        self.levels.pop();
        if described {
            self.descriptions.pop();
        }
    }

    fn describe(&self, own: &str) -> String {
        let mut parts = self.descriptions.clone();
        if !own.is_empty() {
            parts.push(own);
        }
        parts.join(" ")
    }
}
