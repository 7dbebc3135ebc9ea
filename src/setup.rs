//! The shared, mutable state every stage works on.

use crate::case::{AssertionKind, Case};
use crate::events::{Event, EventBus};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

/// Command-line arguments understood by the built-in stages.
#[derive(Debug, Clone, Default, Parser, Serialize)]
#[command(name = "testframe")]
pub struct Args {
    /// Filter tests by description (substring match)
    #[arg(short, long)]
    pub filter: Option<String>,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,
    /// Write JUnit XML to this file in addition to the chosen output
    #[arg(long)]
    pub junit: Option<PathBuf>,
    /// Write JSON results to this file in addition to the chosen output
    #[arg(long)]
    pub output_file: Option<PathBuf>,
    /// Show verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// State for one run, created fresh by [`crate::Pipeline::run`].
#[derive(Debug, Default)]
pub struct Setup {
    pub events: EventBus,
    /// Modules declared ahead of every test file, in order.
    pub setup_file_paths: Vec<PathBuf>,
    pub test_file_paths: Vec<PathBuf>,
    /// Injected into the process environment while each case runs.
    pub globals: BTreeMap<String, String>,
    /// Arbitrary state contributed by stages.
    pub components: HashMap<String, serde_json::Value>,
    pub args: Args,
    /// Resolved cases in execution order.
    pub tests: Vec<Case>,
    /// Panics counted as assertion failures besides `assert!` and friends.
    pub assertion_kinds: Vec<AssertionKind>,
}

impl Setup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals that the run should end with `code`.
    pub fn exit(&self, code: i32) {
        self.events.emit(&Event::Exit(code));
    }
}
