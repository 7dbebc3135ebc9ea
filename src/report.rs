//! Reporter stages: live console output, JSON and JUnit XML.

use crate::compose::{ResultExecutor, Stage, StageError, StageResult, executor};
use crate::events::{Event, EventKind};
use crate::results::{ResultState, Summary, TestResult};
use crate::setup::{OutputFormat, Setup};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::rc::Rc;

/// Prints the run configuration once every stage has been applied.
pub fn setup_reporter() -> impl Stage {
    |setup: &mut Setup| -> StageResult {
        setup.events.on(EventKind::Setup, |event| {
            if let Event::Setup(setup) = event {
                print!("{}", format_setup(setup));
            }
        });
        Ok(None)
    }
}

fn format_setup(setup: &Setup) -> String {
    let mut out = String::from("testframe\n\n");
    let args = serde_json::to_string(&setup.args).unwrap_or_default();
    let _ = writeln!(out, "Args: {args}\n");
    let globals: Vec<&str> = setup.globals.keys().map(String::as_str).collect();
    let _ = writeln!(out, "Test Globals: {}\n", globals.join(", "));
    let paths: Vec<String> = setup
        .test_file_paths
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let _ = writeln!(out, "Test File Paths: {}\n", paths.join(", "));
    out
}

/// Prints each result as it arrives, then a summary line.
pub fn console_reporter() -> impl Stage {
    |setup: &mut Setup| -> StageResult {
        let verbose = setup.args.verbose;
        let current_file: Rc<RefCell<Option<PathBuf>>> = Rc::default();
        setup.events.on(EventKind::TestResult, move |event| {
            let Event::TestResult(result) = event else {
                return;
            };
            let mut current = current_file.borrow_mut();
            if current.as_ref() != Some(&result.test_file_path) {
                println!("\n{}", result.test_file_path.display());
                *current = Some(result.test_file_path.clone());
            }
            print!("{}", format_result_line(result, verbose));
        });

        Ok(Some(executor(|_, results| {
            println!("\n{}", format_summary(&Summary::of(results.iter())));
            Ok(())
        })))
    }
}

fn format_result_line(result: &TestResult, verbose: bool) -> String {
    let elapsed = (result.end - result.start)
        .to_std()
        .unwrap_or_default();
    let mut line = match result.state {
        ResultState::Passed => format!("  ✓ {} ({elapsed:.2?})\n", result.description),
        ResultState::Failed | ResultState::Errored => {
            format!("  ✗ {} ({elapsed:.2?})\n", result.description)
        }
        ResultState::Skipped => format!("  - {} (skipped)\n", result.description),
    };
    if let Some(error) = &result.error {
        let _ = writeln!(line, "    {error}");
    }
    if verbose {
        let _ = writeln!(line, "    started {}", result.start.to_rfc3339());
    }
    line
}

fn format_summary(summary: &Summary) -> String {
    format!(
        "{} passed, {} failed, {} errored, {} skipped",
        summary.passed, summary.failed, summary.errored, summary.skipped
    )
}

/// Prints all results as pretty JSON after the run.
pub fn json_reporter() -> impl Stage {
    |_: &mut Setup| -> StageResult { Ok(Some(json_executor(None))) }
}

fn json_executor(path: Option<PathBuf>) -> ResultExecutor {
    executor(move |_, results| {
        let json = format_json(results)?;
        match path {
            Some(path) => std::fs::write(&path, json + "\n")?,
            None => println!("{json}"),
        }
        Ok(())
    })
}

fn format_json(results: &[TestResult]) -> Result<String, StageError> {
    let output = serde_json::json!({
        "summary": Summary::of(results),
        "results": results,
    });
    serde_json::to_string_pretty(&output)
        .map_err(|e| StageError::Failed(format!("failed to serialize results: {e}")))
}

/// Writes all results as pretty JSON to `path` after the run.
pub fn json_file_reporter(path: impl Into<PathBuf>) -> impl Stage {
    let path = path.into();
    move |_: &mut Setup| -> StageResult { Ok(Some(json_executor(Some(path.clone())))) }
}

/// Writes JUnit XML to `path`, or stdout when `None`.
pub fn junit_reporter(path: Option<PathBuf>) -> impl Stage {
    move |_: &mut Setup| -> StageResult { Ok(Some(junit_executor(path.clone()))) }
}

fn junit_executor(path: Option<PathBuf>) -> ResultExecutor {
    executor(move |_, results| {
        let xml = format_junit_xml(results);
        match path {
            Some(path) => std::fs::write(&path, xml)?,
            None => print!("{xml}"),
        }
        Ok(())
    })
}

/// Chooses a reporter from `args.output`, adding result files for
/// `args.junit` and `args.output_file` when set.
pub fn reporter() -> impl Stage {
    |setup: &mut Setup| -> StageResult {
        let primary = match setup.args.output {
            OutputFormat::Human => console_reporter().apply(setup)?,
            OutputFormat::Json => Some(json_executor(None)),
            OutputFormat::Junit => Some(junit_executor(None)),
        };
        let files = [
            setup.args.junit.clone().map(|p| junit_executor(Some(p))),
            setup.args.output_file.clone().map(|p| json_executor(Some(p))),
        ];
        let executors: Vec<ResultExecutor> =
            primary.into_iter().chain(files.into_iter().flatten()).collect();
        if executors.len() <= 1 {
            return Ok(executors.into_iter().next());
        }
        Ok(Some(executor(move |setup, results| {
            for run in executors {
                run(setup, &mut *results)?;
            }
            Ok(())
        })))
    }
}

/// Format results as JUnit XML, one test suite per file.
fn format_junit_xml(results: &[TestResult]) -> String {
    let mut suites: BTreeMap<String, Vec<&TestResult>> = BTreeMap::new();
    for result in results {
        suites
            .entry(result.test_file_path.display().to_string())
            .or_default()
            .push(result);
    }

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let summary = Summary::of(results);
    let total_time: f64 = results.iter().map(seconds).sum();
    let _ = writeln!(
        xml,
        "<testsuites tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{total_time:.3}\">",
        summary.total(),
        summary.failed,
        summary.errored,
        summary.skipped
    );

    for (file, tests) in &suites {
        let suite = Summary::of(tests.iter().copied());
        let time: f64 = tests.iter().map(|t| seconds(t)).sum();
        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{time:.3}\">",
            escape_xml(file),
            suite.total(),
            suite.failed,
            suite.errored,
            suite.skipped
        );

        for test in tests {
            let _ = writeln!(
                xml,
                "    <testcase name=\"{}\" time=\"{:.3}\">",
                escape_xml(&test.description),
                seconds(test)
            );
            let message = test
                .error
                .as_ref()
                .map(|e| e.message().to_string())
                .unwrap_or_default();
            match test.state {
                ResultState::Failed => {
                    let _ = writeln!(xml, "      <failure message=\"{}\"/>", escape_xml(&message));
                }
                ResultState::Errored => {
                    let _ = writeln!(xml, "      <error message=\"{}\"/>", escape_xml(&message));
                }
                ResultState::Skipped => xml.push_str("      <skipped/>\n"),
                ResultState::Passed => {}
            }
            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

fn seconds(result: &TestResult) -> f64 {
    (result.end - result.start).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
