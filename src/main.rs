use clap::{Parser, Subcommand};
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use testframe::{loader, schema};
use tracing::Level;

#[derive(Parser)]
#[command(name = "testframe")]
#[command(about = "Inspect and scaffold testframe test suites")]
#[command(version)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the test files a suite's config discovers
    List {
        /// Directory containing testframe.yaml / testframe.toml
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Scaffold a new config file
    Init {
        /// Output path for the new config file
        #[arg(default_value = "testframe.yaml")]
        path: PathBuf,
    },
    /// Output the config schema
    Schema,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::List { path } => {
            let config = match loader::load_config(&path) {
                Ok(Some(config)) => config,
                Ok(None) => {
                    eprintln!("No config file found in: {}", path.display());
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Error loading config: {e}");
                    std::process::exit(1);
                }
            };

            let pattern = match Regex::new(config.pattern()) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Invalid pattern {:?}: {e}", config.pattern());
                    std::process::exit(1);
                }
            };
            let root = match &config.test_dir {
                Some(dir) => path.join(dir),
                None => path.clone(),
            };
            tracing::debug!(root = %root.display(), "searching for test files");

            let files = match loader::find_test_files(&root, &pattern) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Error finding test files: {e}");
                    std::process::exit(1);
                }
            };

            if files.is_empty() {
                eprintln!("No test files found at: {}", root.display());
                std::process::exit(1);
            }

            for file in &files {
                println!("{}", file.display());
            }
            println!("\n{} test file(s)", files.len());
        }
        Command::Init { path } => {
            let template = r#"version: 1

# Directory searched for test files, relative to this file.
test_dir: tests

# Regular expression test file paths must match.
pattern: "_spec\\.rs$"

# Exposed to every case as environment variables.
globals:
  MODE: local
  # API_URL: ${API_URL}

# components:
#   retries: 3
"#;
            if path.exists() {
                eprintln!("Error: file already exists: {}", path.display());
                std::process::exit(1);
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
                && let Err(e) = fs::create_dir_all(parent)
            {
                eprintln!("Error creating directory: {e}");
                std::process::exit(1);
            }
            if let Err(e) = fs::write(&path, template) {
                eprintln!("Error writing file: {e}");
                std::process::exit(1);
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => {
            let schema = schema::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
