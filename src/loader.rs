//! Configuration loading and test file discovery.

use crate::dsl::DeclarationError;
use crate::schema::{CONFIG_VERSION, Config};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Error type for loading configuration and test modules.
#[derive(Debug)]
pub enum LoadError {
    /// Failed to read the file.
    Io(std::io::Error),
    /// Failed to parse YAML.
    Yaml(serde_yaml::Error),
    /// Failed to parse TOML.
    Toml(toml::de::Error),
    /// Unsupported file extension.
    UnsupportedFormat(String),
    /// The config declares a `version` this release cannot read.
    UnsupportedVersion(u32),
    /// No module is registered for a test file path.
    UnknownModule(PathBuf),
    /// A test module misused the declaration primitives or panicked.
    Declaration {
        path: PathBuf,
        source: DeclarationError,
    },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "failed to read file: {e}"),
            LoadError::Yaml(e) => write!(f, "invalid YAML: {e}"),
            LoadError::Toml(e) => write!(f, "invalid TOML: {e}"),
            LoadError::UnsupportedFormat(ext) => {
                write!(
                    f,
                    "unsupported file format: {ext} (expected .yaml, .yml, or .toml)"
                )
            }
            LoadError::UnsupportedVersion(v) => {
                write!(f, "unsupported config version {v} (expected {CONFIG_VERSION})")
            }
            LoadError::UnknownModule(path) => {
                write!(f, "no test module registered for {}", path.display())
            }
            LoadError::Declaration { path, source } => {
                write!(f, "failed to load {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(e) => Some(e),
            LoadError::Yaml(e) => Some(e),
            LoadError::Toml(e) => Some(e),
            LoadError::Declaration { source, .. } => Some(source),
            LoadError::UnsupportedFormat(_)
            | LoadError::UnsupportedVersion(_)
            | LoadError::UnknownModule(_) => None,
        }
    }
}

/// Config file names looked up in a test root, in priority order.
pub const CONFIG_FILENAMES: [&str; 3] = ["testframe.yaml", "testframe.yml", "testframe.toml"];

/// Parse a config file, choosing the format by extension.
pub fn parse_config(path: &Path) -> Result<Config, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(LoadError::Io)?;

    let config: Config = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(LoadError::Yaml)?,
        "toml" => toml::from_str(&contents).map_err(LoadError::Toml)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    if config.version != CONFIG_VERSION {
        return Err(LoadError::UnsupportedVersion(config.version));
    }
    Ok(config)
}

/// Load configuration from a directory.
///
/// Returns `None` if no config file exists, `Err` if one exists but is invalid.
pub fn load_config(dir: &Path) -> Result<Option<Config>, LoadError> {
    match CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
    {
        Some(path) => parse_config(&path).map(Some),
        None => Ok(None),
    }
}

/// Find all files under `path` whose path matches `pattern`, sorted.
///
/// A single file is returned as-is when it matches.
pub fn find_test_files(path: &Path, pattern: &Regex) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    if path.is_file() {
        if pattern.is_match(&path.to_string_lossy()) {
            files.push(path.to_path_buf());
        }
        return Ok(files);
    }

    collect_files_recursive(path, pattern, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files_recursive(
    dir: &Path,
    pattern: &Regex,
    files: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_files_recursive(&path, pattern, files)?;
        } else if pattern.is_match(&path.to_string_lossy()) {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DEFAULT_PATTERN;
    use tempfile::tempdir;

    fn default_pattern() -> Regex {
        Regex::new(DEFAULT_PATTERN).unwrap()
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("testframe.yaml"), "version: 2\n").unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedVersion(2)));
        assert!(err.to_string().contains("expected 1"));
    }

    #[test]
    fn load_config_not_found() {
        let dir = tempdir().unwrap();
        let result = load_config(dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn load_yaml_config() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("testframe.yaml"),
            r#"
version: 1
globals:
  MY_VAR: my_value
"#,
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.globals.get("MY_VAR"), Some(&"my_value".to_string()));
    }

    #[test]
    fn load_toml_config() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("testframe.toml"),
            r#"
version = 1
test_dir = "specs"

[globals]
MODE = "ci"
"#,
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.test_dir, Some(PathBuf::from("specs")));
        assert_eq!(config.globals["MODE"], "ci");
    }

    #[test]
    fn yaml_takes_priority_over_toml() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("testframe.yaml"), "pattern: yaml").unwrap();
        std::fs::write(dir.path().join("testframe.toml"), "pattern = \"toml\"").unwrap();

        let config = load_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.pattern(), "yaml");
    }

    #[test]
    fn load_invalid_yaml() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("testframe.yaml"), "invalid: [yaml: {").unwrap();

        let result = load_config(dir.path());
        assert!(matches!(result, Err(LoadError::Yaml(_))));
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("testframe.toml"), "invalid = [toml").unwrap();

        let result = load_config(dir.path());
        assert!(matches!(result, Err(LoadError::Toml(_))));
    }

    #[test]
    fn unsupported_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testframe.txt");
        std::fs::write(&path, "").unwrap();

        let result = parse_config(&path);
        assert!(matches!(result, Err(LoadError::UnsupportedFormat(_))));
    }

    #[test]
    fn find_test_files_recursively_sorted() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b_spec.rs"), "").unwrap();
        std::fs::write(dir.path().join("a_spec.rs"), "").unwrap();
        std::fs::write(dir.path().join("nested/c_spec.rs"), "").unwrap();
        std::fs::write(dir.path().join("helpers.rs"), "").unwrap();

        let files = find_test_files(dir.path(), &default_pattern()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a_spec.rs"),
                PathBuf::from("b_spec.rs"),
                PathBuf::from("nested/c_spec.rs"),
            ]
        );
    }

    #[test]
    fn find_single_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("only_spec.rs");
        std::fs::write(&path, "").unwrap();

        let files = find_test_files(&path, &default_pattern()).unwrap();
        assert_eq!(files, vec![path]);
    }

    #[test]
    fn find_nothing_in_empty_dir() {
        let dir = tempdir().unwrap();
        let files = find_test_files(dir.path(), &default_pattern()).unwrap();
        assert!(files.is_empty());
    }
}
