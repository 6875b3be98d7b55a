//! Typed file loaders for configuration and seed data.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Error;
use crate::result::Result;

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))
}

/// Read and deserialize a TOML file.
///
/// # Errors
///
/// Returns `Error::FileReadFailed` if the file cannot be read and
/// `Error::TomlParseFailed` if its contents do not deserialize into `T`.
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = read_to_string(path)?;
    debug!(path = %path.display(), bytes = raw.len(), "Loading TOML file");
    toml::from_str(&raw).map_err(|e| Error::toml_parse_failed(path, e.to_string()))
}

/// Read and deserialize a JSON file.
///
/// # Errors
///
/// Returns `Error::FileReadFailed` if the file cannot be read and
/// `Error::JsonParseFailed` if its contents do not deserialize into `T`.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = read_to_string(path)?;
    debug!(path = %path.display(), bytes = raw.len(), "Loading JSON file");
    serde_json::from_str(&raw).map_err(|e| Error::json_parse_failed(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        size: u32,
    }

    #[test]
    fn test_load_toml_reads_struct() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"alpha\"\nsize = 3").unwrap();

        let sample: Sample = load_toml(file.path()).unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "alpha".to_string(),
                size: 3
            }
        );
    }

    #[test]
    fn test_load_json_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"name\": 1}}").unwrap();

        let result: Result<Sample> = load_json(file.path());
        assert!(matches!(result, Err(Error::JsonParseFailed { .. })));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result: Result<Sample> = load_toml("/definitely/not/here.toml");
        assert!(matches!(result, Err(Error::FileReadFailed { .. })));
    }
}
