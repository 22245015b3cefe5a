//! Error types shared by glsync crates

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for shared glsync operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised while reading run inputs (config, state and catalog files)
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CommonError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an I/O error with the path that caused it
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a JSON error with the path that caused it
    pub fn json(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Read and deserialize a JSON document from disk.
///
/// An empty (or whitespace-only) file yields `T::default()`, which lets
/// callers hand in a freshly touched state file.
pub fn read_json_file<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| CommonError::io(path, e))?;
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&text).map_err(|e| CommonError::json(path, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    #[test]
    fn test_read_json_file_parses_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"a": 1}}"#).unwrap();

        let parsed: BTreeMap<String, i64> = read_json_file(file.path()).unwrap();
        assert_eq!(parsed.get("a"), Some(&1));
    }

    #[test]
    fn test_read_json_file_empty_is_default() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let parsed: BTreeMap<String, i64> = read_json_file(file.path()).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_read_json_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = read_json_file::<BTreeMap<String, i64>>(file.path()).unwrap_err();
        assert!(matches!(err, CommonError::Json { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_json_file::<BTreeMap<String, i64>>("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, CommonError::Io { .. }));
    }
}
