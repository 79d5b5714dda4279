//! Typed file loading for YAML configuration and JSON snapshots.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))
}

/// Read and deserialize a YAML document.
///
/// # Errors
///
/// Returns [`Error::FileReadFailed`] when the file cannot be read and
/// [`Error::YamlParseFailed`] when it does not match `T`.
pub fn read_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|e| Error::yaml_parse_failed(path, e.to_string()))
}

/// Read a binary file, such as a packaged function artifact.
///
/// # Errors
///
/// Returns [`Error::FileReadFailed`] when the file cannot be read.
pub fn read_bytes(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| Error::file_read_failed(path, e.to_string()))
}

/// Read and deserialize a JSON document.
///
/// # Errors
///
/// Returns [`Error::FileReadFailed`] when the file cannot be read and
/// [`Error::JsonParseFailed`] when it does not match `T`.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| Error::json_parse_failed(path, e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_read_bytes_roundtrips_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("artifact.zip");
        std::fs::write(&path, [0x50_u8, 0x4b, 0x03, 0x04]).expect("write");

        assert_eq!(read_bytes(&path).expect("read"), vec![0x50, 0x4b, 0x03, 0x04]);
    }

    #[test]
    fn test_read_yaml_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "a: 1\nb: 2\n").expect("write");

        let parsed: BTreeMap<String, u32> = read_yaml(&path).expect("parse");
        assert_eq!(parsed.get("b"), Some(&2));
    }

    #[test]
    fn test_read_missing_file_reports_path() {
        let result: Result<BTreeMap<String, u32>> = read_json("/nonexistent/snapshot.json");
        match result {
            Err(Error::FileReadFailed { path, .. }) => {
                assert!(path.ends_with("snapshot.json"));
            }
            other => panic!("expected FileReadFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_read_json_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{ not json").expect("write");

        let result: Result<BTreeMap<String, u32>> = read_json(&path);
        assert!(matches!(result, Err(Error::JsonParseFailed { .. })));
    }
}
