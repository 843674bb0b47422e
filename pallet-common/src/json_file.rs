use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

/// An error that occurred while reading or writing a JSON file.
#[derive(thiserror::Error, Debug)]
pub enum JsonFileError {
    #[error("I/O error while reading/writing JSON file: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes the given value as JSON and writes it to the given path,
/// creating missing parent directories.
///
/// # Errors
///
/// Will return `Err` if the file couldn't be written or the value couldn't
/// be serialized as JSON.
pub fn write_json_file(
    value: &impl Serialize,
    path: impl AsRef<Path>,
) -> Result<(), JsonFileError> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, serde_json::to_vec(value)?)?;

    Ok(())
}

/// Reads the file at the given path and parses it as `A`.
///
/// # Errors
///
/// Will return `Err` if the file couldn't be read or its contents couldn't
/// be deserialized.
pub fn read_json_file<A: DeserializeOwned>(path: impl AsRef<Path>) -> Result<A, JsonFileError> {
    let contents = fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("value.json");

        let value = serde_json::json!({"sha": "sha256:abc", "launch": true});

        write_json_file(&value, &path).unwrap();
        assert_eq!(
            read_json_file::<serde_json::Value>(&path).unwrap(),
            value
        );
    }
}
