use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

/// An error that occurred while reading or writing a TOML file.
#[derive(thiserror::Error, Debug)]
pub enum TomlFileError {
    #[error("I/O error while reading/writing TOML file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    Deserialize(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serializes the given value as TOML and writes it to the given path,
/// creating missing parent directories.
///
/// # Errors
///
/// Will return `Err` if the file couldn't be written or the value couldn't
/// be serialized as a TOML string.
pub fn write_toml_file(
    value: &impl Serialize,
    path: impl AsRef<Path>,
) -> Result<(), TomlFileError> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, toml::to_string(value)?)?;

    Ok(())
}

/// Reads the file at the given path and parses it as `A`.
///
/// # Errors
///
/// Will return `Err` if the file couldn't be read or its contents couldn't
/// be deserialized.
pub fn read_toml_file<A: DeserializeOwned>(path: impl AsRef<Path>) -> Result<A, TomlFileError> {
    let contents = fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Deserialize, Serialize, Debug, Eq, PartialEq)]
    struct TestValue {
        name: String,
        count: u32,
    }

    #[test]
    fn round_trip() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sub").join("value.toml");

        let value = TestValue {
            name: String::from("modules"),
            count: 3,
        };

        write_toml_file(&value, &path).unwrap();
        assert_eq!(read_toml_file::<TestValue>(&path).unwrap(), value);
    }

    #[test]
    fn read_malformed() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("value.toml");
        fs::write(&path, "name = ").unwrap();

        assert!(matches!(
            read_toml_file::<TestValue>(&path),
            Err(TomlFileError::Deserialize(_))
        ));
    }
}
