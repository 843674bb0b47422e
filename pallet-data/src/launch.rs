use crate::buildpack::BuildpackId;
use crate::layer::LayerName;
use crate::newtypes::data_newtype;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

data_newtype!(
    /// launch.toml process type. It MUST only contain numbers, letters,
    /// and the characters `.`, `_`, and `-`.
    ProcessType,
    ProcessTypeError,
    r"^[[:alnum:]\._-]+$"
);

/// Data structure for a buildpack's `launch.toml` file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Launch {
    #[serde(default)]
    pub processes: Vec<Process>,
}

/// A single process declaration.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct Process {
    pub r#type: ProcessType,
    pub command: String,
}

impl Process {
    /// Creates a process, validating the type.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the type contains characters outside the allowed
    /// set.
    pub fn new(
        r#type: impl AsRef<str>,
        command: impl Into<String>,
    ) -> Result<Self, ProcessTypeError> {
        Ok(Self {
            r#type: ProcessType::from_str(r#type.as_ref())?,
            command: command.into(),
        })
    }
}

impl Launch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges another buildpack's launch table into this one.
    ///
    /// Call in group order: a process type that was already declared keeps
    /// its position but gets the later buildpack's command.
    pub fn merge(&mut self, other: Launch) {
        for process in other.processes {
            if let Some(existing) = self
                .processes
                .iter_mut()
                .find(|existing| existing.r#type == process.r#type)
            {
                *existing = process;
            } else {
                self.processes.push(process);
            }
        }
    }
}

/// The launch-time descriptor written into the exported image's config
/// layer as `metadata.toml`.
///
/// A launcher reads this at container start to pick the process to run;
/// buildpack layer metadata is echoed so launch-time tooling doesn't need
/// registry access.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LaunchMetadata {
    #[serde(default)]
    pub processes: Vec<Process>,
    #[serde(default)]
    pub buildpacks: Vec<LaunchBuildpackMetadata>,
}

/// Per-buildpack section of [`LaunchMetadata`].
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LaunchBuildpackMetadata {
    pub key: String,
    #[serde(default)]
    pub layers: BTreeMap<LayerName, toml::value::Table>,
}

impl LaunchBuildpackMetadata {
    #[must_use]
    pub fn new(id: &BuildpackId) -> Self {
        Self {
            key: id.to_string(),
            layers: BTreeMap::new(),
        }
    }
}
