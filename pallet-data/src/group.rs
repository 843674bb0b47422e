use crate::buildpack::BuildpackId;
use serde::{Deserialize, Serialize};

/// The ordered set of buildpacks cooperating on one build.
///
/// Written to `group.toml` by the detector, read back by every later
/// phase. Group order defines execution order and resolves override ties.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct BuildpackGroup {
    #[serde(default)]
    pub buildpacks: Vec<GroupBuildpack>,
}

/// A single buildpack reference within a group.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct GroupBuildpack {
    pub id: BuildpackId,
    pub version: String,
}

/// The ordered candidate groups handed to the detector, as read from
/// `order.toml`.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct BuildpackOrder {
    #[serde(default)]
    pub groups: Vec<BuildpackGroup>,
}

impl BuildpackGroup {
    /// Whether the given buildpack ID is a member of this group.
    #[must_use]
    pub fn contains(&self, id: &BuildpackId) -> bool {
        self.buildpacks.iter().any(|buildpack| &buildpack.id == id)
    }
}
