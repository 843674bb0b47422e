use serde::{Deserialize, Serialize};
use toml::value::Table;

/// A layer's sidecar TOML.
///
/// Three audience flags decide which phases see the layer: `launch` layers
/// are included in the runnable image, `build` layers are on the
/// filesystem for subsequent buildpacks during this build, `cache` layers
/// are persisted for the next build. The optional `[metadata]` table
/// carries arbitrary buildpack values; together with the layer's content
/// digest it is what reuse decisions compare.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct LayerContentMetadata {
    #[serde(default)]
    pub launch: bool,

    #[serde(default)]
    pub build: bool,

    #[serde(default)]
    pub cache: bool,

    #[serde(default, skip_serializing_if = "Table::is_empty")]
    pub metadata: Table,
}

impl LayerContentMetadata {
    #[must_use]
    pub fn launch(mut self, launch: bool) -> Self {
        self.launch = launch;
        self
    }

    #[must_use]
    pub fn build(mut self, build: bool) -> Self {
        self.build = build;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Table) -> Self {
        self.metadata = metadata;
        self
    }
}
