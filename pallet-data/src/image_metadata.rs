use crate::buildpack::BuildpackId;
use crate::layer::LayerName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use toml::value::Table;

/// Name of the image label under which the lifecycle stores its metadata.
pub const METADATA_LABEL: &str = "io.buildpacks.lifecycle.metadata";

/// The JSON document stored under [`METADATA_LABEL`] on every exported
/// image.
///
/// It records, per buildpack, every layer declared with `launch` or
/// `cache` set — flags, content digest and echoed `[metadata]` — plus the
/// run image's top layer (the rebase anchor) and the digests of the
/// lifecycle-owned application and config layers.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ImageMetadata {
    #[serde(default)]
    pub buildpacks: Vec<BuildpackLayersMetadata>,
    #[serde(rename = "runImage", default)]
    pub run_image: RunImageMetadata,
    #[serde(default)]
    pub app: LayerDigest,
    #[serde(default)]
    pub config: LayerDigest,
}

/// Per-buildpack section of [`ImageMetadata`].
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BuildpackLayersMetadata {
    pub key: BuildpackId,
    #[serde(default)]
    pub layers: BTreeMap<LayerName, LayerMetadata>,
}

/// One layer's record within [`BuildpackLayersMetadata`].
///
/// `sha` is the layer's diff-id; it is empty for cache-only layers, which
/// never become image layers. `data` is the `[metadata]` table from the
/// layer's sidecar, carried as JSON.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LayerMetadata {
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub launch: bool,
    #[serde(default)]
    pub cache: bool,
}

/// The run image anchor recorded for rebase.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RunImageMetadata {
    #[serde(rename = "topLayer", default)]
    pub top_layer: String,
    #[serde(default)]
    pub reference: String,
}

/// A bare diff-id, used for the application and config layers.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LayerDigest {
    #[serde(default)]
    pub sha: String,
}

impl ImageMetadata {
    /// The metadata section for the given buildpack, if recorded.
    #[must_use]
    pub fn buildpack(&self, id: &BuildpackId) -> Option<&BuildpackLayersMetadata> {
        self.buildpacks
            .iter()
            .find(|buildpack| &buildpack.key == id)
    }

    /// The record for one layer, if the given buildpack declared it.
    #[must_use]
    pub fn layer(&self, id: &BuildpackId, name: &LayerName) -> Option<&LayerMetadata> {
        self.buildpack(id)
            .and_then(|buildpack| buildpack.layers.get(name))
    }

    /// Inserts or replaces one layer's record, creating the buildpack
    /// section if needed. Buildpack sections keep insertion (group) order.
    pub fn insert_layer(&mut self, id: &BuildpackId, name: &LayerName, layer: LayerMetadata) {
        if let Some(buildpack) = self
            .buildpacks
            .iter_mut()
            .find(|buildpack| &buildpack.key == id)
        {
            buildpack.layers.insert(name.clone(), layer);
        } else {
            self.buildpacks.push(BuildpackLayersMetadata {
                key: id.clone(),
                layers: BTreeMap::from([(name.clone(), layer)]),
            });
        }
    }
}

impl LayerMetadata {
    /// Whether this record's `data` equals the given sidecar `[metadata]`
    /// table.
    ///
    /// Missing/null `data` compares equal to an empty table.
    #[must_use]
    pub fn data_matches(&self, metadata: &Table) -> bool {
        let Ok(current) = serde_json::to_value(metadata) else {
            return false;
        };

        if self.data.is_null() {
            current == serde_json::Value::Object(serde_json::Map::new())
        } else {
            current == self.data
        }
    }

    /// This record's `data` as a TOML table, for writing sidecars.
    ///
    /// Values that don't translate (or a null `data`) yield an empty
    /// table.
    #[must_use]
    pub fn data_as_table(&self) -> Table {
        use serde::Deserialize as _;

        toml::Value::deserialize(self.data.clone())
            .ok()
            .and_then(|value| match value {
                toml::Value::Table(table) => Some(table),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Converts a sidecar `[metadata]` table to the JSON carried in the label.
#[must_use]
pub fn table_to_data(metadata: &Table) -> serde_json::Value {
    serde_json::to_value(metadata).unwrap_or(serde_json::Value::Object(serde_json::Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImageMetadata {
        serde_json::from_str(
            r#"{
              "buildpacks": [
                { "key": "heroku/jvm",
                  "layers": {
                    "modules": { "sha": "sha256:abc", "data": {"k": 1},
                                 "build": false, "launch": true, "cache": true }
                  } }
              ],
              "runImage": { "topLayer": "sha256:base", "reference": "run" },
              "app": { "sha": "sha256:app" },
              "config": { "sha": "sha256:config" }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_label_schema() {
        let metadata = sample();

        assert_eq!(metadata.run_image.top_layer, "sha256:base");
        assert_eq!(metadata.app.sha, "sha256:app");

        let layer = metadata
            .layer(
                &"heroku/jvm".parse().unwrap(),
                &"modules".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(layer.sha, "sha256:abc");
        assert!(layer.launch);
        assert!(layer.cache);
        assert!(!layer.build);
    }

    #[test]
    fn serializes_camel_case_keys() {
        let rendered = serde_json::to_string(&sample()).unwrap();

        assert!(rendered.contains("\"runImage\""));
        assert!(rendered.contains("\"topLayer\""));
    }

    #[test]
    fn data_matches_compares_tables() {
        let layer = sample().buildpacks[0].layers["modules"].clone();

        let same: Table = toml::from_str("k = 1").unwrap();
        let different: Table = toml::from_str("k = 2").unwrap();

        assert!(layer.data_matches(&same));
        assert!(!layer.data_matches(&different));
    }

    #[test]
    fn null_data_matches_empty_table() {
        let layer = LayerMetadata::default();
        assert!(layer.data_matches(&Table::new()));
    }

    #[test]
    fn data_round_trips_to_table() {
        let layer = sample().buildpacks[0]
            .layers
            .get(&"modules".parse::<LayerName>().unwrap())
            .cloned()
            .unwrap();

        let table = layer.data_as_table();
        assert_eq!(table["k"], toml::Value::Integer(1));
    }
}
