use crate::image::{with_retry, Image};
use crate::layers::{LayerError, LayersDir};
use pallet_data::group::BuildpackGroup;
use pallet_data::image_metadata::{ImageMetadata, METADATA_LABEL};
use pallet_data::layer_content_metadata::LayerContentMetadata;

/// An error that occurred during analysis.
#[derive(thiserror::Error, Debug)]
pub enum AnalyzeError {
    #[error("previous image metadata is malformed: {0}")]
    MalformedMetadata(#[from] serde_json::Error),

    #[error("layers directory error during analysis: {0}")]
    Layer(#[from] LayerError),
}

/// Reconciles the previous image's metadata with the layers directory.
///
/// Only metadata moves in this phase: for every layer the previous image
/// declared for a group member, a sidecar holding just that layer's
/// `[metadata]` is written so the builder and exporter can compare.
/// Nothing is materialized; flags are recomputed during rebuild.
pub struct Analyzer<'a> {
    pub group: &'a BuildpackGroup,
    pub layers: &'a LayersDir,
}

impl Analyzer<'_> {
    /// Runs the analysis against the previous image.
    ///
    /// A missing or unreadable previous image degrades to a cold build; a
    /// metadata label that exists but doesn't parse is fatal.
    pub fn analyze(&self, previous_image: &dyn Image) -> Result<(), AnalyzeError> {
        let Some(metadata) = read_previous_metadata(previous_image)? else {
            log::info!("no previous image metadata, cold build");
            return Ok(());
        };

        for buildpack in &metadata.buildpacks {
            if !self.group.contains(&buildpack.key) {
                log::debug!("removing layers of dropped buildpack {}", buildpack.key);
                self.layers.delete_buildpack_dir(&buildpack.key)?;
                continue;
            }

            // Layers on disk the previous image didn't declare are partial
            // leftovers of a cancelled run.
            for entry in self.layers.layer_entries(&buildpack.key)? {
                if !buildpack.layers.contains_key(&entry.name) {
                    log::debug!("discarding stale layer {}/{}", buildpack.key, entry.name);
                    self.layers.delete_layer(&buildpack.key, &entry.name)?;
                }
            }

            for (name, layer) in &buildpack.layers {
                let sidecar = LayerContentMetadata::default().metadata(layer.data_as_table());
                self.layers
                    .write_layer_metadata(&buildpack.key, name, &sidecar)?;
            }
        }

        for buildpack in &self.group.buildpacks {
            if metadata.buildpack(&buildpack.id).is_none() {
                for entry in self.layers.layer_entries(&buildpack.id)? {
                    log::debug!("discarding stale layer {}/{}", buildpack.id, entry.name);
                    self.layers.delete_layer(&buildpack.id, &entry.name)?;
                }
            }
        }

        Ok(())
    }
}

fn read_previous_metadata(image: &dyn Image) -> Result<Option<ImageMetadata>, AnalyzeError> {
    if !image.found() {
        log::warn!("previous image {} not found", image.reference());
        return Ok(None);
    }

    let label = match with_retry(|| image.label(METADATA_LABEL)) {
        Ok(label) => label,
        Err(error) => {
            log::warn!("previous image is unreadable, treating it as absent: {error}");
            return Ok(None);
        }
    };

    match label {
        None => Ok(None),
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
    }
}
