use crate::cache::{CacheError, CacheStore};
use crate::image::{with_retry, Image, ImageError};
use crate::layers::{LayerEntry, LayersDir};
use crate::tar::{self, ArchiveError};
use pallet_common::toml_file::{write_toml_file, TomlFileError};
use pallet_data::group::{BuildpackGroup, GroupBuildpack};
use pallet_data::image_metadata::{
    table_to_data, ImageMetadata, LayerMetadata, METADATA_LABEL,
};
use pallet_data::launch::{Launch, LaunchBuildpackMetadata, LaunchMetadata};
use std::fs;
use std::path::Path;

/// An error that occurred during export.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("launch layer {id}/{name} has no content and no reusable previous layer")]
    MissingLayerContent { id: String, name: String },

    #[error("image store error during export: {0}")]
    Image(#[from] ImageError),

    #[error("cache store error during export: {0}")]
    Cache(#[from] CacheError),

    #[error("error archiving layer: {0}")]
    Archive(#[from] ArchiveError),

    #[error("layers directory error during export: {0}")]
    Layer(#[from] crate::layers::LayerError),

    #[error("error writing launch metadata: {0}")]
    TomlFile(#[from] TomlFileError),

    #[error("error serializing image metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error during export: {0}")]
    Io(#[from] std::io::Error),
}

/// Composes the runnable image from the stack base, reused layers and
/// newly built launch layers, then persists cache-marked layers.
pub struct Exporter<'a> {
    pub group: &'a BuildpackGroup,
    pub layers: &'a LayersDir,
    pub app_dir: &'a Path,
    /// Entrypoint written into the image config.
    pub launcher: &'a str,
}

impl Exporter<'_> {
    /// Exports the image and returns its digest.
    ///
    /// `output` must already be based on the run image; `previous` is the
    /// metadata of the image previously published under the destination
    /// reference (default/empty for a cold build). `work_dir` receives
    /// the intermediate tar files.
    pub fn export(
        &self,
        output: &mut dyn Image,
        run_image: &dyn Image,
        previous: &ImageMetadata,
        cache: &mut dyn CacheStore,
        work_dir: &Path,
    ) -> Result<String, ExportError> {
        fs::create_dir_all(work_dir)?;

        let mut metadata = ImageMetadata::default();
        metadata.run_image.top_layer = with_retry(|| run_image.top_layer())?;
        metadata.run_image.reference = run_image.reference().to_string();

        // Application layer.
        let app_tar = work_dir.join("app.tar");
        let app_diff_id = tar::archive(self.app_dir, "workspace/app", &app_tar)?;
        if previous.app.sha == app_diff_id {
            log::info!("reusing app layer");
            output.reuse_layer(&app_diff_id)?;
        } else {
            log::info!("adding app layer ({app_diff_id})");
            output.add_layer(&app_tar)?;
        }
        metadata.app.sha = app_diff_id;

        // Config layer: the launch-time descriptor.
        let launch = self.merged_launch()?;
        let config_src = work_dir.join("config");
        write_toml_file(
            &self.launch_metadata(&launch)?,
            config_src.join("metadata.toml"),
        )?;
        let config_tar = work_dir.join("config.tar");
        let config_diff_id = tar::archive(&config_src, "workspace/config", &config_tar)?;
        if previous.config.sha == config_diff_id {
            log::info!("reusing config layer");
            output.reuse_layer(&config_diff_id)?;
        } else {
            log::info!("adding config layer ({config_diff_id})");
            output.add_layer(&config_tar)?;
        }
        metadata.config.sha = config_diff_id;

        // Buildpack layers, in group order.
        for buildpack in &self.group.buildpacks {
            for entry in self.layers.layer_entries(&buildpack.id)? {
                if !entry.metadata.launch && !entry.metadata.cache {
                    // Build-only layers never leave the build host.
                    continue;
                }

                let sha = if entry.metadata.launch {
                    self.export_launch_layer(output, previous, buildpack, &entry, work_dir)?
                } else {
                    String::new()
                };

                metadata.insert_layer(
                    &buildpack.id,
                    &entry.name,
                    LayerMetadata {
                        sha,
                        data: table_to_data(&entry.metadata.metadata),
                        build: entry.metadata.build,
                        launch: entry.metadata.launch,
                        cache: entry.metadata.cache,
                    },
                );
            }
        }

        output.set_entrypoint(&[self.launcher.to_string()])?;
        let cmd: Vec<String> = launch
            .processes
            .first()
            .map(|process| process.r#type.to_string())
            .into_iter()
            .collect();
        output.set_cmd(&cmd)?;

        output.set_label(METADATA_LABEL, &serde_json::to_string(&metadata)?)?;
        let digest = output.save()?;
        log::info!("exported image {} ({digest})", output.reference());

        self.commit_cache(cache, work_dir)?;

        Ok(digest)
    }

    /// Reuses the previous image's layer when the sidecar metadata still
    /// matches, re-archives the directory otherwise. Returns the layer's
    /// diff-id.
    fn export_launch_layer(
        &self,
        output: &mut dyn Image,
        previous: &ImageMetadata,
        buildpack: &GroupBuildpack,
        entry: &LayerEntry,
        work_dir: &Path,
    ) -> Result<String, ExportError> {
        let reusable = previous
            .layer(&buildpack.id, &entry.name)
            .filter(|layer| !layer.sha.is_empty())
            .filter(|layer| layer.data_matches(&entry.metadata.metadata));

        if let Some(layer) = reusable {
            match output.reuse_layer(&layer.sha) {
                Ok(()) => {
                    log::info!("reusing layer {}/{}", buildpack.id, entry.name);
                    return Ok(layer.sha.clone());
                }
                // The descriptor is stale but we can still rebuild from
                // disk if the buildpack left content.
                Err(ImageError::LayerNotFound(_)) if entry.has_content => {}
                Err(error) => return Err(error.into()),
            }
        }

        if !entry.has_content {
            return Err(ExportError::MissingLayerContent {
                id: buildpack.id.to_string(),
                name: entry.name.to_string(),
            });
        }

        let escaped = buildpack.id.escaped();
        let prefix = format!("workspace/{escaped}/{}", entry.name);
        let tar_path = work_dir.join(format!("layer-{escaped}-{}.tar", entry.name));
        let diff_id = tar::archive(&entry.path, &prefix, &tar_path)?;
        output.add_layer(&tar_path)?;
        log::info!("adding layer {}/{} ({diff_id})", buildpack.id, entry.name);

        Ok(diff_id)
    }

    /// Commits every cache-marked layer, then finalizes the store, which
    /// prunes entries this build no longer produced.
    fn commit_cache(
        &self,
        cache: &mut dyn CacheStore,
        work_dir: &Path,
    ) -> Result<(), ExportError> {
        for buildpack in &self.group.buildpacks {
            for entry in self.layers.layer_entries(&buildpack.id)? {
                if !entry.metadata.cache {
                    continue;
                }
                if !entry.has_content {
                    log::warn!(
                        "cache layer {}/{} has no content on disk, not caching",
                        buildpack.id,
                        entry.name
                    );
                    continue;
                }

                let escaped = buildpack.id.escaped();
                let tar_path = work_dir.join(format!("cache-{escaped}-{}.tar", entry.name));
                tar::archive(&entry.path, "", &tar_path)?;
                cache.commit(&buildpack.id, &entry.name, &tar_path, &entry.metadata)?;
                log::debug!("cached layer {}/{}", buildpack.id, entry.name);
            }
        }

        cache.finalize()?;

        Ok(())
    }

    /// The group's launch tables merged in order; a repeated process type
    /// takes the later buildpack's command.
    fn merged_launch(&self) -> Result<Launch, ExportError> {
        let mut merged = Launch::new();
        for buildpack in &self.group.buildpacks {
            if let Some(launch) = self.layers.read_launch(&buildpack.id)? {
                merged.merge(launch);
            }
        }

        Ok(merged)
    }

    fn launch_metadata(&self, launch: &Launch) -> Result<LaunchMetadata, ExportError> {
        let mut metadata = LaunchMetadata {
            processes: launch.processes.clone(),
            buildpacks: Vec::new(),
        };

        for buildpack in &self.group.buildpacks {
            let mut section = LaunchBuildpackMetadata::new(&buildpack.id);
            for entry in self.layers.layer_entries(&buildpack.id)? {
                if entry.metadata.launch {
                    section
                        .layers
                        .insert(entry.name.clone(), entry.metadata.metadata.clone());
                }
            }
            metadata.buildpacks.push(section);
        }

        Ok(metadata)
    }
}

/// Reads the metadata of the image previously published under a
/// reference, for layer-reuse decisions. Absent or unreadable metadata
/// yields the empty document.
pub fn previous_metadata(image: &dyn Image) -> ImageMetadata {
    if !image.found() {
        return ImageMetadata::default();
    }

    match with_retry(|| image.label(METADATA_LABEL)) {
        Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|error| {
            log::warn!("previous image metadata is malformed, not reusing layers: {error}");
            ImageMetadata::default()
        }),
        Ok(None) => ImageMetadata::default(),
        Err(error) => {
            log::warn!("previous image is unreadable, not reusing layers: {error}");
            ImageMetadata::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The exporter is exercised end-to-end, together with the other
    // phases, in tests/lifecycle.rs; the scenarios there cover layer
    // reuse, metadata-change rebuilds, process overrides and cache
    // pruning.

    #[test]
    fn previous_metadata_of_missing_image_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = crate::image::OciImageStore::new(temp_dir.path());

        let image = store.open("absent").unwrap();
        let metadata = previous_metadata(&image);

        assert!(metadata.buildpacks.is_empty());
        assert!(metadata.app.sha.is_empty());
    }
}
