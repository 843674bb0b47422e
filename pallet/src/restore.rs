use crate::cache::{CacheError, CacheStore};
use crate::layers::{LayerError, LayersDir};
use crate::tar;
use pallet_data::group::BuildpackGroup;

/// An error that occurred during restore.
#[derive(thiserror::Error, Debug)]
pub enum RestoreError {
    #[error("cache error during restore: {0}")]
    Cache(#[from] CacheError),

    #[error("layers directory error during restore: {0}")]
    Layer(#[from] LayerError),

    #[error("I/O error during restore: {0}")]
    Io(#[from] std::io::Error),
}

/// Materializes cached layers back onto the layers directory.
///
/// Runs after analysis: only cache entries the analyzer wrote a sidecar
/// for are restored; anything else in the cache is stale and left for the
/// exporter's prune. Restore is idempotent and safely re-runnable.
pub struct Restorer<'a> {
    pub group: &'a BuildpackGroup,
    pub layers: &'a LayersDir,
}

impl Restorer<'_> {
    pub fn restore(&self, cache: &dyn CacheStore) -> Result<(), RestoreError> {
        for buildpack in &self.group.buildpacks {
            for name in cache.layer_names(&buildpack.id)? {
                if !self.layers.layer_toml(&buildpack.id, &name).exists() {
                    log::debug!(
                        "cache entry {}/{name} has no analyzed metadata, discarding",
                        buildpack.id
                    );
                    continue;
                }

                let cached = match cache.retrieve(&buildpack.id, &name) {
                    Ok(Some(cached)) => cached,
                    Ok(None) => continue,
                    Err(error) if error.is_recoverable() => {
                        log::warn!("treating cache entry as absent: {error}");
                        continue;
                    }
                    Err(error) => return Err(error.into()),
                };

                // Idempotent: clear whatever a previous attempt left
                // before unpacking, keeping the analyzed sidecar.
                self.layers.clear_layer_content(&buildpack.id, &name)?;

                let layer_dir = self.layers.layer_dir(&buildpack.id, &name);
                match tar::unpack(cached.tar, &layer_dir) {
                    Ok(()) => {
                        self.layers
                            .write_layer_metadata(&buildpack.id, &name, &cached.metadata)?;
                        log::info!("restored layer {}/{name}", buildpack.id);
                    }
                    Err(error) => {
                        // Corrupt cache bytes are recoverable: drop the
                        // partial directory and build the layer cold.
                        log::warn!(
                            "failed to unpack cache entry {}/{name}, discarding: {error}",
                            buildpack.id
                        );
                        self.layers.clear_layer_content(&buildpack.id, &name)?;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DirectoryCache;
    use pallet_data::buildpack::BuildpackId;
    use pallet_data::group::GroupBuildpack;
    use pallet_data::layer::LayerName;
    use pallet_data::layer_content_metadata::LayerContentMetadata;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn bp_a() -> BuildpackId {
        "bp-a".parse().unwrap()
    }

    fn modules() -> LayerName {
        "modules".parse().unwrap()
    }

    fn group() -> BuildpackGroup {
        BuildpackGroup {
            buildpacks: vec![GroupBuildpack {
                id: bp_a(),
                version: String::from("1.0.0"),
            }],
        }
    }

    fn seeded_cache(root: &Path) -> DirectoryCache {
        let source = root.join("cache-source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("dep.txt"), "cached-dep").unwrap();

        let tar_path = root.join("cached-layer.tar");
        tar::archive(&source, "", &tar_path).unwrap();

        let mut cache = DirectoryCache::new(root.join("cache")).unwrap();
        cache
            .commit(
                &bp_a(),
                &modules(),
                &tar_path,
                &LayerContentMetadata::default()
                    .launch(true)
                    .cache(true)
                    .metadata(toml::from_str("k = 1").unwrap()),
            )
            .unwrap();
        cache
    }

    #[test]
    fn restores_analyzed_layers() {
        let temp_dir = tempdir().unwrap();
        let cache = seeded_cache(temp_dir.path());
        let layers = LayersDir::new(temp_dir.path().join("layers"));

        // Sidecar placed by the analyzer.
        layers
            .write_layer_metadata(
                &bp_a(),
                &modules(),
                &LayerContentMetadata::default().metadata(toml::from_str("k = 1").unwrap()),
            )
            .unwrap();

        let restorer = Restorer {
            group: &group(),
            layers: &layers,
        };
        restorer.restore(&cache).unwrap();

        let entry = layers.read_layer(&bp_a(), &modules()).unwrap().unwrap();
        assert!(entry.has_content);
        assert!(entry.metadata.launch);
        assert!(entry.metadata.cache);
        assert_eq!(
            fs::read_to_string(entry.path.join("dep.txt")).unwrap(),
            "cached-dep"
        );

        // Re-running is safe and converges to the same state.
        restorer.restore(&cache).unwrap();
        let entry = layers.read_layer(&bp_a(), &modules()).unwrap().unwrap();
        assert!(entry.has_content);
    }

    #[test]
    fn skips_entries_without_analyzed_metadata() {
        let temp_dir = tempdir().unwrap();
        let cache = seeded_cache(temp_dir.path());
        let layers = LayersDir::new(temp_dir.path().join("layers"));

        Restorer {
            group: &group(),
            layers: &layers,
        }
        .restore(&cache)
        .unwrap();

        assert!(layers.read_layer(&bp_a(), &modules()).unwrap().is_none());
    }

    #[test]
    fn corrupt_sidecar_degrades_to_cold_layer() {
        let temp_dir = tempdir().unwrap();
        let cache = seeded_cache(temp_dir.path());
        let layers = LayersDir::new(temp_dir.path().join("layers"));

        layers
            .write_layer_metadata(&bp_a(), &modules(), &LayerContentMetadata::default())
            .unwrap();
        fs::write(
            temp_dir
                .path()
                .join("cache")
                .join("bp-a")
                .join("modules.toml"),
            "cache = ",
        )
        .unwrap();

        Restorer {
            group: &group(),
            layers: &layers,
        }
        .restore(&cache)
        .unwrap();

        let entry = layers.read_layer(&bp_a(), &modules()).unwrap().unwrap();
        assert!(!entry.has_content);
    }
}
