use crate::cache::{CacheError, CacheStore, CachedLayer};
use crate::image::{Image, OciImage, OciImageStore};
use pallet_data::buildpack::BuildpackId;
use pallet_data::image_metadata::{table_to_data, ImageMetadata, LayerMetadata, METADATA_LABEL};
use pallet_data::layer::LayerName;
use pallet_data::layer_content_metadata::LayerContentMetadata;
use std::path::Path;

/// A cache persisted as an image.
///
/// Each cached layer is an image layer; sidecar flags and metadata are
/// mirrored into the image's metadata label, shaped like the exported
/// image's own metadata document. Finalizing saves a fresh image holding
/// only this run's commits, which is what prunes stale entries.
pub struct ImageCache {
    previous: OciImage,
    next: OciImage,
    previous_metadata: ImageMetadata,
    next_metadata: ImageMetadata,
}

impl ImageCache {
    /// Opens the cache image under the given reference. A missing image
    /// or an unparsable label degrades to an empty cache with a warning.
    pub fn new(store: &OciImageStore, reference: &str) -> Result<Self, CacheError> {
        let previous = store.open(reference)?;

        let previous_metadata = match previous.label(METADATA_LABEL)? {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|error| {
                log::warn!("cache image {reference} has malformed metadata, treating cache as empty: {error}");
                ImageMetadata::default()
            }),
            None => ImageMetadata::default(),
        };

        Ok(Self {
            next: store.new_image(reference),
            previous,
            previous_metadata,
            next_metadata: ImageMetadata::default(),
        })
    }
}

impl CacheStore for ImageCache {
    fn layer_names(&self, id: &BuildpackId) -> Result<Vec<LayerName>, CacheError> {
        Ok(self
            .previous_metadata
            .buildpack(id)
            .map(|buildpack| buildpack.layers.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn retrieve(
        &self,
        id: &BuildpackId,
        name: &LayerName,
    ) -> Result<Option<CachedLayer>, CacheError> {
        let Some(entry) = self.previous_metadata.layer(id, name) else {
            return Ok(None);
        };

        if entry.sha.is_empty() {
            return Err(CacheError::CorruptEntry {
                id: id.to_string(),
                name: name.to_string(),
                detail: String::from("metadata entry has no layer digest"),
            });
        }

        let tar = self
            .previous
            .get_layer(&entry.sha)
            .map_err(|error| CacheError::CorruptEntry {
                id: id.to_string(),
                name: name.to_string(),
                detail: error.to_string(),
            })?;

        Ok(Some(CachedLayer {
            tar,
            metadata: LayerContentMetadata {
                launch: entry.launch,
                build: entry.build,
                cache: entry.cache,
                metadata: entry.data_as_table(),
            },
        }))
    }

    fn commit(
        &mut self,
        id: &BuildpackId,
        name: &LayerName,
        tar_path: &Path,
        metadata: &LayerContentMetadata,
    ) -> Result<(), CacheError> {
        let sha = self.next.add_layer(tar_path)?;

        self.next_metadata.insert_layer(
            id,
            name,
            LayerMetadata {
                sha,
                data: table_to_data(&metadata.metadata),
                build: metadata.build,
                launch: metadata.launch,
                cache: metadata.cache,
            },
        );

        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CacheError> {
        self.next
            .set_label(METADATA_LABEL, &serde_json::to_string(&self.next_metadata)?)?;
        self.next.save()?;

        Ok(())
    }
}
