//! Layer caches persisted between builds.
//!
//! One capability set, two backings: a plain directory of gzipped layer
//! tars with TOML sidecars, and an image whose layers are the cached tars
//! with metadata mirrored into a label. The restorer reads, the exporter
//! writes; [`CacheStore::finalize`] prunes whatever the current build
//! didn't commit.

pub mod directory;
pub mod image;

pub use directory::DirectoryCache;
pub use image::ImageCache;

use crate::image::ImageError;
use pallet_common::toml_file::TomlFileError;
use pallet_data::buildpack::BuildpackId;
use pallet_data::layer::LayerName;
use pallet_data::layer_content_metadata::LayerContentMetadata;
use std::io::Read;
use std::path::Path;

/// An error raised by a cache store.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// Affects a single entry; callers treat the entry as absent after
    /// logging a warning.
    #[error("corrupt cache entry {id}/{name}: {detail}")]
    CorruptEntry {
        id: String,
        name: String,
        detail: String,
    },

    #[error("I/O error in cache store: {0}")]
    Io(#[from] std::io::Error),

    #[error("error reading/writing cache sidecar: {0}")]
    TomlFile(#[from] TomlFileError),

    #[error("image-backed cache error: {0}")]
    Image(#[from] ImageError),

    #[error("cache metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Whether only one entry is affected and the caller may continue
    /// with the entry treated as absent.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CacheError::CorruptEntry { .. })
    }
}

/// A cached layer ready to be materialized.
pub struct CachedLayer {
    /// The layer's content as an uncompressed tar stream.
    pub tar: Box<dyn Read>,
    /// The sidecar stored alongside the content.
    pub metadata: LayerContentMetadata,
}

impl std::fmt::Debug for CachedLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedLayer")
            .field("tar", &"Box<dyn Read>")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Opens the cache a phase was pointed at: a directory path, or an image
/// reference within the given store.
pub fn open_cache(
    cache_dir: Option<&Path>,
    cache_image: Option<&str>,
    store: Option<&crate::image::OciImageStore>,
) -> Result<Box<dyn CacheStore>, CacheError> {
    match (cache_dir, cache_image, store) {
        (Some(dir), _, _) => Ok(Box::new(DirectoryCache::new(dir)?)),
        (None, Some(reference), Some(store)) => Ok(Box::new(ImageCache::new(store, reference)?)),
        _ => Err(CacheError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "either a cache directory or a cache image reference with a store is required",
        ))),
    }
}

/// A store for layers persisted between builds.
pub trait CacheStore {
    /// Names of the layers present for the given buildpack, sorted.
    fn layer_names(&self, id: &BuildpackId) -> Result<Vec<LayerName>, CacheError>;

    /// Retrieves one layer, or `None` if the store doesn't hold it.
    fn retrieve(
        &self,
        id: &BuildpackId,
        name: &LayerName,
    ) -> Result<Option<CachedLayer>, CacheError>;

    /// Stores a layer from an uncompressed tar file plus its sidecar.
    fn commit(
        &mut self,
        id: &BuildpackId,
        name: &LayerName,
        tar_path: &Path,
        metadata: &LayerContentMetadata,
    ) -> Result<(), CacheError>;

    /// Persists this run's commits. Entries present in the store but not
    /// committed since it was opened are pruned.
    fn finalize(&mut self) -> Result<(), CacheError>;
}
