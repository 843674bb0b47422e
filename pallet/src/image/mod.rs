//! The abstract image store the lifecycle builds against.
//!
//! Phases only speak the capability set in [`Image`]; whether the bytes
//! live in a local daemon, a remote registry or an on-disk OCI layout is
//! the adapter's concern. The workspace ships the OCI layout adapter in
//! [`oci`].

pub mod oci;

pub use oci::{OciImage, OciImageStore};

use std::io::Read;
use std::path::Path;

/// An error raised by an image store adapter.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("image {0} does not exist")]
    NotFound(String),

    #[error("layer {0} not found in image store")]
    LayerNotFound(String),

    #[error("top layer {top_layer} not found in image; cannot rebase")]
    IncompatibleBase { top_layer: String },

    #[error("image store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt image store state: {0}")]
    Corrupt(String),
}

/// Capability-set interface over a container image.
///
/// Mutations accumulate in memory; nothing is visible to other readers
/// until [`save`](Image::save) returns the new digest.
pub trait Image {
    /// The reference this image was opened by.
    fn reference(&self) -> &str;

    /// Whether the reference existed when the image was opened.
    fn found(&self) -> bool;

    fn label(&self, key: &str) -> Result<Option<String>, ImageError>;

    fn env(&self, key: &str) -> Result<Option<String>, ImageError>;

    fn set_label(&mut self, key: &str, value: &str) -> Result<(), ImageError>;

    fn set_env(&mut self, key: &str, value: &str) -> Result<(), ImageError>;

    fn set_entrypoint(&mut self, entrypoint: &[String]) -> Result<(), ImageError>;

    fn set_cmd(&mut self, cmd: &[String]) -> Result<(), ImageError>;

    /// Diff-ids of all layers, bottom-up.
    fn layers(&self) -> Result<Vec<String>, ImageError>;

    /// Diff-id of the topmost layer, or the empty string for an image
    /// without layers.
    fn top_layer(&self) -> Result<String, ImageError>;

    /// A reader over one layer's uncompressed tar stream.
    fn get_layer(&self, diff_id: &str) -> Result<Box<dyn Read>, ImageError>;

    /// Appends a layer from an uncompressed tar file and returns its
    /// diff-id.
    fn add_layer(&mut self, tar_path: &Path) -> Result<String, ImageError>;

    /// Appends a layer already present in the store by diff-id, without
    /// transferring bytes.
    fn reuse_layer(&mut self, diff_id: &str) -> Result<(), ImageError>;

    /// Splices `new_base`'s layers in place of the layers up to and
    /// including `old_top`, preserving the layers above.
    fn rebase(&mut self, old_top: &str, new_base: &dyn Image) -> Result<(), ImageError>;

    /// Persists the image under its reference and returns its digest.
    fn save(&mut self) -> Result<String, ImageError>;

    /// Removes the reference from the store.
    fn delete(&mut self) -> Result<(), ImageError>;
}

/// Retries an idempotent image store call once before giving up.
///
/// Transport hiccups against daemons and registries are common enough
/// that reads get a second chance; anything that fails twice is fatal to
/// the phase.
pub fn with_retry<T>(mut call: impl FnMut() -> Result<T, ImageError>) -> Result<T, ImageError> {
    call().or_else(|first_error| {
        log::debug!("retrying image store call after error: {first_error}");
        call()
    })
}
