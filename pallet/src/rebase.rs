use crate::image::{with_retry, Image, ImageError};
use pallet_data::image_metadata::{ImageMetadata, METADATA_LABEL};

/// An error that occurred during rebase.
#[derive(thiserror::Error, Debug)]
pub enum RebaseError {
    #[error("image {0} carries no lifecycle metadata")]
    MissingMetadata(String),

    #[error("image metadata is malformed: {0}")]
    MalformedMetadata(#[from] serde_json::Error),

    #[error("image store error during rebase: {0}")]
    Image(#[from] ImageError),
}

/// Splices a new run base under an existing image's application layers
/// without rebuilding them.
///
/// The anchor is the `runImage.topLayer` diff-id recorded at export time:
/// everything up to and including it belongs to the old base and is
/// replaced; everything above is preserved. Returns the rebased image's
/// digest.
pub fn rebase(image: &mut dyn Image, new_base: &dyn Image) -> Result<String, RebaseError> {
    let label = with_retry(|| image.label(METADATA_LABEL))?
        .ok_or_else(|| RebaseError::MissingMetadata(image.reference().to_string()))?;
    let mut metadata: ImageMetadata = serde_json::from_str(&label)?;

    image.rebase(&metadata.run_image.top_layer, new_base)?;

    metadata.run_image.top_layer = new_base.top_layer()?;
    metadata.run_image.reference = new_base.reference().to_string();
    image.set_label(METADATA_LABEL, &serde_json::to_string(&metadata)?)?;

    let digest = image.save()?;
    log::info!("rebased image {} ({digest})", image.reference());

    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::OciImageStore;
    use crate::tar;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn layer_tar(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let source = dir.join(format!("{name}-src"));
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("base.txt"), content).unwrap();

        let tar_path = dir.join(format!("{name}.tar"));
        tar::archive(&source, name, &tar_path).unwrap();
        tar_path
    }

    #[test]
    fn rebase_replaces_base_and_rewrites_anchor() {
        let temp_dir = tempdir().unwrap();
        let store = OciImageStore::new(temp_dir.path().join("store"));

        let mut base_a = store.new_image("base-a");
        let top_a = base_a.add_layer(&layer_tar(temp_dir.path(), "a", "A")).unwrap();
        base_a.save().unwrap();

        let mut base_b = store.new_image("base-b");
        let top_b = base_b.add_layer(&layer_tar(temp_dir.path(), "b", "B")).unwrap();
        base_b.save().unwrap();

        let mut app = store.new_from_base("app", &base_a);
        let app_layer = app
            .add_layer(&layer_tar(temp_dir.path(), "app", "app"))
            .unwrap();
        let metadata = ImageMetadata {
            run_image: pallet_data::image_metadata::RunImageMetadata {
                top_layer: top_a,
                reference: String::from("base-a"),
            },
            ..ImageMetadata::default()
        };
        app.set_label(METADATA_LABEL, &serde_json::to_string(&metadata).unwrap())
            .unwrap();
        app.save().unwrap();

        let mut app = store.open("app").unwrap();
        rebase(&mut app, &base_b).unwrap();

        let rebased = store.open("app").unwrap();
        assert_eq!(rebased.layers().unwrap(), vec![top_b.clone(), app_layer]);

        let label = rebased.label(METADATA_LABEL).unwrap().unwrap();
        let metadata: ImageMetadata = serde_json::from_str(&label).unwrap();
        assert_eq!(metadata.run_image.top_layer, top_b);
        assert_eq!(metadata.run_image.reference, "base-b");
    }

    #[test]
    fn image_without_metadata_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = OciImageStore::new(temp_dir.path().join("store"));

        let mut plain = store.new_image("plain");
        plain.save().unwrap();

        let base = store.new_image("base");
        let mut plain = store.open("plain").unwrap();

        assert!(matches!(
            rebase(&mut plain, &base),
            Err(RebaseError::MissingMetadata(_))
        ));
    }
}
