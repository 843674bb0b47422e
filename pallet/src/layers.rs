use pallet_common::toml_file::{read_toml_file, write_toml_file, TomlFileError};
use pallet_data::buildpack::BuildpackId;
use pallet_data::layer::LayerName;
use pallet_data::layer_content_metadata::LayerContentMetadata;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// An error that occurred while reading or writing the layers directory.
#[derive(thiserror::Error, Debug)]
pub enum LayerError {
    #[error("sidecar for layer {name} couldn't be parsed: {source}")]
    MalformedSidecar {
        name: String,
        source: toml::de::Error,
    },

    #[error("error while reading/writing layer sidecar: {0}")]
    TomlFile(TomlFileError),

    #[error("I/O error in layers directory: {0}")]
    Io(#[from] std::io::Error),
}

/// The shared layers directory all phases operate on.
///
/// Each buildpack owns `<layers>/<escaped-id>/` holding its layer content
/// directories, their `.toml` sidecars, its `launch.toml` and its detect
/// plan fragment. The selected group and merged plan live at the root.
#[derive(Debug, Clone)]
pub struct LayersDir {
    root: PathBuf,
}

/// One layer as found on disk: its sidecar plus whether content exists.
#[derive(Debug)]
pub struct LayerEntry {
    pub name: LayerName,
    pub path: PathBuf,
    pub metadata: LayerContentMetadata,
    pub has_content: bool,
}

impl LayersDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn group_path(&self) -> PathBuf {
        self.root.join("group.toml")
    }

    #[must_use]
    pub fn plan_path(&self) -> PathBuf {
        self.root.join("plan.toml")
    }

    #[must_use]
    pub fn buildpack_dir(&self, id: &BuildpackId) -> PathBuf {
        self.root.join(id.escaped())
    }

    #[must_use]
    pub fn layer_dir(&self, id: &BuildpackId, name: &LayerName) -> PathBuf {
        self.buildpack_dir(id).join(name.as_str())
    }

    #[must_use]
    pub fn layer_toml(&self, id: &BuildpackId, name: &LayerName) -> PathBuf {
        self.buildpack_dir(id).join(format!("{name}.toml"))
    }

    #[must_use]
    pub fn launch_toml(&self, id: &BuildpackId) -> PathBuf {
        self.buildpack_dir(id).join("launch.toml")
    }

    #[must_use]
    pub fn plan_fragment(&self, id: &BuildpackId, index: usize) -> PathBuf {
        self.buildpack_dir(id).join(format!("plan{index}.toml"))
    }

    /// Reads one layer's sidecar, reporting whether content exists.
    ///
    /// Returns `Ok(None)` if neither sidecar nor content directory exist.
    pub fn read_layer(
        &self,
        id: &BuildpackId,
        name: &LayerName,
    ) -> Result<Option<LayerEntry>, LayerError> {
        let layer_dir = self.layer_dir(id, name);
        let layer_toml = self.layer_toml(id, name);

        if !layer_dir.exists() && !layer_toml.exists() {
            return Ok(None);
        }

        let metadata = if layer_toml.exists() {
            let contents = fs::read_to_string(&layer_toml)?;
            toml::from_str(&contents).map_err(|source| LayerError::MalformedSidecar {
                name: name.to_string(),
                source,
            })?
        } else {
            LayerContentMetadata::default()
        };

        Ok(Some(LayerEntry {
            name: name.clone(),
            path: layer_dir.clone(),
            metadata,
            has_content: layer_dir.is_dir(),
        }))
    }

    /// Writes a layer's sidecar, creating the buildpack directory if
    /// needed.
    pub fn write_layer_metadata(
        &self,
        id: &BuildpackId,
        name: &LayerName,
        metadata: &LayerContentMetadata,
    ) -> Result<(), LayerError> {
        write_toml_file(metadata, self.layer_toml(id, name)).map_err(LayerError::TomlFile)
    }

    /// Removes a layer's content directory and sidecar. Does not error if
    /// the layer doesn't exist.
    pub fn delete_layer(&self, id: &BuildpackId, name: &LayerName) -> Result<(), LayerError> {
        purge_dir(&self.layer_dir(id, name))?;

        match fs::remove_file(self.layer_toml(id, name)) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }

    /// Removes a layer's content directory, leaving its sidecar in
    /// place. Does not error if there is no content.
    pub fn clear_layer_content(
        &self,
        id: &BuildpackId,
        name: &LayerName,
    ) -> Result<(), LayerError> {
        purge_dir(&self.layer_dir(id, name)).map_err(Into::into)
    }

    /// Removes a buildpack's entire directory. Does not error if absent.
    pub fn delete_buildpack_dir(&self, id: &BuildpackId) -> Result<(), LayerError> {
        purge_dir(&self.buildpack_dir(id)).map_err(Into::into)
    }

    /// Enumerates a buildpack's layers by sidecar, sorted by name for
    /// deterministic iteration. Layers without a parsable name (the
    /// lifecycle-owned `launch.toml` and plan fragments) are skipped.
    pub fn layer_entries(&self, id: &BuildpackId) -> Result<Vec<LayerEntry>, LayerError> {
        let entries = match fs::read_dir(self.buildpack_dir(id)) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|extension| extension == "toml") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    if let Ok(name) = stem.parse::<LayerName>() {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();

        let mut layers = Vec::new();
        for name in names {
            if let Some(entry) = self.read_layer(id, &name)? {
                layers.push(entry);
            }
        }

        Ok(layers)
    }

    /// Reads a buildpack's `launch.toml`, if present.
    pub fn read_launch(
        &self,
        id: &BuildpackId,
    ) -> Result<Option<pallet_data::launch::Launch>, LayerError> {
        let path = self.launch_toml(id);
        if !path.exists() {
            return Ok(None);
        }

        read_toml_file(&path).map(Some).map_err(LayerError::TomlFile)
    }
}

/// Removes a directory tree, tolerating both an already-absent path and
/// the read-only directories buildpacks sometimes leave inside layers.
///
/// Plain removal is the fast path; on a permission error the directories
/// are made writable and removal is retried once.
fn purge_dir(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::PermissionDenied => {
            make_dirs_writable(dir)?;
            fs::remove_dir_all(dir)
        }
        other => other,
    }
}

#[cfg(target_family = "unix")]
fn make_dirs_writable(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    // Permissions first: listing a directory requires them.
    fs::set_permissions(dir, fs::Permissions::from_mode(0o755))?;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            make_dirs_writable(&entry.path())?;
        }
    }

    Ok(())
}

#[cfg(not(target_family = "unix"))]
fn make_dirs_writable(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn jvm() -> BuildpackId {
        "heroku/jvm".parse().unwrap()
    }

    fn modules() -> LayerName {
        "modules".parse().unwrap()
    }

    #[test]
    fn read_layer_absent() {
        let temp_dir = tempdir().unwrap();
        let layers = LayersDir::new(temp_dir.path());

        assert!(layers.read_layer(&jvm(), &modules()).unwrap().is_none());
    }

    #[test]
    fn write_then_read_layer_metadata() {
        let temp_dir = tempdir().unwrap();
        let layers = LayersDir::new(temp_dir.path());

        let metadata = LayerContentMetadata::default()
            .launch(true)
            .cache(true)
            .metadata(toml::from_str("k = 1").unwrap());
        layers
            .write_layer_metadata(&jvm(), &modules(), &metadata)
            .unwrap();

        let entry = layers.read_layer(&jvm(), &modules()).unwrap().unwrap();
        assert_eq!(entry.metadata, metadata);
        assert!(!entry.has_content);
        assert_eq!(entry.path, temp_dir.path().join("heroku_jvm").join("modules"));
    }

    #[test]
    fn content_without_sidecar_reads_default_flags() {
        let temp_dir = tempdir().unwrap();
        let layers = LayersDir::new(temp_dir.path());
        fs::create_dir_all(layers.layer_dir(&jvm(), &modules())).unwrap();

        let entry = layers.read_layer(&jvm(), &modules()).unwrap().unwrap();
        assert!(entry.has_content);
        assert!(!entry.metadata.launch);
    }

    #[test]
    fn malformed_sidecar_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let layers = LayersDir::new(temp_dir.path());
        fs::create_dir_all(layers.buildpack_dir(&jvm())).unwrap();
        fs::write(layers.layer_toml(&jvm(), &modules()), "launch = ").unwrap();

        assert!(matches!(
            layers.read_layer(&jvm(), &modules()),
            Err(LayerError::MalformedSidecar { .. })
        ));
    }

    #[test]
    fn delete_layer_removes_content_and_sidecar() {
        let temp_dir = tempdir().unwrap();
        let layers = LayersDir::new(temp_dir.path());

        fs::create_dir_all(layers.layer_dir(&jvm(), &modules())).unwrap();
        layers
            .write_layer_metadata(&jvm(), &modules(), &LayerContentMetadata::default())
            .unwrap();

        layers.delete_layer(&jvm(), &modules()).unwrap();
        assert!(layers.read_layer(&jvm(), &modules()).unwrap().is_none());

        // Idempotent.
        layers.delete_layer(&jvm(), &modules()).unwrap();
    }

    #[test]
    #[cfg(target_family = "unix")]
    fn delete_layer_with_readonly_directories() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        let layers = LayersDir::new(temp_dir.path());

        let locked = layers.layer_dir(&jvm(), &modules()).join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("pinned.txt"), "immutable").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        layers.delete_layer(&jvm(), &modules()).unwrap();
        assert!(layers.read_layer(&jvm(), &modules()).unwrap().is_none());
    }

    #[test]
    fn clear_layer_content_keeps_sidecar() {
        let temp_dir = tempdir().unwrap();
        let layers = LayersDir::new(temp_dir.path());

        fs::create_dir_all(layers.layer_dir(&jvm(), &modules())).unwrap();
        layers
            .write_layer_metadata(&jvm(), &modules(), &LayerContentMetadata::default())
            .unwrap();

        layers.clear_layer_content(&jvm(), &modules()).unwrap();

        let entry = layers.read_layer(&jvm(), &modules()).unwrap().unwrap();
        assert!(!entry.has_content);
    }

    #[test]
    fn layer_entries_skips_lifecycle_files_and_sorts() {
        let temp_dir = tempdir().unwrap();
        let layers = LayersDir::new(temp_dir.path());

        for name in ["zeta", "alpha"] {
            layers
                .write_layer_metadata(
                    &jvm(),
                    &name.parse().unwrap(),
                    &LayerContentMetadata::default().launch(true),
                )
                .unwrap();
        }
        fs::write(layers.launch_toml(&jvm()), "").unwrap();
        fs::write(layers.plan_fragment(&jvm(), 0), "").unwrap();

        let entries = layers.layer_entries(&jvm()).unwrap();
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
