use crate::cache::{CacheError, CacheStore, CachedLayer};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pallet_common::toml_file::{read_toml_file, write_toml_file, TomlFileError};
use pallet_data::buildpack::BuildpackId;
use pallet_data::layer::LayerName;
use pallet_data::layer_content_metadata::LayerContentMetadata;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// A cache persisted as a plain directory.
///
/// Layout: `<root>/<escaped-buildpack-id>/<layer-name>.tgz` with a
/// `<layer-name>.toml` sidecar next to it.
pub struct DirectoryCache {
    root: PathBuf,
    committed: HashSet<(String, String)>,
}

impl DirectoryCache {
    /// Opens (and creates, if needed) a directory cache at the given
    /// root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            committed: HashSet::new(),
        })
    }

    fn tgz_path(&self, id: &BuildpackId, name: &LayerName) -> PathBuf {
        self.root.join(id.escaped()).join(format!("{name}.tgz"))
    }

    fn toml_path(&self, id: &BuildpackId, name: &LayerName) -> PathBuf {
        self.root.join(id.escaped()).join(format!("{name}.toml"))
    }
}

impl CacheStore for DirectoryCache {
    fn layer_names(&self, id: &BuildpackId) -> Result<Vec<LayerName>, CacheError> {
        let entries = match fs::read_dir(self.root.join(id.escaped())) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();

            if path.extension().is_some_and(|extension| extension == "tgz") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    if let Ok(name) = stem.parse::<LayerName>() {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();

        Ok(names)
    }

    fn retrieve(
        &self,
        id: &BuildpackId,
        name: &LayerName,
    ) -> Result<Option<CachedLayer>, CacheError> {
        let tgz_path = self.tgz_path(id, name);
        let toml_path = self.toml_path(id, name);

        if !tgz_path.exists() || !toml_path.exists() {
            return Ok(None);
        }

        let metadata: LayerContentMetadata =
            read_toml_file(&toml_path).map_err(|error| match error {
                TomlFileError::Deserialize(source) => CacheError::CorruptEntry {
                    id: id.to_string(),
                    name: name.to_string(),
                    detail: source.to_string(),
                },
                other => other.into(),
            })?;

        Ok(Some(CachedLayer {
            tar: Box::new(GzDecoder::new(File::open(&tgz_path)?)),
            metadata,
        }))
    }

    fn commit(
        &mut self,
        id: &BuildpackId,
        name: &LayerName,
        tar_path: &Path,
        metadata: &LayerContentMetadata,
    ) -> Result<(), CacheError> {
        let tgz_path = self.tgz_path(id, name);
        if let Some(parent) = tgz_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tar = File::open(tar_path)?;
        let mut encoder = GzEncoder::new(File::create(&tgz_path)?, Compression::default());
        io::copy(&mut tar, &mut encoder)?;
        encoder.finish()?;

        write_toml_file(metadata, self.toml_path(id, name))?;

        self.committed.insert((id.escaped(), name.to_string()));

        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CacheError> {
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }

            let buildpack_dir = dir_entry.path();
            for entry in fs::read_dir(&buildpack_dir)? {
                let path = entry?.path();

                let stem = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(String::from);
                let Some(stem) = stem else { continue };

                let key = (
                    dir_entry.file_name().to_string_lossy().into_owned(),
                    stem,
                );
                if !self.committed.contains(&key) {
                    log::debug!("pruning cache entry {}/{}", key.0, key.1);
                    fs::remove_file(&path)?;
                }
            }

            if fs::read_dir(&buildpack_dir)?.next().is_none() {
                fs::remove_dir(&buildpack_dir)?;
            }
        }

        #[cfg(target_family = "unix")]
        File::open(&self.root)?.sync_all()?;

        Ok(())
    }
}
