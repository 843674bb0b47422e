use crate::image::{Image, ImageError};
use crate::tar::file_digest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

const LAYOUT_FILE_CONTENT: &str = r#"{"imageLayoutVersion": "1.0.0"}"#;
const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: String,
    digest: String,
    size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ImageIndex {
    schema_version: u32,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImageManifest {
    schema_version: u32,
    media_type: String,
    config: Descriptor,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ImageConfig {
    architecture: String,
    os: String,
    #[serde(default)]
    config: RuntimeConfig,
    #[serde(default)]
    rootfs: RootFs,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            architecture: String::from("amd64"),
            os: String::from("linux"),
            config: RuntimeConfig::default(),
            rootfs: RootFs::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct RuntimeConfig {
    #[serde(rename = "Labels", default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(rename = "Env", default, skip_serializing_if = "Vec::is_empty")]
    env: Vec<String>,
    #[serde(rename = "Entrypoint", default, skip_serializing_if = "Vec::is_empty")]
    entrypoint: Vec<String>,
    #[serde(rename = "Cmd", default, skip_serializing_if = "Vec::is_empty")]
    cmd: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct RootFs {
    #[serde(rename = "type")]
    fs_type: String,
    diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: String::from("layers"),
            diff_ids: Vec::new(),
        }
    }
}

/// An image store backed by an on-disk OCI image layout.
///
/// One layout directory holds any number of tagged images, all sharing a
/// blob directory. Layer blobs are uncompressed tars, so a blob's digest
/// is its diff-id and layer reuse never touches bytes.
#[derive(Debug, Clone)]
pub struct OciImageStore {
    dir: PathBuf,
}

impl OciImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Opens the image with the given reference. An absent reference
    /// yields an empty image whose [`found`](Image::found) is false.
    pub fn open(&self, reference: &str) -> Result<OciImage, ImageError> {
        let index = self.read_index()?;

        let Some(descriptor) = index
            .manifests
            .iter()
            .find(|descriptor| Self::descriptor_reference(descriptor) == Some(reference))
        else {
            return Ok(self.new_image(reference));
        };

        let manifest: ImageManifest = serde_json::from_slice(&self.read_blob(&descriptor.digest)?)?;
        let config: ImageConfig = serde_json::from_slice(&self.read_blob(&manifest.config.digest)?)?;

        if config.rootfs.diff_ids.len() != manifest.layers.len() {
            return Err(ImageError::Corrupt(format!(
                "image {reference}: {} diff ids but {} manifest layers",
                config.rootfs.diff_ids.len(),
                manifest.layers.len()
            )));
        }

        Ok(OciImage {
            store: self.clone(),
            reference: String::from(reference),
            found: true,
            config,
            layers: manifest.layers,
        })
    }

    /// A new empty image (scratch base) under the given reference.
    #[must_use]
    pub fn new_image(&self, reference: &str) -> OciImage {
        OciImage {
            store: self.clone(),
            reference: String::from(reference),
            found: false,
            config: ImageConfig::default(),
            layers: Vec::new(),
        }
    }

    /// A new image under the given reference starting from the given
    /// base's config and layers.
    #[must_use]
    pub fn new_from_base(&self, reference: &str, base: &OciImage) -> OciImage {
        OciImage {
            store: self.clone(),
            reference: String::from(reference),
            found: false,
            config: base.config.clone(),
            layers: base.layers.clone(),
        }
    }

    fn descriptor_reference(descriptor: &Descriptor) -> Option<&str> {
        descriptor
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(REF_NAME_ANNOTATION))
            .map(String::as_str)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        self.dir.join("blobs").join("sha256").join(hex)
    }

    fn read_index(&self) -> Result<ImageIndex, ImageError> {
        match fs::read(self.index_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(ImageIndex::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    fn write_index(&self, index: &ImageIndex) -> Result<(), ImageError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.index_path(), serde_json::to_vec(index)?)?;
        fs::write(self.dir.join("oci-layout"), LAYOUT_FILE_CONTENT)?;

        Ok(())
    }

    fn read_blob(&self, digest: &str) -> Result<Vec<u8>, ImageError> {
        fs::read(self.blob_path(digest))
            .map_err(|_| ImageError::LayerNotFound(String::from(digest)))
    }

    fn write_blob(&self, bytes: &[u8]) -> Result<(String, u64), ImageError> {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(bytes)));

        let path = self.blob_path(&digest);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, bytes)?;
        }

        Ok((digest, bytes.len() as u64))
    }

    fn add_blob_from_file(&self, source: &std::path::Path) -> Result<(String, u64), ImageError> {
        let digest = file_digest(source)?;
        let size = fs::metadata(source)?.len();

        let path = self.blob_path(&digest);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source, &path)?;
        }

        Ok((digest, size))
    }
}

/// One tagged image within an [`OciImageStore`].
#[derive(Debug)]
pub struct OciImage {
    store: OciImageStore,
    reference: String,
    found: bool,
    config: ImageConfig,
    layers: Vec<Descriptor>,
}

impl Image for OciImage {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn found(&self) -> bool {
        self.found
    }

    fn label(&self, key: &str) -> Result<Option<String>, ImageError> {
        Ok(self.config.config.labels.get(key).cloned())
    }

    fn env(&self, key: &str) -> Result<Option<String>, ImageError> {
        let prefix = format!("{key}=");

        Ok(self
            .config
            .config
            .env
            .iter()
            .rev()
            .find_map(|entry| entry.strip_prefix(&prefix))
            .map(String::from))
    }

    fn set_label(&mut self, key: &str, value: &str) -> Result<(), ImageError> {
        self.config
            .config
            .labels
            .insert(String::from(key), String::from(value));

        Ok(())
    }

    fn set_env(&mut self, key: &str, value: &str) -> Result<(), ImageError> {
        let prefix = format!("{key}=");
        self.config
            .config
            .env
            .retain(|entry| !entry.starts_with(&prefix));
        self.config.config.env.push(format!("{key}={value}"));

        Ok(())
    }

    fn set_entrypoint(&mut self, entrypoint: &[String]) -> Result<(), ImageError> {
        self.config.config.entrypoint = entrypoint.to_vec();

        Ok(())
    }

    fn set_cmd(&mut self, cmd: &[String]) -> Result<(), ImageError> {
        self.config.config.cmd = cmd.to_vec();

        Ok(())
    }

    fn layers(&self) -> Result<Vec<String>, ImageError> {
        Ok(self.config.rootfs.diff_ids.clone())
    }

    fn top_layer(&self) -> Result<String, ImageError> {
        Ok(self
            .config
            .rootfs
            .diff_ids
            .last()
            .cloned()
            .unwrap_or_default())
    }

    fn get_layer(&self, diff_id: &str) -> Result<Box<dyn Read>, ImageError> {
        let path = self.store.blob_path(diff_id);

        File::open(path)
            .map(|file| Box::new(file) as Box<dyn Read>)
            .map_err(|_| ImageError::LayerNotFound(String::from(diff_id)))
    }

    fn add_layer(&mut self, tar_path: &std::path::Path) -> Result<String, ImageError> {
        let (digest, size) = self.store.add_blob_from_file(tar_path)?;

        self.layers.push(Descriptor {
            media_type: String::from(LAYER_MEDIA_TYPE),
            digest: digest.clone(),
            size,
            annotations: None,
        });
        self.config.rootfs.diff_ids.push(digest.clone());

        Ok(digest)
    }

    fn reuse_layer(&mut self, diff_id: &str) -> Result<(), ImageError> {
        let path = self.store.blob_path(diff_id);
        let size = fs::metadata(&path)
            .map_err(|_| ImageError::LayerNotFound(String::from(diff_id)))?
            .len();

        self.layers.push(Descriptor {
            media_type: String::from(LAYER_MEDIA_TYPE),
            digest: String::from(diff_id),
            size,
            annotations: None,
        });
        self.config.rootfs.diff_ids.push(String::from(diff_id));

        Ok(())
    }

    fn rebase(&mut self, old_top: &str, new_base: &dyn Image) -> Result<(), ImageError> {
        let keep_from = if old_top.is_empty() {
            0
        } else {
            self.config
                .rootfs
                .diff_ids
                .iter()
                .position(|diff_id| diff_id == old_top)
                .ok_or_else(|| ImageError::IncompatibleBase {
                    top_layer: String::from(old_top),
                })?
                + 1
        };

        let suffix = self.layers.split_off(keep_from);

        let mut rebased = Vec::new();
        for diff_id in new_base.layers()? {
            let path = self.store.blob_path(&diff_id);
            if !path.exists() {
                let mut bytes = Vec::new();
                new_base.get_layer(&diff_id)?.read_to_end(&mut bytes)?;
                self.store.write_blob(&bytes)?;
            }

            rebased.push(Descriptor {
                media_type: String::from(LAYER_MEDIA_TYPE),
                digest: diff_id,
                size: fs::metadata(&path)?.len(),
                annotations: None,
            });
        }
        rebased.extend(suffix);

        self.config.rootfs.diff_ids = rebased
            .iter()
            .map(|descriptor| descriptor.digest.clone())
            .collect();
        self.layers = rebased;

        Ok(())
    }

    fn save(&mut self) -> Result<String, ImageError> {
        let config_bytes = serde_json::to_vec(&self.config)?;
        let (config_digest, config_size) = self.store.write_blob(&config_bytes)?;

        let manifest = ImageManifest {
            schema_version: 2,
            media_type: String::from(MANIFEST_MEDIA_TYPE),
            config: Descriptor {
                media_type: String::from(CONFIG_MEDIA_TYPE),
                digest: config_digest,
                size: config_size,
                annotations: None,
            },
            layers: self.layers.clone(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest)?;
        let (manifest_digest, manifest_size) = self.store.write_blob(&manifest_bytes)?;

        let mut index = self.store.read_index()?;
        index.schema_version = 2;
        index.manifests.retain(|descriptor| {
            OciImageStore::descriptor_reference(descriptor) != Some(self.reference.as_str())
        });
        index.manifests.push(Descriptor {
            media_type: String::from(MANIFEST_MEDIA_TYPE),
            digest: manifest_digest.clone(),
            size: manifest_size,
            annotations: Some(BTreeMap::from([(
                String::from(REF_NAME_ANNOTATION),
                self.reference.clone(),
            )])),
        });
        self.store.write_index(&index)?;

        self.found = true;

        Ok(manifest_digest)
    }

    fn delete(&mut self) -> Result<(), ImageError> {
        let mut index = self.store.read_index()?;
        index.manifests.retain(|descriptor| {
            OciImageStore::descriptor_reference(descriptor) != Some(self.reference.as_str())
        });
        self.store.write_index(&index)?;

        self.found = false;

        Ok(())
    }
}
