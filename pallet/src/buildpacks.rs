use pallet_data::group::GroupBuildpack;
use std::path::{Path, PathBuf};

/// Resolves buildpack executables under a buildpacks directory.
///
/// A buildpack lives at `<root>/<escaped-id>/<version>/` and ships
/// `bin/detect` and `bin/build`.
#[derive(Debug, Clone)]
pub struct BuildpackStore {
    root: PathBuf,
}

impl BuildpackStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn dir(&self, buildpack: &GroupBuildpack) -> PathBuf {
        self.root
            .join(buildpack.id.escaped())
            .join(&buildpack.version)
    }

    #[must_use]
    pub fn detect_bin(&self, buildpack: &GroupBuildpack) -> PathBuf {
        self.dir(buildpack).join("bin").join("detect")
    }

    #[must_use]
    pub fn build_bin(&self, buildpack: &GroupBuildpack) -> PathBuf {
        self.dir(buildpack).join("bin").join("build")
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
