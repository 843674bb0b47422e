use crate::buildpacks::BuildpackStore;
use crate::env::{apply_build_layer, apply_env_dir, Env};
use crate::layers::{LayerError, LayersDir};
use crate::proc::{run_buildpack, ChildConfig};
use pallet_data::group::BuildpackGroup;
use std::fs;
use std::io;
use std::path::Path;
use std::process::ExitStatus;

/// An error that occurred during the build phase.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("buildpack {id} has no build executable")]
    MissingBuildExecutable { id: String },

    #[error("buildpack {id} build failed: {status}")]
    BuildpackFailed { id: String, status: ExitStatus },

    #[error("layers directory error during build: {0}")]
    Layer(#[from] LayerError),

    #[error("I/O error during build: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes each buildpack's build program in group order against the
/// shared layers directory.
///
/// A buildpack receives its own directory under the layers root, the
/// platform directory and the merged plan. Whether restored layer content
/// is kept is physical: a buildpack that leaves a restored directory and
/// its sidecar metadata untouched keeps it; one that rewrites either has
/// produced a new layer.
pub struct Builder<'a> {
    pub group: &'a BuildpackGroup,
    pub layers: &'a LayersDir,
    pub buildpacks: &'a BuildpackStore,
    pub app_dir: &'a Path,
    pub platform_dir: &'a Path,
    pub plan_path: &'a Path,
    pub child: ChildConfig,
}

impl Builder<'_> {
    /// Runs the group. Child stdout/stderr go straight through to the
    /// user.
    ///
    /// # Errors
    ///
    /// A missing build executable, a nonzero exit, a malformed layer
    /// sidecar or a malformed `launch.toml` is fatal.
    pub fn build(&self) -> Result<(), BuildError> {
        for (index, buildpack) in self.group.buildpacks.iter().enumerate() {
            let buildpack_layers_dir = self.layers.buildpack_dir(&buildpack.id);
            fs::create_dir_all(&buildpack_layers_dir)?;

            let env = self.child_env(index)?;
            let program = self.buildpacks.build_bin(buildpack);

            log::info!("running build for buildpack {}", buildpack.id);
            let status = match run_buildpack(
                &program,
                &[
                    buildpack_layers_dir.as_os_str(),
                    self.platform_dir.as_os_str(),
                    self.plan_path.as_os_str(),
                ],
                self.app_dir,
                &env,
                self.child,
            ) {
                Ok(status) => status,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    return Err(BuildError::MissingBuildExecutable {
                        id: buildpack.id.to_string(),
                    });
                }
                Err(error) => return Err(error.into()),
            };

            if !status.success() {
                return Err(BuildError::BuildpackFailed {
                    id: buildpack.id.to_string(),
                    status,
                });
            }

            // Surface malformed sidecars and launch tables now, while the
            // failure still names the buildpack that wrote them.
            for entry in self.layers.layer_entries(&buildpack.id)? {
                log::debug!(
                    "buildpack {} declared layer {} (launch={}, build={}, cache={})",
                    buildpack.id,
                    entry.name,
                    entry.metadata.launch,
                    entry.metadata.build,
                    entry.metadata.cache
                );
            }
            self.layers.read_launch(&buildpack.id)?;
        }

        Ok(())
    }

    /// Environment for the buildpack at `index`: the platform env plus
    /// the `build = true` layers of every earlier buildpack in the group.
    fn child_env(&self, index: usize) -> Result<Env, BuildError> {
        let mut env = Env::from_current();
        apply_env_dir(&mut env, &self.platform_dir.join("env"))?;

        for buildpack in &self.group.buildpacks[..index] {
            for entry in self.layers.layer_entries(&buildpack.id)? {
                if entry.metadata.build && entry.has_content {
                    apply_build_layer(&mut env, &entry.path)?;
                }
            }
        }

        Ok(env)
    }
}
