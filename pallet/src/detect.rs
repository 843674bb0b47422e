use crate::buildpacks::BuildpackStore;
use crate::env::{apply_env_dir, Env};
use crate::exit_code::DETECT_SKIP;
use crate::layers::LayersDir;
use crate::proc::{run_buildpack, ChildConfig};
use pallet_common::toml_file::{write_toml_file, TomlFileError};
use pallet_data::build_plan::BuildPlan;
use pallet_data::group::{BuildpackGroup, BuildpackOrder, GroupBuildpack};
use std::fs;
use std::io;
use std::path::Path;

/// An error that occurred during detection.
#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("no buildpack group passed detection")]
    NoGroupPassed,

    #[error("malformed plan fragment from buildpack {id}: {source}")]
    MalformedFragment {
        id: String,
        source: toml::de::Error,
    },

    #[error("error writing detect output: {0}")]
    TomlFile(#[from] TomlFileError),

    #[error("I/O error during detection: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs each candidate group's detect executables and selects the first
/// group that passes.
pub struct Detector<'a> {
    pub order: &'a BuildpackOrder,
    pub buildpacks: &'a BuildpackStore,
    pub app_dir: &'a Path,
    pub platform_dir: &'a Path,
    pub layers: &'a LayersDir,
    pub child: ChildConfig,
}

impl Detector<'_> {
    /// Tries the candidate groups in order. For the first group with no
    /// failing member and at least one passing member, persists each
    /// passing member's plan fragment under its buildpack directory and
    /// returns the resolved group with the merged plan.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::NoGroupPassed`] when every group is
    /// rejected.
    pub fn detect(&self) -> Result<(BuildpackGroup, BuildPlan), DetectError> {
        for (index, group) in self.order.groups.iter().enumerate() {
            let Some(passing) = self.try_group(group)? else {
                log::info!("group {index} did not pass detection");
                continue;
            };

            let mut resolved = BuildpackGroup::default();
            let mut plan = BuildPlan::new();
            for (position, (buildpack, fragment)) in passing.into_iter().enumerate() {
                write_toml_file(
                    &fragment,
                    self.layers.plan_fragment(&buildpack.id, position),
                )?;
                plan.merge_fragment(fragment);
                resolved.buildpacks.push(buildpack);
            }

            log::info!(
                "group {index} passed detection with {} buildpack(s)",
                resolved.buildpacks.len()
            );

            return Ok((resolved, plan));
        }

        Err(DetectError::NoGroupPassed)
    }

    /// Runs one group's members in order. Exit 0 passes, exit 100 drops
    /// the member from the group, anything else rejects the group, as
    /// does a group where every member skipped.
    fn try_group(
        &self,
        group: &BuildpackGroup,
    ) -> Result<Option<Vec<(GroupBuildpack, BuildPlan)>>, DetectError> {
        let fragments_dir = tempfile::tempdir()?;

        let mut env = Env::from_current();
        apply_env_dir(&mut env, &self.platform_dir.join("env"))?;

        let mut passing = Vec::new();
        for (index, buildpack) in group.buildpacks.iter().enumerate() {
            let plan_path = fragments_dir.path().join(format!("plan{index}.toml"));
            fs::write(&plan_path, "")?;

            let program = self.buildpacks.detect_bin(buildpack);
            let status = match run_buildpack(
                &program,
                &[
                    self.platform_dir.as_os_str(),
                    plan_path.as_os_str(),
                ],
                self.app_dir,
                &env,
                self.child,
            ) {
                Ok(status) => status,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    log::warn!("buildpack {} has no detect executable", buildpack.id);
                    return Ok(None);
                }
                Err(error) => return Err(error.into()),
            };

            match status.code() {
                Some(0) => {
                    let fragment = read_fragment(&plan_path, &buildpack.id)?;
                    passing.push((buildpack.clone(), fragment));
                }
                Some(DETECT_SKIP) => {
                    log::debug!("buildpack {} skipped detection", buildpack.id);
                }
                _ => {
                    log::info!("buildpack {} failed detection ({status})", buildpack.id);
                    return Ok(None);
                }
            }
        }

        if passing.is_empty() {
            return Ok(None);
        }

        Ok(Some(passing))
    }
}

fn read_fragment(
    plan_path: &Path,
    id: &pallet_data::buildpack::BuildpackId,
) -> Result<BuildPlan, DetectError> {
    let contents = fs::read_to_string(plan_path)?;

    toml::from_str(&contents).map_err(|source| DetectError::MalformedFragment {
        id: id.to_string(),
        source,
    })
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct Fixture {
        _temp: tempfile::TempDir,
        buildpacks_dir: PathBuf,
        app_dir: PathBuf,
        platform_dir: PathBuf,
        layers_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempdir().unwrap();
            let buildpacks_dir = temp.path().join("buildpacks");
            let app_dir = temp.path().join("app");
            let platform_dir = temp.path().join("platform");
            let layers_dir = temp.path().join("layers");
            for dir in [&buildpacks_dir, &app_dir, &platform_dir, &layers_dir] {
                fs::create_dir_all(dir).unwrap();
            }

            Self {
                _temp: temp,
                buildpacks_dir,
                app_dir,
                platform_dir,
                layers_dir,
            }
        }

        fn add_buildpack(&self, id: &str, detect_script: &str) -> GroupBuildpack {
            let buildpack = GroupBuildpack {
                id: id.parse().unwrap(),
                version: String::from("1.0.0"),
            };

            let bin_dir = self
                .buildpacks_dir
                .join(buildpack.id.escaped())
                .join("1.0.0")
                .join("bin");
            fs::create_dir_all(&bin_dir).unwrap();

            let detect = bin_dir.join("detect");
            fs::write(&detect, detect_script).unwrap();
            fs::set_permissions(&detect, fs::Permissions::from_mode(0o755)).unwrap();

            buildpack
        }

        fn detect(&self, order: &BuildpackOrder) -> Result<(BuildpackGroup, BuildPlan), DetectError> {
            let store = BuildpackStore::new(&self.buildpacks_dir);
            let layers = LayersDir::new(&self.layers_dir);

            Detector {
                order,
                buildpacks: &store,
                app_dir: &self.app_dir,
                platform_dir: &self.platform_dir,
                layers: &layers,
                child: ChildConfig::default(),
            }
            .detect()
        }
    }

    #[test]
    fn selects_first_passing_group() {
        let fixture = Fixture::new();
        let failing = fixture.add_buildpack("always-fails", "#!/bin/sh\nexit 1\n");
        let passing = fixture.add_buildpack("always-passes", "#!/bin/sh\nexit 0\n");

        let order = BuildpackOrder {
            groups: vec![
                BuildpackGroup {
                    buildpacks: vec![failing, passing.clone()],
                },
                BuildpackGroup {
                    buildpacks: vec![passing.clone()],
                },
            ],
        };

        let (group, _plan) = fixture.detect(&order).unwrap();
        assert_eq!(group.buildpacks, vec![passing]);
    }

    #[test]
    fn skipping_buildpack_is_dropped_from_group() {
        let fixture = Fixture::new();
        let skipping = fixture.add_buildpack("skips", "#!/bin/sh\nexit 100\n");
        let passing = fixture.add_buildpack("passes", "#!/bin/sh\nexit 0\n");

        let order = BuildpackOrder {
            groups: vec![BuildpackGroup {
                buildpacks: vec![skipping, passing.clone()],
            }],
        };

        let (group, _plan) = fixture.detect(&order).unwrap();
        assert_eq!(group.buildpacks, vec![passing]);
    }

    #[test]
    fn group_where_every_member_skips_is_rejected() {
        let fixture = Fixture::new();
        let skipping = fixture.add_buildpack("skips", "#!/bin/sh\nexit 100\n");

        let order = BuildpackOrder {
            groups: vec![BuildpackGroup {
                buildpacks: vec![skipping],
            }],
        };

        assert!(matches!(
            fixture.detect(&order),
            Err(DetectError::NoGroupPassed)
        ));
    }

    #[test]
    fn merges_plan_fragments_in_group_order() {
        let fixture = Fixture::new();
        let first = fixture.add_buildpack(
            "first",
            "#!/bin/sh\nprintf '[node]\\nversion = \"10\"\\n' > \"$2\"\nexit 0\n",
        );
        let second = fixture.add_buildpack(
            "second",
            "#!/bin/sh\nprintf '[node]\\nversion = \"12\"\\n' > \"$2\"\nexit 0\n",
        );

        let order = BuildpackOrder {
            groups: vec![BuildpackGroup {
                buildpacks: vec![first.clone(), second],
            }],
        };

        let (_group, plan) = fixture.detect(&order).unwrap();
        assert_eq!(
            plan.0["node"]["version"],
            toml::Value::String(String::from("12"))
        );

        // Fragments of the selected group are persisted into the layers dir.
        let fragment = fixture
            .layers_dir
            .join(first.id.escaped())
            .join("plan0.toml");
        assert!(fragment.exists());
    }

    #[test]
    fn platform_env_is_visible_to_detect() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.platform_dir.join("env")).unwrap();
        fs::write(fixture.platform_dir.join("env").join("DETECT_HINT"), "yes").unwrap();

        let buildpack = fixture.add_buildpack(
            "env-check",
            "#!/bin/sh\n[ \"$DETECT_HINT\" = \"yes\" ] || exit 1\nexit 0\n",
        );

        let order = BuildpackOrder {
            groups: vec![BuildpackGroup {
                buildpacks: vec![buildpack],
            }],
        };

        assert!(fixture.detect(&order).is_ok());
    }
}
