use crate::env::Env;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Identity buildpack children run as.
///
/// The lifecycle itself typically runs as root to manipulate layer
/// ownership; buildpack children drop privileges to the configured
/// uid/gid.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildConfig {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Runs a buildpack executable with the given arguments, working
/// directory and environment.
///
/// Standard output and standard error are inherited so buildpack output
/// reaches the user verbatim, without passing through the logger.
pub fn run_buildpack(
    program: &Path,
    args: &[&OsStr],
    current_dir: &Path,
    env: &Env,
    child: ChildConfig,
) -> std::io::Result<ExitStatus> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(current_dir)
        .env_clear()
        .envs(env)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    #[cfg(target_family = "unix")]
    {
        use std::os::unix::process::CommandExt;

        if let Some(uid) = child.uid {
            command.uid(uid);
        }
        if let Some(gid) = child.gid {
            command.gid(gid);
        }
    }

    command.status()
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn runs_program_with_environment_and_cwd() {
        let temp_dir = tempdir().unwrap();
        let script = temp_dir.path().join("check");
        fs::write(
            &script,
            "#!/bin/sh\n[ \"$MARKER\" = \"yes\" ] && [ \"$(pwd)\" = \"$1\" ]\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut env = Env::from_current();
        env.insert("MARKER", "yes");

        let cwd = temp_dir.path().canonicalize().unwrap();
        let status = run_buildpack(
            &script,
            &[cwd.as_os_str()],
            &cwd,
            &env,
            ChildConfig::default(),
        )
        .unwrap();

        assert!(status.success());
    }

    #[test]
    fn missing_program_is_not_found() {
        let temp_dir = tempdir().unwrap();

        let result = run_buildpack(
            &temp_dir.path().join("absent"),
            &[],
            temp_dir.path(),
            &Env::from_current(),
            ChildConfig::default(),
        );

        assert_eq!(
            result.unwrap_err().kind(),
            std::io::ErrorKind::NotFound
        );
    }
}
