use std::collections::BTreeMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::Path;

/// Generic collection of environment variables for buildpack children.
///
/// Backed by a `BTreeMap` so iteration — and therefore the environment a
/// child observes — is deterministic.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Env {
    inner: BTreeMap<OsString, OsString>,
}

impl Env {
    /// Creates a new `Env` from all the environment variables of the
    /// current process.
    #[must_use]
    pub fn from_current() -> Self {
        Self {
            inner: env::vars_os().collect(),
        }
    }

    /// Creates an empty `Env`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key-value pair, overriding the value if `key` was already
    /// present.
    pub fn insert(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> &mut Self {
        self.inner.insert(key.into(), value.into());
        self
    }

    /// Returns the value corresponding to the given key.
    #[must_use]
    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsString> {
        self.inner.get(key.as_ref())
    }

    /// Prepends a path to a `:`-separated path list variable, creating the
    /// variable if absent.
    pub fn prepend_path(&mut self, key: impl Into<OsString>, path: impl AsRef<Path>) -> &mut Self {
        let key = key.into();

        let mut value = path.as_ref().as_os_str().to_os_string();
        if let Some(existing) = self.inner.get(&key) {
            if !existing.is_empty() {
                value.push(":");
                value.push(existing);
            }
        }

        self.inner.insert(key, value);
        self
    }

    #[must_use]
    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, OsString, OsString> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Env {
    type Item = (&'a OsString, &'a OsString);
    type IntoIter = std::collections::btree_map::Iter<'a, OsString, OsString>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Applies an env directory: every regular file becomes a variable named
/// after the file, valued with the file's contents, verbatim.
///
/// Platform directories carry `<platform>/env/`, layers may carry
/// `<layer>/env/`. A missing directory is a no-op.
pub fn apply_env_dir(env: &mut Env, dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let value = fs::read_to_string(entry.path())?;
        env.insert(entry.file_name(), value);
    }

    Ok(())
}

/// Applies one `build = true` layer's contributions to the environment of
/// subsequent buildpacks: `bin/` onto `PATH`, `lib/` onto
/// `LD_LIBRARY_PATH`, plus the layer's env directory.
pub fn apply_build_layer(env: &mut Env, layer_dir: &Path) -> io::Result<()> {
    let bin_dir = layer_dir.join("bin");
    if bin_dir.is_dir() {
        env.prepend_path("PATH", &bin_dir);
    }

    let lib_dir = layer_dir.join("lib");
    if lib_dir.is_dir() {
        env.prepend_path("LD_LIBRARY_PATH", &lib_dir);
    }

    apply_env_dir(env, &layer_dir.join("env"))
}
