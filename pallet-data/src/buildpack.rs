use crate::newtypes::data_newtype;

data_newtype!(
    /// The ID of a buildpack.
    ///
    /// It MUST only contain numbers, letters, and the characters `.`, `/`,
    /// and `-`. It also MUST NOT be `app` or `config` — both name
    /// lifecycle-owned image layers. To parse a string into a
    /// `BuildpackId`, use [`str::parse`](str::parse).
    BuildpackId,
    BuildpackIdError,
    r"^(?!(app|config)$)[[:alnum:]./-]+$"
);

impl BuildpackId {
    /// The directory name for this buildpack under a layers, buildpacks or
    /// cache directory.
    ///
    /// IDs such as `heroku/jvm` contain path separators that must not
    /// create nested directories.
    #[must_use]
    pub fn escaped(&self) -> String {
        self.0.replace('/', "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buildpack_id_validation_valid() {
        assert!("heroku/jvm".parse::<BuildpackId>().is_ok());
        assert!("Abc123./-".parse::<BuildpackId>().is_ok());
        assert!("app-foo".parse::<BuildpackId>().is_ok());
        assert!("foo-app".parse::<BuildpackId>().is_ok());
    }

    #[test]
    fn buildpack_id_validation_invalid() {
        assert_eq!(
            "heroku_jvm".parse::<BuildpackId>(),
            Err(BuildpackIdError::InvalidValue(String::from("heroku_jvm")))
        );
        assert_eq!(
            "heroku jvm".parse::<BuildpackId>(),
            Err(BuildpackIdError::InvalidValue(String::from("heroku jvm")))
        );
        assert_eq!(
            "app".parse::<BuildpackId>(),
            Err(BuildpackIdError::InvalidValue(String::from("app")))
        );
        assert_eq!(
            "config".parse::<BuildpackId>(),
            Err(BuildpackIdError::InvalidValue(String::from("config")))
        );
        assert_eq!(
            "".parse::<BuildpackId>(),
            Err(BuildpackIdError::InvalidValue(String::new()))
        );
    }

    #[test]
    fn escaped_replaces_path_separators() {
        let id = "heroku/jvm".parse::<BuildpackId>().unwrap();
        assert_eq!(id.escaped(), "heroku_jvm");

        let id = "simple".parse::<BuildpackId>().unwrap();
        assert_eq!(id.escaped(), "simple");
    }
}
