use crate::newtypes::data_newtype;

data_newtype!(
    /// The name of a layer.
    ///
    /// It can contain all characters supported by the filesystem except
    /// `/`, but MUST NOT be `launch` or start with `plan` — those name the
    /// files the lifecycle itself writes into a buildpack's directory.
    LayerName,
    LayerNameError,
    r"^(?!launch$|plan)[^/]+$"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_name_validation_valid() {
        assert!("modules".parse::<LayerName>().is_ok());
        assert!("jdk-11.0".parse::<LayerName>().is_ok());
        assert!("launcher".parse::<LayerName>().is_ok());
    }

    #[test]
    fn layer_name_validation_invalid() {
        assert!("launch".parse::<LayerName>().is_err());
        assert!("plan0".parse::<LayerName>().is_err());
        assert!("nested/name".parse::<LayerName>().is_err());
        assert!("".parse::<LayerName>().is_err());
    }
}
