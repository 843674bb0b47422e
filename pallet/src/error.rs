use crate::analyze::AnalyzeError;
use crate::build::BuildError;
use crate::cache::CacheError;
use crate::detect::DetectError;
use crate::exit_code;
use crate::export::ExportError;
use crate::image::ImageError;
use crate::layers::LayerError;
use crate::rebase::RebaseError;
use crate::restore::RestoreError;
use pallet_common::json_file::JsonFileError;
use pallet_common::toml_file::TomlFileError;

/// Top-level error for the phase binaries.
///
/// Every failure class maps onto a distinct process exit code via
/// [`exit_code`](Error::exit_code); warnings never become errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("detect failed: {0}")]
    Detect(#[from] DetectError),

    #[error("analyze failed: {0}")]
    Analyze(#[from] AnalyzeError),

    #[error("restore failed: {0}")]
    Restore(#[from] RestoreError),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("rebase failed: {0}")]
    Rebase(#[from] RebaseError),

    #[error("image store error: {0}")]
    Image(#[from] ImageError),

    #[error("cache store error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    TomlFile(#[from] TomlFileError),

    #[error(transparent)]
    JsonFile(#[from] JsonFileError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Detect(DetectError::NoGroupPassed) => exit_code::FAILED_DETECT,
            Error::Detect(DetectError::MalformedFragment { .. }) => exit_code::MALFORMED,
            Error::Detect(_) => exit_code::FAILED,

            Error::Analyze(AnalyzeError::MalformedMetadata(_)) => exit_code::MALFORMED,
            Error::Analyze(AnalyzeError::Layer(LayerError::MalformedSidecar { .. })) => {
                exit_code::MALFORMED
            }
            Error::Analyze(_) => exit_code::FAILED,

            // Bad TOML emitted by a buildpack is a build failure, not a
            // malformed lifecycle input.
            Error::Build(
                BuildError::MissingBuildExecutable { .. }
                | BuildError::BuildpackFailed { .. }
                | BuildError::Layer(LayerError::MalformedSidecar { .. }),
            ) => exit_code::FAILED_BUILD,
            Error::Build(BuildError::Layer(LayerError::TomlFile(
                TomlFileError::Deserialize(_),
            ))) => exit_code::FAILED_BUILD,
            Error::Build(_) => exit_code::FAILED,

            Error::Rebase(RebaseError::Image(ImageError::IncompatibleBase { .. }))
            | Error::Rebase(RebaseError::MissingMetadata(_)) => exit_code::INCOMPATIBLE_BASE,
            Error::Rebase(RebaseError::MalformedMetadata(_)) => exit_code::MALFORMED,
            Error::Rebase(RebaseError::Image(_)) => exit_code::IMAGE_STORE,

            Error::Export(ExportError::Image(_))
            | Error::Export(ExportError::Cache(CacheError::Image(_))) => exit_code::IMAGE_STORE,
            Error::Export(_) => exit_code::FAILED,

            Error::Restore(RestoreError::Cache(CacheError::Image(_))) => exit_code::IMAGE_STORE,
            Error::Restore(_) => exit_code::FAILED,

            Error::Image(ImageError::IncompatibleBase { .. }) => exit_code::INCOMPATIBLE_BASE,
            Error::Image(_) => exit_code::IMAGE_STORE,

            Error::Cache(CacheError::Image(_)) => exit_code::IMAGE_STORE,
            Error::Cache(_) => exit_code::FAILED,

            Error::TomlFile(TomlFileError::Deserialize(_)) => exit_code::MALFORMED,
            Error::TomlFile(_) => exit_code::FAILED,

            Error::JsonFile(JsonFileError::Json(_)) => exit_code::MALFORMED,
            Error::JsonFile(_) => exit_code::FAILED,

            Error::Io(_) => exit_code::FAILED,
        }
    }
}
