use clap::{ArgGroup, Parser};
use pallet::cache::open_cache;
use pallet::exit_code;
use pallet::export::{previous_metadata, Exporter};
use pallet::image::{Image, ImageError, OciImageStore};
use pallet::layers::LayersDir;
use pallet_common::toml_file::read_toml_file;
use pallet_data::group::BuildpackGroup;
use std::path::PathBuf;
use std::process::exit;

/// Composes and saves the runnable image, then persists the cache.
#[derive(Parser)]
#[command(name = "exporter")]
#[command(group = ArgGroup::new("cache").required(true).args(["cache_dir", "cache_image"]))]
struct Args {
    /// Path to the layers directory
    #[arg(long, default_value = "/workspace")]
    layers: PathBuf,

    /// Path to the application directory
    #[arg(long, default_value = ".")]
    app: PathBuf,

    /// Path to group.toml [default: <layers>/group.toml]
    #[arg(long)]
    group: Option<PathBuf>,

    /// Path to the OCI layout directory backing the image store
    #[arg(long)]
    store: PathBuf,

    /// Path of a directory-backed cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Reference of an image-backed cache within --store
    #[arg(long)]
    cache_image: Option<String>,

    /// Launcher path written as the image entrypoint
    #[arg(long, default_value = "/lifecycle/launcher")]
    launcher: String,

    /// Destination image reference
    image: String,

    /// Run (stack base) image reference
    run_image: String,
}

fn main() {
    setup_logging();

    let args = parse_args();
    if let Err(error) = run(&args) {
        log::error!("{error}");
        exit(error.exit_code());
    }
}

fn run(args: &Args) -> Result<(), pallet::Error> {
    let layers = LayersDir::new(&args.layers);
    let group: BuildpackGroup = read_toml_file(
        args.group.clone().unwrap_or_else(|| layers.group_path()),
    )?;

    let store = OciImageStore::new(&args.store);

    let run_image = store.open(&args.run_image)?;
    if !run_image.found() {
        return Err(ImageError::NotFound(args.run_image.clone()).into());
    }

    let previous_image = store.open(&args.image)?;
    let previous = previous_metadata(&previous_image);

    let mut output = store.new_from_base(&args.image, &run_image);
    let mut cache = open_cache(
        args.cache_dir.as_deref(),
        args.cache_image.as_deref(),
        Some(&store),
    )?;

    let work_dir = tempfile::tempdir()?;
    let digest = Exporter {
        group: &group,
        layers: &layers,
        app_dir: &args.app,
        launcher: &args.launcher,
    }
    .export(
        &mut output,
        &run_image,
        &previous,
        cache.as_mut(),
        work_dir.path(),
    )?;

    println!("{digest}");

    Ok(())
}

fn parse_args() -> Args {
    Args::try_parse().unwrap_or_else(|error| {
        let code = if error.use_stderr() {
            exit_code::INVALID_ARGS
        } else {
            exit_code::SUCCESS
        };
        let _ = error.print();
        exit(code);
    })
}

fn setup_logging() {
    if let Err(error) = stderrlog::new().verbosity(2).init() {
        eprintln!("Unable to initialize logger: {error}");
        exit(exit_code::FAILED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_command() {
        Args::command().debug_assert();
    }
}
