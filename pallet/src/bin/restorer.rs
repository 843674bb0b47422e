use clap::{ArgGroup, Parser};
use pallet::cache::open_cache;
use pallet::exit_code;
use pallet::image::OciImageStore;
use pallet::layers::LayersDir;
use pallet::restore::Restorer;
use pallet_common::toml_file::read_toml_file;
use pallet_data::group::BuildpackGroup;
use std::path::PathBuf;
use std::process::exit;

/// Materializes cached layers back onto the layers directory.
#[derive(Parser)]
#[command(name = "restorer")]
#[command(group = ArgGroup::new("cache").required(true).args(["cache_dir", "cache_image"]))]
struct Args {
    /// Path to the layers directory
    #[arg(long, default_value = "/workspace")]
    layers: PathBuf,

    /// Path to group.toml [default: <layers>/group.toml]
    #[arg(long)]
    group: Option<PathBuf>,

    /// Path of a directory-backed cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Reference of an image-backed cache within --store
    #[arg(long, requires = "store")]
    cache_image: Option<String>,

    /// Path to the OCI layout directory backing the image store
    #[arg(long)]
    store: Option<PathBuf>,
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

    let store = args.store.as_ref().map(OciImageStore::new);
    let cache = open_cache(
        args.cache_dir.as_deref(),
        args.cache_image.as_deref(),
        store.as_ref(),
    )?;

    Restorer {
        group: &group,
        layers: &layers,
    }
    .restore(cache.as_ref())?;

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
