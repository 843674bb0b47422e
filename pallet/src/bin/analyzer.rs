use clap::Parser;
use pallet::analyze::Analyzer;
use pallet::exit_code;
use pallet::image::OciImageStore;
use pallet::layers::LayersDir;
use pallet_common::toml_file::read_toml_file;
use pallet_data::group::BuildpackGroup;
use std::path::PathBuf;
use std::process::exit;

/// Reconciles the previous image's layer metadata with the layers
/// directory.
#[derive(Parser)]
#[command(name = "analyzer")]
struct Args {
    /// Path to the layers directory
    #[arg(long, default_value = "/workspace")]
    layers: PathBuf,

    /// Path to group.toml [default: <layers>/group.toml]
    #[arg(long)]
    group: Option<PathBuf>,

    /// Path to the OCI layout directory backing the image store
    #[arg(long)]
    store: PathBuf,

    /// Reference of the previous image
    image: String,
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

    let previous_image = OciImageStore::new(&args.store).open(&args.image)?;

    Analyzer {
        group: &group,
        layers: &layers,
    }
    .analyze(&previous_image)?;

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
