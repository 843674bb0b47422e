use clap::Parser;
use pallet::exit_code;
use pallet::image::{Image, ImageError, OciImageStore};
use pallet::rebase::rebase;
use std::path::PathBuf;
use std::process::exit;

/// Swaps an image's run base without rebuilding its application layers.
#[derive(Parser)]
#[command(name = "rebaser")]
struct Args {
    /// Path to the OCI layout directory backing the image store
    #[arg(long)]
    store: PathBuf,

    /// Reference of the image to rebase
    image: String,

    /// Reference of the new run (stack base) image
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
    let store = OciImageStore::new(&args.store);

    let mut image = store.open(&args.image)?;
    if !image.found() {
        return Err(ImageError::NotFound(args.image.clone()).into());
    }

    let new_base = store.open(&args.run_image)?;
    if !new_base.found() {
        return Err(ImageError::NotFound(args.run_image.clone()).into());
    }

    let digest = rebase(&mut image, &new_base)?;
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
