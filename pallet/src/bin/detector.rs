use clap::Parser;
use pallet::buildpacks::BuildpackStore;
use pallet::detect::Detector;
use pallet::exit_code;
use pallet::layers::LayersDir;
use pallet::proc::ChildConfig;
use pallet_common::toml_file::{read_toml_file, write_toml_file};
use pallet_data::group::BuildpackOrder;
use std::path::PathBuf;
use std::process::exit;

/// Selects the buildpack group and build plan for an application.
#[derive(Parser)]
#[command(name = "detector")]
struct Args {
    /// Path to the layers directory
    #[arg(long, default_value = "/workspace")]
    layers: PathBuf,

    /// Path to the application directory
    #[arg(long, default_value = ".")]
    app: PathBuf,

    /// Path to the buildpacks directory
    #[arg(long, default_value = "/buildpacks")]
    buildpacks: PathBuf,

    /// Path to order.toml listing the candidate groups
    #[arg(long, default_value = "/buildpacks/order.toml")]
    order: PathBuf,

    /// Path to the platform directory
    #[arg(long, default_value = "/platform")]
    platform: PathBuf,

    /// Path for the selected group [default: <layers>/group.toml]
    #[arg(long)]
    group: Option<PathBuf>,

    /// Path for the merged build plan [default: <layers>/plan.toml]
    #[arg(long)]
    plan: Option<PathBuf>,

    /// UID buildpack processes run as
    #[arg(long)]
    uid: Option<u32>,

    /// GID buildpack processes run as
    #[arg(long)]
    gid: Option<u32>,
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
    let order: BuildpackOrder = read_toml_file(&args.order)?;
    let buildpacks = BuildpackStore::new(&args.buildpacks);

    let (group, plan) = Detector {
        order: &order,
        buildpacks: &buildpacks,
        app_dir: &args.app,
        platform_dir: &args.platform,
        layers: &layers,
        child: ChildConfig {
            uid: args.uid,
            gid: args.gid,
        },
    }
    .detect()?;

    write_toml_file(
        &group,
        args.group.clone().unwrap_or_else(|| layers.group_path()),
    )?;
    write_toml_file(&plan, args.plan.clone().unwrap_or_else(|| layers.plan_path()))?;

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
