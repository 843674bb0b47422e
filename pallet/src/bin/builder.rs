use clap::Parser;
use pallet::build::Builder;
use pallet::buildpacks::BuildpackStore;
use pallet::exit_code;
use pallet::layers::LayersDir;
use pallet::proc::ChildConfig;
use pallet_common::toml_file::read_toml_file;
use pallet_data::group::BuildpackGroup;
use std::path::PathBuf;
use std::process::exit;

/// Executes the selected group's build programs against the layers
/// directory.
#[derive(Parser)]
#[command(name = "builder")]
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

    /// Path to the platform directory
    #[arg(long, default_value = "/platform")]
    platform: PathBuf,

    /// Path to group.toml [default: <layers>/group.toml]
    #[arg(long)]
    group: Option<PathBuf>,

    /// Path to the merged build plan [default: <layers>/plan.toml]
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
    let group: BuildpackGroup = read_toml_file(
        args.group.clone().unwrap_or_else(|| layers.group_path()),
    )?;
    let plan_path = args.plan.clone().unwrap_or_else(|| layers.plan_path());

    Builder {
        group: &group,
        layers: &layers,
        buildpacks: &BuildpackStore::new(&args.buildpacks),
        app_dir: &args.app,
        platform_dir: &args.platform,
        plan_path: &plan_path,
        child: ChildConfig {
            uid: args.uid,
            gid: args.gid,
        },
    }
    .build()?;

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
