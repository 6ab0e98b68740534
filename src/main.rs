//! `surround-view`: the five CLI subcommands around the birdview pipeline
//! library (§6, §10.3's "Pipeline/CLI configuration" surface). Each
//! subcommand is a thin `argh`-parsed wrapper that dispatches straight into
//! its own module; none of them holds state shared with another.

mod cli;
mod util;

use argh::FromArgs;

use cli::{BuildWeightsArgs, CalibrateExtrinsicArgs, CalibrateIntrinsicsArgs, CaptureImageArgs, RunArgs};

#[derive(FromArgs)]
/// real-time four-camera birdview stitching
struct TopLevel {
    #[argh(subcommand)]
    command: Command,

    /// enable debug-level terminal logging
    #[argh(switch, short = 'v')]
    verbose: bool,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    CalibrateIntrinsics(CalibrateIntrinsicsArgs),
    CaptureImage(CaptureImageArgs),
    CalibrateExtrinsic(CalibrateExtrinsicArgs),
    BuildWeights(BuildWeightsArgs),
    Run(RunArgs),
}

fn main() -> anyhow::Result<()> {
    let top: TopLevel = argh::from_env();
    util::init_logging(top.verbose);

    let result = match top.command {
        Command::CalibrateIntrinsics(args) => cli::calibrate_intrinsics::run(args),
        Command::CaptureImage(args) => cli::capture_image::run(args),
        Command::CalibrateExtrinsic(args) => cli::calibrate_extrinsic::run(args),
        Command::BuildWeights(args) => cli::build_weights::run(args),
        Command::Run(args) => cli::run::run(args),
    };

    if let Err(err) = &result {
        log::error!("{err:#}");
    }
    result
}
