use std::path::PathBuf;
use clap::{CommandFactory, Parser};

mod archive;
mod commands;
mod errors;
mod model;
mod pickle;
mod report;
mod utils;

const ABOUT: &str = "Converts SMPL pkl models to npz archives usable without a Python runtime";

const TIPS: &str = "\
Tip: Download SMPL m/f models from https://smpl.is.tue.mpg.de/ (\"for python users\")
Tip: Download SMPL neutral model from https://smplify.is.tue.mpg.de/ (\"for python users\")";

#[derive(clap::Parser)]
#[clap(about = ABOUT, after_help = TIPS)]
struct Cli {
    /// Pickled model files to convert
    #[clap(num_args = 0..)]
    inputs: Vec<PathBuf>,

    #[clap(short, long, default_value = "data/models/smpl")]
    output_directory: PathBuf,

    /// Print a table of the converted fields for every input
    #[clap(short, long)]
    summary: bool,
}

fn setup_logging() -> anyhow::Result<()> {
    let spec = flexi_logger::LogSpecification::parse("warn,smpl2npz=debug")?;
    flexi_logger::Logger::with(spec)
        .log_to_file(
            flexi_logger::FileSpec::default()
                .directory("logs")
                .basename("smpl2npz")
                .use_timestamp(false),
        )
        .duplicate_to_stdout(flexi_logger::Duplicate::Info)
        .format_for_files(flexi_logger::detailed_format)
        .format_for_stdout(flexi_logger::colored_detailed_format)
        .set_palette("b1;3;2;4;6".to_string())
        .start()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    setup_logging()?;

    let cli = Cli::parse();
    if cli.inputs.is_empty() {
        Cli::command().print_help()?;
        println!();
    }

    commands::convert::convert_models(cli.inputs, cli.output_directory, cli.summary)?;

    Ok(())
}
