mod build_info;
mod cmd;

use clap::{Parser, Subcommand};
use snafu::Whatever;

use crate::cmd::{checkpoint::CheckpointArgs, gc::GcArgs, status::StatusArgs};

#[derive(Debug, Parser)]
#[clap(
name = "cumulo",
about = "maintenance tooling for cumulo block devices",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Status(StatusArgs),
    Gc(GcArgs),
    Checkpoint(CheckpointArgs),
}

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Status(args) => args.run(),
        Commands::Gc(args) => args.run(),
        Commands::Checkpoint(args) => args.run(),
    }
}
