#![allow(dead_code)]

use crate::cli::SubCommand;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;
mod compile;
mod config;
mod external;
mod storage;

#[derive(Debug, Parser)]
#[command(name = "relaypanel", about = "Configuration compiler for the relay core")]
struct ProgramArgs {
    /// Config directory; defaults to ~/.config/relaypanel.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: SubCommand,
}

fn main() -> ExitCode {
    let args: ProgramArgs = ProgramArgs::parse();
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    rt.block_on(cli::run(args))
}
