use crate::compile::{CompileOptions, Compiler};
use crate::external::{init_tracing, FileHandoff};
use crate::storage::DirStore;
use crate::ProgramArgs;
use anyhow::{anyhow, Context};
use clap::{Args, Subcommand, ValueEnum};
use relayapi::SnapshotKind;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Args)]
pub(crate) struct CompileArgs {
    /// Deliver the compiled document to this path instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Leave the dns block untouched.
    #[arg(long)]
    no_control_dns: bool,
    /// Leave the sniffer block untouched.
    #[arg(long)]
    no_control_sniff: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum SnapshotArg {
    Raw,
    Enhanced,
    Compiled,
}

impl From<SnapshotArg> for SnapshotKind {
    fn from(arg: SnapshotArg) -> Self {
        match arg {
            SnapshotArg::Raw => SnapshotKind::Raw,
            SnapshotArg::Enhanced => SnapshotKind::Enhanced,
            SnapshotArg::Compiled => SnapshotKind::Compiled,
        }
    }
}

#[derive(Debug, Subcommand)]
pub(crate) enum SubCommand {
    /// Compile the current profile
    Compile(CompileArgs),
    /// Compile, then print one retained pipeline snapshot
    Snapshot {
        #[arg(value_enum)]
        which: SnapshotArg,
    },
    /// Compile and only report whether it succeeded
    Check,
}

pub(crate) async fn run(args: ProgramArgs) -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }
    match execute(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(args: ProgramArgs) -> anyhow::Result<()> {
    let config_dir = args
        .config
        .or_else(default_config_path)
        .ok_or_else(|| anyhow!("No config directory given and $HOME is not set"))?;
    let compiler = Compiler::new(Arc::new(DirStore::new(&config_dir)));
    match args.cmd {
        SubCommand::Compile(cmd) => {
            let options = CompileOptions {
                control_dns: !cmd.no_control_dns,
                control_sniff: !cmd.no_control_sniff,
            };
            match cmd.output {
                Some(path) => {
                    let handoff = FileHandoff::new(&path);
                    compiler
                        .compile_and_deliver(&handoff, options)
                        .await
                        .with_context(|| format!("Compile into {:?} failed", path))?;
                    tracing::info!("Compiled configuration delivered to {:?}", path);
                }
                None => {
                    let compiled = compiler.compile(options).await?;
                    println!("{}", compiled);
                }
            }
        }
        SubCommand::Snapshot { which } => {
            compiler.compile(CompileOptions::default()).await?;
            let text = compiler
                .snapshot(which.into())
                .ok_or_else(|| anyhow!("No snapshot retained"))?;
            println!("{}", text);
        }
        SubCommand::Check => {
            compiler.compile(CompileOptions::default()).await?;
            println!("ok");
        }
    }
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    let home = PathBuf::from(std::env::var("HOME").ok()?);
    Some(home.join(".config").join("relaypanel"))
}
