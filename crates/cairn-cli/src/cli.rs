use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cairn",
    about = "Cairn: asset bundle packer and remote build runner",
    version,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Run as a worker process connected to this socket
    #[arg(long, value_name = "ADDR", requires = "build_path")]
    pub slave: Option<PathBuf>,

    /// Build directory of the worker's object store
    #[arg(long, value_name = "PATH", requires = "slave")]
    pub build_path: Option<PathBuf>,

    /// Process id of a debugger to reattach to
    #[arg(long, value_name = "PID", requires = "slave")]
    pub reattach_debugger: Option<u32>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the build steps, then pack bundles
    Build(BuildArgs),
    /// Pack bundles from the current content index
    Pack(PackArgs),
    /// Show the contents of a bundle file
    Inspect(InspectArgs),
}

#[derive(Args)]
pub struct BuildArgs {
    #[arg(short, long, default_value = "cairn.toml")]
    pub config: PathBuf,
    /// Run every step in a worker process
    #[arg(long)]
    pub remote: bool,
    /// Write incremental bundle patches
    #[arg(long)]
    pub incremental: bool,
}

#[derive(Args)]
pub struct PackArgs {
    #[arg(short, long, default_value = "cairn.toml")]
    pub config: PathBuf,
    #[arg(long)]
    pub incremental: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Path to a `.bundle` file
    pub bundle: PathBuf,
    /// List every asset URL
    #[arg(long)]
    pub assets: bool,
}
