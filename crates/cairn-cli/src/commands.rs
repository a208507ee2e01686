use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use cairn_bundle::{BundlePacker, BundleReader};
use cairn_exec::{run_worker, Builder, CommandRegistry, ExecutionMode, RemoteExecutor, WorkerOptions};
use cairn_store::ObjectDatabase;
use cairn_types::{BuildResultCode, Logger, ObjectId, ResultStatus, TracingLogger};
use clap::CommandFactory;
use colored::Colorize;

use crate::cli::*;
use crate::config::CairnConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<BuildResultCode> {
    if let Some(address) = cli.slave {
        let build_path = cli
            .build_path
            .context("--build-path is required in worker mode")?;
        let options = WorkerOptions {
            address,
            build_path,
            debugger_pid: cli.reattach_debugger,
        };
        return Ok(run_worker(&options, Arc::new(CommandRegistry::with_builtin())));
    }

    match cli.command {
        Some(Command::Build(args)) => cmd_build(args),
        Some(Command::Pack(args)) => cmd_pack(args),
        Some(Command::Inspect(args)) => cmd_inspect(args),
        None => {
            Cli::command().print_help()?;
            Ok(BuildResultCode::CommandLineError)
        }
    }
}

fn cmd_build(args: BuildArgs) -> anyhow::Result<BuildResultCode> {
    let config = CairnConfig::load(&args.config)?;
    let database = ObjectDatabase::open(&config.build_path, &config.index_name)?;
    let logger: Arc<dyn Logger> = Arc::new(TracingLogger::for_module("build"));

    let mut builder = Builder::new(database.clone(), Arc::clone(&logger));
    if args.remote || config.steps.iter().any(|s| s.mode == ExecutionMode::Remote) {
        let registry = CommandRegistry::with_builtin();
        let executor = RemoteExecutor::new(config.remote_config(), &config.build_path, &registry);
        builder = builder.with_remote_executor(Arc::new(executor));
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let cancellation = builder.cancellation().clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation.cancel();
        }
    });
    let outcome = runtime.block_on(builder.run(config.command_steps(args.remote)));
    builder.write_index_file()?;

    for (title, status) in &outcome.statuses {
        let mark = match status {
            ResultStatus::Successful | ResultStatus::NotTriggeredWasSuccessful => "✓".green(),
            ResultStatus::Cancelled => "-".yellow(),
            _ => "✗".red(),
        };
        println!("  {} {} ({})", mark, title, status);
    }
    if outcome.code != BuildResultCode::Successful {
        println!(
            "{} Build {}",
            "✗".red().bold(),
            if outcome.code == BuildResultCode::Cancelled { "cancelled" } else { "failed" }
        );
        return Ok(outcome.code);
    }

    let incremental = args.incremental || config.incremental;
    pack(&config, &database, &outcome.disabled_compression_ids, incremental, &*logger)
}

fn cmd_pack(args: PackArgs) -> anyhow::Result<BuildResultCode> {
    let config = CairnConfig::load(&args.config)?;
    let database = ObjectDatabase::open(&config.build_path, &config.index_name)?;
    let logger = TracingLogger::for_module("pack");
    let incremental = args.incremental || config.incremental;
    let disabled_compression_ids = config.disabled_compression_ids(&**database.index());
    pack(&config, &database, &disabled_compression_ids, incremental, &logger)
}

fn pack(
    config: &CairnConfig,
    database: &ObjectDatabase,
    disabled_compression_ids: &HashSet<ObjectId>,
    incremental: bool,
    logger: &dyn Logger,
) -> anyhow::Result<BuildResultCode> {
    let bundles = config.bundle_definitions()?;
    let mut packer = BundlePacker::new();
    let files = packer.build(
        logger,
        &config.pack_session(),
        &bundles,
        database,
        &config.index_name,
        config.output_directory(),
        disabled_compression_ids,
        incremental,
    )?;

    for file in &files {
        println!("  {} {}", "bundle:".green(), file.display());
    }
    println!("{} Packed {} bundle file(s)", "✓".green().bold(), files.len());
    Ok(BuildResultCode::Successful)
}

fn cmd_inspect(args: InspectArgs) -> anyhow::Result<BuildResultCode> {
    let reader = BundleReader::open(&args.bundle)?;
    let description = reader.description();

    println!("Bundle {}", reader.path().display().to_string().bold());
    if description.dependencies.is_empty() {
        println!("  Dependencies: {}", "none".dimmed());
    } else {
        println!("  Dependencies: {}", description.dependencies.join(", ").cyan());
    }
    println!("  Patches: {}", description.incremental_bundles.len());
    println!("  Assets: {}", description.assets.len());

    let mut stored = 0u64;
    let mut compressed = 0usize;
    for (id, info) in &description.objects {
        reader
            .read_object(id)
            .with_context(|| format!("object {id} is unreadable"))?;
        stored += info.stored_size();
        compressed += usize::from(info.is_compressed);
    }
    println!(
        "  Objects: {} ({} compressed, {} bytes stored) {}",
        reader.object_count(),
        compressed,
        stored,
        "✓".green()
    );

    if args.assets {
        for (url, id) in &description.assets {
            println!("    {} {}", id.short_hex().yellow(), url);
        }
    }
    Ok(BuildResultCode::Successful)
}
