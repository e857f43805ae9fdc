use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;
use std::sync::Once;

use anyhow::Context;
use clap::{Parser, Subcommand};
use epoch_core::bytecode::decode_stream;
use epoch_core::util::env::env_toggle_enabled;
use epoch_core::{ExecutionResult, VirtualMachine, VmConfig};
use tracing::{info, warn};


static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "epoch=info,epoch_cli=info";

/// Exit status of a run that stopped on a halt.
const HALT_EXIT_CODE: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "epoch", author, version, about = "Run and inspect Epoch bytecode", long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load and execute a bytecode file.
    Run {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        /// TOML file with VM settings (GC thresholds, stack and call limits)
        #[arg(long, value_name = "FILE", value_parser = parse_sanitized_path)]
        config: Option<PathBuf>,
    },
    /// Print what the loader builds from a bytecode file.
    Inspect {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one decoded instruction per line.
    Disasm {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Installs a stderr subscriber when `EPOCH_TRACE` is set. The variable's
/// value is used as the filter unless it is a plain on-switch.
fn maybe_init_tracing() {
    let raw = match std::env::var("EPOCH_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };

    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn read_bytecode(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read file '{}'", path.display()))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<VmConfig> {
    let config = match path {
        Some(path) => VmConfig::from_path(path)?,
        None => VmConfig::default(),
    };
    config.apply_env_overrides()
}

fn machine(config: VmConfig) -> anyhow::Result<VirtualMachine> {
    let mut vm = VirtualMachine::new(config);
    epoch_stdlib::register_stdlib(&mut vm)?;
    Ok(vm)
}

fn run_file(file: &Path, config: Option<&Path>) -> anyhow::Result<ExitCode> {
    let bytes = read_bytecode(file)?;
    let vm = machine(load_config(config)?)?;
    let outcome = vm
        .execute_bytecode(&bytes)
        .with_context(|| format!("execution of '{}' failed", file.display()))?;
    match outcome.result {
        ExecutionResult::Ok => {
            info!(target: "epoch_cli", file = %file.display(), "run finished");
            Ok(ExitCode::SUCCESS)
        }
        ExecutionResult::Halted(reason) => {
            warn!(target: "epoch_cli", file = %file.display(), %reason, "run halted");
            eprintln!("halted: {}", reason);
            Ok(ExitCode::from(HALT_EXIT_CODE))
        }
    }
}

fn inspect_file(file: &Path, json: bool) -> anyhow::Result<()> {
    let bytes = read_bytecode(file)?;
    let vm = machine(VmConfig::default())?;
    let program = vm.load(&bytes)?;
    let summary = program.summary(vm.strings())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("bytes:        {}", summary.bytes);
    println!("instructions: {}", summary.instructions);
    println!("strings:      {}", summary.strings);
    println!("scopes:       {}", summary.scopes);
    println!("entities:     {}", summary.entities);
    println!("chains:       {}", summary.chains);
    for function in &summary.functions {
        let mut flags = Vec::new();
        if function.native {
            flags.push("native");
        }
        if function.constructor {
            flags.push("constructor");
        }
        println!(
            "{} {} @{} params={}{}",
            function.kind,
            function.name,
            function.entry,
            function.parameters,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            }
        );
    }
    for external in &summary.externals {
        println!("external {} -> {}:{}", external.name, external.library, external.symbol);
    }
    for structure in &summary.structures {
        println!("structure {} ({} bytes)", structure.type_id, structure.footprint);
        for member in &structure.members {
            println!("  +{} {}: {}", member.offset, member.name, member.type_id);
        }
    }
    for sum in &summary.sum_types {
        println!("sum {} = {}", sum.type_id, sum.bases.join(" | "));
    }
    Ok(())
}

fn disasm_file(file: &Path) -> anyhow::Result<()> {
    let bytes = read_bytecode(file)?;
    for (offset, instruction) in decode_stream(&bytes)? {
        println!("{:>6}  {}", offset, instruction);
    }
    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    maybe_init_tracing();

    let CliArgs { command } = CliArgs::parse();
    match command {
        Commands::Run { file, config } => run_file(&file, config.as_deref()),
        Commands::Inspect { file, json } => inspect_file(&file, json).map(|()| ExitCode::SUCCESS),
        Commands::Disasm { file } => disasm_file(&file).map(|()| ExitCode::SUCCESS),
    }
}
