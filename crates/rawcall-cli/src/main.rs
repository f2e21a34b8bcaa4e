//! Rawcall command-line inspector
//!
//! Shows what the call bridge would do for a native signature on a given
//! target: the call descriptor, the register plan, and the exchange buffer
//! layout.

mod commands;
mod signature;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rawcall_engine::jit::backend::TargetArch;
use rawcall_engine::jit::{BridgeConfig, InvokerKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rawcall")]
#[command(about = "Inspect native call descriptors, register plans and exchange layouts", long_about = None)]
#[command(version)]
struct Cli {
    /// Bridge configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target architecture (x86_64, aarch64, arm); defaults to the host
    #[arg(short, long, global = true)]
    target: Option<TargetArch>,

    /// Exchange slot stride in bytes
    #[arg(long, global = true)]
    stride: Option<usize>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the call descriptor for a signature such as `sint32,double->sint8`
    Describe {
        /// Signature text
        signature: String,
        /// Calling convention (default, sysv, win64, apple-aarch64)
        #[arg(long, default_value = "default")]
        abi: String,
    },

    /// Assign argument registers for kind codes such as `iifS`
    Plan {
        /// Argument kind codes: i (int), f (double), S (float), L (64-bit int on 32-bit targets)
        kinds: String,
    },

    /// Show the effective configuration and target description
    Info,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RAWCALL_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.target, cli.stride)?;

    match cli.command {
        Commands::Describe { signature, abi } => {
            commands::describe::execute(config, &signature, &abi, cli.json)
        }
        Commands::Plan { kinds } => commands::plan::execute(config, &kinds, cli.json),
        Commands::Info => commands::info::execute(config, cli.json),
    }
}

/// Read the configuration file, then apply command-line overrides.
///
/// Trampolines only run on the host; inspecting a foreign target switches to
/// the raw-call invoker, which never compiles code.
fn load_config(
    path: Option<&Path>,
    target: Option<TargetArch>,
    stride: Option<usize>,
) -> anyhow::Result<BridgeConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => BridgeConfig::default(),
    };

    if let Some(target) = target {
        config.target = target;
    }
    if let Some(stride) = stride {
        config.exchange_stride = stride;
    }
    if config.target != TargetArch::host() && config.invoker == InvokerKind::Trampoline {
        tracing::info!(target_arch = %config.target, "foreign target, using raw-call invoker");
        config.invoker = InvokerKind::RawCall;
    }

    config.validate()?;
    Ok(config)
}
