//! CLI argument parsing for uapi-registry

use crate::manifest::Domain;
use crate::snapshot::SnapshotId;
use crate::target::Target;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "uapi-registry.toml";

/// Output format for reports and values
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "uapi-registry")]
#[command(version)]
#[command(about = "Per-target registry of Linux UAPI constants and struct layouts", long_about = None)]
pub struct Cli {
    /// Project config file (defaults to ./uapi-registry.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the wrapper header including every domain header
    Manifest {
        /// Restrict to these domains (repeatable)
        #[arg(short, long = "domain", value_name = "DOMAIN")]
        domains: Vec<Domain>,
    },

    /// Extract constants and layouts from header trees into a new snapshot
    Extract(ExtractArgs),

    /// Report symbols whose values differ between targets or snapshots
    Validate(ValidateArgs),

    /// Print the value bound to a symbol for one target
    Resolve(ResolveArgs),

    /// Compare a snapshot's host-target bindings with the host libc
    #[cfg(target_os = "linux")]
    HostCheck {
        /// Snapshot file, or id in the store
        snapshot: String,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Root of the per-architecture header trees (<DIR>/<arch>/include)
    #[arg(long, value_name = "DIR")]
    pub headers: Option<PathBuf>,

    /// Target triple to extract for (repeatable)
    #[arg(short, long = "target", value_name = "TRIPLE")]
    pub targets: Vec<Target>,

    /// Domain to extract (repeatable; default all)
    #[arg(short, long = "domain", value_name = "DOMAIN")]
    pub domains: Vec<Domain>,

    /// Snapshot store directory
    #[arg(short, long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Snapshot id (default: content hash)
    #[arg(long, value_name = "ID")]
    pub id: Option<SnapshotId>,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Snapshot file, or id in the store
    pub baseline: String,

    /// Second snapshot to compare against the first
    pub candidate: Option<String>,

    /// Variance policy TOML (default: config, then the built-in policy)
    #[arg(long, value_name = "FILE")]
    pub policy: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Snapshot file, or id in the store
    pub snapshot: String,

    pub domain: Domain,

    pub symbol: String,

    /// Target triple
    #[arg(short, long, value_name = "TRIPLE")]
    pub target: Target,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}
