use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use uapi_registry::cli::{
    Cli, Command, ExtractArgs, OutputFormat, ResolveArgs, ValidateArgs, DEFAULT_CONFIG_FILE,
};
use uapi_registry::config::RegistryConfig;
use uapi_registry::extract::{self, HeaderTree};
use uapi_registry::manifest::{Domain, Manifest};
use uapi_registry::registry::{read_snapshot, SnapshotStore};
use uapi_registry::resolve::Resolver;
use uapi_registry::snapshot::{Snapshot, SnapshotBuilder, SnapshotId};
use uapi_registry::validate::{self, VariancePolicy};

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Explicit `--config`, else `./uapi-registry.toml` if present, else defaults
fn load_config(path: Option<&Path>) -> Result<RegistryConfig> {
    match path {
        Some(path) => RegistryConfig::load(path),
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            RegistryConfig::load(DEFAULT_CONFIG_FILE)
        }
        None => Ok(RegistryConfig::default()),
    }
}

/// A snapshot argument is a file path, or an id in the configured store
fn load_snapshot(arg: &str, config: &RegistryConfig) -> Result<Snapshot> {
    let path = PathBuf::from(arg);
    if path.is_file() {
        return read_snapshot(&path)
            .with_context(|| format!("Failed to load snapshot file: {}", path.display()));
    }
    let id: SnapshotId = arg
        .parse()
        .with_context(|| format!("'{}' is neither a snapshot file nor a snapshot id", arg))?;
    let store = SnapshotStore::open(&config.out)?;
    store
        .load(&id)
        .with_context(|| format!("Failed to load snapshot from {}", store.dir().display()))
}

fn run_manifest(domains: Vec<Domain>) {
    let manifest = if domains.is_empty() {
        Manifest::default()
    } else {
        Manifest::with_domains(domains)
    };
    print!("{}", manifest.render_wrapper_header());
}

fn run_extract(args: ExtractArgs, mut config: RegistryConfig) -> Result<()> {
    // Command-line values override the config file
    if let Some(headers) = args.headers {
        config.headers = Some(headers);
    }
    if let Some(out) = args.out {
        config.out = out;
    }
    if !args.targets.is_empty() {
        config.targets = args.targets.iter().map(|t| t.triple().to_string()).collect();
    }
    if !args.domains.is_empty() {
        config.domains = Some(args.domains.iter().map(|d| d.name().to_string()).collect());
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let headers = config
        .headers
        .clone()
        .context("No header tree given (use --headers or set `headers` in the config)")?;
    let targets = config.parsed_targets()?;
    let manifest = config.manifest()?;

    let source = HeaderTree::new(&headers);
    let extractions = extract::extract_all(&source, &manifest, &targets)?;
    let mut builder = SnapshotBuilder::from_extractions(&extractions)?;
    if let Some(id) = args.id {
        builder = builder.with_id(id);
    }
    let snapshot = builder.build()?;

    let store = SnapshotStore::open(&config.out)?;
    let path = store.save(&snapshot)?;
    println!(
        "{} ({} bindings, {} targets) -> {}",
        snapshot.id(),
        snapshot.len(),
        targets.len(),
        path.display()
    );
    Ok(())
}

fn run_validate(args: ValidateArgs, config: RegistryConfig) -> Result<()> {
    let policy = match &args.policy {
        Some(path) => VariancePolicy::from_toml(path)?,
        None => config.variance_policy()?,
    };
    let baseline = load_snapshot(&args.baseline, &config)?;
    let candidate = match &args.candidate {
        Some(arg) => load_snapshot(arg, &config)?,
        None => baseline.clone(),
    };

    let report = validate::compare(&baseline, &candidate, &policy);
    match args.format {
        OutputFormat::Text => print!("{}", report.to_report_string()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    report.into_result()?;
    Ok(())
}

fn run_resolve(args: ResolveArgs, config: RegistryConfig) -> Result<()> {
    let resolver = Resolver::from(load_snapshot(&args.snapshot, &config)?);
    let value = resolver.resolve(args.domain, &args.symbol, &args.target)?;
    match args.format {
        OutputFormat::Text => println!("{}", value),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn run_host_check(snapshot: &str, format: OutputFormat, config: RegistryConfig) -> Result<()> {
    let snapshot = load_snapshot(snapshot, &config)?;
    let target = uapi_registry::target::Target::host()?;
    let result = uapi_registry::host::cross_check(&snapshot, &target);
    match format {
        OutputFormat::Text => print!("{}", result.to_report_string()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    if !result.is_clean() {
        anyhow::bail!(
            "{} symbols disagree with the host libc",
            result.mismatches.len()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(cli.debug);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Manifest { domains } => run_manifest(domains),
        Command::Extract(args) => run_extract(args, config)?,
        Command::Validate(args) => run_validate(args, config)?,
        Command::Resolve(args) => run_resolve(args, config)?,
        #[cfg(target_os = "linux")]
        Command::HostCheck { snapshot, format } => run_host_check(&snapshot, format, config)?,
    }

    Ok(())
}
