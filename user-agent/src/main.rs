// src/main.rs

//! Agent entry-point (console application).
//!
//! 1. Parse the command line and configuration, set up structured logging
//! 2. Normalize the protected paths into the registry
//! 3. Connect to the filter port (fatal on failure) and check its version
//! 4. Connect to the consultant (optional, never fatal)
//! 5. Start the worker pool and wait for Ctrl+C
//! 6. Shut down: cancel reads, wake workers, bounded join
//!
// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::Context;
use chrono::Local;
use clap::Parser;
use fern::Dispatch;
use log::LevelFilter;
use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
    thread,
};

// ───── local imports ────────────────────────────────────────────────────────
use avf_agent::comms::{self, pipe::PlatformConnector};
use avf_agent::config::{self, Config, LoggingConfig};
use avf_agent::consultant::Consultant;
use avf_agent::listener::{DecisionSource, ListenerPool, ListenerSettings};
use avf_agent::registry::{ProtectedPaths, SystemDevices};
use avf_agent::telemetry;

// ───── command line ─────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "avf-agent", version, about = "AVF file-access listener")]
struct Cli {
    /// Configuration file (default: config.toml next to the executable)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Files to protect; with none, every access is reported
    #[arg(value_name = "PATH")]
    paths: Vec<String>,
}

// ───── helpers ──────────────────────────────────────────────────────────────

/// Directory that contains the running executable.
fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn load_config(cli: &Cli, exe_dir: &Path) -> Result<Config, config::ConfigError> {
    match &cli.config {
        Some(path) => config::load(path),
        None => config::load_or_default(&exe_dir.join("config.toml")),
    }
}

/// Configure global logging as requested in `[logging]`.
fn setup_logging(exe_dir: &Path, logging: &LoggingConfig) -> Result<(), fern::InitError> {
    let level = match logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let log_path = logging
        .enable
        .then(|| exe_dir.join(logging.file.as_deref().unwrap_or("avf-agent.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

fn build_registry(cfg: &Config, paths: &[String]) -> ProtectedPaths {
    let mut registry = ProtectedPaths::new(cfg.filter.protected_capacity);
    for path in paths {
        match registry.add(path, &SystemDevices) {
            Ok(canonical) => log::info!("Protected: {path} -> {canonical}"),
            Err(e) => log::warn!("Not protecting {path}: {e}"),
        }
    }
    if registry.is_empty() {
        log::info!("No protected files: every access is reported");
    }
    registry
}

fn build_consultant(cfg: &Config) -> Option<Arc<dyn DecisionSource>> {
    if !cfg.consultant.enable {
        log::info!("Consultant disabled: protected accesses are allowed");
        return None;
    }
    let connector = PlatformConnector::new(cfg.consultant.endpoint.clone(), cfg.consultant.read_timeout);
    let consultant = Consultant::new(connector);
    if let Err(e) = consultant.connect() {
        log::warn!("Consultant at {} not available ({e}); allowing until it connects", consultant.endpoint());
    }
    Some(Arc::new(consultant))
}

// ───── agent logic ──────────────────────────────────────────────────────────

fn run() -> anyhow::Result<()> {
    // 1 ─ Context
    let cli = Cli::parse();
    let exe_dir = exe_dir();
    let cfg = load_config(&cli, &exe_dir).context("loading configuration")?;
    setup_logging(&exe_dir, &cfg.logging).context("setting up logging")?;
    if let Some(listen) = cfg.metrics.listen {
        if let Err(e) = telemetry::install_exporter(listen) {
            log::warn!("Metrics exporter disabled: {e}");
        }
    }
    log::info!("Agent bootstrap initiated");

    // 2 ─ Protected paths
    let registry = build_registry(&cfg, &cli.paths);

    // 3 ─ Filter port
    let port = comms::open_filter_port(&cfg.filter.port_name, cfg.listener.pending_reads, cfg.listener.workers)
        .with_context(|| format!("connecting to filter port {}", cfg.filter.port_name))?;
    match port.query_version() {
        Ok(version) => log::info!("Filter version {version}"),
        Err(e) => log::warn!("Filter version query failed: {e}"),
    }

    // 4 ─ Consultant
    let source = build_consultant(&cfg);

    // 5 ─ Workers
    let stop = comms::console::stop_signal().context("installing console handler")?;
    let pool = ListenerPool::start(
        port,
        Arc::new(registry),
        source,
        ListenerSettings { workers: cfg.listener.workers, poll_interval: cfg.listener.poll_interval },
    )
    .context("starting listener")?;
    log::info!("Monitoring file access, press Ctrl+C to stop");

    // 6 ─ Wait for shutdown
    let _ = stop.recv();
    log::warn!("Shutdown initiated");
    let report = pool.shutdown(cfg.listener.shutdown_timeout);
    if report.abandoned > 0 {
        log::warn!("{} worker(s) abandoned at exit", report.abandoned);
    }
    log::info!("Agent stopped cleanly");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("[{}][ERROR][main] {e:#}", Local::now().to_rfc3339());
        process::exit(1);
    }
}
