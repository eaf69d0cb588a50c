//! route_check entry point.
//!
//! Verifies that every route in APPL_DB is programmed in ASIC_DB and that
//! ASIC_DB holds nothing APPL_DB does not explain. Exits 0 when the check
//! passes and 1 otherwise.

use anyhow::Context;
use clap::Parser;
use sonic_routecheck::config::scan_interval;
use sonic_routecheck::{
    logging, LogMode, Reconciler, RedisStore, Reporter, ReportingConfig, RouteCheckConfig,
    RouteChecker, Scheduler, VtyshRoutes, Watchdog,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// SONiC route consistency checker
#[derive(Parser, Debug)]
#[command(name = "route_check")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log verbosity
    #[arg(short = 'm', long, value_enum, ignore_case = true, default_value_t = LogMode::Err)]
    mode: LogMode,

    /// Repeat the check every N seconds (0 runs it once)
    #[arg(short = 'i', long, default_value = "0")]
    interval: u64,

    /// Mirror log output to syslog
    #[arg(short = 's', long)]
    log_to_syslog: bool,

    /// Configuration file (default: /etc/sonic/route_check.toml if present)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Check only this namespace
    #[arg(short = 'n', long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let reporting = ReportingConfig {
        mode: args.mode,
        log_to_syslog: args.log_to_syslog,
    };
    if let Err(e) = logging::init(&reporting) {
        eprintln!("route_check: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args, reporting).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("route_check failed to start: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, reporting: ReportingConfig) -> anyhow::Result<bool> {
    let config = RouteCheckConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    let namespaces = config
        .resolve_namespaces(args.namespace.as_deref())
        .context("Failed to resolve namespaces")?;

    let mut reconcilers = Vec::with_capacity(namespaces.len());
    for (namespace, database) in namespaces {
        let store = RedisStore::new(namespace.clone(), database);
        let mut reconciler = Reconciler::new(namespace.clone(), store, &config.check)
            .with_context(|| format!("Failed to set up namespace '{}'", namespace))?
            .with_reporting(reporting);
        if config.frr.enabled {
            reconciler = reconciler.with_control_plane(
                Box::new(VtyshRoutes::new(&config.frr.vtysh_path, &namespace)),
                config.frr.clone(),
            );
        }
        reconcilers.push(reconciler);
    }

    let mut checker = RouteChecker::new(reconcilers);
    info!(
        namespaces = ?checker.namespaces(),
        interval_secs = args.interval,
        frr = config.frr.enabled,
        "Starting route_check"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    let signal_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, shutting down");
                signal_token.cancel();
            }
            Err(err) => error!("Failed to listen for ctrl-c: {}", err),
        }
    });

    let scheduler = Scheduler::new(
        scan_interval(args.interval),
        Watchdog::new(config.check.timeout()),
        Reporter::new(reporting),
        shutdown,
    );
    let passed = scheduler.run(&mut checker).await;

    signal_handle.abort();
    Ok(passed)
}
