// src/main.rs

//! alertyx entry-point.
//!
//! 1. Parse the command line & load the configuration
//! 2. Set up structured logging (terminal or syslog, optional file)
//! 3. Build the catalog, the operator policy and the notifier
//! 4. Dispatch: monitor (until Ctrl+C / SIGTERM), hunt, mitigate, version
//!
//!
// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::{Context, anyhow};
use chrono::Local;
use clap::Parser;
use fern::Dispatch;
use log::LevelFilter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{process, sync::Arc, thread};
use tokio::runtime::Runtime;
use tokio::signal::unix::{SignalKind, signal};

// ───── local imports ────────────────────────────────────────────────────────
use alertyx::analysis::{AnalysisConfig, Analyzers};
use alertyx::cli::{Cli, Commands, MonitorArgs};
use alertyx::config::{self, Config};
use alertyx::events::sources::{FeedSource, Source};
use alertyx::monitor::run_monitor;
use alertyx::output::{ConsoleNotifier, LogNotifier, Notifier};
use alertyx::policy::Policy;
use alertyx::techs::Catalog;
use alertyx::workflows;

// ───── helpers ──────────────────────────────────────────────────────────────

/// Configure global logging from `[logging]` and the global flags.
fn setup_logging(cli: &Cli, cfg: &Config) -> anyhow::Result<()> {
    let mut level = config::level_filter(&cfg.logging.level)?;
    if cli.verbose {
        level = level.max(LevelFilter::Debug);
    }

    let mut dispatch = Dispatch::new().level(level);

    if cli.syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: "alertyx".into(),
            pid: process::id(),
        };
        let logger = syslog::unix(formatter).map_err(|e| anyhow!("syslog unavailable: {e}"))?;
        dispatch = dispatch.chain(
            Dispatch::new()
                .format(|out, msg, record| out.finish(format_args!("[{}] {}", record.target(), msg)))
                .chain(logger),
        );
    } else {
        dispatch = dispatch.chain(
            Dispatch::new()
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
                .chain(std::io::stderr()),
        );
    }

    let log_path = cfg
        .logging
        .enable
        .then(|| cfg.logging.file.as_deref().unwrap_or("alertyx.log"));
    if let Some(path) = log_path {
        dispatch = dispatch.chain(
            Dispatch::new()
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
                .chain(fern::log_file(path).with_context(|| format!("opening log file {path}"))?),
        );
    }

    dispatch.apply()?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("SIGTERM handler unavailable: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Ctrl+C handler failed: {e}");
            }
            return;
        }
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                log::error!("Ctrl+C handler failed: {e}");
            }
            log::warn!("Interrupt received");
        }
        _ = term.recv() => log::warn!("SIGTERM received"),
    }
}

// ───── commands ─────────────────────────────────────────────────────────────

fn monitor(
    args: &MonitorArgs,
    cfg: &Config,
    catalog: &Catalog,
    policy: Policy,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<()> {
    let rt = Runtime::new().context("Tokio runtime creation failed")?;

    if let Some(addr) = cfg.metrics.listen {
        let _guard = rt.enter();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("metrics exporter")?;
        log::info!("Metrics exported on http://{addr}/metrics");
    }

    let sources: Vec<Arc<dyn Source>> = cfg
        .monitor
        .feeds
        .iter()
        .chain(&args.feeds)
        .map(|path| Arc::new(FeedSource::new(path.clone(), cfg.monitor.poll_interval)) as Arc<dyn Source>)
        .collect();
    let analyzers = Analyzers::builtin(catalog, &AnalysisConfig::from(cfg));

    notifier.info(&format!("Monitoring {} source(s), Ctrl+C to stop", sources.len()));
    let result = rt.block_on(run_monitor(
        sources,
        analyzers,
        Arc::new(policy),
        notifier,
        &cfg.monitor,
        shutdown_signal(),
    ));
    rt.shutdown_timeout(cfg.monitor.shutdown_timeout);

    match result {
        Ok(stats) => log::info!("Monitor stopped cleanly after {} event(s)", stats.events),
        Err(e) => log::warn!("Monitor stopped: {e}"),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Commands::Version = cli.command {
        println!("alertyx version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // 1 ─ Config
    let cfg = config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // 2 ─ Logging
    setup_logging(&cli, &cfg).context("logging setup failed")?;
    log::debug!("alertyx {} starting", env!("CARGO_PKG_VERSION"));

    // 3 ─ Catalog, policy, notifier
    let catalog = Catalog::builtin(&cfg.catalog);
    let policy = cli.policy(&cfg);
    let notifier: Arc<dyn Notifier> = if cli.syslog {
        Arc::new(LogNotifier::new())
    } else {
        Arc::new(ConsoleNotifier::stdout(cli.verbose))
    };
    if policy.active {
        log::warn!("Active mode: clean{} enabled", if policy.may_mitigate() { " and mitigate" } else { "" });
    }

    // 4 ─ Dispatch
    match &cli.command {
        Commands::Monitor(args) => monitor(args, &cfg, &catalog, policy, notifier)?,
        Commands::Hunt { .. } => {
            workflows::hunt(&catalog, &policy, notifier.as_ref());
        }
        Commands::Mitigate => {
            workflows::audit(&catalog, &policy, notifier.as_ref());
        }
        Commands::Version => {}
    }
    Ok(())
}
