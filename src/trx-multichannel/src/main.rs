// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod detector;
mod synthetic;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use trx_app::{init_logging, validate_log_level, ConfigFile, DynResult};
use trx_channelizer::freq::format_hz;
use trx_channelizer::{
    CarrierScanner, ChannelBank, ScanEvent, ScanMode, SerialExecutor, WidebandRegistry,
};

use config::MultichannelConfig;
use detector::DetectorFactory;
use synthetic::SyntheticHost;

const PKG_DESCRIPTION: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " - multichannel TETRA channelizer daemon"
);
/// How long a scan waits for the first accepted wideband block.
const RATE_WAIT: Duration = Duration::from_secs(2);
const RATE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Log level override (trace, debug, info, warn, error)
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
    /// Scan for control channels before settling
    #[arg(short = 's', long = "scan", value_enum)]
    scan: Option<ScanKind>,
    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short = 'd', long = "duration", value_name = "SECS")]
    duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScanKind {
    Configured,
    Raster,
}

impl From<ScanKind> for ScanMode {
    fn from(kind: ScanKind) -> Self {
        match kind {
            ScanKind::Configured => ScanMode::Configured,
            ScanKind::Raster => ScanMode::Raster,
        }
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

/// Resolve once Ctrl+C arrives or the optional run time has elapsed.
async fn shutdown_trigger(duration: Option<Duration>) {
    let elapsed = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        res = signal::ctrl_c() => match res {
            Ok(()) => info!("Ctrl+C received, shutting down"),
            Err(e) => warn!("Ctrl+C handler failed ({}), shutting down", e),
        },
        _ = elapsed => info!("Run time elapsed, shutting down"),
    }
}

async fn wait_for_sample_rate(registry: &WidebandRegistry) -> DynResult<f64> {
    let deadline = Instant::now() + RATE_WAIT;
    loop {
        if let Some(rate) = registry.current().and_then(|d| d.last_sample_rate()) {
            return Ok(rate);
        }
        if Instant::now() >= deadline {
            return Err("no wideband samples arrived; cannot scan".into());
        }
        tokio::time::sleep(RATE_POLL).await;
    }
}

fn log_scan_event(event: &ScanEvent) {
    match event {
        ScanEvent::Started { total, mode } => {
            info!("Scan started: {} candidate(s) ({:?})", total, mode)
        }
        ScanEvent::ProbeStarted { freq_hz } => debug!("probing {}", format_hz(*freq_hz)),
        ScanEvent::Observed {
            freq_hz,
            main_carrier_hz,
        } => debug!(
            "{}: control channel observed (main carrier {:?})",
            format_hz(*freq_hz),
            main_carrier_hz
        ),
        ScanEvent::Found {
            freq_hz,
            carrier_hz,
        } => info!(
            "Control channel at {} (carrier {})",
            format_hz(*freq_hz),
            format_hz(*carrier_hz)
        ),
        ScanEvent::ProbeFinished { freq_hz, observed } => {
            debug!("{}: probe finished (observed: {})", format_hz(*freq_hz), observed)
        }
        ScanEvent::ProbeSkipped { freq_hz, reason } => {
            warn!("{}: probe skipped: {}", format_hz(*freq_hz), reason)
        }
        ScanEvent::Finished { found, cancelled } => {
            info!("Scan finished: {} found (cancelled: {})", found, cancelled)
        }
    }
}

async fn run_scan(
    cfg: &MultichannelConfig,
    mode: ScanMode,
    registry: &Arc<WidebandRegistry>,
    detectors: Arc<DetectorFactory>,
    bank: &ChannelBank,
    shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let rate = wait_for_sample_rate(registry).await?;
    debug!("wideband stream up at {} S/s", rate);

    let executor = Arc::new(SerialExecutor::new(&cfg.scan.executor_name)?);
    let scanner = CarrierScanner::new(
        registry,
        detectors,
        executor.clone(),
        cfg.scan.probe.clone(),
    )?;
    let span = scanner.span()?;
    info!(
        "Scanning {} .. {} ({:?})",
        format_hz(span.start_hz),
        format_hz(span.end_hz),
        mode
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            log_scan_event(&event);
        }
    });

    let outcome = scanner
        .scan(mode, &bank.frequencies(), shutdown_rx, Some(events_tx))
        .await;
    drop(scanner);
    let _ = reporter.await;
    executor.shutdown();

    let outcome = outcome?;
    if outcome.cancelled {
        info!("Scan cancelled; channel list left unchanged");
        return Ok(());
    }
    let report = bank.merge_discovered(&outcome.found)?;
    info!(
        "Scan done: {} control channel(s) among {} candidate(s); {} added, {} marked",
        outcome.found.len(),
        outcome.candidates,
        report.added.len(),
        report.marked
    );
    Ok(())
}

fn log_status(registry: &WidebandRegistry, bank: &ChannelBank, detectors: &DetectorFactory) {
    if let Some(dist) = registry.current() {
        let stats = dist.stats();
        info!(
            "wideband: {} delivered, {} dropped (rate), {} dropped (backlog), {} sink failure(s), {:?}",
            stats.delivered,
            stats.dropped_invalid_rate,
            stats.dropped_backlog,
            stats.sink_failures,
            dist.arbiter_state()
        );
    }
    for pipeline in bank.pipelines() {
        let config = pipeline.config();
        let tuning = pipeline.tuning();
        let meter = detectors.stats(config.id).unwrap_or_default();
        info!(
            "{} @ {}: offset {:.1} Hz, afc {:+.1} Hz, decim {}, gain {:.2}, rms {:.3}, coherence {:.2}, residual {:+.1} Hz{}",
            config.name,
            format_hz(config.frequency_hz),
            tuning.offset_hz,
            tuning.afc_hz,
            tuning.decimation,
            pipeline.agc_gain(),
            meter.rms,
            meter.coherence,
            meter.residual_hz,
            if pipeline.last_observation().is_some() {
                ", control channel"
            } else {
                ""
            }
        );
        debug!(
            "{}: {} block(s) metered, {} locked in a row",
            config.name, meter.blocks, meter.locked_blocks
        );
    }
    debug!("{} live decoder(s)", detectors.live_detectors());
}

async fn report_status(
    registry: Arc<WidebandRegistry>,
    bank: Arc<ChannelBank>,
    detectors: Arc<DetectorFactory>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    if period.is_zero() {
        wait_for_shutdown(shutdown_rx).await;
        return;
    }
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => log_status(&registry, &bank, &detectors),
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", MultichannelConfig::example_combined_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = MultichannelConfig::load(cli.config.as_deref())
        .map_err(|e| format!("Invalid multichannel configuration: {}", e))?;
    if let Some(level) = cli.log_level {
        validate_log_level(Some(level.as_str()))?;
        cfg.general.log_level = Some(level);
    }

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }
    info!(
        "Starting trx-multichannel ({} channel(s), dispatch: {:?}, arbitration: {})",
        cfg.channels.len(),
        cfg.distributor.dispatch,
        if cfg.distributor.arbitrate {
            "always"
        } else {
            "on second variant"
        }
    );

    let host = SyntheticHost::new(cfg.host.clone());
    let detectors = Arc::new(DetectorFactory::new(&host.config().tones));
    let registry = WidebandRegistry::new(host.clone(), cfg.distributor.clone());
    let bank = Arc::new(ChannelBank::new(&registry, detectors.clone())?);
    bank.apply(cfg.channels.clone())?;
    if !host.is_attached() {
        return Err("wideband stream was not attached to the synthetic host".into());
    }

    let generator = host.start()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_time = cli.duration_secs.map(Duration::from_secs);
    tokio::spawn(async move {
        shutdown_trigger(run_time).await;
        let _ = shutdown_tx.send(true);
    });

    let scan_mode = cli
        .scan
        .map(ScanMode::from)
        .or_else(|| cfg.scan.on_start.then_some(cfg.scan.mode));
    if let Some(mode) = scan_mode {
        if let Err(e) = run_scan(
            &cfg,
            mode,
            &registry,
            detectors.clone(),
            &bank,
            shutdown_rx.clone(),
        )
        .await
        {
            warn!("Scan failed: {}", e);
        }
    }

    let status = tokio::spawn(report_status(
        registry.clone(),
        bank.clone(),
        detectors.clone(),
        Duration::from_secs(cfg.general.status_interval_secs),
        shutdown_rx.clone(),
    ));

    wait_for_shutdown(shutdown_rx).await;
    let _ = status.await;

    host.stop();
    match tokio::task::spawn_blocking(move || generator.join()).await {
        Ok(Ok(())) => {}
        _ => warn!("synthetic source thread ended abnormally"),
    }
    bank.shutdown();
    info!("Stopped ({} block(s) generated)", host.blocks_published());
    Ok(())
}
