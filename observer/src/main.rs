use std::{
    collections::BTreeMap,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, SystemTime},
};

use aggregator::MetricsAggregator;
use json::writer::BufferedWriter;
use probe::SysinfoProbe;
use rpcbench_core::{
    config::Config,
    consts::RUNS_OUTPUT_PATH,
    metrics::{self, ClientMetrics, Distributions, RawLatencies, RunReport},
    types::{BenchResult, DynError},
};
use sampler::SystemResourceSampler;
use signal_hook::{consts::*, low_level};
use tokio::{runtime, time::Instant};
use tracing_subscriber::EnvFilter;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// How often the run timer checks for a shutdown request.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// # Main Entry Point
///
/// Samples host resources for the duration of an externally driven run, then collects the
/// per-client metrics of that run from the time-series backend and writes a run report.
fn main() -> BenchResult<()> {
    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load the configuration from command-line arguments
    let config = Config::from_args()?;

    // Set up signal handlers for graceful shutdown
    setup_signal_handlers()?;

    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    let report = rt.block_on(observe(&config))?;

    // Write the report to a JSON file
    let outdir = PathBuf::from(RUNS_OUTPUT_PATH);
    let _ = fs::create_dir(&outdir);
    let output = outdir.join(format!("rpcbench-{:0>12}.json", report.finished_at));
    let writer = File::create(&output).map(BufferedWriter::new)?;
    json::to_writer(writer, &report)?;

    if report.interrupted {
        tracing::warn!(
            "Interrupted - partial results saved to {}",
            output.display()
        );
    } else {
        tracing::info!("Results written to {}", output.display());
    }

    Ok(())
}

/// Runs the sampler while the benchmark executes and assembles the report afterwards.
async fn observe(config: &Config) -> BenchResult<RunReport> {
    let environment = environment::environment_info();
    let started_at = unix_secs()?;

    let sampler = SystemResourceSampler::new(SysinfoProbe::new(), config.sampler.interval);
    sampler.start();
    tracing::info!(
        run = %config.run.id,
        clients = config.run.clients.len(),
        duration = ?config.run.duration,
        "observing run"
    );

    let deadline = Instant::now() + config.run.duration;
    while !SHUTDOWN.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining.min(SHUTDOWN_POLL)).await;
    }
    sampler.stop();

    let finished_at = unix_secs()?;
    let interrupted = SHUTDOWN.load(Ordering::Relaxed);

    let aggregator = MetricsAggregator::from_settings(&config.metrics);
    let collected = aggregator
        .collect(&config.run.id, &config.run.clients, finished_at)
        .await;
    let (clients, collection_error) = match collected {
        Ok(clients) => (clients, None),
        Err(err) => {
            tracing::error!(%err, "metrics collection failed, clients are zero-filled");
            let clients: BTreeMap<_, _> = config
                .run
                .clients
                .iter()
                .map(|name| (name.clone(), ClientMetrics::new(name.as_str())))
                .collect();
            (clients, Some(err.to_string()))
        }
    };

    let distributions = config
        .run
        .latencies
        .as_deref()
        .map(load_distributions)
        .unwrap_or_default();

    Ok(RunReport {
        configuration: json::to_value(config)?,
        run_id: config.run.id.clone(),
        started_at,
        finished_at,
        reference_timestamp: finished_at,
        interrupted,
        environment,
        clients,
        collection_error,
        system_average: sampler.get_average_metrics(),
        system_samples: sampler.get_metrics(),
        distributions,
    })
}

/// Summarizes raw latency arrays, a missing or unreadable file only loses the distributions.
fn load_distributions(path: &Path) -> Distributions {
    let raw = fs::read(path)
        .map_err(DynError::from)
        .and_then(|bytes| json::from_slice::<RawLatencies>(&bytes).map_err(Into::into));
    match raw {
        Ok(raw) => metrics::distributions(&raw),
        Err(err) => {
            tracing::warn!(%err, path = %path.display(), "failed to load raw latencies");
            Distributions::default()
        }
    }
}

fn unix_secs() -> BenchResult<u64> {
    Ok(SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_secs())
}

/// Sets up signal handlers for graceful shutdown on SIGTERM/SIGINT
fn setup_signal_handlers() -> BenchResult<()> {
    unsafe {
        low_level::register(SIGTERM, || SHUTDOWN.store(true, Ordering::Relaxed))?;
        low_level::register(SIGINT, || SHUTDOWN.store(true, Ordering::Relaxed))?;
    }
    Ok(())
}

mod aggregator;
mod environment;
mod probe;
mod sample;
mod sampler;
mod source;
