//! Reconstruction of per-client performance summaries from pre-aggregated series.

use std::collections::BTreeMap;

use rpcbench_core::config::{FamilySettings, LabelSettings, MetricsSettings};
use rpcbench_core::metrics::{ClientMetrics, ConnectionMetrics, MetricSummary};
use rpcbench_core::stats;
use rpcbench_core::types::{MetricsError, MetricsResult};

use crate::sample::{Phase, Sample, SampleKind, SampleSchema};
use crate::source::{PrometheusSource, RawSample, TimeSeriesSource};

const SECS_TO_MILLIS: f64 = 1000.0;

/// # Metrics Aggregator
///
/// Turns one point-in-time backend query into a `client -> ClientMetrics` map. Holds no
/// state between collections, so it can be shared across runs.
pub struct MetricsAggregator<S> {
    source: Option<S>,
    labels: LabelSettings,
    families: FamilySettings,
}

impl MetricsAggregator<PrometheusSource> {
    pub fn from_settings(settings: &MetricsSettings) -> Self {
        let source = settings.source.as_ref().and_then(PrometheusSource::new);
        Self::new(source, settings)
    }
}

impl<S: TimeSeriesSource> MetricsAggregator<S> {
    pub fn new(source: Option<S>, settings: &MetricsSettings) -> Self {
        Self {
            source,
            labels: settings.labels.clone(),
            families: settings.families.clone(),
        }
    }

    /// # Collect
    ///
    /// Issues a single query for `run_id` evaluated at `timestamp` (unix seconds). Every
    /// client in `clients` is present in the result, zero-filled when the backend has
    /// nothing for it. No retries: transport failures surface as [`MetricsError::Query`].
    pub async fn collect(
        &self,
        run_id: &str,
        clients: &[String],
        timestamp: u64,
    ) -> MetricsResult<BTreeMap<String, ClientMetrics>> {
        let source = self.source.as_ref().ok_or_else(|| {
            MetricsError::Configuration("no compatible time-series source".into())
        })?;
        let schema = SampleSchema {
            run_id,
            labels: &self.labels,
            families: &self.families,
        };
        let raw = source.query(&schema.selector(), timestamp).await?;
        tracing::debug!(run_id, series = raw.len(), "metrics query returned");
        Ok(aggregate(&schema, clients, &raw))
    }
}

#[derive(Default)]
struct ClientAccumulator {
    metrics: ClientMetrics,
    /// phase -> method -> mean duration (ms)
    phases: BTreeMap<(Phase, String), f64>,
}

impl ClientAccumulator {
    fn apply(&mut self, sample: Sample) {
        let Sample {
            method,
            kind,
            value,
            ..
        } = sample;
        match kind {
            SampleKind::Duration(indicator) => {
                self.method(method)
                    .record_indicator(indicator, value * SECS_TO_MILLIS);
            }
            SampleKind::Requests { error_code, status } => {
                let requests = value.round() as u64;
                self.method(method)
                    .record_requests(requests, error_code.is_some());
                if let Some(code) = error_code {
                    *self.metrics.error_types.entry(code).or_default() += requests;
                }
                if let Some(status) = status {
                    *self.metrics.status_codes.entry(status).or_default() += requests;
                }
            }
            SampleKind::Connection(phase) => {
                self.phases.insert((phase, method), value * SECS_TO_MILLIS);
            }
        }
    }

    fn method(&mut self, method: String) -> &mut MetricSummary {
        self.metrics
            .methods
            .entry(method)
            .or_insert_with(MetricSummary::seeded)
    }

    /// Derives every client-wide figure from the per-method buckets, independent of
    /// the order in which samples arrived.
    fn finalize(mut self) -> ClientMetrics {
        let metrics = &mut self.metrics;
        metrics.latency = rollup(&metrics.methods);
        metrics.methods.values_mut().for_each(MetricSummary::finalize);

        metrics.total_requests = metrics.methods.values().map(|m| m.count).sum();
        metrics.total_errors = metrics.methods.values().map(|m| m.error_count).sum();
        metrics.error_rate = if metrics.total_requests > 0 {
            metrics.total_errors as f64 / metrics.total_requests as f64 * 100.0
        } else {
            0.0
        };
        metrics.connection = connection(&self.phases);
        self.metrics
    }
}

/// Client-wide latency summary. `avg` is weighted by request count, `min`/`max` are
/// exact, percentiles are the unweighted mean of the per-method percentiles: the pooled
/// observations are not available, so this is an approximation.
fn rollup(methods: &BTreeMap<String, MetricSummary>) -> MetricSummary {
    let mut latency = MetricSummary::seeded();
    latency.count = methods.values().map(|m| m.count).sum();
    latency.error_count = methods.values().map(|m| m.error_count).sum();
    latency.success_count = methods.values().map(|m| m.success_count).sum();
    latency.recompute_rates();

    let timed: Vec<&MetricSummary> = methods.values().filter(|m| m.has_latency()).collect();
    if timed.is_empty() {
        latency.finalize();
        return latency;
    }

    // methods without an avg indicator carry no weight
    let averaged: Vec<&MetricSummary> = timed.iter().copied().filter(|m| m.avg > 0.0).collect();
    let weight: u64 = averaged.iter().map(|m| m.count).sum();
    latency.avg = if weight > 0 {
        averaged.iter().map(|m| m.avg * m.count as f64).sum::<f64>() / weight as f64
    } else {
        let avgs: Vec<f64> = averaged.iter().map(|m| m.avg).collect();
        stats::mean(&avgs)
    };
    latency.min = timed
        .iter()
        .map(|m| m.min)
        .fold(latency.min, f64::min);
    latency.max = timed.iter().map(|m| m.max).fold(0.0, f64::max);

    let mean_of = |field: fn(&MetricSummary) -> f64| -> f64 {
        let values: Vec<f64> = timed.iter().map(|m| field(m)).filter(|v| *v > 0.0).collect();
        stats::mean(&values)
    };
    latency.p50 = mean_of(|m| m.p50);
    latency.p90 = mean_of(|m| m.p90);
    latency.p95 = mean_of(|m| m.p95);
    latency.p99 = mean_of(|m| m.p99);

    latency.refresh_dispersion();
    latency.finalize();
    latency
}

fn connection(phases: &BTreeMap<(Phase, String), f64>) -> ConnectionMetrics {
    let mean_of = |phase: Phase| -> f64 {
        let values: Vec<f64> = phases
            .iter()
            .filter(|((p, _), _)| *p == phase)
            .map(|(_, v)| *v)
            .collect();
        stats::mean(&values)
    };
    ConnectionMetrics {
        connecting_ms: mean_of(Phase::Connecting),
        tls_handshaking_ms: mean_of(Phase::TlsHandshaking),
        waiting_ms: mean_of(Phase::Waiting),
    }
}

/// Folds raw series into client summaries. Series that fail schema validation are
/// dropped, the backend is allowed to be noisy.
pub fn aggregate(
    schema: &SampleSchema<'_>,
    clients: &[String],
    raw: &[RawSample],
) -> BTreeMap<String, ClientMetrics> {
    let mut accumulators: BTreeMap<String, ClientAccumulator> = clients
        .iter()
        .map(|name| {
            let acc = ClientAccumulator {
                metrics: ClientMetrics::new(name.as_str()),
                ..Default::default()
            };
            (name.clone(), acc)
        })
        .collect();

    let mut discarded = 0usize;
    for sample in raw {
        let Some(sample) = schema.decode(sample) else {
            discarded += 1;
            continue;
        };
        accumulators
            .entry(sample.client.clone())
            .or_insert_with(|| ClientAccumulator {
                metrics: ClientMetrics::new(sample.client.as_str()),
                ..Default::default()
            })
            .apply(sample);
    }
    if discarded > 0 {
        tracing::debug!(discarded, "dropped series not matching the run schema");
    }

    accumulators
        .into_iter()
        .map(|(name, acc)| (name, acc.finalize()))
        .collect()
}
