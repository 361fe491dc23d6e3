use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rpcbench_core::consts::MIN_SAMPLE_INTERVAL;
use rpcbench_core::metrics::{SystemMetricsAverage, SystemMetricsSample};
use tokio::sync::oneshot;
use tokio::time::{self, MissedTickBehavior};

use crate::probe::{DiskTotals, MemoryReading, NetworkTotals, ResourceProbe};

/// # System Resource Sampler
///
/// Polls a [`ResourceProbe`] at a fixed interval while collecting. The sample buffer,
/// collecting flag and counter baselines share a single lock, readers copy out.
pub struct SystemResourceSampler<P> {
    state: Arc<RwLock<SamplerState>>,
    probe: Arc<Mutex<P>>,
    interval: Duration,
}

#[derive(Default)]
struct SamplerState {
    collecting: bool,
    /// Bumped on every start, a poller only records for its own generation.
    generation: u64,
    stop: Option<oneshot::Sender<()>>,
    samples: Vec<SystemMetricsSample>,
    baseline: Baseline,
    /// Last known gauge values, reused when a read fails.
    last: SystemMetricsSample,
    sequence: u64,
}

#[derive(Default, Clone, Copy)]
struct Baseline {
    network: Option<NetworkTotals>,
    disk: Option<DiskTotals>,
}

/// Everything one tick read from the probe.
#[derive(Default, Clone, Copy)]
struct Readings {
    cpu_percent: Option<f64>,
    memory: Option<MemoryReading>,
    network: Option<NetworkTotals>,
    disk: Option<DiskTotals>,
    open_connections: Option<u64>,
    concurrent_tasks: Option<u64>,
}

impl Readings {
    fn missing(&self) -> Vec<&'static str> {
        [
            ("cpu", self.cpu_percent.is_none()),
            ("memory", self.memory.is_none()),
            ("network", self.network.is_none()),
            ("disk", self.disk.is_none()),
            ("connections", self.open_connections.is_none()),
            ("tasks", self.concurrent_tasks.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect()
    }

    fn take<P: ResourceProbe>(probe: &mut P) -> Self {
        probe.refresh();
        Self {
            cpu_percent: probe.cpu_percent(),
            memory: probe.memory(),
            network: probe.network_totals(),
            disk: probe.disk_totals(),
            open_connections: probe.open_connections(),
            concurrent_tasks: probe.concurrent_tasks(),
        }
    }
}

impl<P: ResourceProbe> SystemResourceSampler<P> {
    /// Intervals shorter than [`MIN_SAMPLE_INTERVAL`] are raised to it.
    pub fn new(probe: P, interval: Duration) -> Self {
        if interval < MIN_SAMPLE_INTERVAL {
            tracing::warn!(
                ?interval,
                min = ?MIN_SAMPLE_INTERVAL,
                "sample interval too short, clamping"
            );
        }
        Self {
            state: Default::default(),
            probe: Arc::new(Mutex::new(probe)),
            interval: interval.max(MIN_SAMPLE_INTERVAL),
        }
    }

    /// Starts the background poller, a no-op while already collecting.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.is_collecting() {
            return;
        }
        // read outside the state lock, the refresh may block for a while
        let baseline = {
            let mut probe = self.probe.lock().unwrap_or_else(PoisonError::into_inner);
            probe.refresh();
            Baseline {
                network: probe.network_totals(),
                disk: probe.disk_totals(),
            }
        };
        let mut state = write(&self.state);
        if state.collecting {
            return;
        }
        let (tx, rx) = oneshot::channel();
        state.collecting = true;
        state.generation += 1;
        state.stop = Some(tx);
        state.samples.clear();
        state.sequence = 0;
        state.baseline = baseline;

        let poller = Poller {
            state: self.state.clone(),
            probe: self.probe.clone(),
            interval: self.interval,
            generation: state.generation,
        };
        tracing::debug!(interval = ?self.interval, "resource sampling started");
        tokio::spawn(poller.run(rx));
    }

    /// Signals the poller to exit, a no-op while idle. Collected samples are kept.
    pub fn stop(&self) {
        let mut state = write(&self.state);
        if !state.collecting {
            return;
        }
        state.collecting = false;
        if let Some(tx) = state.stop.take() {
            let _ = tx.send(());
        }
        tracing::debug!(samples = state.samples.len(), "resource sampling stopped");
    }

    pub fn is_collecting(&self) -> bool {
        read(&self.state).collecting
    }

    /// Copy of every sample taken so far, in capture order.
    pub fn get_metrics(&self) -> Vec<SystemMetricsSample> {
        read(&self.state).samples.clone()
    }

    pub fn get_average_metrics(&self) -> SystemMetricsAverage {
        SystemMetricsAverage::new(&read(&self.state).samples)
    }
}

impl<P> Drop for SystemResourceSampler<P> {
    fn drop(&mut self) {
        let mut state = write(&self.state);
        state.collecting = false;
        if let Some(tx) = state.stop.take() {
            let _ = tx.send(());
        }
    }
}

struct Poller<P> {
    state: Arc<RwLock<SamplerState>>,
    probe: Arc<Mutex<P>>,
    interval: Duration,
    generation: u64,
}

impl<P: ResourceProbe> Poller<P> {
    async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately, the baseline was just taken
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = ticker.tick() => {}
            }
            let probe = self.probe.clone();
            let readings = tokio::task::spawn_blocking(move || {
                let mut probe = probe.lock().unwrap_or_else(PoisonError::into_inner);
                Readings::take(&mut *probe)
            })
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(%err, "resource probe failed, keeping previous values");
                Readings::default()
            });

            let mut state = write(&self.state);
            if !state.collecting || state.generation != self.generation {
                break;
            }
            state.record(readings, now_ms());
        }
    }
}

impl SamplerState {
    /// Appends one sample. Gauges that could not be read keep their last known value,
    /// counters that could not be read contribute a zero delta and keep their baseline.
    fn record(&mut self, readings: Readings, timestamp_ms: u64) {
        let last = self.last;
        let memory = readings.memory;
        let missing = readings.missing();
        if !missing.is_empty() {
            tracing::debug!(?missing, "resource counters unavailable this tick");
        }

        let (network_sent_bytes, network_received_bytes) =
            match (readings.network, self.baseline.network) {
                (Some(now), Some(base)) => (
                    now.sent.saturating_sub(base.sent),
                    now.received.saturating_sub(base.received),
                ),
                _ => (0, 0),
            };
        let (disk_read_bytes, disk_written_bytes) = match (readings.disk, self.baseline.disk) {
            (Some(now), Some(base)) => (
                now.read.saturating_sub(base.read),
                now.written.saturating_sub(base.written),
            ),
            _ => (0, 0),
        };

        let sample = SystemMetricsSample {
            sequence: self.sequence,
            timestamp_ms,
            cpu_percent: readings.cpu_percent.unwrap_or(last.cpu_percent),
            memory_mb: memory.map_or(last.memory_mb, |m| m.used_mb),
            memory_percent: memory.map_or(last.memory_percent, |m| m.percent),
            network_sent_bytes,
            network_received_bytes,
            disk_read_bytes,
            disk_written_bytes,
            open_connections: readings.open_connections.unwrap_or(last.open_connections),
            concurrent_tasks: readings.concurrent_tasks.unwrap_or(last.concurrent_tasks),
        };
        tracing::trace!(
            sequence = sample.sequence,
            cpu = sample.cpu_percent,
            memory = sample.memory_mb,
            "resource sample"
        );

        if readings.network.is_some() {
            self.baseline.network = readings.network;
        }
        if readings.disk.is_some() {
            self.baseline.disk = readings.disk;
        }
        self.sequence += 1;
        self.last = sample;
        self.samples.push(sample);
    }
}

fn read(state: &RwLock<SamplerState>) -> RwLockReadGuard<'_, SamplerState> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(state: &RwLock<SamplerState>) -> RwLockWriteGuard<'_, SamplerState> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use pretty_assertions::assert_eq;

    /// Probe with steadily growing counters that counts its refreshes.
    struct FakeProbe {
        refreshes: Arc<AtomicU64>,
    }

    impl ResourceProbe for FakeProbe {
        fn refresh(&mut self) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }
        fn cpu_percent(&mut self) -> Option<f64> {
            Some(12.5)
        }
        fn memory(&mut self) -> Option<MemoryReading> {
            Some(MemoryReading {
                used_mb: 256.0,
                percent: 3.0,
            })
        }
        fn network_totals(&mut self) -> Option<NetworkTotals> {
            let n = self.refreshes.load(Ordering::SeqCst);
            Some(NetworkTotals {
                sent: n * 100,
                received: n * 1000,
            })
        }
        fn disk_totals(&mut self) -> Option<DiskTotals> {
            None
        }
        fn open_connections(&mut self) -> Option<u64> {
            Some(4)
        }
        fn concurrent_tasks(&mut self) -> Option<u64> {
            Some(2)
        }
    }

    fn sampler(interval_ms: u64) -> (SystemResourceSampler<FakeProbe>, Arc<AtomicU64>) {
        let refreshes = Arc::new(AtomicU64::new(0));
        let probe = FakeProbe {
            refreshes: refreshes.clone(),
        };
        let sampler = SystemResourceSampler::new(probe, Duration::from_millis(interval_ms));
        (sampler, refreshes)
    }

    fn readings(cpu: f64, sent: u64, received: u64) -> Readings {
        Readings {
            cpu_percent: Some(cpu),
            memory: Some(MemoryReading {
                used_mb: 100.0,
                percent: 10.0,
            }),
            network: Some(NetworkTotals { sent, received }),
            disk: Some(DiskTotals {
                read: sent * 2,
                written: received * 2,
            }),
            open_connections: Some(3),
            concurrent_tasks: Some(7),
        }
    }

    #[test]
    fn deltas_are_taken_against_the_previous_sample() {
        let mut state = SamplerState {
            baseline: Baseline {
                network: Some(NetworkTotals {
                    sent: 1000,
                    received: 5000,
                }),
                disk: Some(DiskTotals {
                    read: 2000,
                    written: 10_000,
                }),
            },
            ..Default::default()
        };
        state.record(readings(10.0, 1500, 5100), 1);
        state.record(readings(20.0, 1600, 5100), 2);

        let sent: Vec<_> = state.samples.iter().map(|s| s.network_sent_bytes).collect();
        let received: Vec<_> = state.samples.iter().map(|s| s.network_received_bytes).collect();
        let read: Vec<_> = state.samples.iter().map(|s| s.disk_read_bytes).collect();
        assert_eq!(sent, vec![500, 100]);
        assert_eq!(received, vec![100, 0]);
        assert_eq!(read, vec![1000, 200]);
        assert_eq!(state.samples[1].sequence, 1);
        assert_eq!(state.samples[1].cpu_percent, 20.0);
    }

    #[test]
    fn counter_resets_clamp_to_zero() {
        let mut state = SamplerState::default();
        state.baseline.network = Some(NetworkTotals {
            sent: 10_000,
            received: 10_000,
        });
        state.record(readings(1.0, 50, 20_000), 1);
        assert_eq!(state.samples[0].network_sent_bytes, 0);
        assert_eq!(state.samples[0].network_received_bytes, 10_000);

        // the reset value becomes the new baseline
        state.record(readings(1.0, 80, 20_000), 2);
        assert_eq!(state.samples[1].network_sent_bytes, 30);
    }

    #[test]
    fn failed_reads_keep_last_known_values() {
        let mut state = SamplerState::default();
        state.baseline.network = Some(NetworkTotals::default());
        state.record(readings(42.0, 100, 100), 1);
        state.record(Readings::default(), 2);

        let failed = state.samples[1];
        assert_eq!(failed.cpu_percent, 42.0);
        assert_eq!(failed.memory_mb, 100.0);
        assert_eq!(failed.memory_percent, 10.0);
        assert_eq!(failed.open_connections, 3);
        assert_eq!(failed.concurrent_tasks, 7);
        assert_eq!(failed.network_sent_bytes, 0);

        // the baseline survived the failed tick
        state.record(readings(1.0, 150, 100), 3);
        assert_eq!(state.samples[2].network_sent_bytes, 50);
    }

    #[test]
    fn first_failed_reads_are_zero() {
        let mut state = SamplerState::default();
        state.record(Readings::default(), 1);
        let sample = state.samples[0];
        assert_eq!(sample.cpu_percent, 0.0);
        assert_eq!(sample.memory_mb, 0.0);
        assert_eq!(sample.open_connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn collects_until_stopped() {
        let (sampler, _) = sampler(10);
        assert!(!sampler.is_collecting());
        sampler.start();
        assert!(sampler.is_collecting());
        time::sleep(Duration::from_millis(80)).await;
        sampler.stop();
        assert!(!sampler.is_collecting());

        let samples = sampler.get_metrics();
        assert!(!samples.is_empty());
        let sequences: Vec<_> = samples.iter().map(|s| s.sequence).collect();
        let expected: Vec<_> = (0..samples.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert!(samples.iter().all(|s| s.cpu_percent == 12.5));

        // nothing is recorded after stop
        time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sampler.get_metrics().len(), samples.len());
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_keeps_one_poller_and_the_buffer() {
        let (sampler, refreshes) = sampler(50);
        sampler.start();
        time::sleep(Duration::from_millis(70)).await;
        let before = sampler.get_metrics().len();
        assert_eq!(before, 1);

        sampler.start();
        assert_eq!(sampler.get_metrics().len(), before);
        time::sleep(Duration::from_millis(60)).await;
        sampler.stop();

        // ticks at 50ms and 100ms, plus one refresh for the baseline
        assert_eq!(sampler.get_metrics().len(), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 3);
    }

    /// Records whether the sampler state was readable during each refresh.
    struct LockCheckProbe {
        state: Arc<std::sync::OnceLock<Arc<RwLock<SamplerState>>>>,
        readable: Arc<Mutex<Vec<bool>>>,
    }

    impl ResourceProbe for LockCheckProbe {
        fn refresh(&mut self) {
            if let Some(state) = self.state.get() {
                self.readable.lock().unwrap().push(state.try_read().is_ok());
            }
        }
        fn cpu_percent(&mut self) -> Option<f64> {
            None
        }
        fn memory(&mut self) -> Option<MemoryReading> {
            None
        }
        fn network_totals(&mut self) -> Option<NetworkTotals> {
            None
        }
        fn disk_totals(&mut self) -> Option<DiskTotals> {
            None
        }
        fn open_connections(&mut self) -> Option<u64> {
            None
        }
        fn concurrent_tasks(&mut self) -> Option<u64> {
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn baseline_is_read_without_holding_the_state_lock() {
        let cell = Arc::new(std::sync::OnceLock::new());
        let readable = Arc::new(Mutex::new(Vec::new()));
        let probe = LockCheckProbe {
            state: cell.clone(),
            readable: readable.clone(),
        };
        let sampler = SystemResourceSampler::new(probe, Duration::from_secs(1));
        let _ = cell.set(sampler.state.clone());

        sampler.start();
        sampler.stop();
        assert_eq!(*readable.lock().unwrap(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_clamped() {
        let refreshes = Arc::new(AtomicU64::new(0));
        let probe = FakeProbe {
            refreshes: refreshes.clone(),
        };
        let sampler = SystemResourceSampler::new(probe, Duration::ZERO);
        assert_eq!(sampler.interval, MIN_SAMPLE_INTERVAL);

        sampler.start();
        time::sleep(MIN_SAMPLE_INTERVAL * 5 + MIN_SAMPLE_INTERVAL / 2).await;
        assert!(sampler.is_collecting());
        sampler.stop();
        assert_eq!(sampler.get_metrics().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn double_stop_is_a_no_op() {
        let (sampler, _) = sampler(10);
        sampler.stop();
        sampler.start();
        time::sleep(Duration::from_millis(30)).await;
        sampler.stop();
        let kept = sampler.get_metrics();
        sampler.stop();
        assert_eq!(sampler.get_metrics(), kept);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_clears_the_buffer() {
        let (sampler, _) = sampler(10);
        sampler.start();
        time::sleep(Duration::from_millis(40)).await;
        sampler.stop();
        assert!(!sampler.get_metrics().is_empty());

        sampler.start();
        assert!(sampler.get_metrics().is_empty());
        sampler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn averages_cover_every_sample() {
        let (sampler, _) = sampler(10);
        assert_eq!(sampler.get_average_metrics(), SystemMetricsAverage::default());

        sampler.start();
        time::sleep(Duration::from_millis(60)).await;
        sampler.stop();

        let samples = sampler.get_metrics();
        let average = sampler.get_average_metrics();
        assert_eq!(average.samples, samples.len());
        assert_eq!(average.cpu_percent, 12.5);
        assert_eq!(average.open_connections, 4.0);
        assert_eq!(average.disk_read_bytes, 0.0);
        // each tick refreshes once, so the counter grows by 100 between samples
        assert_eq!(average.network_sent_bytes, 100.0);
    }
}
