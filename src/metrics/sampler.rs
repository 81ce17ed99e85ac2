use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{MetricSource, NetworkTotals};
use super::store::{MetricStore, TickPoints};
use super::{iso_timestamp, HistoryPoint, NetworkDelta, NetworkPoint, Snapshot};

/// Metric source shared between the sampler task and the dispatcher.
pub type SharedSource = Arc<Mutex<dyn MetricSource>>;

/// How long `stop` waits for the in-flight tick before abandoning the task.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Background task that measures system metrics once per interval and
/// publishes each tick to the [`MetricStore`] as one atomic unit.
pub struct Sampler {
    store: Arc<MetricStore>,
    source: SharedSource,
    running: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sampler {
    pub fn new(store: Arc<MetricStore>, source: SharedSource) -> Self {
        Self {
            store,
            source,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the background sampling task. Calling this while already
    /// running is a no-op; a stopped sampler can be started again.
    pub fn start(&self, interval: Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // Already running.
        }

        let store = Arc::clone(&self.store);
        let source = Arc::clone(&self.source);
        // Fresh token per start so a restart is not born cancelled.
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        info!(?interval, "metric sampler started");

        let handle = tokio::spawn(async move {
            // Baseline for the first tick's network delta. A failed read
            // falls back to zero counters rather than aborting the loop.
            let baseline_source = Arc::clone(&source);
            let mut last_network =
                match tokio::task::spawn_blocking(move || baseline_source.lock().network_totals())
                    .await
                {
                    Ok(Ok(totals)) => totals,
                    Ok(Err(e)) => {
                        warn!(error = %e, "network baseline read failed, starting from zero");
                        NetworkTotals::default()
                    }
                    Err(e) => {
                        warn!(error = %e, "network baseline task failed, starting from zero");
                        NetworkTotals::default()
                    }
                };

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("metric sampler stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        // Source refreshes can take a while, so the
                        // measurement runs on the blocking pool.
                        let store = Arc::clone(&store);
                        let source = Arc::clone(&source);
                        let prev = last_network;
                        match tokio::task::spawn_blocking(move || {
                            let mut last = prev;
                            let result = run_tick(&store, &source, &mut last);
                            (result, last)
                        })
                        .await
                        {
                            Ok((Ok(()), last)) => last_network = last,
                            Ok((Err(e), last)) => {
                                // Retained state stays untouched for this tick.
                                last_network = last;
                                warn!(error = %e, "metric sampling tick failed");
                            }
                            Err(e) => warn!(error = %e, "metric sampling task failed"),
                        }
                    }
                }
            }
        });

        *self.task.lock() = Some(handle);
    }

    /// Request cooperative shutdown and wait for the task with a bounded
    /// timeout. A task that does not stop in time is abandoned (non-fatal).
    pub async fn stop(&self) {
        self.cancel.lock().cancel();

        let task = self.task.lock().take();
        if let Some(handle) = task {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "sampler task join failed"),
                Err(_) => warn!("sampler did not stop within bound, abandoning task"),
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }
}

/// One measure-and-publish cycle. The source lock is held while measuring;
/// the store's write lock only for the final swap.
fn run_tick(
    store: &MetricStore,
    source: &SharedSource,
    last_network: &mut NetworkTotals,
) -> Result<()> {
    let sample = source.lock().sample()?;

    let delta = NetworkDelta {
        bytes_sent: sample.network.bytes_sent.saturating_sub(last_network.bytes_sent),
        bytes_recv: sample.network.bytes_recv.saturating_sub(last_network.bytes_recv),
    };
    *last_network = sample.network;

    let timestamp = iso_timestamp(chrono::Local::now());

    let snapshot = Snapshot {
        cpu_percent: sample.cpu_percent,
        memory: sample.memory.clone(),
        disk: sample.disk.clone(),
        network: delta.clone(),
        processes: sample.processes.clone(),
        timestamp: timestamp.clone(),
    };

    let points = TickPoints {
        cpu: HistoryPoint {
            value: sample.cpu_percent,
            timestamp: timestamp.clone(),
        },
        memory: HistoryPoint {
            value: sample.memory.percent,
            timestamp: timestamp.clone(),
        },
        disk: HistoryPoint {
            value: sample.disk.percent,
            timestamp: timestamp.clone(),
        },
        network: NetworkPoint {
            sent: delta.bytes_sent,
            recv: delta.bytes_recv,
            timestamp: timestamp.clone(),
        },
        process_count: HistoryPoint {
            value: sample.processes.total as f64,
            timestamp,
        },
    };

    store.replace_tick(snapshot, points);

    Ok(())
}
