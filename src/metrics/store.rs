use std::collections::VecDeque;

use parking_lot::RwLock;

use super::{HistoryPoint, NetworkPoint, Snapshot};

/// Fixed-capacity chronological series. Appending at capacity evicts the
/// oldest entry.
#[derive(Debug, Clone)]
pub struct HistorySeries<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistorySeries<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The most recent `limit` entries in chronological order; the whole
    /// series when `limit` is `None` or zero.
    pub fn tail(&self, limit: Option<usize>) -> Vec<T> {
        let take = match limit {
            Some(0) | None => self.buf.len(),
            Some(n) => n.min(self.buf.len()),
        };
        self.buf.iter().skip(self.buf.len() - take).cloned().collect()
    }
}

/// One entry per series, produced by a single sampler tick.
#[derive(Debug, Clone)]
pub struct TickPoints {
    pub cpu: HistoryPoint,
    pub memory: HistoryPoint,
    pub disk: HistoryPoint,
    pub network: NetworkPoint,
    pub process_count: HistoryPoint,
}

struct Inner {
    snapshot: Snapshot,
    cpu: HistorySeries<HistoryPoint>,
    memory: HistorySeries<HistoryPoint>,
    disk: HistorySeries<HistoryPoint>,
    network: HistorySeries<NetworkPoint>,
    process_count: HistorySeries<HistoryPoint>,
}

/// Thread-safe holder of the current snapshot and all history series.
///
/// A single RwLock guards the snapshot and every series together, so a
/// reader always observes the state of exactly one tick. The writer (the
/// sampler) holds the lock only for the swap, never while measuring.
pub struct MetricStore {
    inner: RwLock<Inner>,
}

impl MetricStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                snapshot: Snapshot::default(),
                cpu: HistorySeries::new(history_capacity),
                memory: HistorySeries::new(history_capacity),
                disk: HistorySeries::new(history_capacity),
                network: HistorySeries::new(history_capacity),
                process_count: HistorySeries::new(history_capacity),
            }),
        }
    }

    /// Immutable copy of the latest snapshot.
    pub fn current_snapshot(&self) -> Snapshot {
        self.inner.read().snapshot.clone()
    }

    /// Replace the snapshot and append one entry to every series, as one
    /// atomic unit. Single write entry point, used only by the sampler.
    pub fn replace_tick(&self, snapshot: Snapshot, points: TickPoints) {
        let mut inner = self.inner.write();
        inner.snapshot = snapshot;
        inner.cpu.push(points.cpu);
        inner.memory.push(points.memory);
        inner.disk.push(points.disk);
        inner.network.push(points.network);
        inner.process_count.push(points.process_count);
    }

    pub fn cpu_history(&self, limit: Option<usize>) -> Vec<HistoryPoint> {
        self.inner.read().cpu.tail(limit)
    }

    pub fn memory_history(&self, limit: Option<usize>) -> Vec<HistoryPoint> {
        self.inner.read().memory.tail(limit)
    }

    pub fn disk_history(&self, limit: Option<usize>) -> Vec<HistoryPoint> {
        self.inner.read().disk.tail(limit)
    }

    pub fn network_history(&self, limit: Option<usize>) -> Vec<NetworkPoint> {
        self.inner.read().network.tail(limit)
    }

    pub fn process_history(&self, limit: Option<usize>) -> Vec<HistoryPoint> {
        self.inner.read().process_count.tail(limit)
    }

    /// Full document with the current snapshot and the last 50 points of
    /// every series, for the TODAS_METRICAS command.
    pub fn all_metrics_document(&self) -> serde_json::Value {
        const DOC_HISTORY_LIMIT: Option<usize> = Some(50);

        let inner = self.inner.read();
        serde_json::json!({
            "current": inner.snapshot,
            "history": {
                "cpu": inner.cpu.tail(DOC_HISTORY_LIMIT),
                "memory": inner.memory.tail(DOC_HISTORY_LIMIT),
                "disk": inner.disk.tail(DOC_HISTORY_LIMIT),
                "network": inner.network.tail(DOC_HISTORY_LIMIT),
                "processes": inner.process_count.tail(DOC_HISTORY_LIMIT),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: f64, tick: usize) -> HistoryPoint {
        HistoryPoint {
            value,
            timestamp: format!("t{tick}"),
        }
    }

    fn tick_points(tick: usize) -> TickPoints {
        TickPoints {
            cpu: point(tick as f64, tick),
            memory: point(tick as f64 + 0.1, tick),
            disk: point(tick as f64 + 0.2, tick),
            network: NetworkPoint {
                sent: tick as u64,
                recv: tick as u64 * 2,
                timestamp: format!("t{tick}"),
            },
            process_count: point(tick as f64 + 0.3, tick),
        }
    }

    fn snapshot_for(tick: usize) -> Snapshot {
        Snapshot {
            cpu_percent: tick as f64,
            timestamp: format!("t{tick}"),
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_series_evicts_oldest_at_capacity() {
        let mut series = HistorySeries::new(3);
        for i in 0..5 {
            series.push(point(i as f64, i));
        }

        assert_eq!(series.len(), 3);
        let all = series.tail(None);
        let values: Vec<f64> = all.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_tail_is_chronological_suffix() {
        let mut series = HistorySeries::new(10);
        for i in 0..6 {
            series.push(point(i as f64, i));
        }

        let tail = series.tail(Some(2));
        let values: Vec<f64> = tail.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![4.0, 5.0]);

        // Zero limit means the whole series.
        assert_eq!(series.tail(Some(0)).len(), 6);
        // Oversized limit clamps.
        assert_eq!(series.tail(Some(100)).len(), 6);
    }

    #[test]
    fn test_replace_tick_updates_all_series() {
        let store = MetricStore::new(100);
        for i in 1..=7 {
            store.replace_tick(snapshot_for(i), tick_points(i));
        }

        assert_eq!(store.current_snapshot().cpu_percent, 7.0);
        assert_eq!(store.cpu_history(None).len(), 7);
        assert_eq!(store.memory_history(None).len(), 7);
        assert_eq!(store.disk_history(None).len(), 7);
        assert_eq!(store.network_history(None).len(), 7);
        assert_eq!(store.process_history(None).len(), 7);
    }

    #[test]
    fn test_capacity_bounds_every_series() {
        let store = MetricStore::new(4);
        for i in 0..10 {
            store.replace_tick(snapshot_for(i), tick_points(i));
        }

        let cpu = store.cpu_history(None);
        assert_eq!(cpu.len(), 4);
        // FIFO eviction: ticks 6..=9 survive.
        assert_eq!(cpu[0].value, 6.0);
        assert_eq!(cpu[3].value, 9.0);
        assert_eq!(store.network_history(None).len(), 4);
    }

    #[test]
    fn test_all_metrics_document_caps_history_at_50() {
        let store = MetricStore::new(100);
        for i in 0..80 {
            store.replace_tick(snapshot_for(i), tick_points(i));
        }

        let doc = store.all_metrics_document();
        assert!(doc.get("current").is_some());
        for series in ["cpu", "memory", "disk", "network", "processes"] {
            let arr = doc["history"][series].as_array().expect("array");
            assert_eq!(arr.len(), 50, "{series} capped at 50");
        }
        // Suffix of the retained series.
        assert_eq!(doc["history"]["cpu"][49]["value"], 79.0);
    }

    #[test]
    fn test_concurrent_readers_see_whole_ticks() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MetricStore::new(100));
        // Seed one tick so readers never observe the pre-start default.
        store.replace_tick(
            Snapshot {
                timestamp: "t0".to_string(),
                ..Snapshot::default()
            },
            tick_points(0),
        );
        let writer = Arc::clone(&store);

        let write_handle = thread::spawn(move || {
            for i in 1..2000 {
                // The snapshot timestamp and cpu value encode the same tick.
                let snapshot = Snapshot {
                    cpu_percent: i as f64,
                    timestamp: format!("t{i}"),
                    ..Snapshot::default()
                };
                writer.replace_tick(snapshot, tick_points(i));
            }
        });

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            readers.push(thread::spawn(move || {
                for _ in 0..500 {
                    let snap = store.current_snapshot();
                    // Fields must come from the same tick.
                    assert_eq!(snap.timestamp, format!("t{}", snap.cpu_percent as usize));
                }
            }));
        }

        write_handle.join().expect("writer panicked");
        for r in readers {
            r.join().expect("reader panicked");
        }
    }
}
