pub mod sampler;
pub mod source;
pub mod store;

use serde::{Deserialize, Serialize};

/// One consistent point-in-time reading of system metrics.
///
/// Overwritten wholesale on every sampler tick; consumers only ever
/// receive clones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub cpu_percent: f64,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub network: NetworkDelta,
    pub processes: ProcessCounts,
    /// ISO-8601 local timestamp of the tick that produced this snapshot.
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub percent: f64,
    pub used: u64,
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskStats {
    pub percent: f64,
    pub used: u64,
    pub total: u64,
    pub free: u64,
}

/// Bytes transferred since the previous tick, not cumulative counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkDelta {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessCounts {
    pub total: usize,
    pub running: usize,
    pub sleeping: usize,
}

/// One scalar history entry (CPU/memory/disk percent, process count).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub value: f64,
    pub timestamp: String,
}

/// One network history entry, kept as a sent/received pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPoint {
    pub sent: u64,
    pub recv: u64,
    pub timestamp: String,
}

/// Rounds to two decimal places for wire output, matching the precision
/// clients expect from percent fields.
pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// ISO-8601 local timestamp without offset, microsecond precision.
pub(crate) fn iso_timestamp(t: chrono::DateTime<chrono::Local>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
