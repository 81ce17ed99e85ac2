use anyhow::Result;
use chrono::TimeZone;
use serde::Serialize;
use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind, ProcessStatus,
    RefreshKind, System,
};

use super::{iso_timestamp, round2, DiskStats, MemoryStats, ProcessCounts};

/// Raw measurement of all tracked counters for one tick.
///
/// Network counters are cumulative since boot; the sampler turns them
/// into per-tick deltas.
#[derive(Debug, Clone, Default)]
pub struct RawSample {
    pub cpu_percent: f64,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub network: NetworkTotals,
    pub processes: ProcessCounts,
}

/// Cumulative network byte counters across all interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkTotals {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// One live OS process as reported to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub status: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// General host information for the INFO_SISTEMA command.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub platform: String,
    pub boot_time: String,
    pub cpu_count_physical: usize,
    pub cpu_count_logical: usize,
    pub memory_total_gb: f64,
    pub disk_total_gb: f64,
}

/// Source of OS-level resource counters.
///
/// Implemented against the live system in production and faked in tests
/// so sampler and dispatcher behavior can be exercised deterministically.
pub trait MetricSource: Send {
    /// Measure all tracked counters for one tick.
    fn sample(&mut self) -> Result<RawSample>;

    /// Cumulative network byte counters, used for the delta baseline.
    fn network_totals(&mut self) -> Result<NetworkTotals>;

    /// Live processes, top 20 by CPU usage descending.
    fn real_processes(&mut self) -> Result<Vec<ProcessSample>>;

    /// General host information.
    fn system_info(&mut self) -> Result<SystemInfo>;
}

/// Production [`MetricSource`] backed by `sysinfo`.
///
/// Keeps reusable `System`/`Disks`/`Networks` handles so each tick is a
/// refresh-in-place, not a reallocation, and so CPU usage has a stable
/// baseline between refreshes.
pub struct SysinfoSource {
    sys: System,
    disks: Disks,
    networks: Networks,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        // Prime CPU/process baselines so the first real tick has usable deltas.
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        sys.refresh_processes_specifics(ProcessRefreshKind::new().with_cpu().with_memory());

        let disks = Disks::new_with_refreshed_list();
        let networks = Networks::new_with_refreshed_list();

        Self {
            sys,
            disks,
            networks,
        }
    }

    /// Usage of the root volume, falling back to an aggregate over all
    /// disks when no "/" mount is visible (containers, unusual layouts).
    fn disk_stats(&mut self) -> DiskStats {
        self.disks.refresh();

        let root = self
            .disks
            .list()
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"));

        let (total, available) = match root {
            Some(disk) => (disk.total_space(), disk.available_space()),
            None => self
                .disks
                .list()
                .iter()
                .fold((0u64, 0u64), |(total, avail), d| {
                    (
                        total.saturating_add(d.total_space()),
                        avail.saturating_add(d.available_space()),
                    )
                }),
        };

        let used = total.saturating_sub(available);
        let percent = if total > 0 {
            round2(used as f64 / total as f64 * 100.0)
        } else {
            0.0
        };

        DiskStats {
            percent,
            used,
            total,
            free: available,
        }
    }

    fn memory_stats(&mut self) -> MemoryStats {
        self.sys.refresh_memory();

        let total = self.sys.total_memory();
        let available = self.sys.available_memory();
        let used = self.sys.used_memory();
        let percent = if total > 0 {
            round2(total.saturating_sub(available) as f64 / total as f64 * 100.0)
        } else {
            0.0
        };

        MemoryStats {
            percent,
            used,
            total,
            available,
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SysinfoSource {
    fn sample(&mut self) -> Result<RawSample> {
        self.sys.refresh_cpu_usage();
        let cpu_percent = round2(f64::from(self.sys.global_cpu_info().cpu_usage()));

        let memory = self.memory_stats();
        let disk = self.disk_stats();
        let network = self.network_totals()?;

        self.sys
            .refresh_processes_specifics(ProcessRefreshKind::new());
        let mut counts = ProcessCounts::default();
        for process in self.sys.processes().values() {
            counts.total += 1;
            match process.status() {
                ProcessStatus::Run => counts.running += 1,
                ProcessStatus::Sleep | ProcessStatus::Idle => counts.sleeping += 1,
                _ => {}
            }
        }

        Ok(RawSample {
            cpu_percent,
            memory,
            disk,
            network,
            processes: counts,
        })
    }

    fn network_totals(&mut self) -> Result<NetworkTotals> {
        self.networks.refresh();

        let mut totals = NetworkTotals::default();
        for (_name, data) in &self.networks {
            totals.bytes_sent = totals.bytes_sent.saturating_add(data.total_transmitted());
            totals.bytes_recv = totals.bytes_recv.saturating_add(data.total_received());
        }

        Ok(totals)
    }

    fn real_processes(&mut self) -> Result<Vec<ProcessSample>> {
        self.sys
            .refresh_processes_specifics(ProcessRefreshKind::new().with_cpu().with_memory());

        let total_memory = self.sys.total_memory();
        let mut processes: Vec<ProcessSample> = self
            .sys
            .processes()
            .values()
            .map(|p| {
                let memory_percent = if total_memory > 0 {
                    round2(p.memory() as f64 / total_memory as f64 * 100.0)
                } else {
                    0.0
                };
                ProcessSample {
                    pid: p.pid().as_u32(),
                    name: if p.name().is_empty() {
                        "N/A".to_string()
                    } else {
                        p.name().to_string()
                    },
                    status: status_label(p.status()).to_string(),
                    cpu_percent: round2(f64::from(p.cpu_usage())),
                    memory_percent,
                }
            })
            .collect();

        processes.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        processes.truncate(20);

        Ok(processes)
    }

    fn system_info(&mut self) -> Result<SystemInfo> {
        self.sys.refresh_memory();
        self.disks.refresh();

        let boot = chrono::Local
            .timestamp_opt(i64::try_from(System::boot_time()).unwrap_or(0), 0)
            .single()
            .unwrap_or_else(chrono::Local::now);

        let disk_total: u64 = self
            .disks
            .list()
            .iter()
            .fold(0u64, |acc, d| acc.saturating_add(d.total_space()));

        const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

        Ok(SystemInfo {
            platform: std::env::consts::OS.to_string(),
            boot_time: iso_timestamp(boot),
            cpu_count_physical: self.sys.physical_core_count().unwrap_or(0),
            cpu_count_logical: self.sys.cpus().len(),
            memory_total_gb: round2(self.sys.total_memory() as f64 / GIB),
            disk_total_gb: round2(disk_total as f64 / GIB),
        })
    }
}

/// Stable status labels independent of sysinfo's Display strings.
fn status_label(status: ProcessStatus) -> &'static str {
    match status {
        ProcessStatus::Run => "running",
        ProcessStatus::Sleep | ProcessStatus::Idle => "sleeping",
        ProcessStatus::Stop => "stopped",
        ProcessStatus::Zombie => "zombie",
        _ => "other",
    }
}
