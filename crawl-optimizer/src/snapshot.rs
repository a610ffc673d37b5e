use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};

/// Host-level resource sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    /// 0..=1 ratios.
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub process_count: usize,
}

impl SystemSnapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            disk_usage: 0.0,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            process_count: 0,
        }
    }
}

/// Worker-pool sample, assembled by the worker manager from the scheduler
/// and queue views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub timestamp: DateTime<Utc>,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub total_workers: usize,
    pub queue_depth: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub avg_response_secs: f64,
    /// Tasks per second since the previous sample.
    pub throughput: f64,
    pub error_rate: f64,
    pub utilization: f64,
    /// Per-worker in-flight counts, for the load-variance check.
    pub worker_loads: Vec<f64>,
}

/// Samples host metrics through sysinfo. Holds the `System` handle so CPU
/// usage deltas are computed between calls.
pub struct SystemSampler {
    system: System,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }

    pub fn sample(&mut self) -> SystemSnapshot {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_processes();

        let cpu_usage = (self.system.global_cpu_info().cpu_usage() as f64 / 100.0).clamp(0.0, 1.0);

        let total_memory = self.system.total_memory();
        let memory_usage = if total_memory > 0 {
            self.system.used_memory() as f64 / total_memory as f64
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let (total_disk, available_disk) = disks.iter().fold((0u64, 0u64), |(total, avail), d| {
            (total + d.total_space(), avail + d.available_space())
        });
        let disk_usage = if total_disk > 0 {
            1.0 - available_disk as f64 / total_disk as f64
        } else {
            0.0
        };

        let networks = Networks::new_with_refreshed_list();
        let (rx, tx) = networks.iter().fold((0u64, 0u64), |(rx, tx), (_, data)| {
            (rx + data.total_received(), tx + data.total_transmitted())
        });

        SystemSnapshot {
            timestamp: Utc::now(),
            cpu_usage,
            memory_usage,
            disk_usage,
            network_rx_bytes: rx,
            network_tx_bytes: tx,
            process_count: self.system.processes().len(),
        }
    }
}
