//! Usage snapshots read back from the resource-control hierarchy.

use std::path::Path;

use anyhow::Result;

pub trait StatsProvider {
    type Stats;

    fn stats(cgroup_path: &Path) -> Result<Self::Stats>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    pub blkio: BlkioStats,
}

/// Memory usage for a cgroup. Fields for absent optional counter files
/// stay at zero.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    /// Current usage in bytes
    pub usage: u64,
    /// High-water mark in bytes
    pub max_usage: u64,
    /// Configured limit in bytes
    pub limit: u64,
    /// Number of times usage hit the limit
    pub failcnt: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CpuStats {
    pub usage: CpuUsage,
    pub throttling: CpuThrottling,
}

/// Cpu accounting for a cgroup
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CpuUsage {
    /// Cpu time consumed by tasks in total
    pub usage_total: u64,
    /// Cpu time consumed by tasks in user mode
    pub usage_user: u64,
    /// Cpu time consumed by tasks in kernel mode
    pub usage_kernel: u64,
    /// Cpu time consumed by tasks itemized per core
    pub per_core_usage_total: Vec<u64>,
}

/// Quota throttling counters from `cpu.stat`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CpuThrottling {
    /// Number of elapsed period intervals
    pub periods: u64,
    /// Number of period intervals where the quota was exhausted
    pub throttled_periods: u64,
    /// Total time tasks spent throttled
    pub throttled_time: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlkioStats {
    /// Bytes transferred per device and operation
    pub io_service_bytes: Vec<BlkioEntry>,
    /// I/O operations per device and operation
    pub io_serviced: Vec<BlkioEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlkioEntry {
    pub major: u64,
    pub minor: u64,
    /// Operation kind as reported by the kernel (Read, Write, Sync, ...)
    pub op: String,
    pub value: u64,
}
