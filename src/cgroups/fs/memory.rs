use std::path::Path;

use anyhow::Result;

use super::Controller;
use crate::cgroups::common::{self, CgroupConfig};
use crate::cgroups::stats::{MemoryStats, StatsProvider};

const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";
const CGROUP_MEMORY_SOFT_LIMIT: &str = "memory.soft_limit_in_bytes";
const CGROUP_MEMORY_SWAP_LIMIT: &str = "memory.memsw.limit_in_bytes";
const CGROUP_MEMORY_USAGE: &str = "memory.usage_in_bytes";
const CGROUP_MEMORY_MAX_USAGE: &str = "memory.max_usage_in_bytes";
const CGROUP_MEMORY_FAILCNT: &str = "memory.failcnt";

pub struct Memory {}

impl Controller for Memory {
    fn apply(cgroup: &CgroupConfig, cgroup_root: &Path) -> Result<()> {
        log::debug!("Apply Memory cgroup config");

        if cgroup.memory != 0 {
            common::write_cgroup_file(cgroup_root.join(CGROUP_MEMORY_LIMIT), cgroup.memory)?;
        }

        if cgroup.memory_reservation != 0 {
            common::write_cgroup_file(
                cgroup_root.join(CGROUP_MEMORY_SOFT_LIMIT),
                cgroup.memory_reservation,
            )?;
        }

        // -1 disables the combined memory+swap ceiling
        if cgroup.memory_swap != 0 {
            common::write_cgroup_file(
                cgroup_root.join(CGROUP_MEMORY_SWAP_LIMIT),
                cgroup.memory_swap,
            )?;
        }

        Ok(())
    }
}

impl StatsProvider for Memory {
    type Stats = MemoryStats;

    fn stats(cgroup_path: &Path) -> Result<Self::Stats> {
        let mut stats = MemoryStats::default();

        if let Some(usage) = common::read_optional_value(cgroup_path.join(CGROUP_MEMORY_USAGE))? {
            stats.usage = usage;
        }
        if let Some(max_usage) =
            common::read_optional_value(cgroup_path.join(CGROUP_MEMORY_MAX_USAGE))?
        {
            stats.max_usage = max_usage;
        }
        if let Some(limit) = common::read_optional_value(cgroup_path.join(CGROUP_MEMORY_LIMIT))? {
            stats.limit = limit;
        }
        if let Some(failcnt) = common::read_optional_value(cgroup_path.join(CGROUP_MEMORY_FAILCNT))?
        {
            stats.failcnt = failcnt;
        }

        Ok(stats)
    }
}
