use std::path::Path;

use anyhow::{Context, Result};

use super::Controller;
use crate::cgroups::common::{self, CgroupConfig};
use crate::cgroups::stats::{CpuUsage, StatsProvider};

// overall cpu consumption
const CGROUP_CPUACCT_USAGE: &str = "cpuacct.usage";
// user mode and kernel mode consumption
const CGROUP_CPUACCT_STAT: &str = "cpuacct.stat";
// overall consumption itemized per core
const CGROUP_CPUACCT_PERCPU: &str = "cpuacct.usage_percpu";

pub struct CpuAcct {}

impl Controller for CpuAcct {
    // accounting only, nothing to configure
    fn apply(_cgroup: &CgroupConfig, _cgroup_path: &Path) -> Result<()> {
        Ok(())
    }
}

impl StatsProvider for CpuAcct {
    type Stats = CpuUsage;

    fn stats(cgroup_path: &Path) -> Result<Self::Stats> {
        let mut stats = CpuUsage::default();

        if let Some(total) = common::read_optional_value(cgroup_path.join(CGROUP_CPUACCT_USAGE))? {
            stats.usage_total = total;
        }

        Self::read_mode_split(cgroup_path, &mut stats)?;
        Self::read_per_core(cgroup_path, &mut stats)?;

        Ok(stats)
    }
}

impl CpuAcct {
    fn read_mode_split(cgroup_path: &Path, stats: &mut CpuUsage) -> Result<()> {
        let stat_path = cgroup_path.join(CGROUP_CPUACCT_STAT);
        let content = match std::fs::read_to_string(&stat_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", stat_path.display()))
            }
        };

        // the file looks like this:
        // user 746908
        // system 213896
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("user"), Some(value)) => {
                    stats.usage_user = value
                        .parse()
                        .context("failed to parse user mode cpu usage")?
                }
                (Some("system"), Some(value)) => {
                    stats.usage_kernel = value
                        .parse()
                        .context("failed to parse kernel mode cpu usage")?
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn read_per_core(cgroup_path: &Path, stats: &mut CpuUsage) -> Result<()> {
        let percpu_path = cgroup_path.join(CGROUP_CPUACCT_PERCPU);
        let content = match std::fs::read_to_string(&percpu_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", percpu_path.display()))
            }
        };

        stats.per_core_usage_total = content
            .split_whitespace()
            .map(|v| v.parse().context("failed to parse per core cpu usage"))
            .collect::<Result<Vec<u64>>>()?;

        Ok(())
    }
}
