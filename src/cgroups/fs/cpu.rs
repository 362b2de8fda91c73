use std::path::Path;

use anyhow::{Context, Result};

use super::Controller;
use crate::cgroups::common::{self, CgroupConfig};
use crate::cgroups::stats::{CpuThrottling, StatsProvider};

const CGROUP_CPU_SHARES: &str = "cpu.shares";
const CGROUP_CPU_QUOTA: &str = "cpu.cfs_quota_us";
const CGROUP_CPU_PERIOD: &str = "cpu.cfs_period_us";
const CGROUP_CPU_STAT: &str = "cpu.stat";

pub struct Cpu {}

impl Controller for Cpu {
    fn apply(cgroup: &CgroupConfig, cgroup_root: &Path) -> Result<()> {
        log::debug!("Apply Cpu cgroup config");

        if cgroup.cpu_shares != 0 {
            common::write_cgroup_file(cgroup_root.join(CGROUP_CPU_SHARES), cgroup.cpu_shares)?;
        }

        if cgroup.cpu_period != 0 {
            common::write_cgroup_file(cgroup_root.join(CGROUP_CPU_PERIOD), cgroup.cpu_period)?;
        }

        if cgroup.cpu_quota != 0 {
            common::write_cgroup_file(cgroup_root.join(CGROUP_CPU_QUOTA), cgroup.cpu_quota)?;
        }

        Ok(())
    }
}

impl StatsProvider for Cpu {
    type Stats = CpuThrottling;

    /// Throttling counters from `cpu.stat`; the file only exists when
    /// the quota controller is active, so absence is not an error.
    fn stats(cgroup_path: &Path) -> Result<Self::Stats> {
        let mut stats = CpuThrottling::default();

        let stat_path = cgroup_path.join(CGROUP_CPU_STAT);
        let stat_content = match std::fs::read_to_string(&stat_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", stat_path.display()))
            }
        };

        for line in stat_content.lines() {
            let mut parts = line.split_whitespace();
            let (field, value) = match (parts.next(), parts.next()) {
                (Some(field), Some(value)) => (field, value),
                _ => continue,
            };
            match field {
                "nr_periods" => stats.periods = value.parse()?,
                "nr_throttled" => stats.throttled_periods = value.parse()?,
                "throttled_time" => stats.throttled_time = value.parse()?,
                _ => {}
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::test::{set_fixture, setup};
    use std::fs;

    #[test]
    fn test_set_shares() {
        // arrange
        let (tmp, shares) = setup(CGROUP_CPU_SHARES);
        let cgroup = CgroupConfig {
            cpu_shares: 2048,
            ..Default::default()
        };

        // act
        Cpu::apply(&cgroup, tmp.path()).expect("apply cpu");

        // assert
        let content = fs::read_to_string(shares).expect("read cpu shares");
        assert_eq!(content, 2048.to_string());
    }

    #[test]
    fn test_set_quota_and_period() {
        // arrange
        let (tmp, quota) = setup(CGROUP_CPU_QUOTA);
        let period = set_fixture(tmp.path(), CGROUP_CPU_PERIOD, "").expect("set period fixture");
        let cgroup = CgroupConfig {
            cpu_quota: 200000,
            cpu_period: 100000,
            ..Default::default()
        };

        // act
        Cpu::apply(&cgroup, tmp.path()).expect("apply cpu");

        // assert
        assert_eq!(fs::read_to_string(quota).unwrap(), "200000");
        assert_eq!(fs::read_to_string(period).unwrap(), "100000");
    }

    #[test]
    fn test_zero_fields_are_skipped() {
        // arrange
        let (tmp, shares) = setup(CGROUP_CPU_SHARES);

        // act
        Cpu::apply(&CgroupConfig::default(), tmp.path()).expect("apply cpu");

        // assert
        assert_eq!(fs::read_to_string(shares).unwrap(), "");
    }

    #[test]
    fn test_stat_throttling() {
        let (tmp, _) = setup(CGROUP_CPU_STAT);
        set_fixture(
            tmp.path(),
            CGROUP_CPU_STAT,
            "nr_periods 200\nnr_throttled 40\nthrottled_time 100000\n",
        )
        .expect("set cpu.stat");

        let stats = Cpu::stats(tmp.path()).expect("read stats");
        assert_eq!(
            stats,
            CpuThrottling {
                periods: 200,
                throttled_periods: 40,
                throttled_time: 100000,
            }
        );
    }

    #[test]
    fn test_stat_file_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let stats = Cpu::stats(tmp.path()).expect("stats without cpu.stat");
        assert_eq!(stats, CpuThrottling::default());
    }
}
