use std::path::Path;

use anyhow::{Context, Result};

use super::Controller;
use crate::cgroups::common::CgroupConfig;
use crate::cgroups::stats::{BlkioEntry, BlkioStats, StatsProvider};

const CGROUP_BLKIO_SERVICE_BYTES: &str = "blkio.throttle.io_service_bytes";
const CGROUP_BLKIO_SERVICED: &str = "blkio.throttle.io_serviced";

pub struct Blkio {}

impl Controller for Blkio {
    // accounting only, nothing to configure
    fn apply(_cgroup: &CgroupConfig, _cgroup_path: &Path) -> Result<()> {
        Ok(())
    }
}

impl StatsProvider for Blkio {
    type Stats = BlkioStats;

    fn stats(cgroup_path: &Path) -> Result<Self::Stats> {
        let stats = BlkioStats {
            io_service_bytes: Self::read_entries(cgroup_path, CGROUP_BLKIO_SERVICE_BYTES)?,
            io_serviced: Self::read_entries(cgroup_path, CGROUP_BLKIO_SERVICED)?,
        };

        Ok(stats)
    }
}

impl Blkio {
    /// Parses `<major>:<minor> <op> <value>` lines; the trailing `Total`
    /// summary line has no device and is skipped.
    fn read_entries(cgroup_path: &Path, file: &str) -> Result<Vec<BlkioEntry>> {
        let path = cgroup_path.join(file);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 3 {
                continue;
            }

            let mut device = parts[0].splitn(2, ':');
            let (major, minor) = match (device.next(), device.next()) {
                (Some(major), Some(minor)) => (major, minor),
                _ => continue,
            };

            entries.push(BlkioEntry {
                major: major.parse().context("failed to parse device major")?,
                minor: minor.parse().context("failed to parse device minor")?,
                op: parts[1].to_string(),
                value: parts[2].parse().context("failed to parse io value")?,
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::test::set_fixture;

    #[test]
    fn test_parse_service_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        set_fixture(
            tmp.path(),
            CGROUP_BLKIO_SERVICE_BYTES,
            "8:0 Read 20971520\n8:0 Write 995328\nTotal 21966848\n",
        )
        .unwrap();

        let stats = Blkio::stats(tmp.path()).expect("read stats");
        assert_eq!(
            stats.io_service_bytes,
            vec![
                BlkioEntry {
                    major: 8,
                    minor: 0,
                    op: "Read".to_string(),
                    value: 20971520,
                },
                BlkioEntry {
                    major: 8,
                    minor: 0,
                    op: "Write".to_string(),
                    value: 995328,
                },
            ]
        );
        assert!(stats.io_serviced.is_empty());
    }
}
