use std::path::Path;

use anyhow::{Context, Result};

use super::Controller;
use crate::cgroups::common::{self, CgroupConfig};

const CGROUP_CPUSET_CPUS: &str = "cpuset.cpus";
const CGROUP_CPUSET_MEMS: &str = "cpuset.mems";

pub struct CpuSet {}

impl Controller for CpuSet {
    fn apply(cgroup: &CgroupConfig, cgroup_root: &Path) -> Result<()> {
        let cpus = match cgroup.cpuset_cpus.as_deref() {
            Some(cpus) if !cpus.is_empty() => cpus,
            _ => return Ok(()),
        };
        log::debug!("Apply CpuSet cgroup config");

        // a fresh cpuset node starts with empty cpus/mems files and
        // rejects task attachment until both are populated
        Self::ensure_populated(cgroup_root, CGROUP_CPUSET_CPUS)?;
        Self::ensure_populated(cgroup_root, CGROUP_CPUSET_MEMS)?;

        common::write_cgroup_file_str(cgroup_root.join(CGROUP_CPUSET_CPUS), cpus)?;
        Ok(())
    }
}

impl CpuSet {
    /// Copies the parent's value into `file` if the node's own copy is
    /// still empty.
    fn ensure_populated(cgroup_root: &Path, file: &str) -> Result<()> {
        let path = cgroup_root.join(file);
        let current = common::read_cgroup_file(&path)?;
        if !current.trim().is_empty() {
            return Ok(());
        }

        let parent = cgroup_root
            .parent()
            .with_context(|| format!("no parent for cgroup path {:?}", cgroup_root))?;
        let inherited = common::read_cgroup_file(parent.join(file))?;
        if inherited.trim().is_empty() {
            return Ok(());
        }
        common::write_cgroup_file_str(&path, inherited.trim())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::test::set_fixture;
    use std::fs;

    #[test]
    fn test_set_cpus() {
        // arrange
        let parent = tempfile::tempdir().unwrap();
        set_fixture(parent.path(), CGROUP_CPUSET_CPUS, "0-3").unwrap();
        set_fixture(parent.path(), CGROUP_CPUSET_MEMS, "0").unwrap();
        let child = parent.path().join("container");
        fs::create_dir(&child).unwrap();
        set_fixture(&child, CGROUP_CPUSET_CPUS, "").unwrap();
        set_fixture(&child, CGROUP_CPUSET_MEMS, "").unwrap();

        let cgroup = CgroupConfig {
            cpuset_cpus: Some("0-1".to_string()),
            ..Default::default()
        };

        // act
        CpuSet::apply(&cgroup, &child).expect("apply cpuset");

        // assert
        assert_eq!(fs::read_to_string(child.join(CGROUP_CPUSET_CPUS)).unwrap(), "0-1");
        // mems was empty and gets the parent's value
        assert_eq!(fs::read_to_string(child.join(CGROUP_CPUSET_MEMS)).unwrap(), "0");
    }

    #[test]
    fn test_no_cpus_configured_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let cpus = set_fixture(tmp.path(), CGROUP_CPUSET_CPUS, "").unwrap();

        CpuSet::apply(&CgroupConfig::default(), tmp.path()).expect("apply cpuset");

        assert_eq!(fs::read_to_string(cpus).unwrap(), "");
    }
}
