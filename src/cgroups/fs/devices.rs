use std::path::Path;

use anyhow::Result;

use super::Controller;
use crate::cgroups::common::{self, CgroupConfig};

const CGROUP_DEVICES_ALLOW: &str = "devices.allow";
const CGROUP_DEVICES_DENY: &str = "devices.deny";

pub struct Devices {}

impl Controller for Devices {
    fn apply(cgroup: &CgroupConfig, cgroup_root: &Path) -> Result<()> {
        log::debug!("Apply Devices cgroup config");

        if cgroup.allow_all_devices {
            common::write_cgroup_file_str(cgroup_root.join(CGROUP_DEVICES_ALLOW), "a")?;
            return Ok(());
        }

        common::write_cgroup_file_str(cgroup_root.join(CGROUP_DEVICES_DENY), "a")?;
        for device in &cgroup.allowed_devices {
            common::write_cgroup_file_str(
                cgroup_root.join(CGROUP_DEVICES_ALLOW),
                &device.cgroup_string(),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::test::set_fixture;
    use crate::config::Device;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_allow_all() {
        let tmp = tempfile::tempdir().unwrap();
        let allow = set_fixture(tmp.path(), CGROUP_DEVICES_ALLOW, "").unwrap();
        let cgroup = CgroupConfig {
            allow_all_devices: true,
            ..Default::default()
        };

        Devices::apply(&cgroup, tmp.path()).expect("apply devices");

        assert_eq!(fs::read_to_string(allow).unwrap(), "a");
    }

    #[test]
    fn test_deny_then_allow_list() {
        let tmp = tempfile::tempdir().unwrap();
        let allow = set_fixture(tmp.path(), CGROUP_DEVICES_ALLOW, "").unwrap();
        let deny = set_fixture(tmp.path(), CGROUP_DEVICES_DENY, "").unwrap();
        let cgroup = CgroupConfig {
            allowed_devices: vec![Device {
                path: PathBuf::from("/dev/null"),
                typ: 'c',
                major: 1,
                minor: 3,
                ..Default::default()
            }],
            ..Default::default()
        };

        Devices::apply(&cgroup, tmp.path()).expect("apply devices");

        assert_eq!(fs::read_to_string(deny).unwrap(), "a");
        // a real kernel consumes each write; the fixture file keeps the last one
        assert_eq!(fs::read_to_string(allow).unwrap(), "c 1:3 rwm");
    }
}
