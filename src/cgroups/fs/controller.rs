use std::fs;
use std::path::Path;

use anyhow::Result;
use nix::unistd::Pid;

use crate::cgroups::common::{self, CgroupConfig, CGROUP_PROCS};

pub trait Controller {
    fn add_task(pid: Pid, cgroup_path: &Path) -> Result<()> {
        fs::create_dir_all(cgroup_path)?;
        common::write_cgroup_file(cgroup_path.join(CGROUP_PROCS), pid)?;
        Ok(())
    }

    /// Writes the controller's slice of the resource configuration into
    /// the hierarchy node at `cgroup_path`.
    fn apply(cgroup: &CgroupConfig, cgroup_path: &Path) -> Result<()>;
}
