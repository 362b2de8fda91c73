use std::path::PathBuf;

use anyhow::{Context, Result};
use procfs::process::Process;

use super::ControllerType;
use crate::cgroups::common::NotFoundError;

/// Finds the mount point of a v1 cgroup subsystem. A missing mount is
/// reported as [`NotFoundError`] so callers can treat the subsystem as
/// optional.
pub fn get_subsystem_mount_point(subsystem: &ControllerType) -> Result<PathBuf> {
    let subsystem = subsystem.to_string();
    Process::myself()
        .context("failed to read process info")?
        .mountinfo()
        .context("failed to read mountinfo")?
        .into_iter()
        .find(|m| {
            if m.fs_type != "cgroup" {
                return false;
            }
            // cpu and cpuacct are commonly co-mounted in one directory
            if subsystem == "cpu" {
                return m.mount_point.ends_with("cpu,cpuacct")
                    || m.mount_point.ends_with("cpu");
            }
            if subsystem == "cpuacct" {
                return m.mount_point.ends_with("cpu,cpuacct")
                    || m.mount_point.ends_with("cpuacct");
            }

            m.mount_point.ends_with(&subsystem)
        })
        .map(|m| m.mount_point)
        .ok_or_else(|| NotFoundError { subsystem }.into())
}
