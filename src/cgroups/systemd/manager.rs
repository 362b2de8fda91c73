use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use nix::unistd::Pid;

use crate::cgroups::common::{self, CgroupConfig, CgroupManager, FreezerState};
use crate::cgroups::fs::{self, util, CONTROLLERS};
use crate::cgroups::stats::Stats;
use crate::utils::PathBufExt;

const DEFAULT_SLICE: &str = "system.slice";
const SCOPE_PREFIX: &str = "barge";

/// Lays the container's hierarchy nodes out under a systemd slice, as
/// `<subsystem mount>/<expanded slice>/<prefix>-<name>.scope`. Limits,
/// freezing, statistics and removal work the same way as on the plain
/// hierarchy; only the node placement differs.
pub struct SystemdManager {
    subsystems: HashMap<String, PathBuf>,
    cgroup: CgroupConfig,
}

impl SystemdManager {
    pub fn new(cgroup: &CgroupConfig) -> Result<Self> {
        let slice = cgroup.slice.as_deref().unwrap_or(DEFAULT_SLICE);
        let slice_path = expand_slice(slice)?;
        let unit = unit_name(&cgroup.name);

        let mut subsystems = HashMap::new();
        for subsystem in CONTROLLERS {
            match util::get_subsystem_mount_point(subsystem) {
                Ok(mount_point) => {
                    let path = mount_point.join_absolute_path(&slice_path)?.join(&unit);
                    subsystems.insert(subsystem.to_string(), path);
                }
                Err(e) if common::is_not_found(&e) => {
                    log::warn!("cgroup subsystem {} not supported on this system", subsystem);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(SystemdManager {
            subsystems,
            cgroup: cgroup.clone(),
        })
    }
}

impl CgroupManager for SystemdManager {
    fn apply(&self, pid: Pid) -> Result<()> {
        fs::apply_all(&self.subsystems, &self.cgroup, pid)
    }

    fn get_pids(&self) -> Result<Vec<Pid>> {
        fs::pids_of(&self.subsystems)
    }

    fn stats(&self) -> Result<Stats> {
        fs::collect_stats(&self.subsystems)
    }

    fn freeze(&self, state: FreezerState) -> Result<()> {
        fs::freeze_all(&self.subsystems, state)
    }

    fn destroy(&self) -> Result<()> {
        fs::destroy_all(&self.subsystems)
    }

    fn get_paths(&self) -> &HashMap<String, PathBuf> {
        &self.subsystems
    }
}

/// Scope unit for a container name; a name that is already a slice is
/// used as-is.
fn unit_name(name: &str) -> String {
    if name.ends_with(".slice") {
        return name.to_string();
    }
    format!("{}-{}.scope", SCOPE_PREFIX, name)
}

/// systemd represents slice hierarchy using `-`, so the path of the
/// slice `test-a-b.slice` is `/test.slice/test-a.slice/test-a-b.slice`.
fn expand_slice(slice: &str) -> Result<PathBuf> {
    let suffix = ".slice";
    if slice.len() <= suffix.len() || !slice.ends_with(suffix) {
        bail!("invalid slice name: {}", slice);
    }
    if slice.contains('/') {
        bail!("invalid slice name: {}", slice);
    }
    let mut path = "".to_owned();
    let mut prefix = "".to_owned();
    let slice_name = slice.trim_end_matches(suffix);
    // -.slice is the root
    if slice_name == "-" {
        return Ok(Path::new("/").to_path_buf());
    }
    for component in slice_name.split('-') {
        if component.is_empty() {
            return Err(anyhow!("invalid slice name: {}", slice));
        }
        path = format!("{}/{}{}{}", path, prefix, component, suffix);
        prefix = format!("{}{}-", prefix, component);
    }
    Ok(Path::new(&path).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_slice_simple() {
        assert_eq!(
            expand_slice("system.slice").unwrap(),
            PathBuf::from("/system.slice")
        );
    }

    #[test]
    fn test_expand_slice_nested() {
        assert_eq!(
            expand_slice("test-a-b.slice").unwrap(),
            PathBuf::from("/test.slice/test-a.slice/test-a-b.slice")
        );
    }

    #[test]
    fn test_expand_slice_root() {
        assert_eq!(expand_slice("-.slice").unwrap(), PathBuf::from("/"));
    }

    #[test]
    fn test_expand_slice_rejects_paths() {
        assert!(expand_slice("system.slice/nested").is_err());
        assert!(expand_slice("no-suffix").is_err());
    }

    #[test]
    fn test_unit_name() {
        assert_eq!(unit_name("c1"), "barge-c1.scope");
        assert_eq!(unit_name("custom.slice"), "custom.slice");
    }
}
