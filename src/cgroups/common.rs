use std::collections::HashMap;
use std::fmt::{self, Display};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::cgroups::stats::Stats;
use crate::config::Device;

pub const CGROUP_PROCS: &str = "cgroup.procs";
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// The resource-control contract the container talks to. Both backends
/// implement it; the container never cares which one is active.
pub trait CgroupManager {
    /// Applies the resource configuration and adds `pid` to the group,
    /// creating any needed hierarchy nodes. Idempotent on retry; nodes
    /// created before a failure stay discoverable via [`get_paths`] so
    /// destroy can still clean up.
    ///
    /// [`get_paths`]: CgroupManager::get_paths
    fn apply(&self, pid: Pid) -> Result<()>;
    /// Every pid currently a member of the group, deduplicated.
    fn get_pids(&self) -> Result<Vec<Pid>>;
    /// Point-in-time usage snapshot. Absent optional counter files are
    /// omitted from the result; only an unreadable hierarchy is an error.
    fn stats(&self) -> Result<Stats>;
    /// Writes the freezer state for the whole group.
    fn freeze(&self, state: FreezerState) -> Result<()>;
    /// Removes every hierarchy node, tolerating already-removed ones.
    fn destroy(&self) -> Result<()>;
    /// The subsystem to hierarchy-node mapping in use, persisted so a
    /// later load can reconstruct an equivalent manager without
    /// re-deriving mount points.
    fn get_paths(&self) -> &HashMap<String, PathBuf>;
}

/// Freezer values accepted by [`CgroupManager::freeze`]. Only these two
/// exist; anything else is unrepresentable by construction.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FreezerState {
    Frozen,
    Thawed,
}

impl FreezerState {
    /// The value written to and reported by `freezer.state`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FreezerState::Frozen => "FROZEN",
            FreezerState::Thawed => "THAWED",
        }
    }
}

impl Display for FreezerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-container resource limits. A zero numeric field means "do not
/// set", never "set to zero".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CgroupConfig {
    /// Name of the hierarchy node, defaulted to the container id.
    pub name: String,
    /// Parent node in a plain hierarchy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Parent slice in a systemd layout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice: Option<String>,
    pub allow_all_devices: bool,
    pub allowed_devices: Vec<Device>,
    /// Memory limit in bytes.
    pub memory: i64,
    /// Soft limit in bytes.
    pub memory_reservation: i64,
    /// Total memory plus swap; `-1` disables the swap ceiling.
    pub memory_swap: i64,
    /// Relative cpu weight against other groups.
    pub cpu_shares: u64,
    /// Allowed cpu time per period, in usecs.
    pub cpu_quota: i64,
    /// Period length for the quota, in usecs.
    pub cpu_period: u64,
    /// Cpus the group may run on, e.g. `0-2,7`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpuset_cpus: Option<String>,
    /// Freezer state applied at setup time, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freezer: Option<FreezerState>,
}

/// A cgroup subsystem has no mount point on this host. Distinguishable
/// from generic I/O failures so callers can treat the subsystem as
/// optional.
#[derive(Debug, thiserror::Error)]
#[error("mountpoint for subsystem {subsystem} not found")]
pub struct NotFoundError {
    pub subsystem: String,
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<NotFoundError>().is_some()
}

#[inline]
pub fn write_cgroup_file_str<P: AsRef<Path>>(path: P, data: &str) -> Result<()> {
    OpenOptions::new()
        .create(false)
        .write(true)
        .truncate(false)
        .open(path.as_ref())
        .with_context(|| format!("failed to open {:?}", path.as_ref()))?
        .write_all(data.as_bytes())
        .with_context(|| format!("failed to write to {:?}", path.as_ref()))?;

    Ok(())
}

#[inline]
pub fn write_cgroup_file<P: AsRef<Path>, T: ToString>(path: P, data: T) -> Result<()> {
    write_cgroup_file_str(path, &data.to_string())?;

    Ok(())
}

#[inline]
pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))
}

/// Reads an optional counter file: absent file means `None`, anything
/// else unparsable is an error.
pub fn read_optional_value<P: AsRef<Path>>(path: P) -> Result<Option<u64>> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(content) => {
            let value = content
                .trim()
                .parse()
                .with_context(|| format!("failed to parse {:?}", path))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {:?}", path)),
    }
}

/// Whether this host runs systemd as init.
pub fn systemd_booted() -> bool {
    Path::new("/run/systemd/system").is_dir()
}

/// Constructs the backend selected at startup. The choice is explicit
/// configuration; it is made once and never mixed within one container.
pub fn create_cgroup_manager(
    cgroup: &CgroupConfig,
    use_systemd: bool,
) -> Result<Box<dyn CgroupManager + Send + Sync>> {
    if use_systemd {
        if !systemd_booted() {
            bail!("systemd cgroup driver requested but systemd is not running");
        }
        log::debug!("systemd cgroup manager will be used");
        return Ok(Box::new(crate::cgroups::systemd::SystemdManager::new(
            cgroup,
        )?));
    }

    log::debug!("cgroupfs manager will be used");
    Ok(Box::new(crate::cgroups::fs::Manager::new(cgroup)?))
}

/// Reconstructs a manager from a persisted subsystem path mapping. Mount
/// points are never re-derived, so a load after a host remount change
/// still targets the original hierarchy.
pub fn load_cgroup_manager(
    paths: HashMap<String, PathBuf>,
    cgroup: &CgroupConfig,
) -> Box<dyn CgroupManager + Send + Sync> {
    Box::new(crate::cgroups::fs::Manager::from_paths(paths, cgroup))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freezer_state_file_values() {
        assert_eq!(FreezerState::Frozen.as_str(), "FROZEN");
        assert_eq!(FreezerState::Thawed.as_str(), "THAWED");
    }

    #[test]
    fn test_not_found_detection() {
        let err: anyhow::Error = NotFoundError {
            subsystem: "freezer".to_string(),
        }
        .into();
        assert!(is_not_found(&err));
        assert!(!is_not_found(&anyhow::anyhow!("other failure")));
    }

    #[test]
    fn test_read_optional_value_absent() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            read_optional_value(tmp.path().join("memory.failcnt")).unwrap(),
            None
        );
    }

    #[test]
    fn test_cgroup_config_zero_means_unset() {
        let config: CgroupConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.memory, 0);
        assert_eq!(config.cpu_shares, 0);
        assert!(config.freezer.is_none());
    }
}
