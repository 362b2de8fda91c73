use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use nix::unistd::Pid;

use super::{
    blkio::Blkio, controller_type::CONTROLLERS, cpu::Cpu, cpuacct::CpuAcct, cpuset::CpuSet,
    devices::Devices, freezer::Freezer, memory::Memory, util, Controller, ControllerType,
};
use crate::cgroups::common::{
    self, CgroupConfig, CgroupManager, FreezerState, NotFoundError, CGROUP_PROCS,
};
use crate::cgroups::stats::{Stats, StatsProvider};
use crate::utils;

/// The plain cgroupfs manager: one hierarchy node per mounted subsystem,
/// at `<mount point>/<parent>/<name>`.
pub struct Manager {
    subsystems: HashMap<String, PathBuf>,
    cgroup: CgroupConfig,
}

impl Manager {
    /// Derives the node paths from the subsystem mount points of this
    /// host. Subsystems without a mount point are skipped; they are
    /// optional until a configuration actually needs them.
    pub fn new(cgroup: &CgroupConfig) -> Result<Self> {
        let mut subsystems = HashMap::new();
        for subsystem in CONTROLLERS {
            match util::get_subsystem_mount_point(subsystem) {
                Ok(mount_point) => {
                    subsystems.insert(
                        subsystem.to_string(),
                        Self::node_path(&mount_point, cgroup),
                    );
                }
                Err(e) if common::is_not_found(&e) => {
                    log::warn!("cgroup subsystem {} not supported on this system", subsystem);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Manager {
            subsystems,
            cgroup: cgroup.clone(),
        })
    }

    /// Reconstructs a manager around previously persisted node paths.
    pub fn from_paths(paths: HashMap<String, PathBuf>, cgroup: &CgroupConfig) -> Self {
        Manager {
            subsystems: paths,
            cgroup: cgroup.clone(),
        }
    }

    fn node_path(mount_point: &Path, cgroup: &CgroupConfig) -> PathBuf {
        let mut path = mount_point.to_path_buf();
        if let Some(parent) = cgroup.parent.as_deref() {
            path = path.join(parent.trim_start_matches('/'));
        }
        path.join(&cgroup.name)
    }
}

impl CgroupManager for Manager {
    fn apply(&self, pid: Pid) -> Result<()> {
        apply_all(&self.subsystems, &self.cgroup, pid)
    }

    fn get_pids(&self) -> Result<Vec<Pid>> {
        pids_of(&self.subsystems)
    }

    fn stats(&self) -> Result<Stats> {
        collect_stats(&self.subsystems)
    }

    fn freeze(&self, state: FreezerState) -> Result<()> {
        freeze_all(&self.subsystems, state)
    }

    fn destroy(&self) -> Result<()> {
        destroy_all(&self.subsystems)
    }

    fn get_paths(&self) -> &HashMap<String, PathBuf> {
        &self.subsystems
    }
}

/// Creates every node, writes the configuration and joins `pid`.
/// Rewriting existing values makes retries idempotent; nodes created
/// before a failure remain in the path map for later cleanup.
pub(crate) fn apply_all(
    subsystems: &HashMap<String, PathBuf>,
    cgroup: &CgroupConfig,
    pid: Pid,
) -> Result<()> {
    for (name, path) in subsystems {
        let subsystem = match ControllerType::from_str(name) {
            Ok(subsystem) => subsystem,
            Err(_) => {
                log::warn!("ignoring unknown subsystem {} in path map", name);
                continue;
            }
        };

        fs::create_dir_all(path)
            .with_context(|| format!("failed to create cgroup node {:?}", path))?;

        match subsystem {
            ControllerType::Cpu => Cpu::apply(cgroup, path)?,
            ControllerType::CpuAcct => CpuAcct::apply(cgroup, path)?,
            ControllerType::CpuSet => CpuSet::apply(cgroup, path)?,
            ControllerType::Memory => Memory::apply(cgroup, path)?,
            ControllerType::Blkio => Blkio::apply(cgroup, path)?,
            ControllerType::Devices => Devices::apply(cgroup, path)?,
            ControllerType::Freezer => Freezer::apply(cgroup, path)?,
        }

        common::write_cgroup_file(path.join(CGROUP_PROCS), pid)
            .with_context(|| format!("failed to add task to {}", subsystem))?;
    }

    Ok(())
}

/// Reads the member pids. The devices node is used as the reference
/// subsystem when present since every process joins it.
pub(crate) fn pids_of(subsystems: &HashMap<String, PathBuf>) -> Result<Vec<Pid>> {
    let path = subsystems
        .get("devices")
        .or_else(|| {
            let mut names: Vec<&String> = subsystems.keys().collect();
            names.sort();
            names.first().and_then(|name| subsystems.get(*name))
        })
        .ok_or_else(|| NotFoundError {
            subsystem: "devices".to_string(),
        })?;

    if !path.exists() {
        return Err(NotFoundError {
            subsystem: "devices".to_string(),
        }
        .into());
    }

    let procs = common::read_cgroup_file(path.join(CGROUP_PROCS))?;
    let mut pids = BTreeSet::new();
    for line in procs.lines() {
        let pid: i32 = line
            .trim()
            .parse()
            .with_context(|| format!("invalid pid entry {:?} in {:?}", line, path))?;
        pids.insert(pid);
    }

    Ok(pids.into_iter().map(Pid::from_raw).collect())
}

/// Reads real counter files from every present subsystem. An absent
/// optional counter file is omitted from the snapshot; a hierarchy node
/// that is not there at all is an error, never a zeroed result.
pub(crate) fn collect_stats(subsystems: &HashMap<String, PathBuf>) -> Result<Stats> {
    let mut stats = Stats::default();

    if let Some(path) = subsystems.get("memory") {
        ensure_node(path, "memory")?;
        stats.memory = Memory::stats(path).context("failed to read memory stats")?;
    }
    if let Some(path) = subsystems.get("cpuacct") {
        ensure_node(path, "cpuacct")?;
        stats.cpu.usage = CpuAcct::stats(path).context("failed to read cpu accounting")?;
    }
    if let Some(path) = subsystems.get("cpu") {
        ensure_node(path, "cpu")?;
        stats.cpu.throttling = Cpu::stats(path).context("failed to read cpu throttling")?;
    }
    if let Some(path) = subsystems.get("blkio") {
        ensure_node(path, "blkio")?;
        stats.blkio = Blkio::stats(path).context("failed to read blkio stats")?;
    }

    Ok(stats)
}

fn ensure_node(path: &Path, subsystem: &str) -> Result<()> {
    if !path.is_dir() {
        anyhow::bail!(
            "{} hierarchy node {:?} is not readable",
            subsystem,
            path
        );
    }
    Ok(())
}

pub(crate) fn freeze_all(
    subsystems: &HashMap<String, PathBuf>,
    state: FreezerState,
) -> Result<()> {
    let path = subsystems.get("freezer").ok_or_else(|| NotFoundError {
        subsystem: "freezer".to_string(),
    })?;
    Freezer::apply_state(state, path)
}

pub(crate) fn destroy_all(subsystems: &HashMap<String, PathBuf>) -> Result<()> {
    for (name, path) in subsystems {
        if path.exists() {
            log::debug!("remove cgroup node {:?}", path);
            utils::delete_with_retry(path)
                .with_context(|| format!("failed to remove {} cgroup node", name))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::test::set_fixture;

    fn fixture_subsystems(tmp: &Path, names: &[&str]) -> HashMap<String, PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = tmp.join(name).join("barge").join("test");
                fs::create_dir_all(&path).unwrap();
                (name.to_string(), path)
            })
            .collect()
    }

    #[test]
    fn test_apply_writes_config_and_joins_pid() {
        let tmp = tempfile::tempdir().unwrap();
        let subsystems = fixture_subsystems(tmp.path(), &["cpu", "memory"]);
        for path in subsystems.values() {
            set_fixture(path, CGROUP_PROCS, "").unwrap();
            set_fixture(path, "cpu.shares", "").unwrap();
            set_fixture(path, "memory.limit_in_bytes", "").unwrap();
        }
        let cgroup = CgroupConfig {
            name: "test".to_string(),
            cpu_shares: 512,
            ..Default::default()
        };

        apply_all(&subsystems, &cgroup, Pid::from_raw(1234)).expect("apply cgroups");

        let cpu_path = subsystems.get("cpu").unwrap();
        assert_eq!(
            fs::read_to_string(cpu_path.join("cpu.shares")).unwrap(),
            "512"
        );
        assert_eq!(
            fs::read_to_string(cpu_path.join(CGROUP_PROCS)).unwrap(),
            "1234"
        );
    }

    #[test]
    fn test_get_pids_deduplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let subsystems = fixture_subsystems(tmp.path(), &["devices"]);
        let path = subsystems.get("devices").unwrap();
        set_fixture(path, CGROUP_PROCS, "42\n43\n42\n").unwrap();

        let pids = pids_of(&subsystems).expect("read pids");
        assert_eq!(pids, vec![Pid::from_raw(42), Pid::from_raw(43)]);
    }

    #[test]
    fn test_get_pids_missing_node_is_not_found() {
        let mut subsystems = HashMap::new();
        subsystems.insert(
            "devices".to_string(),
            PathBuf::from("/does/not/exist/devices/barge"),
        );

        let err = pids_of(&subsystems).unwrap_err();
        assert!(common::is_not_found(&err));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let subsystems = fixture_subsystems(tmp.path(), &["cpu"]);

        destroy_all(&subsystems).expect("first destroy");
        assert!(!subsystems.get("cpu").unwrap().exists());
        destroy_all(&subsystems).expect("destroy after destroy");
    }

    #[test]
    fn test_stats_reads_real_counters() {
        let tmp = tempfile::tempdir().unwrap();
        let subsystems = fixture_subsystems(tmp.path(), &["memory", "cpuacct"]);
        let memory = subsystems.get("memory").unwrap();
        set_fixture(memory, "memory.usage_in_bytes", "4096").unwrap();
        let cpuacct = subsystems.get("cpuacct").unwrap();
        set_fixture(cpuacct, "cpuacct.usage", "777").unwrap();

        let stats = collect_stats(&subsystems).expect("collect stats");
        assert_eq!(stats.memory.usage, 4096);
        assert_eq!(stats.cpu.usage.usage_total, 777);
    }

    #[test]
    fn test_stats_on_removed_hierarchy_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let subsystems = fixture_subsystems(tmp.path(), &["memory"]);

        destroy_all(&subsystems).expect("destroy");
        assert!(collect_stats(&subsystems).is_err());
    }

    #[test]
    fn test_freeze_requires_freezer_subsystem() {
        let subsystems = HashMap::new();
        let err = freeze_all(&subsystems, FreezerState::Frozen).unwrap_err();
        assert!(common::is_not_found(&err));
    }

    #[test]
    fn test_from_paths_round_trip() {
        let mut paths = HashMap::new();
        paths.insert(
            "cpu".to_string(),
            PathBuf::from("/sys/fs/cgroup/cpu/barge/c1"),
        );
        let cgroup = CgroupConfig {
            name: "c1".to_string(),
            ..Default::default()
        };

        let manager = Manager::from_paths(paths.clone(), &cgroup);
        assert_eq!(manager.get_paths(), &paths);
    }
}
