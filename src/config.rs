//! Container configuration. The configuration is written once at create
//! time and never mutated afterwards; the supervisor and the namespaced
//! child both work from the same serialized form.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cgroups::common::CgroupConfig;
use crate::error::Error;
use crate::namespaces::{Namespace, Namespaces};
use crate::network::Network;

pub const CONFIG_FILE_PATH: &str = "config.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Path to the root filesystem the init process pivots into.
    pub rootfs: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub readonly_rootfs: bool,
    /// Default argv for the init process.
    pub init_command: Vec<String>,
    /// `KEY=VALUE` entries appended to every process environment.
    pub env: Vec<String>,
    pub namespaces: Vec<Namespace>,
    pub networks: Vec<Network>,
    pub mounts: Vec<Mount>,
    /// Device nodes created under `/dev` in addition to the default set.
    pub devices: Vec<Device>,
    /// Capability names the init process keeps.
    pub capabilities: Vec<String>,
    pub rlimits: Vec<Rlimit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cgroups: Option<CgroupConfig>,
}

impl Config {
    /// Builds the init process invocation from the configured command.
    pub fn init_process(&self) -> Process {
        Process {
            args: self.init_command.clone(),
            env: vec![],
            console: None,
            capabilities: None,
        }
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), Error> {
        Namespaces::from(&self.namespaces[..]).validate()?;

        for network in &self.networks {
            crate::network::get_strategy(&network.strategy)?;
        }

        crate::capabilities::to_set(&self.capabilities)?;

        for rlimit in &self.rlimits {
            rlimit.resource().map_err(|_| {
                Error::ConfigInvalid(format!("unknown rlimit type: {}", rlimit.typ))
            })?;
        }

        for device in &self.devices {
            if device.typ != 'c' && device.typ != 'b' {
                return Err(Error::ConfigInvalid(format!(
                    "{} is not a valid device type for device {}",
                    device.typ,
                    device.path.display()
                )));
            }
        }

        Ok(())
    }

    pub fn save(&self, container_root: &Path) -> Result<()> {
        let config_path = Self::file_path(container_root);
        let file = File::create(&config_path)
            .with_context(|| format!("failed to create config file {:?}", config_path))?;
        serde_json::to_writer(&file, self)?;
        Ok(())
    }

    pub fn load(container_root: &Path) -> Result<Self> {
        let config_path = Self::file_path(container_root);
        let file = File::open(&config_path)
            .with_context(|| format!("failed to open container config {:?}", config_path))?;
        let config: Self = serde_json::from_reader(&file)?;
        Ok(config)
    }

    pub fn file_path(container_root: &Path) -> PathBuf {
        container_root.join(CONFIG_FILE_PATH)
    }
}

/// One process invocation inside a container. The first process of a
/// container is its init process; later invocations join the existing
/// namespaces.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Process {
    pub args: Vec<String>,
    pub env: Vec<String>,
    /// Terminal device the process binds its standard streams to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<PathBuf>,
    /// Per-process capability override; the container's own list applies
    /// when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
}

/// A bind mount into the container's root filesystem.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Mount {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub writable: bool,
    pub private: bool,
}

/// A device node, used both for node creation under `/dev` and for the
/// device cgroup allow list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    pub path: PathBuf,
    /// `c` for character devices, `b` for block devices.
    #[serde(rename = "type")]
    pub typ: char,
    pub major: u64,
    pub minor: u64,
    pub file_mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Access string for the device cgroup, e.g. `rwm`.
    pub permissions: String,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            typ: 'c',
            major: 0,
            minor: 0,
            file_mode: 0o666,
            uid: 0,
            gid: 0,
            permissions: "rwm".to_string(),
        }
    }
}

impl Device {
    /// Entry format consumed by `devices.allow` / `devices.deny`.
    pub fn cgroup_string(&self) -> String {
        format!(
            "{} {}:{} {}",
            self.typ, self.major, self.minor, self.permissions
        )
    }
}

/// The standard nodes every container gets under `/dev`.
pub fn default_devices() -> Vec<Device> {
    let char_device = |path: &str, major, minor| Device {
        path: PathBuf::from(path),
        typ: 'c',
        major,
        minor,
        file_mode: 0o666,
        uid: 0,
        gid: 0,
        permissions: "rwm".to_string(),
    };

    vec![
        char_device("/dev/null", 1, 3),
        char_device("/dev/zero", 1, 5),
        char_device("/dev/full", 1, 7),
        char_device("/dev/random", 1, 8),
        char_device("/dev/urandom", 1, 9),
        char_device("/dev/tty", 5, 0),
    ]
}

/// A resource limit applied in the child before exec.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rlimit {
    /// Limit name as in `getrlimit(2)` without the `RLIMIT_` prefix,
    /// lowercase, e.g. `nofile`.
    #[serde(rename = "type")]
    pub typ: String,
    pub hard: u64,
    pub soft: u64,
}

impl Rlimit {
    pub fn resource(&self) -> Result<i32> {
        let resource = match self.typ.as_str() {
            "cpu" => libc::RLIMIT_CPU,
            "fsize" => libc::RLIMIT_FSIZE,
            "data" => libc::RLIMIT_DATA,
            "stack" => libc::RLIMIT_STACK,
            "core" => libc::RLIMIT_CORE,
            "rss" => libc::RLIMIT_RSS,
            "nproc" => libc::RLIMIT_NPROC,
            "nofile" => libc::RLIMIT_NOFILE,
            "memlock" => libc::RLIMIT_MEMLOCK,
            "as" => libc::RLIMIT_AS,
            "locks" => libc::RLIMIT_LOCKS,
            "sigpending" => libc::RLIMIT_SIGPENDING,
            "msgqueue" => libc::RLIMIT_MSGQUEUE,
            "nice" => libc::RLIMIT_NICE,
            "rtprio" => libc::RLIMIT_RTPRIO,
            "rttime" => libc::RLIMIT_RTTIME,
            unknown => anyhow::bail!("unknown rlimit type: {}", unknown),
        };
        Ok(resource as i32)
    }
}

/// Environment for a process: the container-wide entries first, the
/// per-process ones appended so they win on collision at exec time.
pub fn build_env(config: &Config, process: &Process) -> Vec<String> {
    let mut env = config.env.clone();
    env.extend(process.env.iter().cloned());
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::NamespaceType;

    fn sample_config() -> Config {
        Config {
            rootfs: PathBuf::from("/var/lib/barge/busybox"),
            hostname: Some("barge-test".to_string()),
            init_command: vec!["sleep".to_string(), "5".to_string()],
            namespaces: vec![
                Namespace {
                    typ: NamespaceType::Pid,
                    path: None,
                },
                Namespace {
                    typ: NamespaceType::Mount,
                    path: None,
                },
                Namespace {
                    typ: NamespaceType::Ipc,
                    path: None,
                },
            ],
            capabilities: vec!["CAP_CHOWN".to_string(), "NET_ADMIN".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let config = sample_config();
        config.save(tmp.path()).unwrap();
        let loaded = Config::load(tmp.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_validate_accepts_sample() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_capability() {
        let mut config = sample_config();
        config.capabilities.push("FLY".to_string());
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_rlimit() {
        let mut config = sample_config();
        config.rlimits.push(Rlimit {
            typ: "warp".to_string(),
            hard: 1,
            soft: 1,
        });
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_device_type() {
        let mut config = sample_config();
        config.devices.push(Device {
            path: PathBuf::from("/dev/thing"),
            typ: 'x',
            ..Default::default()
        });
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_build_env_process_entries_last() {
        let mut config = sample_config();
        config.env = vec!["PATH=/bin".to_string(), "TERM=dumb".to_string()];
        let process = Process {
            args: vec!["true".to_string()],
            env: vec!["TERM=xterm".to_string()],
            ..Default::default()
        };
        let env = build_env(&config, &process);
        assert_eq!(env, vec!["PATH=/bin", "TERM=dumb", "TERM=xterm"]);
    }

    #[test]
    fn test_device_cgroup_string() {
        let device = Device {
            path: PathBuf::from("/dev/null"),
            typ: 'c',
            major: 1,
            minor: 3,
            ..Default::default()
        };
        assert_eq!(device.cgroup_string(), "c 1:3 rwm");
    }
}
