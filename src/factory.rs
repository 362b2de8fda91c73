//! Creates new containers and reloads persisted ones.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::cgroups::common::{self, CgroupConfig};
use crate::config::Config;
use crate::container::{Container, State};
use crate::error::{Error, Result};
use crate::utils;

const MAX_ID_LEN: usize = 1024;

/// Allocates on-disk identity for new containers under one root
/// directory and reconstructs containers from their persisted files.
/// The cgroup backend is chosen here, once, for every container the
/// factory produces.
pub struct Factory {
    root: PathBuf,
    use_systemd: bool,
    checkpoint_tool: PathBuf,
    start_timeout: Option<Duration>,
}

impl Factory {
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        utils::create_dir_all(&root)?;

        Ok(Self {
            root,
            use_systemd: false,
            checkpoint_tool: PathBuf::from("criu"),
            start_timeout: None,
        })
    }

    /// Selects the init-system-integrated cgroup backend instead of the
    /// plain hierarchy.
    pub fn with_systemd(mut self, use_systemd: bool) -> Self {
        self.use_systemd = use_systemd;
        self
    }

    pub fn with_checkpoint_tool<P: Into<PathBuf>>(mut self, tool: P) -> Self {
        self.checkpoint_tool = tool.into();
        self
    }

    /// Bounds the exec-protocol handshake. Exceeding the timeout
    /// terminates and reaps the child and fails the start attempt.
    pub fn with_start_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates the container root, persists the configuration and
    /// hands back a container in `Destroyed` state with an empty
    /// process table. The init process is not started.
    pub fn create(&self, id: &str, config: Config) -> Result<Arc<Container>> {
        validate_id(id)?;
        config.validate()?;

        let container_root = self.root.join(id);
        // create_dir is the atomic claim on the id: of two concurrent
        // creates exactly one wins, the other observes the directory
        match fs::create_dir(&container_root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::IdInUse { id: id.to_string() })
            }
            Err(e) => {
                return Err(Error::System(anyhow::Error::new(e).context(format!(
                    "failed to create container root for {}",
                    id
                ))))
            }
        }

        let setup = || -> Result<Arc<Container>> {
            config.save(&container_root)?;

            let cgroup = effective_cgroup(&config, id);
            let cgroup_manager = common::create_cgroup_manager(&cgroup, self.use_systemd)?;

            let mut state = State::new(id);
            state.cgroup_paths = cgroup_manager.get_paths().clone();
            state.save(&container_root)?;

            Ok(Arc::new(Container::new(
                id,
                container_root.clone(),
                config.clone(),
                state,
                cgroup_manager,
                self.checkpoint_tool.clone(),
                self.start_timeout,
            )))
        };

        match setup() {
            Ok(container) => {
                log::debug!("created container {} in {:?}", id, self.root);
                Ok(container)
            }
            Err(e) => {
                // do not leave a half-claimed id behind
                let _ = fs::remove_dir_all(&container_root);
                Err(e)
            }
        }
    }

    /// Reconstructs a container from its persisted config and state.
    /// The cgroup manager is rebuilt from the persisted subsystem path
    /// mapping rather than re-derived from mount points.
    pub fn load(&self, id: &str) -> Result<Arc<Container>> {
        validate_id(id)?;
        let container_root = self.root.join(id);
        log::debug!("loading container {} from {:?}", id, container_root);

        let config = load_config(&container_root, id)?;
        let state = load_state(&container_root, id)?;

        let cgroup = effective_cgroup(&config, id);
        let cgroup_manager = common::load_cgroup_manager(state.cgroup_paths.clone(), &cgroup);

        let container = Arc::new(Container::new(
            id,
            container_root,
            config,
            state,
            cgroup_manager,
            self.checkpoint_tool.clone(),
            self.start_timeout,
        ));
        // the persisted status may predate a crash or reboot
        container.refresh_status()?;
        Ok(container)
    }
}

fn validate_id(id: &str) -> Result<()> {
    let well_formed = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !well_formed {
        return Err(Error::InvalidIdFormat { id: id.to_string() });
    }
    Ok(())
}

/// The cgroup configuration with the node name defaulted to the
/// container id.
fn effective_cgroup(config: &Config, id: &str) -> CgroupConfig {
    let mut cgroup = config.cgroups.clone().unwrap_or_default();
    if cgroup.name.is_empty() {
        cgroup.name = id.to_string();
    }
    cgroup
}

fn load_config(container_root: &Path, id: &str) -> Result<Config> {
    let path = Config::file_path(container_root);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::ContainerNotExists { id: id.to_string() })
        }
        Err(e) => {
            return Err(Error::System(
                anyhow::Error::new(e).context(format!("failed to open {:?}", path)),
            ))
        }
    };

    serde_json::from_reader(&file)
        .map_err(|e| Error::ConfigInvalid(format!("malformed config for {}: {}", id, e)))
}

fn load_state(container_root: &Path, id: &str) -> Result<State> {
    let path = State::file_path(container_root);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::ContainerNotExists { id: id.to_string() })
        }
        Err(e) => {
            return Err(Error::System(
                anyhow::Error::new(e).context(format!("failed to open {:?}", path)),
            ))
        }
    };

    let state: State = serde_json::from_reader(&file)
        .with_context(|| format!("malformed state for {}", id))?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Status;
    use crate::namespaces::{Namespace, NamespaceType};

    fn sample_config() -> Config {
        Config {
            rootfs: PathBuf::from("/var/lib/barge/busybox"),
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
            ..Default::default()
        }
    }

    fn test_factory() -> (tempfile::TempDir, Factory) {
        let tmp = tempfile::tempdir().unwrap();
        let factory = Factory::new(tmp.path()).unwrap();
        (tmp, factory)
    }

    #[test]
    fn test_create_then_load_reconstructs_equal_container() {
        let (_tmp, factory) = test_factory();

        let created = factory.create("c1", sample_config()).unwrap();
        let loaded = factory.load("c1").unwrap();

        assert_eq!(created.config(), loaded.config());
        assert_eq!(
            created.cgroup_manager().get_paths(),
            loaded.cgroup_manager().get_paths()
        );
        assert_eq!(loaded.status(), Status::Destroyed);
        assert!(loaded.pid().is_none());
    }

    #[test]
    fn test_create_existing_id_is_id_in_use() {
        let (_tmp, factory) = test_factory();

        factory.create("c1", sample_config()).unwrap();
        let err = factory.create("c1", sample_config()).unwrap_err();
        assert!(matches!(err, Error::IdInUse { .. }));
    }

    #[test]
    fn test_concurrent_create_with_same_id_has_one_winner() {
        let (_tmp, factory) = test_factory();
        let factory = Arc::new(factory);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let factory = Arc::clone(&factory);
                std::thread::spawn(move || factory.create("c1", sample_config()).is_ok())
            })
            .collect();

        let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|won| **won).count(), 1);
    }

    #[test]
    fn test_invalid_id_formats_are_rejected() {
        let (_tmp, factory) = test_factory();

        for id in &["", "id/with/slash", "id with space", "id\nnewline", "⚙️"] {
            let err = factory.create(id, sample_config()).unwrap_err();
            assert!(
                matches!(err, Error::InvalidIdFormat { .. }),
                "id {:?} must be rejected",
                id
            );
        }

        let long_id = "a".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            factory.create(&long_id, sample_config()),
            Err(Error::InvalidIdFormat { .. })
        ));
    }

    #[test]
    fn test_load_missing_container() {
        let (_tmp, factory) = test_factory();

        let err = factory.load("ghost").unwrap_err();
        assert!(matches!(err, Error::ContainerNotExists { .. }));
    }

    #[test]
    fn test_load_malformed_config_is_config_invalid() {
        let (tmp, factory) = test_factory();
        factory.create("c1", sample_config()).unwrap();
        fs::write(tmp.path().join("c1").join("config.json"), "{not json").unwrap();

        let err = factory.load("c1").unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn test_load_malformed_state_is_system_error() {
        let (tmp, factory) = test_factory();
        factory.create("c1", sample_config()).unwrap();
        fs::write(tmp.path().join("c1").join("state.json"), "{not json").unwrap();

        let err = factory.load("c1").unwrap_err();
        assert!(matches!(err, Error::System(_)));
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let (_tmp, factory) = test_factory();

        let mut config = sample_config();
        config.namespaces.push(Namespace {
            typ: NamespaceType::Pid,
            path: None,
        });
        let err = factory.create("c1", config).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
        // the failed create must not claim the id
        assert!(factory.create("c1", sample_config()).is_ok());
    }
}
