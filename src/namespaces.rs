//! Namespaces provide isolation of resources for processes at a kernel
//! level. A container configuration requests a set of namespace kinds;
//! each kind is either created fresh at clone time or joined from an
//! existing namespace through a path such as `/proc/<pid>/ns/net`.

use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use nix::{
    fcntl,
    sched::CloneFlags,
    sys::stat,
    unistd::{self, Gid, Uid},
};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::syscall::Syscall;

/// A kernel namespace kind. Unknown names are a configuration error.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    Mount,
    Uts,
    Ipc,
    User,
    Pid,
    Network,
}

impl NamespaceType {
    pub fn clone_flag(&self) -> CloneFlags {
        match self {
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Network => CloneFlags::CLONE_NEWNET,
        }
    }

    /// Name of the namespace link under `/proc/<pid>/ns`.
    pub fn proc_file(&self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::User => "user",
            Self::Pid => "pid",
            Self::Network => "net",
        }
    }
}

impl Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mount => "mount",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::User => "user",
            Self::Pid => "pid",
            Self::Network => "network",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for NamespaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mount" => Ok(Self::Mount),
            "uts" => Ok(Self::Uts),
            "ipc" => Ok(Self::Ipc),
            "user" => Ok(Self::User),
            "pid" => Ok(Self::Pid),
            "network" => Ok(Self::Network),
            unknown => Err(Error::ConfigInvalid(format!(
                "unknown namespace type: {}",
                unknown
            ))),
        }
    }
}

/// A requested namespace: created fresh when `path` is absent, joined
/// from the file at `path` otherwise.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    #[serde(rename = "type")]
    pub typ: NamespaceType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<PathBuf>,
}

/// Resolves a set of requested namespaces into the clone flag mask used
/// for process creation and the list of existing namespaces to join.
pub struct Namespaces {
    spaces: Vec<Namespace>,
}

impl From<&[Namespace]> for Namespaces {
    fn from(namespaces: &[Namespace]) -> Self {
        Namespaces {
            spaces: namespaces.to_vec(),
        }
    }
}

impl Namespaces {
    /// Flag mask for namespaces that are created fresh. Descriptors with
    /// an external path are joined via setns instead and do not
    /// contribute to the mask.
    pub fn clone_flags(&self) -> CloneFlags {
        self.spaces
            .iter()
            .filter(|ns| ns.path.is_none())
            .fold(CloneFlags::empty(), |mut cf, ns| {
                cf |= ns.typ.clone_flag();
                cf
            })
    }

    /// The namespaces that must be entered through an existing path.
    pub fn to_enter(&self) -> Vec<&Namespace> {
        self.spaces.iter().filter(|ns| ns.path.is_some()).collect()
    }

    pub fn contains(&self, typ: NamespaceType) -> bool {
        self.spaces.iter().any(|ns| ns.typ == typ)
    }

    /// Rejects configurations with more than one descriptor per kind.
    pub fn validate(&self) -> Result<(), Error> {
        for (i, ns) in self.spaces.iter().enumerate() {
            if self.spaces[..i].iter().any(|other| other.typ == ns.typ) {
                return Err(Error::ConfigInvalid(format!(
                    "duplicate namespace type: {}",
                    ns.typ
                )));
            }
        }
        Ok(())
    }

    /// Joins every namespace that carries an external path. Called from
    /// the child side of the exec protocol before any other setup.
    pub fn apply_setns(&self, syscall: &dyn Syscall) -> Result<()> {
        for ns in self.to_enter() {
            let path = ns.path.as_ref().expect("to_enter returns only path-joins");
            let fd = fcntl::open(path, fcntl::OFlag::empty(), stat::Mode::empty())?;
            syscall.set_ns(fd, ns.typ.clone_flag())?;
            unistd::close(fd)?;
            if ns.typ == NamespaceType::User {
                syscall.set_id(Uid::from_raw(0), Gid::from_raw(0))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscall::test::TestHelperSyscall;

    fn gen_sample_namespaces() -> Vec<Namespace> {
        vec![
            Namespace {
                typ: NamespaceType::Mount,
                path: Some(PathBuf::from("/dev/null")),
            },
            Namespace {
                typ: NamespaceType::Network,
                path: Some(PathBuf::from("/dev/null")),
            },
            Namespace {
                typ: NamespaceType::Pid,
                path: None,
            },
            Namespace {
                typ: NamespaceType::Ipc,
                path: None,
            },
        ]
    }

    #[test]
    fn test_clone_flags_skip_path_joins() {
        let namespaces = Namespaces::from(&gen_sample_namespaces()[..]);
        assert_eq!(
            namespaces.clone_flags(),
            CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWIPC
        );
    }

    #[test]
    fn test_to_enter_lists_path_joins() {
        let namespaces = Namespaces::from(&gen_sample_namespaces()[..]);
        let to_enter: Vec<_> = namespaces.to_enter().iter().map(|ns| ns.typ).collect();
        assert_eq!(to_enter, vec![NamespaceType::Mount, NamespaceType::Network]);
    }

    #[test]
    fn test_apply_setns() {
        let namespaces = Namespaces::from(&gen_sample_namespaces()[..]);
        let syscall = TestHelperSyscall::default();
        assert!(namespaces.apply_setns(&syscall).is_ok());

        let mut setns_args: Vec<_> = syscall
            .get_setns_args()
            .into_iter()
            .map(|(_fd, cf)| cf)
            .collect();
        setns_args.sort();
        let mut expect = vec![CloneFlags::CLONE_NEWNS, CloneFlags::CLONE_NEWNET];
        expect.sort();
        assert_eq!(setns_args, expect);
    }

    #[test]
    fn test_duplicate_namespace_type_rejected() {
        let mut spaces = gen_sample_namespaces();
        spaces.push(Namespace {
            typ: NamespaceType::Pid,
            path: None,
        });
        let namespaces = Namespaces::from(&spaces[..]);
        assert!(matches!(
            namespaces.validate(),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_unknown_namespace_type_is_config_error() {
        assert!(matches!(
            "cgroup".parse::<NamespaceType>(),
            Err(Error::ConfigInvalid(_))
        ));
        assert!(serde_json::from_str::<Namespace>(r#"{"type": "z80"}"#).is_err());
    }
}
