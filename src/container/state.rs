//! Status and persisted state of a container.

use std::collections::HashMap;
use std::fmt::Display;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::NetworkContext;

/// The lifecycle position of a container. A container without a live
/// init process is `Destroyed`, including one that was never started.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Running,
    /// The freezer write is in flight; left in place if it fails.
    Pausing,
    Paused,
    /// The thaw write is in flight; left in place if it fails.
    Resuming,
    Destroyed,
    /// Serialized to disk by the checkpoint tool; not schedulable until
    /// restored.
    Checkpointed,
}

impl Default for Status {
    fn default() -> Self {
        Status::Destroyed
    }
}

impl Status {
    pub fn can_start(&self) -> bool {
        matches!(self, Status::Destroyed)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, Status::Running)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, Status::Paused)
    }

    pub fn can_destroy(&self) -> bool {
        matches!(self, Status::Destroyed)
    }

    pub fn can_checkpoint(&self) -> bool {
        matches!(self, Status::Running | Status::Paused)
    }

    pub fn can_restore(&self) -> bool {
        matches!(self, Status::Checkpointed)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Running => "Running",
            Self::Pausing => "Pausing",
            Self::Paused => "Paused",
            Self::Resuming => "Resuming",
            Self::Destroyed => "Destroyed",
            Self::Checkpointed => "Checkpointed",
        };

        write!(f, "{}", print)
    }
}

/// The mutable half of a container, persisted as `state.json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    pub id: String,
    pub status: Status,
    /// Pid of the init process while one is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_pid: Option<i32>,
    /// Kernel start time of the init process, the pid-reuse guard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_start_time: Option<u64>,
    /// Pids of additionally joined processes still running.
    pub processes: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Subsystem to hierarchy-node mapping of the cgroup manager.
    pub cgroup_paths: HashMap<String, PathBuf>,
    /// Facts recorded by the network strategies during setup.
    pub network_state: NetworkContext,
    /// Exit status of the init process once it has been reaped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
}

impl State {
    const STATE_FILE_PATH: &'static str = "state.json";

    pub fn new(container_id: &str) -> Self {
        Self {
            id: container_id.to_string(),
            status: Status::Destroyed,
            ..Default::default()
        }
    }

    /// Writes the state to a temporary file and renames it into place,
    /// so a crash mid-write never leaves a half-written state file
    /// observable to a concurrent load.
    pub fn save(&self, container_root: &Path) -> Result<()> {
        let state_file_path = Self::file_path(container_root);
        let tmp_file_path = container_root.join(format!("{}.new", Self::STATE_FILE_PATH));

        let file = File::create(&tmp_file_path)
            .with_context(|| format!("failed to create state file {:?}", tmp_file_path))?;
        if let Err(e) = serde_json::to_writer(&file, self) {
            drop(file);
            let _ = fs::remove_file(&tmp_file_path);
            return Err(e).context("failed to encode container state");
        }
        drop(file);

        fs::rename(&tmp_file_path, &state_file_path)
            .with_context(|| format!("failed to move state file to {:?}", state_file_path))?;
        Ok(())
    }

    pub fn load(container_root: &Path) -> Result<Self> {
        let state_file_path = Self::file_path(container_root);
        let file = File::open(&state_file_path).with_context(|| {
            format!("failed to open container state file {:?}", state_file_path)
        })?;
        let state: Self = serde_json::from_reader(&file)?;
        Ok(state)
    }

    pub fn file_path(container_root: &Path) -> PathBuf {
        container_root.join(Self::STATE_FILE_PATH)
    }
}
