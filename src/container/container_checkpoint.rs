use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use nix::unistd::Pid;

use super::{Container, Status};
use crate::error::{Error, Result};
use crate::process::exec;
use crate::utils;

impl Container {
    /// Serializes the running (or paused) container to `image_path`
    /// with the external checkpoint tool. The state transition is
    /// atomic with respect to the tool's exit status: the lock is held
    /// across the invocation, and only a successful exit flips the
    /// container to `Checkpointed`. The dumped processes are no longer
    /// schedulable afterwards.
    pub fn checkpoint(&self, image_path: &Path) -> Result<()> {
        let mut state = self.lock_state();

        if !state.status.can_checkpoint() {
            return Err(Error::System(anyhow!(
                "container {} could not be checkpointed because it was {}",
                self.id(),
                state.status
            )));
        }

        let init_pid = state
            .init_pid
            .ok_or_else(|| Error::System(anyhow!("no init process recorded")))?;

        utils::create_dir_all(image_path)?;

        let status = Command::new(self.checkpoint_tool())
            .arg("dump")
            .arg("--images-dir")
            .arg(image_path)
            .arg("--tree")
            .arg(init_pid.to_string())
            .status()
            .context("failed to run the checkpoint tool")?;

        if !status.success() {
            return Err(Error::System(anyhow!(
                "checkpoint tool exited with {}",
                status
            )));
        }

        // the dump killed the process tree; clearing the pid first keeps
        // the background reaper from treating this as a normal exit
        state.init_pid = None;
        state.init_start_time = None;
        state.processes.clear();
        state.status = Status::Checkpointed;
        state.save(&self.root)?;
        self.notify_state_changed();

        log::debug!("container {} checkpointed to {:?}", self.id(), image_path);
        Ok(())
    }

    /// Reconstructs the container from a checkpoint image. On success
    /// this behaves like a fresh init start: the restored pid and its
    /// start time are re-captured and the container returns to
    /// `Running`. A failed restore leaves the state `Checkpointed`.
    pub fn restore(self: &Arc<Self>, image_path: &Path) -> Result<()> {
        let mut state = self.lock_state();

        if !state.status.can_restore() {
            return Err(Error::System(anyhow!(
                "container {} could not be restored because it was {}",
                self.id(),
                state.status
            )));
        }

        let pidfile = self.root.join("restore.pid");
        if pidfile.exists() {
            fs::remove_file(&pidfile)
                .with_context(|| format!("failed to remove stale pidfile {:?}", pidfile))?;
        }

        let status = Command::new(self.checkpoint_tool())
            .arg("restore")
            .arg("--images-dir")
            .arg(image_path)
            .arg("--restore-detached")
            .arg("--pidfile")
            .arg(&pidfile)
            .status()
            .context("failed to run the restore tool")?;

        if !status.success() {
            return Err(Error::System(anyhow!(
                "restore tool exited with {}",
                status
            )));
        }

        let pid: i32 = fs::read_to_string(&pidfile)
            .context("failed to read restored pidfile")?
            .trim()
            .parse()
            .context("restored pidfile does not contain a pid")?;
        let pid = Pid::from_raw(pid);
        let start_time = exec::process_start_time(pid)?;

        state.init_pid = Some(pid.as_raw());
        state.init_start_time = Some(start_time);
        state.exit_status = None;
        state.status = Status::Running;
        state.save(&self.root)?;
        self.notify_state_changed();

        self.spawn_init_reaper(pid);

        log::debug!("container {} restored from {:?}", self.id(), image_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::container::tests::{test_container_with_manager, FailingFreezeManager};
    use super::*;

    #[test]
    fn test_checkpoint_requires_running_or_paused() {
        let (tmp, container) = test_container_with_manager(
            Box::new(FailingFreezeManager::new()),
            Status::Destroyed,
            None,
        );

        let result = container.checkpoint(&tmp.path().join("image"));
        assert!(result.is_err());
        assert_eq!(container.status(), Status::Destroyed);
    }

    #[test]
    fn test_restore_requires_checkpointed() {
        let (tmp, container) = test_container_with_manager(
            Box::new(FailingFreezeManager::new()),
            Status::Running,
            Some(nix::unistd::getpid().as_raw()),
        );

        let result = container.restore(&tmp.path().join("image"));
        assert!(result.is_err());
        assert_eq!(container.status(), Status::Running);
    }

    #[test]
    fn test_failed_checkpoint_leaves_state_unchanged() {
        let (tmp, container) = test_container_with_manager(
            Box::new(FailingFreezeManager::new()),
            Status::Running,
            Some(nix::unistd::getpid().as_raw()),
        );
        // the test tool always exits nonzero, so the dump reports failure
        let result = container.checkpoint(&tmp.path().join("image"));
        assert!(result.is_err());
        assert_eq!(container.status(), Status::Running);
        assert!(container.pid().is_some());
    }
}
