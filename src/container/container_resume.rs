use anyhow::anyhow;

use super::{Container, Status};
use crate::cgroups::common::FreezerState;
use crate::error::{Error, Result};

impl Container {
    /// Thaws a paused container: `Paused -> Resuming -> Running`. Like
    /// pause, a failed freezer write leaves the container in the
    /// intermediate `Resuming` state for the caller to retry.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.lock_state();

        if !state.status.can_resume() {
            return Err(Error::System(anyhow!(
                "container {} could not be resumed because it was {}",
                self.id(),
                state.status
            )));
        }

        state.status = Status::Resuming;
        state.save(&self.root)?;

        if let Err(e) = self.cgroup_manager().freeze(FreezerState::Thawed) {
            return Err(Error::System(e.context("failed to thaw container")));
        }

        state.status = Status::Running;
        state.save(&self.root)?;

        log::debug!("container {} resumed", self.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::container::tests::{test_container_with_manager, FailingFreezeManager};
    use super::*;

    #[test]
    fn test_resume_failure_leaves_resuming() {
        let (_tmp, container) = test_container_with_manager(
            Box::new(FailingFreezeManager::new()),
            Status::Paused,
            Some(nix::unistd::getpid().as_raw()),
        );

        assert!(container.resume().is_err());
        assert_eq!(container.status(), Status::Resuming);
    }

    #[test]
    fn test_resume_requires_paused() {
        let (_tmp, container) = test_container_with_manager(
            Box::new(FailingFreezeManager::new()),
            Status::Running,
            Some(nix::unistd::getpid().as_raw()),
        );

        assert!(container.resume().is_err());
        assert_eq!(container.status(), Status::Running);
    }
}
