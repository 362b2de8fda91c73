use anyhow::anyhow;

use super::{Container, Status};
use crate::cgroups::common::FreezerState;
use crate::error::{Error, Result};

impl Container {
    /// Suspends every process in the container through the freezer.
    /// The transition goes `Running -> Pausing -> Paused`; if the
    /// freezer write fails the container deliberately stays in
    /// `Pausing` — the freezer is the source of truth and must not be
    /// assumed thawed without confirmation. Retrying is the caller's
    /// decision.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.lock_state();

        if !state.status.can_pause() {
            return Err(Error::System(anyhow!(
                "container {} could not be paused because it was {}",
                self.id(),
                state.status
            )));
        }

        state.status = Status::Pausing;
        state.save(&self.root)?;

        if let Err(e) = self.cgroup_manager().freeze(FreezerState::Frozen) {
            return Err(Error::System(e.context("failed to freeze container")));
        }

        state.status = Status::Paused;
        state.save(&self.root)?;

        log::debug!("container {} paused", self.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::container::tests::{test_container_with_manager, FailingFreezeManager};
    use super::*;

    #[test]
    fn test_pause_failure_leaves_pausing() {
        let (_tmp, container) = test_container_with_manager(
            Box::new(FailingFreezeManager::new()),
            Status::Running,
            Some(nix::unistd::getpid().as_raw()),
        );

        let result = container.pause();
        assert!(result.is_err());
        // no rollback: the intermediate state is the record of the
        // unconfirmed freezer
        assert_eq!(container.status(), Status::Pausing);
    }

    #[test]
    fn test_pause_requires_running() {
        let (_tmp, container) = test_container_with_manager(
            Box::new(FailingFreezeManager::new()),
            Status::Destroyed,
            None,
        );

        assert!(container.pause().is_err());
        assert_eq!(container.status(), Status::Destroyed);
    }
}
