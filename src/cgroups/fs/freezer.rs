use std::path::Path;
use std::{thread, time};

use anyhow::{bail, Result};

use super::Controller;
use crate::cgroups::common::{self, CgroupConfig, FreezerState};

const CGROUP_FREEZER_STATE: &str = "freezer.state";
const FREEZER_STATE_FREEZING: &str = "FREEZING";

pub struct Freezer {}

impl Controller for Freezer {
    fn apply(cgroup: &CgroupConfig, cgroup_root: &Path) -> Result<()> {
        if let Some(freezer_state) = cgroup.freezer {
            log::debug!("Apply Freezer cgroup config");
            Self::apply_state(freezer_state, cgroup_root)?;
        }

        Ok(())
    }
}

impl Freezer {
    /// Writes the freezer state and waits for the kernel to settle.
    /// Freezing is asynchronous; the state file reports FREEZING until
    /// every task in the group is stopped.
    pub fn apply_state(freezer_state: FreezerState, cgroup_root: &Path) -> Result<()> {
        let state_path = cgroup_root.join(CGROUP_FREEZER_STATE);

        match freezer_state {
            FreezerState::Thawed => {
                common::write_cgroup_file_str(&state_path, freezer_state.as_str())?;
            }
            FreezerState::Frozen => {
                // retry while FREEZING is reported; a loaded system can
                // take a few iterations to stop every task
                for i in 0..1000 {
                    common::write_cgroup_file_str(&state_path, freezer_state.as_str())?;

                    if i % 25 == 24 {
                        thread::sleep(time::Duration::from_millis(10));
                    }

                    let current = common::read_cgroup_file(&state_path)?;
                    match current.trim() {
                        FREEZER_STATE_FREEZING => continue,
                        state if state == FreezerState::Frozen.as_str() => {
                            if i > 1 {
                                log::debug!("frozen after {} retries", i)
                            }
                            return Ok(());
                        }
                        unexpected => {
                            bail!("unexpected state {} while freezing", unexpected);
                        }
                    }
                }
                bail!("unable to freeze");
            }
        }

        Ok(())
    }

    pub fn read_state(cgroup_root: &Path) -> Result<String> {
        common::read_cgroup_file(cgroup_root.join(CGROUP_FREEZER_STATE))
    }
}
