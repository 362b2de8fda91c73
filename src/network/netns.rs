//! Attachment to a pre-existing network namespace: nothing is created,
//! the namespace path is recorded for the join step.

use anyhow::{bail, Result};
use nix::unistd::Pid;

use super::driver::NetworkDriver;
use super::{Network, NetworkContext, NetworkStrategy};

pub struct NetNs {}

impl NetworkStrategy for NetNs {
    fn create(
        &self,
        _driver: &dyn NetworkDriver,
        network: &Network,
        _pid: Pid,
        context: &mut NetworkContext,
    ) -> Result<()> {
        let nspath = match network.context.get("nspath") {
            Some(nspath) => nspath,
            None => bail!("nspath does not exist in network context"),
        };
        context.insert("nspath".to_string(), nspath.clone());
        Ok(())
    }

    fn initialize(
        &self,
        _driver: &dyn NetworkDriver,
        _network: &Network,
        _context: &NetworkContext,
    ) -> Result<()> {
        // the namespace is fully configured already
        Ok(())
    }
}
