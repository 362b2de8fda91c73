//! Basic loopback device setup inside the new namespace.

use anyhow::{Context, Result};
use nix::unistd::Pid;

use super::driver::NetworkDriver;
use super::{Network, NetworkContext, NetworkStrategy};

pub struct Loopback {}

impl NetworkStrategy for Loopback {
    fn create(
        &self,
        _driver: &dyn NetworkDriver,
        _network: &Network,
        _pid: Pid,
        _context: &mut NetworkContext,
    ) -> Result<()> {
        // lo already exists in every new network namespace
        Ok(())
    }

    fn initialize(
        &self,
        driver: &dyn NetworkDriver,
        network: &Network,
        _context: &NetworkContext,
    ) -> Result<()> {
        if let Some(mtu) = network.mtu {
            driver
                .set_mtu("lo", mtu)
                .with_context(|| format!("set lo mtu to {}", mtu))?;
        }
        driver.interface_up("lo").context("lo up")?;
        Ok(())
    }
}
