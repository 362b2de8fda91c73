//! A veth pair acting as a cross-namespace cable: one end enslaved to a
//! bridge on the host, the other moved into the container's network
//! namespace and renamed to `eth0`.

use anyhow::{bail, Result};
use nix::unistd::Pid;

use super::driver::NetworkDriver;
use super::{Network, NetworkContext, NetworkStrategy};

const DEFAULT_DEVICE: &str = "eth0";

const CTX_VETH_HOST: &str = "veth-host";
const CTX_VETH_CHILD: &str = "veth-child";

pub struct Veth {}

impl NetworkStrategy for Veth {
    fn create(
        &self,
        driver: &dyn NetworkDriver,
        network: &Network,
        pid: Pid,
        context: &mut NetworkContext,
    ) -> Result<()> {
        let bridge = match network.context.get("bridge") {
            Some(bridge) => bridge,
            None => bail!("bridge does not exist in network context"),
        };
        let prefix = match network.context.get("prefix") {
            Some(prefix) => prefix,
            None => bail!("veth prefix does not exist in network context"),
        };

        let host = generate_name(prefix);
        let child = generate_name(prefix);
        context.insert(CTX_VETH_HOST.to_string(), host.clone());
        context.insert(CTX_VETH_CHILD.to_string(), child.clone());

        driver.create_veth_pair(&host, &child)?;
        driver.set_interface_master(&host, bridge)?;
        if let Some(mtu) = network.mtu {
            driver.set_mtu(&host, mtu)?;
        }
        driver.interface_up(&host)?;
        driver.move_to_netns(&child, pid)?;

        Ok(())
    }

    fn initialize(
        &self,
        driver: &dyn NetworkDriver,
        network: &Network,
        context: &NetworkContext,
    ) -> Result<()> {
        let child = match context.get(CTX_VETH_CHILD) {
            Some(child) => child,
            None => bail!("veth-child does not exist in network state"),
        };

        driver.interface_down(child)?;
        driver.rename_interface(child, DEFAULT_DEVICE)?;
        if let Some(address) = network.address.as_deref() {
            driver.set_ip_address(DEFAULT_DEVICE, address)?;
        }
        if let Some(mtu) = network.mtu {
            driver.set_mtu(DEFAULT_DEVICE, mtu)?;
        }
        driver.interface_up(DEFAULT_DEVICE)?;
        if let Some(gateway) = network.gateway.as_deref() {
            driver.set_default_gateway(gateway, DEFAULT_DEVICE)?;
        }

        Ok(())
    }
}

/// Host-unique interface name with a random hex suffix, e.g. `veth1a2b3c4`.
fn generate_name(prefix: &str) -> String {
    format!("{}{:07x}", prefix, fastrand::u32(..) & 0x0fff_ffff)
}
