//! The device-plumbing boundary. The strategies describe *what* happens
//! to interfaces; this trait owns *how*, so the exact netlink mechanics
//! stay out of the core and tests can observe every operation.

use std::any::Any;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{bail, Result};
use nix::unistd::Pid;

pub trait NetworkDriver: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn create_veth_pair(&self, host: &str, peer: &str) -> Result<()>;
    fn set_mtu(&self, interface: &str, mtu: u32) -> Result<()>;
    fn interface_up(&self, interface: &str) -> Result<()>;
    fn interface_down(&self, interface: &str) -> Result<()>;
    fn rename_interface(&self, from: &str, to: &str) -> Result<()>;
    fn set_interface_master(&self, interface: &str, master: &str) -> Result<()>;
    fn set_ip_address(&self, interface: &str, address: &str) -> Result<()>;
    fn set_default_gateway(&self, gateway: &str, interface: &str) -> Result<()>;
    /// Moves a host-visible interface into the network namespace of
    /// `pid`.
    fn move_to_netns(&self, interface: &str, pid: Pid) -> Result<()>;
}

/// Production driver delegating to iproute2.
pub struct IprouteDriver;

impl IprouteDriver {
    fn ip(&self, args: &[&str]) -> Result<()> {
        log::debug!("ip {}", args.join(" "));
        let output = Command::new("ip").args(args).output()?;
        if !output.status.success() {
            bail!(
                "ip {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl NetworkDriver for IprouteDriver {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn create_veth_pair(&self, host: &str, peer: &str) -> Result<()> {
        self.ip(&["link", "add", host, "type", "veth", "peer", "name", peer])
    }

    fn set_mtu(&self, interface: &str, mtu: u32) -> Result<()> {
        self.ip(&["link", "set", "dev", interface, "mtu", &mtu.to_string()])
    }

    fn interface_up(&self, interface: &str) -> Result<()> {
        self.ip(&["link", "set", "dev", interface, "up"])
    }

    fn interface_down(&self, interface: &str) -> Result<()> {
        self.ip(&["link", "set", "dev", interface, "down"])
    }

    fn rename_interface(&self, from: &str, to: &str) -> Result<()> {
        self.ip(&["link", "set", "dev", from, "name", to])
    }

    fn set_interface_master(&self, interface: &str, master: &str) -> Result<()> {
        self.ip(&["link", "set", "dev", interface, "master", master])
    }

    fn set_ip_address(&self, interface: &str, address: &str) -> Result<()> {
        self.ip(&["addr", "add", address, "dev", interface])
    }

    fn set_default_gateway(&self, gateway: &str, interface: &str) -> Result<()> {
        self.ip(&["route", "add", "default", "via", gateway, "dev", interface])
    }

    fn move_to_netns(&self, interface: &str, pid: Pid) -> Result<()> {
        self.ip(&[
            "link",
            "set",
            "dev",
            interface,
            "netns",
            &pid.as_raw().to_string(),
        ])
    }
}

pub fn create_driver() -> Box<dyn NetworkDriver> {
    if cfg!(test) {
        Box::new(TestNetworkDriver::default())
    } else {
        Box::new(IprouteDriver)
    }
}

/// Recording driver for unit tests.
#[derive(Default)]
pub struct TestNetworkDriver {
    calls: Mutex<Vec<Vec<String>>>,
}

impl TestNetworkDriver {
    fn record(&self, call: &[&str]) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.iter().map(|s| s.to_string()).collect());
    }

    pub fn get_calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl NetworkDriver for TestNetworkDriver {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn create_veth_pair(&self, host: &str, peer: &str) -> Result<()> {
        self.record(&["create_veth_pair", host, peer]);
        Ok(())
    }

    fn set_mtu(&self, interface: &str, mtu: u32) -> Result<()> {
        self.record(&["set_mtu", interface, &mtu.to_string()]);
        Ok(())
    }

    fn interface_up(&self, interface: &str) -> Result<()> {
        self.record(&["interface_up", interface]);
        Ok(())
    }

    fn interface_down(&self, interface: &str) -> Result<()> {
        self.record(&["interface_down", interface]);
        Ok(())
    }

    fn rename_interface(&self, from: &str, to: &str) -> Result<()> {
        self.record(&["rename_interface", from, to]);
        Ok(())
    }

    fn set_interface_master(&self, interface: &str, master: &str) -> Result<()> {
        self.record(&["set_interface_master", interface, master]);
        Ok(())
    }

    fn set_ip_address(&self, interface: &str, address: &str) -> Result<()> {
        self.record(&["set_ip_address", interface, address]);
        Ok(())
    }

    fn set_default_gateway(&self, gateway: &str, interface: &str) -> Result<()> {
        self.record(&["set_default_gateway", gateway, interface]);
        Ok(())
    }

    fn move_to_netns(&self, interface: &str, pid: Pid) -> Result<()> {
        self.record(&["move_to_netns", interface, &pid.as_raw().to_string()]);
        Ok(())
    }
}
