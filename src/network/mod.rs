//! Network setup strategies. A strategy runs in two phases: `create` on
//! the host side before the child namespace exists, and `initialize`
//! from inside the new namespace once it does. Strategies are stateless;
//! everything they learn or decide is recorded in the flat string
//! context that travels with the container state.

pub mod driver;

mod loopback;
mod netns;
mod veth;

use std::collections::HashMap;

use anyhow::Result;
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use driver::NetworkDriver;

pub use loopback::Loopback;
pub use netns::NetNs;
pub use veth::Veth;

/// Flat string map used both as strategy input and as the channel
/// through which a strategy records generated facts (device names,
/// namespace paths) for later phases.
pub type NetworkContext = HashMap<String, String>;

/// A network attachment requested by the container configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Network {
    /// Registered strategy name, e.g. `veth` or `loopback`.
    pub strategy: String,
    /// Address in CIDR notation assigned to the namespace-local device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    /// Strategy input such as `bridge` and `prefix` for veth, or
    /// `nspath` for a pre-existing namespace.
    pub context: HashMap<String, String>,
}

pub trait NetworkStrategy: Send + Sync {
    /// Host-side device creation, run before the child namespace is
    /// entered. `pid` is the child the devices belong to.
    fn create(
        &self,
        driver: &dyn NetworkDriver,
        network: &Network,
        pid: Pid,
        context: &mut NetworkContext,
    ) -> Result<()>;

    /// Finalizes the namespace-local device; runs with visibility into
    /// the new namespace.
    fn initialize(
        &self,
        driver: &dyn NetworkDriver,
        network: &Network,
        context: &NetworkContext,
    ) -> Result<()>;
}

static STRATEGIES: Lazy<HashMap<&'static str, Box<dyn NetworkStrategy>>> = Lazy::new(|| {
    let mut strategies: HashMap<&'static str, Box<dyn NetworkStrategy>> = HashMap::new();
    strategies.insert("veth", Box::new(Veth {}));
    strategies.insert("loopback", Box::new(Loopback {}));
    strategies.insert("netns", Box::new(NetNs {}));
    strategies
});

/// Looks up the strategy registered for `name`. An unregistered name is
/// a configuration error.
pub fn get_strategy(name: &str) -> Result<&'static dyn NetworkStrategy, Error> {
    STRATEGIES
        .get(name)
        .map(|s| s.as_ref())
        .ok_or_else(|| Error::ConfigInvalid(format!("not a valid network strategy type: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_strategies() {
        assert!(get_strategy("veth").is_ok());
        assert!(get_strategy("loopback").is_ok());
        assert!(get_strategy("netns").is_ok());
    }

    #[test]
    fn test_unknown_strategy_is_config_error() {
        assert!(matches!(
            get_strategy("token-ring"),
            Err(Error::ConfigInvalid(_))
        ));
    }
}
