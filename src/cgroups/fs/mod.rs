//! The plain cgroupfs backend: one directory per subsystem mount point.

mod blkio;
mod controller;
mod controller_type;
mod cpu;
mod cpuacct;
mod cpuset;
mod devices;
mod freezer;
mod manager;
mod memory;
pub mod util;

pub use controller::Controller;
pub use controller_type::{ControllerType, CONTROLLERS};
pub use freezer::Freezer;
pub use manager::Manager;

pub(crate) use manager::{
    apply_all, collect_stats, destroy_all, freeze_all, pids_of,
};
