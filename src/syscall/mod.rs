//! A thin trait over the kernel primitives used during container setup,
//! so the rest of the crate can be exercised in unit tests without
//! touching the host.

#[allow(clippy::module_inception)]
pub mod syscall;

pub mod linux;

pub use syscall::{create_syscall, Syscall};
