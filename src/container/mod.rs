//! Container management

#[allow(clippy::module_inception)]
mod container;
mod container_checkpoint;
mod container_pause;
mod container_resume;
mod state;

pub use container::Container;
pub use state::{State, Status};
