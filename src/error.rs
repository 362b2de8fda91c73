//! Error kinds surfaced by every externally observable operation.
//!
//! Internal plumbing uses [`anyhow`] for context chains; anything that is
//! not one of the dedicated lifecycle conditions is reported as
//! [`Error::System`] with the underlying chain as its cause.

use thiserror::Error;

use crate::container::Status;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or semantically invalid configuration, including unknown
    /// namespace, network strategy or capability names.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("container with id exists: {id}")]
    IdInUse { id: String },

    #[error("container {id} does not exist")]
    ContainerNotExists { id: String },

    #[error("invalid id format: {id}")]
    InvalidIdFormat { id: String },

    /// Destroy was requested while a process is still live.
    #[error("container {id} is not stopped: {status}")]
    ContainerNotStopped { id: String, status: Status },

    /// The operation targets a pid that is not a member of the container.
    #[error("process {pid} does not belong to container {id}")]
    ProcessNotExists { id: String, pid: i32 },

    #[error("system error: {0:#}")]
    System(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_error_preserves_cause() {
        let cause = anyhow::anyhow!("mount failed").context("setting up rootfs");
        let err: Error = cause.into();
        let rendered = err.to_string();
        assert!(rendered.contains("setting up rootfs"));
        assert!(rendered.contains("mount failed"));
    }
}
