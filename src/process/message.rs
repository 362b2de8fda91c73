//! Wire format of the synchronization pipe: length-prefixed JSON frames.
//! The supervisor sends the container configuration, the process
//! invocation and the network runtime state, in that order; the child
//! sends back at most one [`InitError`] before end-of-stream.

use std::fmt::{self, Display};
use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Upper bound on a single frame; a configuration cannot plausibly get
/// this large, so anything bigger is a corrupted stream.
const MAX_FRAME_SIZE: u32 = 1 << 20;

pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let payload = serde_json::to_vec(message).context("failed to encode message")?;
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .context("failed to write message header")?;
    writer
        .write_all(&payload)
        .context("failed to write message payload")?;
    writer.flush()?;
    Ok(())
}

pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .context("failed to read message header")?;
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_SIZE {
        bail!("message of {} bytes exceeds the frame limit", len);
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .context("failed to read message payload")?;
    let message = serde_json::from_slice(&payload).context("failed to decode message")?;
    Ok(message)
}

/// Structured setup failure reported by the child over the pipe. The
/// supervisor surfaces it as the cause of the failed start, never as a
/// bare transport error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitError {
    pub message: String,
}

impl From<&anyhow::Error> for InitError {
    fn from(err: &anyhow::Error) -> Self {
        InitError {
            // {:#} renders the whole context chain on one line
            message: format!("{:#}", err),
        }
    }
}

impl Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container init failed: {}", self.message)
    }
}

impl std::error::Error for InitError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Process;

    #[test]
    fn test_round_trip() {
        let process = Process {
            args: vec!["sleep".to_string(), "5".to_string()],
            env: vec!["TERM=xterm".to_string()],
            ..Default::default()
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &process).unwrap();
        let decoded: Process = read_message(&mut buf.as_slice()).unwrap();
        assert_eq!(process, decoded);
    }

    #[test]
    fn test_sequential_messages() {
        let mut buf = Vec::new();
        write_message(&mut buf, &1u32).unwrap();
        write_message(&mut buf, &"two".to_string()).unwrap();

        let mut reader = buf.as_slice();
        let first: u32 = read_message(&mut reader).unwrap();
        let second: String = read_message(&mut reader).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, "two");
    }

    #[test]
    fn test_truncated_stream_is_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, &"payload".to_string()).unwrap();
        buf.truncate(buf.len() - 2);

        let result: Result<String> = read_message(&mut buf.as_slice());
        assert!(result.is_err());
    }

    #[test]
    fn test_init_error_carries_context_chain() {
        let err = anyhow::anyhow!("no such file").context("failed to mount /proc");
        let init_err = InitError::from(&err);
        assert!(init_err.message.contains("failed to mount /proc"));
        assert!(init_err.message.contains("no such file"));
    }
}
