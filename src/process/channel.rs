//! Directional endpoints of the synchronization pipe. The supervisor
//! half writes the three setup messages and then reads the optional
//! error; the init half mirrors it. Both ends are closed on every exit
//! path, and the error-pipe write end is close-on-exec, so a successful
//! exec of the payload yields the clean end-of-stream the supervisor
//! treats as success.

use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mio::unix::pipe;
use mio::unix::pipe::{Receiver, Sender};
use mio::{Events, Interest, Poll, Token};
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::config::{Config, Process};
use crate::network::NetworkContext;
use crate::process::message::{self, InitError};

const INIT: Token = Token(0);

pub fn new() -> Result<(SupervisorChannel, InitChannel)> {
    let (config_tx, config_rx) = pipe::new()?;
    let (err_tx, mut err_rx) = pipe::new()?;

    let poll = Poll::new()?;
    poll.registry()
        .register(&mut err_rx, INIT, Interest::READABLE)?;

    // mio pipes come up nonblocking; only the polled error read side
    // stays that way
    set_blocking(config_tx.as_raw_fd())?;
    set_blocking(config_rx.as_raw_fd())?;
    set_blocking(err_tx.as_raw_fd())?;

    Ok((
        SupervisorChannel {
            config_tx: Some(config_tx),
            err_rx,
            poll,
        },
        InitChannel {
            config_rx,
            err_tx: Some(err_tx),
        },
    ))
}

fn set_blocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.remove(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

pub struct SupervisorChannel {
    config_tx: Option<Sender>,
    err_rx: Receiver,
    poll: Poll,
}

impl SupervisorChannel {
    pub fn send_config(&mut self, config: &Config) -> Result<()> {
        let tx = self
            .config_tx
            .as_mut()
            .context("write side of the pipe is already closed")?;
        message::write_message(tx, config).context("failed to send container configuration")
    }

    pub fn send_process(&mut self, process: &Process) -> Result<()> {
        let tx = self
            .config_tx
            .as_mut()
            .context("write side of the pipe is already closed")?;
        message::write_message(tx, process).context("failed to send process invocation")
    }

    pub fn send_network(&mut self, context: &NetworkContext) -> Result<()> {
        let tx = self
            .config_tx
            .as_mut()
            .context("write side of the pipe is already closed")?;
        message::write_message(tx, context).context("failed to send network state")
    }

    /// Half-closes the supervisor's write direction. After this the
    /// child can observe end-of-stream on its config side.
    pub fn close_writes(&mut self) {
        self.config_tx.take();
    }

    /// Reads the optional structured error from the child, blocking
    /// until end-of-stream. `None` means setup succeeded and the child
    /// has exec'd the payload. A `timeout` of `None` blocks forever;
    /// exceeding a given timeout is an error and the caller must
    /// terminate and reap the child.
    pub fn wait_for_init(&mut self, timeout: Option<Duration>) -> Result<Option<InitError>> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let mut events = Events::with_capacity(8);

        'wait: loop {
            self.poll
                .poll(&mut events, timeout)
                .context("failed to poll the init pipe")?;
            if events.is_empty() {
                bail!("timed out waiting for the init process");
            }

            loop {
                match self.err_rx.read(&mut chunk) {
                    Ok(0) => break 'wait,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue 'wait,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return Err(e).context("failed to read from the init pipe");
                    }
                }
            }
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let err: InitError = message::read_message(&mut buf.as_slice())
            .context("failed to decode the init error message")?;
        Ok(Some(err))
    }
}

pub struct InitChannel {
    config_rx: Receiver,
    err_tx: Option<Sender>,
}

impl InitChannel {
    pub fn recv_config(&mut self) -> Result<Config> {
        message::read_message(&mut self.config_rx)
            .context("failed to receive container configuration")
    }

    pub fn recv_process(&mut self) -> Result<Process> {
        message::read_message(&mut self.config_rx).context("failed to receive process invocation")
    }

    /// Blocks until the supervisor has finished cgroup application and
    /// host-side network creation; the payload is the strategy context
    /// those steps recorded.
    pub fn recv_network(&mut self) -> Result<NetworkContext> {
        message::read_message(&mut self.config_rx).context("failed to receive network state")
    }

    pub fn report_error(&mut self, err: InitError) -> Result<()> {
        if let Some(tx) = self.err_tx.as_mut() {
            message::write_message(tx, &err)?;
        }
        self.close();
        Ok(())
    }

    pub fn close(&mut self) {
        self.err_tx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_config_messages_flow_supervisor_to_init() {
        let (mut supervisor, mut init) = new().unwrap();

        let config = Config {
            init_command: vec!["sleep".to_string(), "5".to_string()],
            ..Default::default()
        };
        let process = Process {
            args: vec!["true".to_string()],
            ..Default::default()
        };
        let mut network = NetworkContext::new();
        network.insert("veth-host".to_string(), "veth0a1b2c3".to_string());

        supervisor.send_config(&config).unwrap();
        supervisor.send_process(&process).unwrap();
        supervisor.send_network(&network).unwrap();
        supervisor.close_writes();

        assert_eq!(init.recv_config().unwrap(), config);
        assert_eq!(init.recv_process().unwrap(), process);
        assert_eq!(init.recv_network().unwrap(), network);
    }

    #[test]
    fn test_clean_eof_means_success() {
        let (mut supervisor, mut init) = new().unwrap();
        init.close();

        let outcome = supervisor.wait_for_init(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn test_error_message_is_decoded() {
        let (mut supervisor, mut init) = new().unwrap();

        let handle = std::thread::spawn(move || {
            init.report_error(InitError {
                message: "failed to mount /proc".to_string(),
            })
            .unwrap();
        });

        let outcome = supervisor.wait_for_init(Some(Duration::from_secs(5))).unwrap();
        handle.join().unwrap();
        assert_eq!(
            outcome,
            Some(InitError {
                message: "failed to mount /proc".to_string(),
            })
        );
    }

    #[test]
    fn test_wait_for_init_times_out() {
        let (mut supervisor, _init) = new().unwrap();

        // keep _init alive so no EOF arrives
        let outcome = supervisor.wait_for_init(Some(Duration::from_millis(50)));
        assert!(outcome.is_err());
    }
}
