//! The supervisor side of the exec protocol.

use std::time::Duration;

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use procfs::process::Process as ProcfsProcess;

use crate::cgroups::common::CgroupManager;
use crate::config::{self, Config, Process};
use crate::namespaces::{NamespaceType, Namespaces};
use crate::network::{self, driver::create_driver, NetworkContext};
use crate::process::{channel, fork, init};
use crate::syscall::create_syscall;

/// Everything the supervisor records about a freshly started init
/// process.
pub struct StartedInit {
    pub pid: Pid,
    /// Kernel start time of the process, used to detect pid reuse.
    pub start_time: u64,
    /// Facts the network strategies recorded during setup.
    pub network_state: NetworkContext,
}

/// Init path: spawns the namespaced child, drives the synchronization
/// handshake and returns once the child has exec'd the payload.
///
/// The ordering contract: configuration and process messages are written
/// first, then cgroups are applied and host-side network devices created
/// from the parent, then the network message releases the child. Writes
/// are half-closed before the optional error is read. On any failure the
/// child is terminated and reaped; nothing of the attempt leaks.
pub fn exec_init(
    config: &Config,
    process: &Process,
    cgroup_manager: &dyn CgroupManager,
    timeout: Option<Duration>,
) -> Result<StartedInit> {
    let namespaces = Namespaces::from(&config.namespaces[..]);
    let (mut supervisor, init_channel) = channel::new()?;

    let cb: nix::sched::CloneCb = {
        let mut init_channel = init_channel;
        Box::new(move || {
            let syscall = create_syscall();
            let driver = create_driver();
            init::container_init(&mut init_channel, syscall.as_ref(), driver.as_ref())
        })
    };

    let pid = fork::clone(cb, namespaces.clone_flags()).context("failed to clone init process")?;
    log::debug!("cloned init process with pid {}", pid);

    let terminate = |err: anyhow::Error| -> anyhow::Error {
        let _ = kill(pid, Signal::SIGKILL);
        let _ = waitpid(pid, None);
        err
    };

    if let Err(e) = supervisor.send_config(config) {
        return Err(terminate(e));
    }
    if let Err(e) = supervisor.send_process(process) {
        return Err(terminate(e));
    }

    let start_time = match process_start_time(pid) {
        Ok(start_time) => start_time,
        Err(e) => return Err(terminate(e)),
    };

    // apply cgroups from the parent before the child can exec so no
    // process ever escapes the group
    if let Err(e) = cgroup_manager.apply(pid) {
        return Err(terminate(e.context("failed to apply cgroup configuration")));
    }

    let mut network_state = NetworkContext::new();
    if let Err(e) = create_networks(config, pid, &mut network_state) {
        return Err(terminate(e));
    }

    if let Err(e) = supervisor.send_network(&network_state) {
        return Err(terminate(e));
    }
    supervisor.close_writes();

    match supervisor.wait_for_init(timeout) {
        Ok(None) => Ok(StartedInit {
            pid,
            start_time,
            network_state,
        }),
        Ok(Some(init_err)) => Err(terminate(
            anyhow::Error::new(init_err).context("container setup failed"),
        )),
        Err(e) => Err(terminate(e)),
    }
}

/// Join path: a new process enters the existing namespaces of the init
/// process and execs. No mount, device or network setup is repeated.
pub fn exec_join(
    config: &Config,
    init_pid: Pid,
    process: &Process,
    timeout: Option<Duration>,
) -> Result<Pid> {
    let namespace_types: Vec<NamespaceType> = config
        .namespaces
        .iter()
        .map(|ns| ns.typ)
        .collect();
    let env = config::build_env(config, process);
    let (mut supervisor, init_channel) = channel::new()?;

    let cb: nix::sched::CloneCb = {
        let mut init_channel = init_channel;
        let process = process.clone();
        Box::new(move || {
            let syscall = create_syscall();
            init::container_join(
                &mut init_channel,
                init_pid,
                &namespace_types,
                &process,
                &env,
                syscall.as_ref(),
            )
        })
    };

    let pid = fork::clone(cb, nix::sched::CloneFlags::empty())
        .context("failed to clone joining process")?;
    log::debug!("cloned joining process with pid {}", pid);

    let terminate = |err: anyhow::Error| -> anyhow::Error {
        let _ = kill(pid, Signal::SIGKILL);
        let _ = waitpid(pid, None);
        err
    };

    supervisor.close_writes();
    match supervisor.wait_for_init(timeout) {
        Ok(None) => Ok(pid),
        Ok(Some(init_err)) => Err(terminate(
            anyhow::Error::new(init_err).context("joining the container failed"),
        )),
        Err(e) => Err(terminate(e)),
    }
}

/// Start time of `pid` in clock ticks since boot, from the kernel's
/// process accounting. Stable for the lifetime of the process and never
/// reused together with the same pid.
pub fn process_start_time(pid: Pid) -> Result<u64> {
    let process = ProcfsProcess::new(pid.as_raw())
        .with_context(|| format!("failed to read process info for {}", pid))?;
    Ok(process.stat.starttime)
}

fn create_networks(config: &Config, pid: Pid, context: &mut NetworkContext) -> Result<()> {
    let driver = create_driver();
    for net in &config.networks {
        let strategy = network::get_strategy(&net.strategy)?;
        strategy
            .create(driver.as_ref(), net, pid, context)
            .with_context(|| format!("failed to create {} network", net.strategy))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_start_time_of_self() {
        let pid = nix::unistd::getpid();
        let start_time = process_start_time(pid).expect("own start time");
        assert!(start_time > 0);
    }

    #[test]
    fn test_process_start_time_of_missing_pid() {
        // pid 0 never shows up under /proc
        assert!(process_start_time(Pid::from_raw(0)).is_err());
    }
}
