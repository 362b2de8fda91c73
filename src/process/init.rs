//! The child side of the exec protocol. Runs inside the freshly created
//! namespaces, never returns on success: the last thing it does is
//! replace its own image with the payload command.

use std::path::Path;

use anyhow::{bail, Context, Result};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{self, Pid};

use crate::capabilities;
use crate::config::{self, Process};
use crate::namespaces::{NamespaceType, Namespaces};
use crate::network;
use crate::network::driver::NetworkDriver;
use crate::process::channel::InitChannel;
use crate::process::message::InitError;
use crate::rootfs;
use crate::syscall::Syscall;
use crate::utils;

/// Entry point of the init-path child. Any setup failure is reported
/// over the pipe as a structured error before the child exits nonzero;
/// the payload is only exec'd once every step has succeeded.
pub fn container_init(
    channel: &mut InitChannel,
    syscall: &dyn Syscall,
    driver: &dyn NetworkDriver,
) -> isize {
    if let Err(err) = init_and_exec(channel, syscall, driver) {
        log::debug!("container init failed: {:#}", err);
        let _ = channel.report_error(InitError::from(&err));
        return -1;
    }
    // exec replaced the image; not reached
    0
}

fn init_and_exec(
    channel: &mut InitChannel,
    syscall: &dyn Syscall,
    driver: &dyn NetworkDriver,
) -> Result<()> {
    // do not outlive the supervisor
    if let Err(e) = prctl::set_death_signal(libc::SIGKILL as isize) {
        bail!("failed to set parent death signal: {}", e);
    }

    let config = channel.recv_config()?;
    let process = channel.recv_process()?;

    // namespaces with an external path are joined; the rest were
    // created by the clone flags already
    let namespaces = Namespaces::from(&config.namespaces[..]);
    namespaces
        .apply_setns(syscall)
        .context("failed to join configured namespaces")?;

    if let Some(hostname) = config.hostname.as_deref() {
        if namespaces.contains(NamespaceType::Uts) {
            syscall.set_hostname(hostname)?;
        }
    }

    // blocks until the supervisor has applied cgroups and created the
    // host-side network devices
    let network_state = channel.recv_network()?;

    if namespaces.contains(NamespaceType::Mount) {
        rootfs::prepare_rootfs(&config, syscall).context("failed to prepare rootfs")?;
    }

    for net in &config.networks {
        let strategy = network::get_strategy(&net.strategy)?;
        strategy
            .initialize(driver, net, &network_state)
            .with_context(|| format!("failed to initialize {} network", net.strategy))?;
    }

    if let Some(console) = process.console.as_deref() {
        setup_console(console).context("failed to setup console")?;
    }

    for rlimit in &config.rlimits {
        syscall.set_rlimit(rlimit)?;
    }

    let cap_names = process
        .capabilities
        .as_ref()
        .unwrap_or(&config.capabilities);
    capabilities::drop_privileges(cap_names, syscall)
        .context("failed to drop capabilities")?;

    if process.args.is_empty() {
        bail!("no process arguments to exec");
    }

    // the error pipe is close-on-exec: a successful exec is what hands
    // the supervisor its clean end-of-stream, an exec failure can still
    // report through it
    let env = config::build_env(&config, &process);
    utils::do_exec(&process.args[0], &process.args, &env)?;
    // only an exec failure gets here, and it returned an error above
    Ok(())
}

/// Entry point of the join-path child: enter the existing namespaces of
/// the init process and exec, no setup repeated.
pub fn container_join(
    channel: &mut InitChannel,
    init_pid: Pid,
    namespace_types: &[NamespaceType],
    process: &Process,
    env: &[String],
    syscall: &dyn Syscall,
) -> isize {
    if let Err(err) = join_and_exec(init_pid, namespace_types, process, env, syscall) {
        log::debug!("joining container failed: {:#}", err);
        let _ = channel.report_error(InitError::from(&err));
        return -1;
    }
    0
}

fn join_and_exec(
    init_pid: Pid,
    namespace_types: &[NamespaceType],
    process: &Process,
    env: &[String],
    syscall: &dyn Syscall,
) -> Result<()> {
    if let Err(e) = prctl::set_death_signal(libc::SIGKILL as isize) {
        bail!("failed to set parent death signal: {}", e);
    }

    for typ in namespace_types {
        let path = format!("/proc/{}/ns/{}", init_pid, typ.proc_file());
        let fd = open(Path::new(&path), OFlag::empty(), Mode::empty())
            .with_context(|| format!("failed to open {}", path))?;
        syscall
            .set_ns(fd, typ.clone_flag())
            .with_context(|| format!("failed to join {} namespace of {}", typ, init_pid))?;
        unistd::close(fd)?;
    }

    if let Some(console) = process.console.as_deref() {
        setup_console(console).context("failed to setup console")?;
    }

    if process.args.is_empty() {
        bail!("no process arguments to exec");
    }

    utils::do_exec(&process.args[0], &process.args, env)?;
    Ok(())
}

/// Binds the standard streams to the given terminal device.
fn setup_console(console: &Path) -> Result<()> {
    unistd::setsid().context("failed to create session")?;
    let fd = open(console, OFlag::O_RDWR, Mode::empty())
        .with_context(|| format!("failed to open console {:?}", console))?;
    unistd::dup2(fd, 0)?;
    unistd::dup2(fd, 1)?;
    unistd::dup2(fd, 2)?;
    if fd > 2 {
        unistd::close(fd)?;
    }
    Ok(())
}
