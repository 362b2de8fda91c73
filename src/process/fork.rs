use std::mem;

use anyhow::Result;
use libc::c_int;
use libc::c_void;
use nix::errno::Errno;
use nix::sched;
use nix::unistd::Pid;

/// Clones a child running `cb` with the given namespace flags. The child
/// gets its own stack, sized from the process stack rlimit, with a guard
/// page at the bottom.
pub fn clone(mut cb: sched::CloneCb, clone_flags: sched::CloneFlags) -> Result<Pid> {
    extern "C" fn callback(data: *mut sched::CloneCb) -> c_int {
        let cb: &mut sched::CloneCb = unsafe { &mut *data };
        (*cb)() as c_int
    }

    let child_stack_top = unsafe {
        let page_size: usize = match libc::sysconf(libc::_SC_PAGE_SIZE) {
            -1 => 4 * 1024,
            x => x as usize,
        };

        let mut rlimit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        Errno::result(libc::getrlimit(libc::RLIMIT_STACK, &mut rlimit))?;
        let stack_size = rlimit.rlim_cur as usize;

        let child_stack = libc::mmap(
            std::ptr::null_mut(),
            stack_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
            -1,
            0,
        );
        if child_stack == libc::MAP_FAILED {
            return Err(nix::Error::Sys(Errno::last()).into());
        }
        // guard page so a stack overflow faults instead of corrupting
        // the mapping below
        Errno::result(libc::mprotect(child_stack, page_size, libc::PROT_NONE))?;

        child_stack.add(stack_size)
    };

    let res = unsafe {
        let signal = nix::sys::signal::Signal::SIGCHLD;
        let combined = clone_flags.bits() | signal as c_int;
        libc::clone(
            mem::transmute(callback as extern "C" fn(*mut sched::CloneCb) -> i32),
            child_stack_top,
            combined,
            &mut cb as *mut _ as *mut c_void,
        )
    };
    let pid = Errno::result(res).map(Pid::from_raw)?;

    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use nix::unistd;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_clone_runs_callback_in_child() -> Result<()> {
        let pid = clone(
            Box::new(|| {
                if unistd::getpid() == unistd::getppid() {
                    return -1;
                }
                0
            }),
            sched::CloneFlags::empty(),
        )?;

        let status = nix::sys::wait::waitpid(pid, None)?;
        if let nix::sys::wait::WaitStatus::Exited(_, exit_code) = status {
            assert_eq!(0, exit_code, "child exited with {:?}", exit_code);
            return Ok(());
        }

        bail!("child did not exit normally")
    }

    #[test]
    #[serial]
    fn test_clone_stack_allocation() -> Result<()> {
        let pid = clone(
            Box::new(|| {
                let mut array_on_stack = [0u8; 4096];
                array_on_stack.iter_mut().for_each(|x| *x = 0);
                0
            }),
            sched::CloneFlags::empty(),
        )?;

        let status = nix::sys::wait::waitpid(pid, None)?;
        if let nix::sys::wait::WaitStatus::Exited(_, exit_code) = status {
            assert_eq!(0, exit_code, "child exited with {:?}", exit_code);
            return Ok(());
        }

        bail!("child did not exit normally")
    }
}
