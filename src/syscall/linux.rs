use std::any::Any;
use std::path::Path;

use anyhow::{bail, Result};
use caps::{errors::CapsError, CapSet, CapsHashSet};
use nix::fcntl::{open, OFlag};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{setns, unshare, CloneFlags};
use nix::sys::stat::{mknod, Mode, SFlag};
use nix::unistd::{self, chown, fchdir, pivot_root, sethostname, Gid, Uid};

use super::Syscall;
use crate::capabilities;
use crate::config::Rlimit;

#[derive(Clone)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn pivot_rootfs(&self, path: &Path) -> Result<()> {
        // open the new root so we can chdir back into it after the old
        // root is detached
        let newroot = open(path, OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty())?;

        pivot_root(path, path)?;

        umount2("/", MntFlags::MNT_DETACH)?;
        fchdir(newroot)?;
        unistd::close(newroot)?;
        Ok(())
    }

    fn set_ns(&self, rawfd: i32, nstype: CloneFlags) -> Result<()> {
        setns(rawfd, nstype)?;
        Ok(())
    }

    fn set_id(&self, uid: Uid, gid: Gid) -> Result<()> {
        if let Err(e) = prctl::set_keep_capabilities(true) {
            bail!("set keep capabilities returned {}", e);
        };
        unistd::setresgid(gid, gid, gid)?;
        unistd::setresuid(uid, uid, uid)?;

        if uid != Uid::from_raw(0) {
            capabilities::reset_effective(self)?;
        }
        if let Err(e) = prctl::set_keep_capabilities(false) {
            bail!("set keep capabilities returned {}", e);
        };
        Ok(())
    }

    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        unshare(flags)?;
        Ok(())
    }

    fn set_capability(&self, cset: CapSet, value: &CapsHashSet) -> Result<(), CapsError> {
        caps::set(None, cset, value)
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        if let Err(e) = sethostname(hostname) {
            bail!("failed to set {} as hostname: {:?}", hostname, e)
        }
        Ok(())
    }

    fn set_rlimit(&self, rlimit: &Rlimit) -> Result<()> {
        let rlim = &libc::rlimit {
            rlim_cur: rlimit.soft,
            rlim_max: rlimit.hard,
        };
        let res = unsafe { libc::setrlimit(rlimit.resource()? as _, rlim) };
        if let Err(e) = nix::errno::Errno::result(res) {
            bail!("failed to set rlimit {}: {}", rlimit.typ, e)
        }
        Ok(())
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        mount(source, target, fstype, flags, data)?;
        Ok(())
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        std::os::unix::fs::symlink(original, link)?;
        Ok(())
    }

    fn mknod(&self, path: &Path, kind: SFlag, perm: Mode, dev: u64) -> Result<()> {
        mknod(path, kind, perm, dev)?;
        Ok(())
    }

    fn chown(&self, path: &Path, owner: Option<Uid>, group: Option<Gid>) -> Result<()> {
        chown(path, owner, group)?;
        Ok(())
    }
}
