//! Establishes the container's view of the filesystem inside the new
//! mount namespace: the pivoted root, the standard virtual filesystems,
//! configured bind mounts and the device nodes under `/dev`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::mount::MsFlags;
use nix::sys::stat::{makedev, Mode, SFlag};
use nix::unistd::{Gid, Uid};
use path_clean::PathClean;

use crate::config::{default_devices, Config, Device, Mount};
use crate::syscall::Syscall;

const DEFAULT_MOUNT_FLAGS: MsFlags = MsFlags::from_bits_truncate(
    MsFlags::MS_NOEXEC.bits() | MsFlags::MS_NOSUID.bits() | MsFlags::MS_NODEV.bits(),
);

pub fn prepare_rootfs(config: &Config, syscall: &dyn Syscall) -> Result<()> {
    let rootfs = &config.rootfs;
    log::debug!("prepare rootfs {:?}", rootfs);

    // nothing mounted from here on may propagate back to the host
    syscall
        .mount(
            None,
            Path::new("/"),
            None,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None,
        )
        .context("failed to make / private")?;

    // bind the rootfs onto itself so it is a mount point pivot_root accepts
    syscall
        .mount(
            Some(rootfs),
            rootfs,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None,
        )
        .context("failed to bind mount rootfs")?;

    mount_system_filesystems(rootfs, syscall)?;

    for mount in &config.mounts {
        setup_bind_mount(rootfs, mount, syscall)
            .with_context(|| format!("failed to setup mount {:?}", mount))?;
    }

    let mut devices = default_devices();
    devices.extend(config.devices.iter().cloned());
    for device in &devices {
        create_device(rootfs, device, syscall)
            .with_context(|| format!("failed to create device {:?}", device.path))?;
    }

    setup_default_symlinks(rootfs, syscall).context("failed to setup default symlinks")?;

    syscall
        .pivot_rootfs(rootfs)
        .context("failed to pivot into rootfs")?;

    if config.readonly_rootfs {
        syscall
            .mount(
                None,
                Path::new("/"),
                None,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None,
            )
            .context("failed to remount rootfs read-only")?;
    }

    Ok(())
}

fn mount_system_filesystems(rootfs: &Path, syscall: &dyn Syscall) -> Result<()> {
    let mounts = [
        ("proc", "/proc", "proc", DEFAULT_MOUNT_FLAGS, None),
        ("sysfs", "/sys", "sysfs", DEFAULT_MOUNT_FLAGS, None),
        (
            "tmpfs",
            "/dev",
            "tmpfs",
            MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
            Some("mode=755"),
        ),
        (
            "devpts",
            "/dev/pts",
            "devpts",
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            Some("newinstance,ptmxmode=0666,mode=0620"),
        ),
        (
            "shm",
            "/dev/shm",
            "tmpfs",
            DEFAULT_MOUNT_FLAGS,
            Some("mode=1777,size=65536k"),
        ),
    ];

    for (source, destination, fstype, flags, data) in &mounts {
        let dest = path_in_rootfs(rootfs, Path::new(destination));
        fs::create_dir_all(&dest)
            .with_context(|| format!("failed to create mount point {:?}", dest))?;
        syscall
            .mount(
                Some(Path::new(source)),
                &dest,
                Some(fstype),
                *flags,
                *data,
            )
            .with_context(|| format!("failed to mount {}", destination))?;
    }

    Ok(())
}

fn setup_bind_mount(rootfs: &Path, mount: &Mount, syscall: &dyn Syscall) -> Result<()> {
    let dest = path_in_rootfs(rootfs, &mount.destination);

    if mount.source.is_dir() {
        fs::create_dir_all(&dest)
            .with_context(|| format!("failed to create bind mount point {:?}", dest))?;
    } else {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if !dest.exists() {
            OpenOptions::new().create(true).write(true).open(&dest)?;
        }
    }

    syscall.mount(
        Some(&mount.source),
        &dest,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )?;

    if !mount.writable {
        syscall.mount(
            Some(&mount.source),
            &dest,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None,
        )?;
    }

    if mount.private {
        syscall.mount(None, &dest, None, MsFlags::MS_PRIVATE, None)?;
    }

    Ok(())
}

fn create_device(rootfs: &Path, device: &Device, syscall: &dyn Syscall) -> Result<()> {
    let dest = path_in_rootfs(rootfs, &device.path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let kind = if device.typ == 'b' {
        SFlag::S_IFBLK
    } else {
        SFlag::S_IFCHR
    };

    match syscall.mknod(
        &dest,
        kind,
        Mode::from_bits_truncate(device.file_mode),
        makedev(device.major, device.minor),
    ) {
        Ok(()) => {
            syscall.chown(
                &dest,
                Some(Uid::from_raw(device.uid)),
                Some(Gid::from_raw(device.gid)),
            )?;
        }
        // without CAP_MKNOD (user namespaces) fall back to binding the
        // host's node
        Err(e) if is_permission_denied(&e) => {
            OpenOptions::new().create(true).write(true).open(&dest)?;
            syscall.mount(Some(&device.path), &dest, None, MsFlags::MS_BIND, None)?;
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

fn is_permission_denied(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<nix::Error>(),
        Some(nix::errno::Errno::EPERM)
    )
}

fn setup_default_symlinks(rootfs: &Path, syscall: &dyn Syscall) -> Result<()> {
    let links = [
        ("/proc/self/fd", "/dev/fd"),
        ("/proc/self/fd/0", "/dev/stdin"),
        ("/proc/self/fd/1", "/dev/stdout"),
        ("/proc/self/fd/2", "/dev/stderr"),
        ("pts/ptmx", "/dev/ptmx"),
    ];

    for (original, link) in &links {
        syscall.symlink(
            Path::new(original),
            &path_in_rootfs(rootfs, Path::new(link)),
        )?;
    }

    Ok(())
}

fn path_in_rootfs(rootfs: &Path, path: &Path) -> PathBuf {
    let cleaned = path.to_path_buf().clean();
    let relative = cleaned
        .strip_prefix("/")
        .map(Path::to_path_buf)
        .unwrap_or(cleaned);
    rootfs.join(relative)
}
