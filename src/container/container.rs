use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::cgroups::common::{self, CgroupManager};
use crate::cgroups::fs::Freezer;
use crate::cgroups::stats::Stats;
use crate::config::{Config, Process};
use crate::container::{State, Status};
use crate::error::{Error, Result};
use crate::process::exec;

/// A supervised group of processes sharing namespaces and a
/// resource-control group. All mutating operations serialize behind the
/// state lock; operations on different containers never contend.
pub struct Container {
    id: String,
    pub root: PathBuf,
    config: Config,
    state: Mutex<State>,
    state_changed: Condvar,
    cgroup_manager: Box<dyn CgroupManager + Send + Sync>,
    checkpoint_tool: PathBuf,
    start_timeout: Option<Duration>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("checkpoint_tool", &self.checkpoint_tool)
            .field("start_timeout", &self.start_timeout)
            .finish()
    }
}

impl Container {
    pub(crate) fn new(
        id: &str,
        root: PathBuf,
        config: Config,
        state: State,
        cgroup_manager: Box<dyn CgroupManager + Send + Sync>,
        checkpoint_tool: PathBuf,
        start_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id: id.to_string(),
            root,
            config,
            state: Mutex::new(state),
            state_changed: Condvar::new(),
            cgroup_manager,
            checkpoint_tool,
            start_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> Status {
        self.lock_state().status
    }

    /// Pid of the running init process, if any.
    pub fn pid(&self) -> Option<Pid> {
        self.lock_state().init_pid.map(Pid::from_raw)
    }

    /// A copy of the current state, mainly for inspection.
    pub fn state(&self) -> State {
        self.lock_state().clone()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify_state_changed(&self) {
        self.state_changed.notify_all();
    }

    /// Starts a process in the container. With no live init process this
    /// is the init path: the process becomes the container's init and
    /// the container transitions `Destroyed -> Running`. With a live
    /// init process the new process joins the existing namespaces.
    ///
    /// A failed attempt leaves the container state exactly as it was;
    /// the synchronization pipe, not the child's exit code, is the
    /// source of truth for success.
    pub fn start(self: &Arc<Self>, process: &Process) -> Result<Pid> {
        let mut state = self.lock_state();

        if let Some(init_pid) = self.live_init_pid(&state) {
            log::debug!("start new process in container {}", self.id);
            let pid = exec::exec_join(&self.config, init_pid, process, self.start_timeout)?;
            self.cgroup_manager
                .apply(pid)
                .context("failed to add joined process to the cgroup")?;
            state.processes.push(pid.as_raw());
            state.save(&self.root)?;
            self.spawn_joined_reaper(pid);
            return Ok(pid);
        }

        // a recorded init process that is gone means the container
        // already returned to Destroyed
        if state.init_pid.is_some() {
            state.init_pid = None;
            state.init_start_time = None;
            state.status = Status::Destroyed;
        }

        if !state.status.can_start() {
            return Err(Error::System(anyhow!(
                "container {} could not be started because it was {}",
                self.id,
                state.status
            )));
        }

        log::debug!("start init process of container {}", self.id);
        let started = exec::exec_init(
            &self.config,
            process,
            self.cgroup_manager.as_ref(),
            self.start_timeout,
        )?;

        state.init_pid = Some(started.pid.as_raw());
        state.init_start_time = Some(started.start_time);
        state.network_state = started.network_state;
        state.status = Status::Running;
        state.exit_status = None;
        if state.created.is_none() {
            state.created = Some(Utc::now());
        }
        state.cgroup_paths = self.cgroup_manager.get_paths().clone();
        state.save(&self.root)?;
        self.notify_state_changed();

        self.spawn_init_reaper(started.pid);
        Ok(started.pid)
    }

    /// Sends `signal` to `pid`. The pid must be a current member of the
    /// container's cgroup; this refuses to signal a pid that was reused
    /// by an unrelated process.
    pub fn signal(&self, pid: Pid, signal: Signal) -> Result<()> {
        if !self.processes()?.contains(&pid) {
            return Err(Error::ProcessNotExists {
                id: self.id.clone(),
                pid: pid.as_raw(),
            });
        }

        kill(pid, signal).map_err(|e| {
            Error::System(anyhow!("failed to signal {} with {}: {}", pid, signal, e))
        })?;
        Ok(())
    }

    /// Blocks until the init process has been reaped and returns its
    /// exit status. Does not hold the state lock while waiting.
    pub fn wait(&self) -> Result<i32> {
        let mut state = self.lock_state();
        while state.init_pid.is_some() {
            state = self
                .state_changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        state.exit_status.ok_or_else(|| {
            Error::System(anyhow!(
                "container {} has no exit status to report",
                self.id
            ))
        })
    }

    /// Every pid currently in the container's cgroup. A hierarchy that
    /// is not there right now means the container is between states,
    /// not an error.
    pub fn processes(&self) -> Result<Vec<Pid>> {
        match self.cgroup_manager.get_pids() {
            Ok(pids) => Ok(pids),
            Err(e) if common::is_not_found(&e) => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }

    /// Point-in-time resource usage, straight from the cgroup manager.
    pub fn stats(&self) -> Result<Stats> {
        let stats = self.cgroup_manager.stats()?;
        Ok(stats)
    }

    /// Removes the container's resource-control nodes and its on-disk
    /// root. Only legal once no process is running; destroying an
    /// already destroyed container is a no-op success.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.lock_state();

        if self.live_init_pid(&state).is_some() {
            return Err(Error::ContainerNotStopped {
                id: self.id.clone(),
                status: state.status,
            });
        }

        // normalize a stale Running entry whose init is already gone
        if state.init_pid.is_some() {
            state.init_pid = None;
            state.init_start_time = None;
            state.status = Status::Destroyed;
        }

        if !state.status.can_destroy() {
            return Err(Error::ContainerNotStopped {
                id: self.id.clone(),
                status: state.status,
            });
        }

        self.cgroup_manager
            .destroy()
            .context("failed to remove cgroup nodes")?;

        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("failed to remove container root {:?}", self.root))?;
        }

        log::debug!("container {} destroyed", self.id);
        Ok(())
    }

    /// Re-derives the status from the kernel: probes init liveness and
    /// the freezer, and repairs a stale persisted status.
    pub fn refresh_status(&self) -> Result<Status> {
        let mut state = self.lock_state();

        if state.status == Status::Checkpointed {
            return Ok(Status::Checkpointed);
        }

        let status = match state.init_pid {
            None => Status::Destroyed,
            Some(_) => {
                if self.live_init_pid(&state).is_none() {
                    state.init_pid = None;
                    state.init_start_time = None;
                    Status::Destroyed
                } else if self.freezer_reports_frozen() {
                    Status::Paused
                } else {
                    match state.status {
                        Status::Pausing | Status::Resuming => state.status,
                        _ => Status::Running,
                    }
                }
            }
        };

        state.status = status;
        Ok(status)
    }

    /// The init pid, but only while the recorded process is actually
    /// alive and its kernel start time still matches (pid reuse guard).
    pub(crate) fn live_init_pid(&self, state: &State) -> Option<Pid> {
        let pid = Pid::from_raw(state.init_pid?);
        if kill(pid, None).is_err() {
            return None;
        }
        match (state.init_start_time, exec::process_start_time(pid)) {
            (Some(recorded), Ok(current)) if recorded == current => Some(pid),
            (None, Ok(_)) => Some(pid),
            _ => None,
        }
    }

    fn freezer_reports_frozen(&self) -> bool {
        self.cgroup_manager
            .get_paths()
            .get("freezer")
            .map(|path| {
                Freezer::read_state(path)
                    .map(|s| s.trim() == "FROZEN")
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub(crate) fn cgroup_manager(&self) -> &dyn CgroupManager {
        self.cgroup_manager.as_ref()
    }

    pub(crate) fn checkpoint_tool(&self) -> &Path {
        &self.checkpoint_tool
    }

    /// One background task per container waits for the init process and
    /// drives the `Running -> Destroyed` transition. The lock is only
    /// taken to mutate state after the wait returns.
    pub(crate) fn spawn_init_reaper(self: &Arc<Self>, pid: Pid) {
        let container = Arc::clone(self);
        thread::spawn(move || {
            let exit_status = wait_for_exit(pid);
            let mut state = container.lock_state();
            // the pid may belong to an older incarnation by now
            if state.init_pid == Some(pid.as_raw()) {
                log::debug!("init process {} of {} exited", pid, container.id);
                state.init_pid = None;
                state.init_start_time = None;
                state.exit_status = Some(exit_status.unwrap_or(-1));
                state.status = Status::Destroyed;
                state.processes.clear();
                if container.root.exists() {
                    if let Err(e) = state.save(&container.root) {
                        log::warn!("failed to save state of {}: {:#}", container.id, e);
                    }
                }
                container.notify_state_changed();
            }
        });
    }

    fn spawn_joined_reaper(self: &Arc<Self>, pid: Pid) {
        let container = Arc::clone(self);
        thread::spawn(move || {
            let _ = wait_for_exit(pid);
            let mut state = container.lock_state();
            state.processes.retain(|p| *p != pid.as_raw());
            if container.root.exists() {
                let _ = state.save(&container.root);
            }
            container.notify_state_changed();
        });
    }
}

/// Reaps `pid`, blocking until it exits. Returns `None` when the
/// process is not a waitable child (a restored process tree); in that
/// case its disappearance is detected by polling.
fn wait_for_exit(pid: Pid) -> Option<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Some(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Some(128 + signal as i32),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(_) => return Some(-1),
        }
    }

    // not our child; fall back to liveness polling
    while kill(pid, None).is_ok() {
        thread::sleep(Duration::from_millis(100));
    }
    None
}
