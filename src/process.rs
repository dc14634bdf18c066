//! Child process tracking for package manager runs
//!
//! `apt-get` and `pip` fork their own helpers (dpkg, compilers, wheel builds).
//! If the provisioner is interrupted while one of them runs, the whole tree
//! has to go with it, otherwise a half-configured dpkg keeps mutating the
//! target after the build has been reported as failed.
//!
//! - Every child is started as the leader of its own process group, with a
//!   parent-death signal as a backstop.
//! - Running children are tracked in a global registry.
//! - On SIGINT/SIGTERM/SIGHUP the registry signals each group with SIGTERM,
//!   waits out a grace period and SIGKILLs whatever is left.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::io;
use std::process::{Command, Output};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static CHILDREN: OnceLock<Mutex<ChildRegistry>> = OnceLock::new();

/// Grace period between SIGTERM and SIGKILL when the provisioner is signalled
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Set of running child process group leaders
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    shutting_down: bool,
}

impl ChildRegistry {
    /// Lock the process-wide registry. A poisoned lock is recovered since the
    /// set of PIDs stays meaningful after a panic elsewhere.
    pub fn global() -> MutexGuard<'static, ChildRegistry> {
        CHILDREN
            .get_or_init(|| Mutex::new(ChildRegistry::default()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Tracking child process group {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Released child process group {}", pid);
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// SIGTERM every tracked group, wait up to `grace`, then SIGKILL.
    /// Only the first call does anything.
    pub fn terminate_all(&mut self, grace: Duration) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        if self.pids.is_empty() {
            return;
        }
        info!("Terminating {} child process group(s)", self.pids.len());

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                warn!("SIGTERM to process group {} failed: {}", pid, e);
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if pids.iter().all(|&pid| !is_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_alive(pid)) {
            warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
            if signal_group(pid, Signal::SIGKILL).is_err() {
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }
        self.pids.clear();
    }
}

/// Signal a whole process group (negative PID)
fn signal_group(pgid: u32, sig: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), sig)
}

/// True if `pid` exists and is not a zombie
fn is_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    // Field 3 of /proc/<pid>/stat is the state letter
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .split_whitespace()
            .nth(2)
            .is_none_or(|state| !matches!(state, "Z" | "X")),
        Err(_) => true,
    }
}

/// Extension for `Command`: start the child as its own process group leader
pub trait ProcessGroupExt {
    fn own_process_group(&mut self) -> &mut Self;
}

impl ProcessGroupExt for Command {
    fn own_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls (setpgid, prctl) run between
        // fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(io::Error::from)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

/// Unregisters a PID when dropped, including on early return
struct Tracked(u32);

impl Drop for Tracked {
    fn drop(&mut self) {
        ChildRegistry::global().unregister(self.0);
    }
}

/// Spawn `cmd` in its own process group, track it while it runs and collect
/// its output. stdout/stderr must already be configured by the caller.
pub fn run_tracked(cmd: &mut Command) -> io::Result<Output> {
    let child = cmd.own_process_group().spawn()?;
    let pid = child.id();
    ChildRegistry::global().register(pid);
    let _tracked = Tracked(pid);
    child.wait_with_output()
}

/// Install the shutdown handler for SIGINT, SIGTERM and SIGHUP.
///
/// Call once at startup. The handler thread tears down tracked children and
/// exits with `128 + signal`.
pub fn install_signal_handlers() -> io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, stopping provisioning", sig);
            ChildRegistry::global().terminate_all(SHUTDOWN_GRACE);
            std::process::exit(128 + sig);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[test]
    fn test_register_unregister() {
        let mut registry = ChildRegistry::default();
        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.len(), 2);
        registry.unregister(1234);
        registry.unregister(5678);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_run_tracked_collects_output_and_releases() {
        let output = run_tracked(
            Command::new("sh")
                .args(["-c", "echo out; echo err >&2; exit 3"])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
        )
        .expect("sh runs");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "err\n");
    }

    #[test]
    fn test_run_tracked_missing_program() {
        let err = run_tracked(&mut Command::new("/nonexistent/definitely-not-a-program"))
            .expect_err("cannot spawn");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_terminate_all_kills_process_group() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .own_process_group()
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        registry.terminate_all(Duration::from_millis(500));

        let status = child.wait().expect("reap");
        assert!(!status.success());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_terminate_all_runs_once() {
        let mut registry = ChildRegistry::default();
        registry.terminate_all(Duration::from_millis(10));
        registry.register(999_999);
        registry.terminate_all(Duration::from_millis(10));
        // second call is a no-op, so the fake PID is still tracked
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_is_alive_nonexistent() {
        assert!(!is_alive(999_999));
    }
}
