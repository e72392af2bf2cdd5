//! Tool process groups
//!
//! Each external tool is the leader of its own process group, so helpers it
//! forks (xbcloud download workers, the decompressors behind `tar -a`) are
//! reached by one group signal. Live leaders are tracked in a process-wide
//! table until the runner reaps them.
//!
//! There is a single way to stop a tool: [`kill_group`]. The runner calls it
//! on timeout and when the other half of a pipeline fails; shutdown (signal
//! or [`ShutdownGuard`] drop) first asks every tracked group to stop with
//! SIGTERM and falls back to it once the grace period runs out.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// How long tools get to exit after SIGTERM at shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

const LIVENESS_POLL: Duration = Duration::from_millis(50);

/// Leaders of running tool groups.
#[derive(Debug, Default)]
struct ToolGroups {
    leaders: BTreeSet<u32>,
    shut_down: bool,
}

impl ToolGroups {
    const fn new() -> Self {
        Self {
            leaders: BTreeSet::new(),
            shut_down: false,
        }
    }

    /// SIGTERM every group, wait for the leaders, SIGKILL the stragglers.
    /// Runs at most once.
    fn shut_down(&mut self, grace: Duration) {
        if std::mem::replace(&mut self.shut_down, true) || self.leaders.is_empty() {
            return;
        }

        let leaders = std::mem::take(&mut self.leaders);
        log::info!("Stopping {} running tool(s)", leaders.len());
        for &leader in &leaders {
            signal_group(leader, Signal::SIGTERM);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && leaders.iter().any(|&l| leader_running(l)) {
            thread::sleep(LIVENESS_POLL);
        }

        for &leader in leaders.iter().filter(|&&l| leader_running(l)) {
            log::warn!("Tool group {} ignored SIGTERM", leader);
            kill_group(leader);
        }
    }
}

static TOOL_GROUPS: Mutex<ToolGroups> = Mutex::new(ToolGroups::new());

fn with_groups(f: impl FnOnce(&mut ToolGroups)) {
    // A panic elsewhere must not stop cleanup
    let mut groups = TOOL_GROUPS.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut groups);
}

/// Record a freshly spawned group leader.
pub fn track(leader: u32) {
    with_groups(|g| {
        g.leaders.insert(leader);
    });
    log::debug!("Tracking tool group {}", leader);
}

/// Forget a leader that has been reaped.
pub fn untrack(leader: u32) {
    with_groups(|g| {
        g.leaders.remove(&leader);
    });
}

/// SIGKILL a tool and everything it forked.
pub fn kill_group(leader: u32) {
    if !signal_group(leader, Signal::SIGKILL) {
        // Group already gone or never formed; the leader may still exist
        let _ = signal::kill(Pid::from_raw(leader as i32), Signal::SIGKILL);
    }
}

/// Stop every tracked tool. Later calls are no-ops.
pub fn shut_down_all(grace: Duration) {
    with_groups(|g| g.shut_down(grace));
}

fn signal_group(leader: u32, sig: Signal) -> bool {
    match signal::kill(Pid::from_raw(-(leader as i32)), sig) {
        Ok(()) => true,
        Err(e) => {
            log::debug!("{} to tool group {} failed: {}", sig, leader, e);
            false
        }
    }
}

/// A zombie leader has exited; only the runner's `wait` is outstanding.
fn leader_running(leader: u32) -> bool {
    if signal::kill(Pid::from_raw(leader as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", leader)) {
        // "pid (comm) S ..."; comm may contain spaces, the state follows the last ')'
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_none_or(|state| !matches!(state, "Z" | "X")),
        Err(_) => true,
    }
}

/// Stops all tracked tools when `main` returns or unwinds.
#[derive(Debug, Default)]
pub struct ShutdownGuard;

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        shut_down_all(SHUTDOWN_GRACE);
    }
}

/// Stop all tools and exit with 128+signal on SIGINT, SIGTERM or SIGHUP.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            log::error!("Interrupted by signal {}, recovery aborted", sig);
            shut_down_all(SHUTDOWN_GRACE);
            std::process::exit(128 + sig);
        }
    });
    Ok(())
}

/// Launch a `Command` as the leader of a new process group that dies with us.
pub trait ToolProcessGroup {
    fn as_group_leader(&mut self) -> &mut Self;
}

impl ToolProcessGroup for Command {
    fn as_group_leader(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // Only async-signal-safe calls between fork and exec
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
