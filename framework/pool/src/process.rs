//! Signalling captured process groups.
//!
//! Runners and workload executions are started as leaders of their own process group, so the
//! PID recorded at spawn time doubles as the group id. Nothing here ever looks processes up by
//! name.

use std::time::{Duration, Instant};

use crate::error::{FleetError, FleetResult};

/// The signals the fleet sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    Stop,
    Continue,
    Terminate,
    Kill,
}

/// Send a signal to every process in the group led by `pid`.
#[cfg(unix)]
pub fn signal_group(pid: i32, signal: GroupSignal) -> FleetResult<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = match signal {
        GroupSignal::Stop => Signal::SIGSTOP,
        GroupSignal::Continue => Signal::SIGCONT,
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };

    killpg(Pid::from_raw(pid), signal).map_err(|e| FleetError::Signal {
        pid,
        reason: e.to_string(),
    })
}

#[cfg(not(unix))]
pub fn signal_group(pid: i32, signal: GroupSignal) -> FleetResult<()> {
    Err(FleetError::Signal {
        pid,
        reason: format!("Sending {signal:?} to a process group is only supported on Unix"),
    })
}

/// Whether a process with this PID still exists.
#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_alive(_pid: i32) -> bool {
    false
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Member {
    label: String,
    pid: i32,
}

/// A set of process groups captured at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSet {
    members: Vec<Member>,
}

impl ProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a process group, ignoring a PID that is already in the set.
    pub fn push(&mut self, label: impl Into<String>, pid: i32) {
        if self.members.iter().any(|m| m.pid == pid) {
            return;
        }
        self.members.push(Member {
            label: label.into(),
            pid,
        });
    }

    pub fn extend(&mut self, other: ProcessSet) {
        for member in other.members {
            self.push(member.label, member.pid);
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn pids(&self) -> Vec<i32> {
        self.members.iter().map(|m| m.pid).collect()
    }

    /// Kill every group in the set, including descendants that a plain kill of the leader would
    /// orphan. Returns the number of groups that were signalled.
    pub fn kill(&self) -> usize {
        self.members
            .iter()
            .filter(|member| match signal_group(member.pid, GroupSignal::Kill) {
                Ok(()) => {
                    log::debug!("Killed {} (pid {})", member.label, member.pid);
                    true
                }
                Err(e) => {
                    log::debug!("Could not kill {}: {e}", member.label);
                    false
                }
            })
            .count()
    }

    /// Stop every group in the set.
    ///
    /// Each group is signalled independently. A group that cannot be stopped, typically because
    /// it already exited, is logged and left out of the returned set.
    pub fn suspend(self) -> SuspendedProcesses {
        let members = self
            .members
            .into_iter()
            .filter(|member| match signal_group(member.pid, GroupSignal::Stop) {
                Ok(()) => {
                    log::debug!("Suspended {} (pid {})", member.label, member.pid);
                    true
                }
                Err(e) => {
                    log::warn!("Could not suspend {}: {e}", member.label);
                    false
                }
            })
            .collect::<Vec<_>>();

        log::info!("Suspended {} process groups", members.len());
        SuspendedProcesses {
            set: ProcessSet { members },
            suspended_at: Instant::now(),
        }
    }
}

/// Process groups that were stopped together and must be continued together.
///
/// The only way to resume is [SuspendedProcesses::resume], which consumes the value, so the
/// resumed set is always exactly the suspended set.
#[derive(Debug)]
#[must_use = "suspended processes stay frozen until resumed"]
pub struct SuspendedProcesses {
    set: ProcessSet,
    suspended_at: Instant,
}

impl SuspendedProcesses {
    pub fn pids(&self) -> Vec<i32> {
        self.set.pids()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn suspended_for(&self) -> Duration {
        self.suspended_at.elapsed()
    }

    /// Continue every group that was suspended. Returns the PIDs that were resumed.
    pub fn resume(self) -> Vec<i32> {
        let held = self.suspended_for();
        let mut resumed = Vec::with_capacity(self.set.len());
        for member in self.set.members {
            match signal_group(member.pid, GroupSignal::Continue) {
                Ok(()) => resumed.push(member.pid),
                Err(e) => log::warn!("Could not resume {}: {e}", member.label),
            }
        }
        log::info!(
            "Resumed {} process groups after {:.2}s",
            resumed.len(),
            held.as_secs_f64()
        );
        resumed
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::CommandExt as _;
    use std::process::{Command, Stdio};

    use super::*;

    fn spawn_group_leader() -> std::process::Child {
        Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()
            .expect("failed to spawn sleep")
    }

    fn process_state(pid: u32) -> char {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
        stat.rsplit(')')
            .next()
            .and_then(|rest| rest.trim_start().chars().next())
            .unwrap_or('?')
    }

    #[test]
    fn duplicate_pids_are_ignored() {
        let mut set = ProcessSet::new();
        set.push("runner 1", 100);
        set.push("runner 1 again", 100);
        set.push("runner 2", 200);
        assert_eq!(set.pids(), vec![100, 200]);
    }

    #[test]
    fn resume_targets_exactly_the_suspended_groups() {
        let mut first = spawn_group_leader();
        let mut second = spawn_group_leader();
        let mut bystander = spawn_group_leader();

        let mut set = ProcessSet::new();
        set.push("first", first.id() as i32);
        set.push("second", second.id() as i32);

        let suspended = set.suspend();
        assert_eq!(suspended.len(), 2);
        std::thread::sleep(Duration::from_millis(100));
        if std::path::Path::new("/proc").exists() {
            assert_eq!(process_state(first.id()), 'T');
            assert_eq!(process_state(bystander.id()), 'S');
        }

        let resumed = suspended.resume();
        assert_eq!(resumed, vec![first.id() as i32, second.id() as i32]);

        for child in [&mut first, &mut second, &mut bystander] {
            child.kill().ok();
            child.wait().ok();
        }
    }

    #[test]
    fn kill_reaches_the_whole_group() {
        use std::io::BufRead as _;

        let mut leader = Command::new("sh")
            .args(["-c", "sleep 30 & echo $!; wait"])
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let mut line = String::new();
        std::io::BufReader::new(leader.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        let descendant: i32 = line.trim().parse().unwrap();
        assert!(is_alive(descendant));

        let mut set = ProcessSet::new();
        set.push("workload", leader.id() as i32);
        assert_eq!(set.kill(), 1);
        leader.wait().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while is_alive(descendant) && process_state(descendant as u32) != 'Z' {
            assert!(Instant::now() < deadline, "pid {descendant} survived the group kill");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn exited_process_is_left_out_of_suspended_set() {
        let mut child = Command::new("true").process_group(0).spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();

        let mut set = ProcessSet::new();
        set.push("gone", pid);
        let suspended = set.suspend();
        assert!(suspended.is_empty());
        assert!(!is_alive(pid));
    }
}
