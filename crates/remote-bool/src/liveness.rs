//! Parent liveness probing for the worker.
//!
//! The worker learns its parent's pid once, at launch, and from then on asks
//! the OS whether that pid still exists. On Unix this is `kill(pid, 0)`: no
//! signal is delivered, the call only reports whether the target exists.

/// Answers "is the process that launched me still running?".
pub trait ParentProbe: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// Probe backed by an OS process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentPid(u32);

impl ParentPid {
    pub fn new(pid: u32) -> Self {
        Self(pid)
    }

    /// Pid of the current process, as handed to a freshly spawned worker.
    pub fn current() -> Self {
        Self(std::process::id())
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ParentPid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ParentProbe for ParentPid {
    fn is_alive(&self) -> bool {
        is_pid_alive(self.0)
    }
}

/// Returns `true` if a process with `pid` currently exists.
///
/// `EPERM` counts as alive: the process exists but belongs to someone else.
/// Pid 0 and pids outside the `pid_t` range are never alive.
/// On non-Unix platforms this always returns `true`, which disables orphan
/// detection there.
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        pid_alive_unix(pid)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(unix)]
fn pid_alive_unix(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // kill(0, _) and negative pids address process groups, not a single pid.
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return false,
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
