//! Signals for pipeline process groups.
//!
//! Pipelines are spawned as process-group leaders, so the leader's pid is
//! also the group id. `npx tsx ...` forks the real worker; signalling the
//! group reaches it, signalling the leader alone does not.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
mod imp {
    use super::Signal;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal as NixSignal};
    use nix::unistd::Pid;
    use std::io;

    fn nix_signal(sig: Signal) -> NixSignal {
        match sig {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        }
    }

    fn pid(raw: u32) -> io::Result<Pid> {
        i32::try_from(raw)
            .ok()
            .filter(|p| *p > 0)
            .map(Pid::from_raw)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {raw}")))
    }

    fn delivered(res: nix::Result<()>) -> io::Result<bool> {
        match res {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    pub fn signal_group(pgid: u32, sig: Signal) -> io::Result<bool> {
        delivered(signal::killpg(pid(pgid)?, nix_signal(sig)))
    }

    pub fn signal_process(raw: u32, sig: Signal) -> io::Result<bool> {
        delivered(signal::kill(pid(raw)?, nix_signal(sig)))
    }

    pub fn is_alive(raw: u32) -> bool {
        match pid(raw) {
            Ok(p) => !matches!(signal::kill(p, None), Err(Errno::ESRCH)),
            Err(_) => false,
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::Signal;
    use std::io;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "process signals need a unix host")
    }

    pub fn signal_group(_pgid: u32, _sig: Signal) -> io::Result<bool> {
        Err(unsupported())
    }

    pub fn signal_process(_pid: u32, _sig: Signal) -> io::Result<bool> {
        Err(unsupported())
    }

    pub fn is_alive(_pid: u32) -> bool {
        false
    }
}

/// Signal every process in the group led by `pgid`. `Ok(false)` when the
/// group no longer exists.
pub fn signal_group(pgid: u32, sig: Signal) -> io::Result<bool> {
    imp::signal_group(pgid, sig)
}

/// Signal the group led by `pid`, or `pid` alone when it leads no group.
/// `Ok(false)` when neither exists.
pub fn signal_tree(pid: u32, sig: Signal) -> io::Result<bool> {
    if imp::signal_group(pid, sig)? {
        return Ok(true);
    }
    imp::signal_process(pid, sig)
}

/// Whether `pid` still exists. Zombies count as alive.
pub fn is_alive(pid: u32) -> bool {
    imp::is_alive(pid)
}

/// Whether `pid` has stopped running. Unreaped zombies count as gone.
#[cfg(test)]
pub(crate) fn has_exited(pid: u32) -> bool {
    if !is_alive(pid) {
        return true;
    }
    // `/proc/<pid>/stat`: "pid (comm) S ..."; the state follows the last ')'.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| stat.rsplit_once(')').map(|(_, rest)| rest.trim_start().starts_with('Z')))
        .unwrap_or(false)
}
