use std::sync::Arc;

use crate::pid_resolver::{PortOwnerLookup, ProcNetLookup};
use crate::port_probe::{PortProbe, TcpBindProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM.
    Terminate,
    /// SIGKILL.
    Kill,
}

/// The host process table as seen by stop/start reconciliation.
pub trait ProcessTable: Send + Sync {
    fn pid_exists(&self, pid: u32) -> bool;
    fn signal(&self, pid: u32, signal: Signal) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessTable;

/// Rejects pids that `kill(2)` would interpret as a process group or "all".
#[cfg(unix)]
fn as_target(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

#[cfg(unix)]
impl ProcessTable for OsProcessTable {
    fn pid_exists(&self, pid: u32) -> bool {
        let Some(target) = as_target(pid) else {
            return false;
        };
        let rc = unsafe { libc::kill(target, 0) };
        if rc == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn signal(&self, pid: u32, signal: Signal) -> std::io::Result<()> {
        let Some(target) = as_target(pid) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing to signal pid {pid}"),
            ));
        };
        let sig = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        let rc = unsafe { libc::kill(target, sig) };
        if rc == -1 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(unix))]
impl ProcessTable for OsProcessTable {
    fn pid_exists(&self, _pid: u32) -> bool {
        false
    }

    fn signal(&self, _pid: u32, _signal: Signal) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process signals are only supported on unix",
        ))
    }
}

/// OS introspection the lifecycle manager depends on.
#[derive(Clone)]
pub struct Host {
    pub probe: Arc<dyn PortProbe>,
    pub owners: Arc<dyn PortOwnerLookup>,
    pub processes: Arc<dyn ProcessTable>,
}

impl Host {
    pub fn os() -> Self {
        Self {
            probe: Arc::new(TcpBindProbe),
            owners: Arc::new(ProcNetLookup),
            processes: Arc::new(OsProcessTable),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn own_pid_exists() {
        assert!(OsProcessTable.pid_exists(std::process::id()));
    }

    #[test]
    fn group_targets_are_refused() {
        assert!(!OsProcessTable.pid_exists(0));
        assert!(!OsProcessTable.pid_exists(u32::MAX));
        assert!(OsProcessTable.signal(0, Signal::Terminate).is_err());
    }

    #[test]
    fn reaped_child_no_longer_exists() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!OsProcessTable.pid_exists(pid));
    }
}
