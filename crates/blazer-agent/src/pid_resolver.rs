use std::collections::HashMap;

/// Finds the pid owning a port in the host connection table.
///
/// When several entries match (e.g. a listener plus TIME_WAIT leftovers), the
/// first one in scan order wins.
pub trait PortOwnerLookup: Send + Sync {
    fn find_pid_by_port(&self, port: u16) -> Option<u32>;
}

/// One row of the connection table, reduced to what the lookup needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub local_port: u16,
    pub remote_port: u16,
    pub inode: u64,
}

/// First connection using `port` (remote or local) whose socket has a known
/// owner. Rows without a visible owner are skipped.
pub fn first_owner(
    connections: &[Connection],
    owners: &HashMap<u64, u32>,
    port: u16,
) -> Option<u32> {
    connections
        .iter()
        .filter(|c| c.remote_port == port || c.local_port == port)
        .find_map(|c| owners.get(&c.inode).copied())
}

/// Reads `/proc/net/{tcp,tcp6,udp,udp6}` and maps socket inodes to pids via
/// `/proc/<pid>/fd`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcNetLookup;

#[cfg(target_os = "linux")]
impl PortOwnerLookup for ProcNetLookup {
    fn find_pid_by_port(&self, port: u16) -> Option<u32> {
        let connections = linux::connection_table();
        // Inode 0 marks sockets with no owner (TIME_WAIT and friends).
        if !connections
            .iter()
            .any(|c| c.inode != 0 && (c.remote_port == port || c.local_port == port))
        {
            return None;
        }
        let owners = linux::inode_owners();
        first_owner(&connections, &owners, port)
    }
}

#[cfg(not(target_os = "linux"))]
impl PortOwnerLookup for ProcNetLookup {
    fn find_pid_by_port(&self, _port: u16) -> Option<u32> {
        None
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::HashMap;

    use super::Connection;

    pub(super) fn connection_table() -> Vec<Connection> {
        let mut out = Vec::new();

        macro_rules! add_table {
            ($entries:expr, $name:expr) => {
                match $entries {
                    Ok(entries) => {
                        out.extend(entries.into_iter().map(|e| Connection {
                            local_port: e.local_address.port(),
                            remote_port: e.remote_address.port(),
                            inode: e.inode,
                        }));
                    }
                    Err(err) => {
                        tracing::debug!(table = $name, %err, "connection table unreadable");
                    }
                }
            };
        }

        add_table!(procfs::net::tcp(), "tcp");
        add_table!(procfs::net::tcp6(), "tcp6");
        add_table!(procfs::net::udp(), "udp");
        add_table!(procfs::net::udp6(), "udp6");
        out
    }

    /// Socket inode → pid, from the `socket:[inode]` fd links of every
    /// process we may inspect.
    pub(super) fn inode_owners() -> HashMap<u64, u32> {
        let mut map = HashMap::new();
        let Ok(procs) = procfs::process::all_processes() else {
            return map;
        };
        for p in procs.filter_map(|p| p.ok()) {
            let Ok(pid) = u32::try_from(p.pid()) else {
                continue;
            };
            // Other users' fd tables are unreadable without privileges.
            let Ok(fds) = p.fd() else {
                continue;
            };
            for fd in fds.filter_map(|fd| fd.ok()) {
                if let procfs::process::FDTarget::Socket(inode) = fd.target {
                    // Keep the lowest pid for sockets shared across fork.
                    map.entry(inode)
                        .and_modify(|owner: &mut u32| *owner = (*owner).min(pid))
                        .or_insert(pid);
                }
            }
        }
        map
    }
}
