use std::{
    io::ErrorKind,
    net::{TcpListener, ToSocketAddrs},
    time::Duration,
};

/// Point-in-time check whether something holds a TCP port.
///
/// This is not a reservation: the port can be taken between the check and the
/// child's own bind attempt.
pub trait PortProbe: Send + Sync {
    fn is_bound(&self, host: &str, port: u16) -> bool;
}

/// Probes by attempting an exclusive bind; `AddrInUse` means bound.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBindProbe;

impl PortProbe for TcpBindProbe {
    fn is_bound(&self, host: &str, port: u16) -> bool {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(v) => v.collect::<Vec<_>>(),
            Err(err) => {
                tracing::debug!(host, port, %err, "port probe: host did not resolve");
                return false;
            }
        };

        // `localhost` may resolve to both ::1 and 127.0.0.1; a holder on
        // either address counts.
        for addr in addrs {
            match TcpListener::bind(addr) {
                Ok(l) => drop(l),
                Err(e) if e.kind() == ErrorKind::AddrInUse => return true,
                Err(err) => {
                    tracing::debug!(%addr, %err, "port probe: bind failed");
                }
            }
        }
        false
    }
}

/// Poll `probe` every `interval` until the port is bound or `timeout` elapses.
///
/// Dropping the returned future abandons the wait immediately.
pub async fn await_bound(
    probe: &dyn PortProbe,
    host: &str,
    port: u16,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe.is_bound(host, port) {
            return true;
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
