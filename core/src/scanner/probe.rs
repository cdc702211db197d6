//! Reachability and port probes.
//!
//! The unprivileged liveness check is a TCP connect: a completed or
//! refused handshake both prove a live stack at the address, only a
//! timeout means silence. One probe timing out never affects any other
//! probe; the sweep isolates failures per host.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Port used for the bare liveness check. Connection refused still
/// proves the host is up, so the port does not need to be open.
const REACHABILITY_PORT: u16 = 443;

/// Latency of one reachability probe, `None` when the host stayed
/// silent past the deadline.
pub async fn reachability_probe(addr: IpAddr, probe_timeout: Duration) -> Option<Duration> {
    let socket_addr = SocketAddr::new(addr, REACHABILITY_PORT);
    let started = Instant::now();
    match timeout(probe_timeout, TcpStream::connect(socket_addr)).await {
        Ok(Ok(_)) | Ok(Err(_)) => Some(started.elapsed()),
        Err(_elapsed) => None,
    }
}

/// True only for a completed handshake; refused or silent ports are not
/// reported as open.
pub async fn port_probe(addr: IpAddr, port: u16, probe_timeout: Duration) -> bool {
    let socket_addr = SocketAddr::new(addr, port);
    matches!(
        timeout(probe_timeout, TcpStream::connect(socket_addr)).await,
        Ok(Ok(_))
    )
}

/// One health measurement of a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub latency: Duration,
    /// Fraction of probe attempts that went unanswered, 0.0 to 1.0.
    pub loss: f64,
    /// I/O errors distinct from plain timeouts.
    pub errors: u32,
}

/// Source of health measurements. The health monitor depends only on
/// this trait; tests script it to drive the gate and auto-release paths
/// deterministically.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn measure(&self, addr: IpAddr) -> Measurement;
}

/// Production probe: a short burst of connect probes, averaged.
pub struct ConnectProbe {
    pub probe_timeout: Duration,
    pub attempts: u32,
}

impl Default for ConnectProbe {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(500),
            attempts: 4,
        }
    }
}

#[async_trait]
impl LivenessProbe for ConnectProbe {
    async fn measure(&self, addr: IpAddr) -> Measurement {
        let mut answered: u32 = 0;
        let mut total_latency = Duration::ZERO;

        for _ in 0..self.attempts {
            if let Some(latency) = reachability_probe(addr, self.probe_timeout).await {
                answered += 1;
                total_latency += latency;
            }
        }

        let latency = if answered > 0 {
            total_latency / answered
        } else {
            // All probes lost: report the deadline itself so the score
            // reflects an unreachable host rather than a perfect one.
            self.probe_timeout
        };
        let loss = f64::from(self.attempts - answered) / f64::from(self.attempts.max(1));

        Measurement {
            latency,
            loss,
            errors: 0,
        }
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn loopback_answers_the_reachability_probe() {
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let result = reachability_probe(addr, Duration::from_millis(500)).await;
        assert!(result.is_some(), "loopback should answer (even with a refusal)");
    }

    #[tokio::test]
    async fn silent_host_probes_time_out() {
        // TEST-NET-3, guaranteed unrouted.
        let addr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1));
        let result = reachability_probe(addr, Duration::from_millis(100)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn connect_probe_reports_full_loss_for_silent_host() {
        let probe = ConnectProbe {
            probe_timeout: Duration::from_millis(100),
            attempts: 2,
        };
        let m = probe.measure(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1))).await;
        assert_eq!(m.loss, 1.0);
        assert_eq!(m.latency, probe.probe_timeout);
    }
}
