//! Packet egress abstraction.
//!
//! Disruption workers never open sockets themselves; they are handed an
//! [`Injector`] by the engine. The pnet-backed factory is the production
//! path, and a recording factory (see [`crate::testing`]) stands in for
//! it under test so worker behavior is observable without touching the
//! network.

use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use pnet::datalink::{self, Channel, DataLinkSender, NetworkInterface};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::transport::{self, TransportChannelType, TransportProtocol, TransportSender};
use thiserror::Error;

/// Why an egress channel could not be opened. Elevation problems become
/// `PrivilegeDenied` upstream; anything else latches the method
/// unavailable for the process lifetime.
#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("opening channel requires elevated privileges")]
    NeedsElevation,
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// The transport protocols a Layer4 channel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Icmp,
    Tcp,
    Udp,
}

/// One open egress path. `dst` is ignored by Layer2 injectors (the frame
/// carries its own addressing) and the port is ignored by Layer4 ones.
pub trait Injector: Send {
    fn inject(&mut self, payload: &[u8], dst: SocketAddr) -> io::Result<()>;
}

/// Opens injectors on demand. Splitting "needs elevation" from "gone for
/// good" lets the engine map open failures onto the right rejection.
pub trait InjectorFactory: Send + Sync {
    /// Raw Ethernet egress bound to the named interface.
    fn layer2(&self, interface: &str) -> Result<Box<dyn Injector>, InjectorError>;
    /// Raw IPv4 egress; the kernel prepends the IP header.
    fn layer4(&self, kind: TransportKind) -> Result<Box<dyn Injector>, InjectorError>;
    /// Plain UDP socket, available without elevation.
    fn datagram(&self) -> Result<Box<dyn Injector>, InjectorError>;
    /// Connect-and-abort TCP egress, available without elevation.
    fn stream_abort(&self, timeout: Duration) -> Result<Box<dyn Injector>, InjectorError>;
}

const TRANSPORT_BUFFER_SIZE: usize = 4096;

/// Production factory backed by pnet channels and std sockets.
pub struct PnetInjectorFactory;

impl InjectorFactory for PnetInjectorFactory {
    fn layer2(&self, interface: &str) -> Result<Box<dyn Injector>, InjectorError> {
        let intf = find_interface(interface)
            .ok_or_else(|| InjectorError::Unavailable(format!("no such interface {interface}")))?;
        match datalink::channel(&intf, Default::default()) {
            Ok(Channel::Ethernet(tx, _rx)) => Ok(Box::new(DatalinkInjector { tx })),
            Ok(_) => Err(InjectorError::Unavailable("unsupported channel type".into())),
            Err(e) => Err(classify_io(e)),
        }
    }

    fn layer4(&self, kind: TransportKind) -> Result<Box<dyn Injector>, InjectorError> {
        let proto = match kind {
            TransportKind::Icmp => IpNextHeaderProtocols::Icmp,
            TransportKind::Tcp => IpNextHeaderProtocols::Tcp,
            TransportKind::Udp => IpNextHeaderProtocols::Udp,
        };
        let channel_type = TransportChannelType::Layer4(TransportProtocol::Ipv4(proto));
        match transport::transport_channel(TRANSPORT_BUFFER_SIZE, channel_type) {
            Ok((tx, _rx)) => Ok(Box::new(TransportInjector { tx, kind })),
            Err(e) => Err(classify_io(e)),
        }
    }

    fn datagram(&self) -> Result<Box<dyn Injector>, InjectorError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(classify_io)?;
        Ok(Box::new(DatagramInjector { socket }))
    }

    fn stream_abort(&self, timeout: Duration) -> Result<Box<dyn Injector>, InjectorError> {
        Ok(Box::new(StreamAbortInjector { timeout }))
    }
}

fn find_interface(name: &str) -> Option<NetworkInterface> {
    datalink::interfaces().into_iter().find(|i| i.name == name)
}

fn classify_io(e: io::Error) -> InjectorError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => InjectorError::NeedsElevation,
        _ => InjectorError::Unavailable(e.to_string()),
    }
}

struct DatalinkInjector {
    tx: Box<dyn DataLinkSender>,
}

impl Injector for DatalinkInjector {
    fn inject(&mut self, payload: &[u8], _dst: SocketAddr) -> io::Result<()> {
        match self.tx.send_to(payload, None) {
            Some(result) => result,
            None => Err(io::Error::other("datalink sender gave no completion")),
        }
    }
}

struct TransportInjector {
    tx: TransportSender,
    kind: TransportKind,
}

impl Injector for TransportInjector {
    fn inject(&mut self, payload: &[u8], dst: SocketAddr) -> io::Result<()> {
        let dst: IpAddr = dst.ip();
        let sent = match self.kind {
            TransportKind::Icmp => {
                let pkt = IcmpPacket::new(payload)
                    .ok_or_else(|| io::Error::other("short icmp payload"))?;
                self.tx.send_to(pkt, dst)
            }
            TransportKind::Tcp => {
                let pkt = TcpPacket::new(payload)
                    .ok_or_else(|| io::Error::other("short tcp payload"))?;
                self.tx.send_to(pkt, dst)
            }
            TransportKind::Udp => {
                let pkt = UdpPacket::new(payload)
                    .ok_or_else(|| io::Error::other("short udp payload"))?;
                self.tx.send_to(pkt, dst)
            }
        };
        sent.map(|_| ())
    }
}

struct DatagramInjector {
    socket: UdpSocket,
}

impl Injector for DatagramInjector {
    fn inject(&mut self, payload: &[u8], dst: SocketAddr) -> io::Result<()> {
        self.socket.send_to(payload, dst).map(|_| ())
    }
}

/// Unprivileged stream disruption: open the connection, push a few junk
/// bytes, and drop it straight away. The churn of half-open connects is
/// what does the work; the payload is incidental.
struct StreamAbortInjector {
    timeout: Duration,
}

impl Injector for StreamAbortInjector {
    fn inject(&mut self, payload: &[u8], dst: SocketAddr) -> io::Result<()> {
        let mut stream = TcpStream::connect_timeout(&dst, self.timeout)?;
        stream.set_nodelay(true).ok();
        if !payload.is_empty() {
            stream.write_all(payload).ok();
        }
        Ok(())
    }
}
