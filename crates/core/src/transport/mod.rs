//! Best-effort datagram delivery of encoded envelopes.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::{Event, Result, TracksError};

const ROUTE_TABLE: &str = "/proc/net/route";

/// Sink for encoded envelopes. One call is one message; delivery is best
/// effort and callers never retry.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }
}

/// UDP sender to a multicast group (or broadcast address) with an optional
/// unicast copy of every datagram.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    group: SocketAddrV4,
    unicast: Option<SocketAddrV4>,
}

impl UdpTransport {
    pub fn open(network: &NetworkConfig) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_multicast_ttl_v4(network.ttl)?;
        socket.set_multicast_loop_v4(network.loopback)?;
        if !network.interface.is_unspecified() {
            socket.set_multicast_if_v4(&network.interface)?;
        }
        if !network.multicast_group.is_multicast() {
            socket.set_broadcast(true)?;
        }
        socket.set_nonblocking(true)?;

        let unicast = match network.unicast_target.as_deref() {
            Some(target) => resolve_unicast(target)?.map(|ip| SocketAddrV4::new(ip, network.port)),
            None => None,
        };

        let group = SocketAddrV4::new(network.multicast_group, network.port);
        info!(%group, ttl = network.ttl, loopback = network.loopback, ?unicast, "transport ready");

        Ok(Self {
            socket: socket.into(),
            group,
            unicast,
        })
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    pub fn unicast(&self) -> Option<SocketAddrV4> {
        self.unicast
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        // The unicast copy goes out even when the group send fails.
        let sent = self.socket.send_to(bytes, self.group);
        if let Some(target) = self.unicast {
            if let Err(err) = self.socket.send_to(bytes, target) {
                debug!(%target, error = %err, "unicast copy not sent");
            }
        }
        sent?;
        Ok(())
    }
}

/// Resolves the unicast duplicate target: a literal address, or `auto` for
/// the default-route gateway. `auto` without a default route yields `None`.
pub fn resolve_unicast(target: &str) -> Result<Option<Ipv4Addr>> {
    let target = target.trim();
    if target.eq_ignore_ascii_case("auto") {
        let gateway = match std::fs::read_to_string(ROUTE_TABLE) {
            Ok(table) => parse_default_gateway(&table),
            Err(err) => {
                warn!(error = %err, "cannot read the routing table");
                None
            }
        };
        if gateway.is_none() {
            warn!("no default gateway found, unicast copy disabled");
        }
        return Ok(gateway);
    }

    target
        .parse::<Ipv4Addr>()
        .map(Some)
        .map_err(|_| TracksError::config(format!("invalid unicast target '{target}'")))
}

/// Extracts the gateway of the default route from the Linux routing table
/// format (hex fields in host byte order).
pub fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            return None;
        }
        let gateway = u32::from_str_radix(fields[2], 16).ok()?;
        if gateway == 0 {
            return None;
        }
        let [a, b, c, d] = gateway.to_le_bytes();
        Some(Ipv4Addr::new(a, b, c, d))
    })
}

/// In-process transport keeping every datagram, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    fail: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose sends all fail with an I/O error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn datagrams(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Decoded copies of the datagrams sent so far.
    pub fn events(&self) -> Vec<Event> {
        self.datagrams()
            .iter()
            .filter_map(|bytes| Event::decode(bytes).ok())
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "send refused").into());
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| TracksError::msg("memory transport poisoned"))?;
        sent.push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;

    const ROUTES: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t0000A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
";

    #[test]
    fn default_gateway_is_decoded_from_host_order() {
        assert_eq!(
            parse_default_gateway(ROUTES),
            Some(Ipv4Addr::new(192, 168, 1, 1))
        );
    }

    #[test]
    fn no_default_route_means_no_gateway() {
        let table = ROUTES.lines().take(2).collect::<Vec<_>>().join("\n");
        assert_eq!(parse_default_gateway(&table), None);
    }

    #[test]
    fn unicast_target_accepts_literals_only() {
        assert_eq!(
            resolve_unicast("10.0.0.7").unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 7))
        );
        assert!(resolve_unicast("not-an-ip").is_err());
    }

    #[test]
    fn memory_transport_shares_datagrams_between_clones() {
        let transport = MemoryTransport::new();
        let mut sender = transport.clone();
        let event = Event::new(0.5, Payload::Beat { confidence: None });
        sender.send(&event.encode().unwrap()).unwrap();

        assert_eq!(transport.events(), vec![event]);
        assert!(MemoryTransport::failing().send(b"x").is_err());
    }

    #[test]
    fn udp_transport_delivers_to_a_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        listener
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();

        let network = NetworkConfig {
            multicast_group: Ipv4Addr::new(127, 0, 0, 1),
            port,
            ..NetworkConfig::default()
        };
        let mut transport = UdpTransport::open(&network).unwrap();
        transport.send(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello");
    }

    #[test]
    fn unicast_copy_is_sent_when_the_group_send_fails() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        listener
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();

        let network = NetworkConfig {
            multicast_group: Ipv4Addr::LOCALHOST,
            port,
            unicast_target: Some("127.0.0.1".to_string()),
            ..NetworkConfig::default()
        };
        let mut transport = UdpTransport::open(&network).unwrap();
        // UDP refuses destination port 0.
        transport.group = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);

        assert!(transport.send(b"copy").is_err());
        let mut buf = [0u8; 16];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"copy");
    }
}
