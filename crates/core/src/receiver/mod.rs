//! Listening side: joins the group and decodes envelopes until the run ends.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::emitter::CancellationToken;
use crate::{Event, Payload, Result};

/// Read timeout; also the longest delay before a cancellation is noticed.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

const MAX_DATAGRAM: usize = 65_536;

/// Consecutive hard receive errors tolerated before the loop gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Why a receive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Ended,
    Aborted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub outcome: ReceiveOutcome,
    pub received: usize,
    pub malformed: usize,
}

#[derive(Debug)]
pub struct Receiver {
    socket: UdpSocket,
    token: CancellationToken,
}

impl Receiver {
    /// Binds `interface:port` and joins `group` when it is a multicast
    /// address. Port 0 picks an ephemeral port.
    pub fn bind(
        group: Ipv4Addr,
        port: u16,
        interface: Ipv4Addr,
        token: CancellationToken,
    ) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::V4(SocketAddrV4::new(interface, port)).into())?;
        if group.is_multicast() {
            socket.join_multicast_v4(&group, &interface)?;
        }
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        let socket: UdpSocket = socket.into();
        info!(%group, local = ?socket.local_addr().ok(), "listening for events");
        Ok(Self { socket, token })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Hands every decoded event to `on_event` until track.end, track.abort
    /// or cancellation. Malformed datagrams are logged and skipped.
    pub fn run(&self, mut on_event: impl FnMut(&Event)) -> Result<ReceiveSummary> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut received = 0;
        let mut malformed = 0;
        let mut errors = ReceiveErrors::default();

        loop {
            if self.token.is_cancelled() {
                return Ok(ReceiveSummary {
                    outcome: ReceiveOutcome::Cancelled,
                    received,
                    malformed,
                });
            }

            let (len, sender) = match self.socket.recv_from(&mut buf) {
                Ok(read) => {
                    errors.reset();
                    read
                }
                Err(err) => {
                    if let Some(delay) = errors.record(err)? {
                        thread::sleep(delay);
                    }
                    continue;
                }
            };

            let event = match Event::decode(&buf[..len]) {
                Ok(event) => event,
                Err(err) => {
                    warn!(%sender, len, error = %err, "failed to parse envelope");
                    malformed += 1;
                    continue;
                }
            };

            received += 1;
            on_event(&event);

            let outcome = match event.payload {
                Payload::TrackEnd => ReceiveOutcome::Ended,
                Payload::TrackAbort { .. } => ReceiveOutcome::Aborted,
                _ => continue,
            };
            debug!(?outcome, received, malformed, "terminal event received");
            return Ok(ReceiveSummary {
                outcome,
                received,
                malformed,
            });
        }
    }
}

/// Counts hard receive failures so a persistent error neither spins the
/// loop nor is retried forever.
#[derive(Debug, Default)]
struct ReceiveErrors {
    consecutive: u32,
}

impl ReceiveErrors {
    /// Returns how long to back off before the next read, `None` for the
    /// benign timeout kinds, or the error once too many failed in a row.
    fn record(&mut self, err: io::Error) -> Result<Option<Duration>> {
        if matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
        ) {
            return Ok(None);
        }
        self.consecutive += 1;
        if self.consecutive >= MAX_CONSECUTIVE_ERRORS {
            return Err(err.into());
        }
        warn!(error = %err, attempt = self.consecutive, "receive failed");
        Ok(Some(ERROR_BACKOFF))
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}
