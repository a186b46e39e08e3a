//! Seam to the IP layer.
//!
//! The stack never owns a socket; it hands finished ICMP datagrams to an
//! [`IpTransport`] and is fed inbound datagrams through
//! [`IcmpStack::deliver`](crate::ping::engine::IcmpStack::deliver).

use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound side of the IP layer.
pub trait IpTransport: Send + Sync {
    /// Hand one ICMP datagram (protocol 1) to the IP layer for `dst`.
    fn send_packet(&self, dst: Ipv4Addr, packet: &[u8]) -> io::Result<()>;
}

/// One datagram captured by a [`ChannelTransport`].
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    pub dst: Ipv4Addr,
    pub bytes: Vec<u8>,
}

/// Channel-backed transport: sends become messages on an unbounded queue.
///
/// The consumer half plays the IP layer, forwarding, reflecting, or dropping
/// packets as the scenario requires.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundPacket>,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundPacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl IpTransport for ChannelTransport {
    fn send_packet(&self, dst: Ipv4Addr, packet: &[u8]) -> io::Result<()> {
        self.tx
            .send(OutboundPacket {
                dst,
                bytes: packet.to_vec(),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "ip layer receiver dropped"))
    }
}
