//! ICMP (RFC 792) for a network stack: packet codec, checksum, and a ping
//! engine with round-trip-time statistics over a pluggable IP transport.

pub mod config;
pub mod error;
pub mod ping;
pub mod transport;
pub mod wire;

pub use config::PingConfig;
pub use error::{IcmpError, IcmpResult};
pub use ping::engine::{IcmpStack, StackCounters};
pub use ping::stats::PingStats;
pub use transport::{ChannelTransport, IpTransport, OutboundPacket};
pub use wire::checksum::checksum;
pub use wire::message::IcmpMessage;
