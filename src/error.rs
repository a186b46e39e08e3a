//! ICMP error taxonomy.
//!
//! One unified error type for the codec and the ping engine. Inbound packet
//! problems are absorbed at the dispatcher (dropped and logged); these
//! variants surface only on outbound calls and the caller API.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpError {
    /// Allocation failure unrelated to table backpressure.
    NoMemory,
    /// Malformed caller input (bad destination, oversized payload).
    InvalidArgument,
    /// A specific request's deadline elapsed.
    Timeout,
    /// Destination unreachable, reported by an inbound error message.
    Unreachable,
    /// No route to destination, reported by an inbound error message.
    NoRoute,
    /// Pending table at capacity with no reclaimable slot, or a continuous
    /// session already running.
    Busy,
    /// Caller-supplied buffer cannot hold the encoded message.
    BufferTooSmall,
    /// Datagram too short to carry an ICMP header.
    Malformed,
    /// The IP layer refused the outbound packet.
    Send(String),
}

impl IcmpError {
    pub fn description(&self) -> &str {
        match self {
            Self::NoMemory => "out of memory",
            Self::InvalidArgument => "invalid argument",
            Self::Timeout => "request timed out",
            Self::Unreachable => "destination unreachable",
            Self::NoRoute => "no route to destination",
            Self::Busy => "too many outstanding requests",
            Self::BufferTooSmall => "buffer too small for message",
            Self::Malformed => "malformed packet",
            Self::Send(reason) => reason,
        }
    }
}

impl fmt::Display for IcmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send(reason) => write!(f, "send failed: {}", reason),
            other => f.write_str(other.description()),
        }
    }
}

impl std::error::Error for IcmpError {}

pub type IcmpResult<T> = Result<T, IcmpError>;
