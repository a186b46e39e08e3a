//! ICMP message shapes (RFC 792) and their wire codec.
//!
//! All three shapes share an 8-byte prefix: type, code, checksum, then four
//! type-specific bytes. The checksum is always computed over the complete
//! message with the checksum field zeroed.

use crate::error::IcmpError;
use crate::wire::checksum::checksum;
use std::net::Ipv4Addr;

/// IP protocol number for ICMP
pub const ICMP_PROTOCOL: u8 = 1;
/// Fixed ICMP header length
pub const ICMP_HEADER_LEN: usize = 8;
/// Largest echo payload that fits a 1500-byte MTU after IP + ICMP headers
pub const MAX_ECHO_DATA: usize = 1472;
/// Bytes of the offending datagram's payload quoted in an error message
pub const ERROR_QUOTE_LEN: usize = 8;
/// Minimum IPv4 header length
pub const IP_HEADER_LEN: usize = 20;

/// Message types
pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

/// Destination unreachable codes
pub const CODE_NET_UNREACHABLE: u8 = 0;
pub const CODE_HOST_UNREACHABLE: u8 = 1;
pub const CODE_PROTO_UNREACHABLE: u8 = 2;
pub const CODE_PORT_UNREACHABLE: u8 = 3;
pub const CODE_FRAG_NEEDED: u8 = 4;
pub const CODE_NET_UNKNOWN: u8 = 6;

/// Time exceeded codes
pub const CODE_TTL_EXCEEDED: u8 = 0;
pub const CODE_FRAG_REASSEMBLY: u8 = 1;

/// Direction of an echo message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoKind {
    Request,
    Reply,
}

impl EchoKind {
    pub const fn type_value(self) -> u8 {
        match self {
            Self::Request => TYPE_ECHO_REQUEST,
            Self::Reply => TYPE_ECHO_REPLY,
        }
    }
}

/// The two error message families this stack understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DestUnreachable(u8),
    TimeExceeded(u8),
}

impl ErrorKind {
    pub const fn type_value(self) -> u8 {
        match self {
            Self::DestUnreachable(_) => TYPE_DEST_UNREACHABLE,
            Self::TimeExceeded(_) => TYPE_TIME_EXCEEDED,
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::DestUnreachable(code) | Self::TimeExceeded(code) => code,
        }
    }
}

/// A decoded ICMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpMessage {
    /// Echo request/reply: identifier and sequence occupy the four
    /// type-specific bytes, payload follows.
    Echo {
        kind: EchoKind,
        identifier: u16,
        sequence: u16,
        payload: Vec<u8>,
    },
    /// Destination Unreachable / Time Exceeded: four reserved zero bytes,
    /// then the offending datagram's IP header plus at most
    /// [`ERROR_QUOTE_LEN`] bytes of its payload, verbatim.
    Error {
        kind: ErrorKind,
        original_header: Vec<u8>,
        original_payload: Vec<u8>,
    },
    /// Catch-all for unrecognized types, preserved for forwarding/debugging.
    Generic {
        msg_type: u8,
        code: u8,
        rest_of_header: [u8; 4],
    },
}

impl IcmpMessage {
    /// Encoded size of this message
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Echo { payload, .. } => ICMP_HEADER_LEN + payload.len(),
            Self::Error {
                original_header,
                original_payload,
                ..
            } => {
                ICMP_HEADER_LEN
                    + original_header.len()
                    + original_payload.len().min(ERROR_QUOTE_LEN)
            }
            Self::Generic { .. } => ICMP_HEADER_LEN,
        }
    }

    /// Encode into a caller-supplied buffer, stamping the checksum.
    ///
    /// Returns the number of bytes written, or `BufferTooSmall` if the
    /// buffer cannot hold header plus payload.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, IcmpError> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(IcmpError::BufferTooSmall);
        }

        match self {
            Self::Echo {
                kind,
                identifier,
                sequence,
                payload,
            } => {
                buf[0] = kind.type_value();
                buf[1] = 0;
                buf[4..6].copy_from_slice(&identifier.to_be_bytes());
                buf[6..8].copy_from_slice(&sequence.to_be_bytes());
                buf[ICMP_HEADER_LEN..len].copy_from_slice(payload);
            }
            Self::Error {
                kind,
                original_header,
                original_payload,
            } => {
                buf[0] = kind.type_value();
                buf[1] = kind.code();
                // Four reserved bytes, must be zero
                buf[4..8].fill(0);
                let hdr_end = ICMP_HEADER_LEN + original_header.len();
                buf[ICMP_HEADER_LEN..hdr_end].copy_from_slice(original_header);
                let quote = &original_payload[..original_payload.len().min(ERROR_QUOTE_LEN)];
                buf[hdr_end..hdr_end + quote.len()].copy_from_slice(quote);
            }
            Self::Generic {
                msg_type,
                code,
                rest_of_header,
            } => {
                buf[0] = *msg_type;
                buf[1] = *code;
                buf[4..8].copy_from_slice(rest_of_header);
            }
        }

        // Checksum over the complete message, field zeroed during computation
        buf[2] = 0;
        buf[3] = 0;
        let sum = checksum(&buf[..len]);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());
        Ok(len)
    }

    /// Encode into a freshly allocated, exactly-sized buffer.
    pub fn encode_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.wire_len()];
        self.encode(&mut buf).expect("buffer sized to message");
        buf
    }

    /// Decode a raw ICMP datagram.
    ///
    /// Fails `Malformed` only when the fixed 8-byte header is missing.
    /// Error messages decode best-effort: a truncated quoted datagram still
    /// yields an `Error` carrying whatever header/payload bytes are present.
    pub fn decode(data: &[u8]) -> Result<IcmpMessage, IcmpError> {
        if data.len() < ICMP_HEADER_LEN {
            return Err(IcmpError::Malformed);
        }

        let msg_type = data[0];
        let code = data[1];

        match msg_type {
            TYPE_ECHO_REQUEST | TYPE_ECHO_REPLY => {
                let kind = if msg_type == TYPE_ECHO_REQUEST {
                    EchoKind::Request
                } else {
                    EchoKind::Reply
                };
                Ok(IcmpMessage::Echo {
                    kind,
                    identifier: u16::from_be_bytes([data[4], data[5]]),
                    sequence: u16::from_be_bytes([data[6], data[7]]),
                    payload: data[ICMP_HEADER_LEN..].to_vec(),
                })
            }
            TYPE_DEST_UNREACHABLE | TYPE_TIME_EXCEEDED => {
                let kind = if msg_type == TYPE_DEST_UNREACHABLE {
                    ErrorKind::DestUnreachable(code)
                } else {
                    ErrorKind::TimeExceeded(code)
                };
                let (original_header, original_payload) =
                    split_quoted_datagram(&data[ICMP_HEADER_LEN..]);
                Ok(IcmpMessage::Error {
                    kind,
                    original_header: original_header.to_vec(),
                    original_payload: original_payload.to_vec(),
                })
            }
            _ => Ok(IcmpMessage::Generic {
                msg_type,
                code,
                rest_of_header: [data[4], data[5], data[6], data[7]],
            }),
        }
    }
}

/// Split a quoted datagram into (IP header, first ≤8 payload bytes).
///
/// Best effort on truncated input: the header is taken up to the declared
/// IHL or the buffer end, whichever comes first, and never panics.
pub fn split_quoted_datagram(datagram: &[u8]) -> (&[u8], &[u8]) {
    if datagram.len() < IP_HEADER_LEN {
        return (datagram, &[]);
    }
    let ihl = ((datagram[0] & 0x0F) as usize * 4).max(IP_HEADER_LEN);
    if datagram.len() <= ihl {
        return (datagram, &[]);
    }
    let payload = &datagram[ihl..];
    (
        &datagram[..ihl],
        &payload[..payload.len().min(ERROR_QUOTE_LEN)],
    )
}

/// Destination address and protocol of a quoted IPv4 header, if present.
pub fn quoted_destination(original_header: &[u8]) -> Option<(Ipv4Addr, u8)> {
    if original_header.len() < IP_HEADER_LEN || original_header[0] >> 4 != 4 {
        return None;
    }
    let protocol = original_header[9];
    let dst = Ipv4Addr::new(
        original_header[16],
        original_header[17],
        original_header[18],
        original_header[19],
    );
    Some((dst, protocol))
}

/// Human-readable name of an ICMP message type
pub fn type_name(msg_type: u8) -> &'static str {
    match msg_type {
        TYPE_ECHO_REPLY => "echo reply",
        TYPE_DEST_UNREACHABLE => "destination unreachable",
        4 => "source quench",
        5 => "redirect",
        TYPE_ECHO_REQUEST => "echo request",
        TYPE_TIME_EXCEEDED => "time exceeded",
        12 => "parameter problem",
        13 => "timestamp",
        14 => "timestamp reply",
        _ => "unknown",
    }
}

/// Human-readable name of a destination unreachable code
pub fn unreachable_code_name(code: u8) -> &'static str {
    match code {
        CODE_NET_UNREACHABLE => "network unreachable",
        CODE_HOST_UNREACHABLE => "host unreachable",
        CODE_PROTO_UNREACHABLE => "protocol unreachable",
        CODE_PORT_UNREACHABLE => "port unreachable",
        CODE_FRAG_NEEDED => "fragmentation needed",
        5 => "source route failed",
        CODE_NET_UNKNOWN => "network unknown",
        7 => "host unknown",
        _ => "unknown code",
    }
}
