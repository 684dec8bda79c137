//! Decoding of Ethernet + IPv4 + TCP frames into header fields and payload.
//!
//! The decoder is pure: it never allocates and never reads outside of the frame.
//! Frames that are not TCP-over-IPv4-over-Ethernet are reported as not
//! applicable, frames whose header length fields are inconsistent with the
//! captured length are reported as malformed. Callers skip both silently.

use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::tcp::TcpPacket;

use crate::event::ParsedTcpEvent;

/// Size of the Ethernet link-layer header
pub const ETHERNET_HEADER_LEN: usize = 14;
/// Minimum size of an IPv4 or TCP header
pub const MIN_HEADER_LEN: usize = 20;

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome<'a> {
    Event(ParsedTcpEvent<'a>),
    /// Not an IPv4/TCP frame, or too short to tell
    NotApplicable,
    /// Header length fields point outside of the frame
    Malformed(&'static str),
}

impl<'a> DecodeOutcome<'a> {
    pub fn event(self) -> Option<ParsedTcpEvent<'a>> {
        match self {
            DecodeOutcome::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Decode a raw Ethernet frame.
///
/// The payload starts at `14 + IHL * 4 + data_offset * 4` and runs to the end of the frame.
pub fn decode(frame: &[u8]) -> DecodeOutcome<'_> {
    let eth = match EthernetPacket::new(frame) {
        Some(eth) => eth,
        None => return DecodeOutcome::NotApplicable,
    };
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return DecodeOutcome::NotApplicable;
    }
    let ipv4 = match Ipv4Packet::new(&frame[ETHERNET_HEADER_LEN..]) {
        Some(ipv4) => ipv4,
        None => return DecodeOutcome::NotApplicable,
    };
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        return DecodeOutcome::NotApplicable;
    }

    let ip_header_length = ipv4.get_header_length() as usize * 4;
    if ip_header_length < MIN_HEADER_LEN {
        return DecodeOutcome::Malformed("IPv4 header length below minimum");
    }
    let tcp_offset = ETHERNET_HEADER_LEN + ip_header_length;
    let tcp = match frame.get(tcp_offset..).and_then(TcpPacket::new) {
        Some(tcp) => tcp,
        None => return DecodeOutcome::Malformed("TCP header beyond end of frame"),
    };
    let tcp_header_length = tcp.get_data_offset() as usize * 4;
    if tcp_header_length < MIN_HEADER_LEN {
        return DecodeOutcome::Malformed("TCP header length below minimum");
    }
    let payload_offset = tcp_offset + tcp_header_length;
    let payload = match frame.get(payload_offset..) {
        Some(payload) => payload,
        None => return DecodeOutcome::Malformed("payload offset beyond end of frame"),
    };

    DecodeOutcome::Event(ParsedTcpEvent {
        source_ip: ipv4.get_source(),
        source_port: tcp.get_source(),
        dest_ip: ipv4.get_destination(),
        dest_port: tcp.get_destination(),
        payload,
    })
}
