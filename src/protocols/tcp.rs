//! TCP (RFC 793) header with options and the pseudo-header checksum.

use crate::bits::BitReader;
use crate::chain::Chain;
use crate::checksum::{internet_checksum, pseudo_header_checksum};
use crate::error::Error;
use crate::field::Field;
use crate::layout::Layout;
use crate::packet::Packet;
use crate::protocol::{Checksummable, Demux, Lengthed, Protocol};
use crate::protocols::ipv4::IPPROTO_TCP;
use crate::protocols::{packet_at, parse_options, segment_for_checksum, words, OptionKind};

pub const TCP_HEADER_LEN: usize = 20;

pub const TCPOPT_MAXSEG: u8 = 2;
pub const TCPOPT_WINDOW: u8 = 3;
pub const TCPOPT_SACK_PERMITTED: u8 = 4;
pub const TCPOPT_SACK: u8 = 5;
pub const TCPOPT_TIMESTAMP: u8 = 8;

const KNOWN_OPTIONS: &[OptionKind] = &[
    (TCPOPT_MAXSEG, "mss", Some(4)),
    (TCPOPT_WINDOW, "wscale", Some(3)),
    (TCPOPT_SACK_PERMITTED, "sackok", Some(2)),
    (TCPOPT_SACK, "sack", None),
    (TCPOPT_TIMESTAMP, "timestamp", Some(10)),
];

pub fn layout() -> Layout {
    Layout::trusted(
        "tcp",
        vec![
            Field::int("sport", 16),
            Field::int("dport", 16),
            Field::int("sequence", 32),
            Field::int("ack_number", 32),
            Field::int("offset", 4).default(5u8),
            Field::int("reserved", 6),
            Field::int("urgent", 1),
            Field::int("ack", 1),
            Field::int("push", 1),
            Field::int("reset", 1),
            Field::int("syn", 1),
            Field::int("fin", 1),
            Field::int("window", 16),
            Field::int("checksum", 16),
            Field::int("urg_pointer", 16),
            Field::options("options"),
        ],
    )
}

/// Looks the destination port up first, then the source port.
pub(crate) fn port_lookup<'p>(protocol: &'p Protocol, packet: &Packet) -> Option<&'p str> {
    let by_port = |name: &str| packet.get_int(name).ok().and_then(|p| protocol.lookup(p));
    by_port("dport").or_else(|| by_port("sport"))
}

#[derive(Debug, Clone, Copy)]
pub struct TcpDemux;

impl Demux for TcpDemux {
    fn decode_options(&self, packet: &mut Packet, reader: &mut BitReader<'_>) -> Result<(), Error> {
        let header_len = packet.get_int("offset")? as usize * 4;
        let available = reader.position() + reader.remaining_bytes();
        if header_len < TCP_HEADER_LEN {
            return Err(Error::Unpack(format!("TCP data offset {} is too short", header_len)));
        }
        if header_len > available {
            return Err(Error::Unpack(format!(
                "TCP header is larger than input ({} > {})",
                header_len, available
            )));
        }
        let options = reader.read_bytes("options", header_len - reader.position())?;
        if !options.is_empty() {
            parse_options(packet.field_mut("options")?, options, KNOWN_OPTIONS)?;
        }
        Ok(())
    }

    fn next_protocol<'p>(&self, protocol: &'p Protocol, packet: &Packet) -> Option<&'p str> {
        port_lookup(protocol, packet)
    }
}

/// Sets the data offset from the header size.
#[derive(Debug, Clone, Copy)]
pub struct TcpLength;

impl Lengthed for TcpLength {
    fn calc_length(&self, chain: &mut Chain, index: usize) -> Result<(), Error> {
        let p = packet_at(chain, index)?;
        let offset = words(p);
        p.set("offset", offset)
    }
}

/// Pseudo-header checksum using the directly enclosing IPv4 header. Without one,
/// a plain checksum over the segment.
#[derive(Debug, Clone, Copy)]
pub struct TcpChecksum;

impl Checksummable for TcpChecksum {
    fn calc_checksum(&self, chain: &mut Chain, index: usize) -> Result<(), Error> {
        transport_checksum(chain, index, IPPROTO_TCP as u8).map(|_| ())
    }
}

/// Shared by TCP and UDP: fills `checksum` and returns the stored value.
pub(crate) fn transport_checksum(chain: &mut Chain, index: usize, protocol: u8) -> Result<u16, Error> {
    let addrs = match chain.find_preceding(index, "ipv4", true) {
        Some(ip) => {
            let ip = &chain[ip];
            Some((ip.get_int("src")? as u32, ip.get_int("dst")? as u32))
        }
        None => None,
    };
    let segment = segment_for_checksum(chain, index)?;
    let sum = match addrs {
        Some((src, dst)) => pseudo_header_checksum(src, dst, protocol, &segment),
        None => internet_checksum(&segment),
    };
    packet_at(chain, index)?.set("checksum", sum)?;
    Ok(sum)
}

pub fn protocol() -> Protocol {
    Protocol::new(layout())
        .description("TCP")
        .demux(TcpDemux)
        .length(TcpLength)
        .checksum(TcpChecksum)
}
