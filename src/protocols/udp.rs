//! UDP (RFC 768).

use crate::chain::Chain;
use crate::error::Error;
use crate::field::Field;
use crate::layout::Layout;
use crate::packet::Packet;
use crate::protocol::{Checksummable, Demux, Lengthed, Protocol};
use crate::protocols::ipv4::IPPROTO_UDP;
use crate::protocols::packet_at;
use crate::protocols::tcp::{port_lookup, transport_checksum};

pub const UDP_HEADER_LEN: usize = 8;

pub fn layout() -> Layout {
    Layout::trusted(
        "udp",
        vec![
            Field::int("sport", 16),
            Field::int("dport", 16),
            Field::int("length", 16),
            Field::int("checksum", 16),
        ],
    )
}

#[derive(Debug, Clone, Copy)]
pub struct UdpDemux;

impl Demux for UdpDemux {
    fn next_protocol<'p>(&self, protocol: &'p Protocol, packet: &Packet) -> Option<&'p str> {
        port_lookup(protocol, packet)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UdpLength;

impl Lengthed for UdpLength {
    fn calc_length(&self, chain: &mut Chain, index: usize) -> Result<(), Error> {
        let following = chain.collate_following(index)?.len();
        packet_at(chain, index)?.set("length", UDP_HEADER_LEN + following)
    }
}

/// A computed checksum of zero is sent as all ones; zero means "no checksum".
#[derive(Debug, Clone, Copy)]
pub struct UdpChecksum;

impl Checksummable for UdpChecksum {
    fn calc_checksum(&self, chain: &mut Chain, index: usize) -> Result<(), Error> {
        if transport_checksum(chain, index, IPPROTO_UDP as u8)? == 0 {
            packet_at(chain, index)?.set("checksum", 0xffffu16)?;
        }
        Ok(())
    }
}

pub fn protocol() -> Protocol {
    Protocol::new(layout())
        .description("UDP")
        .demux(UdpDemux)
        .length(UdpLength)
        .checksum(UdpChecksum)
}
