//! IPv4 (RFC 791), with option parsing and header length/checksum hooks.

use std::net::Ipv4Addr;
use std::ops::Range;

use crate::bits::BitReader;
use crate::chain::Chain;
use crate::checksum::internet_checksum;
use crate::error::Error;
use crate::field::Field;
use crate::layout::Layout;
use crate::packet::Packet;
use crate::protocol::{Checksummable, Demux, Lengthed, Protocol};
use crate::protocols::{packet_at, parse_options, words, OptionKind};

pub const IPPROTO_ICMP: u64 = 1;
pub const IPPROTO_TCP: u64 = 6;
pub const IPPROTO_UDP: u64 = 17;

pub const IPOPT_RR: u8 = 7;
pub const IPOPT_TS: u8 = 68;
pub const IPOPT_LSRR: u8 = 131;
pub const IPOPT_SSRR: u8 = 137;
pub const IPOPT_RA: u8 = 148;

/// Fixed header size without options.
pub const IP_HEADER_LEN: usize = 20;

const KNOWN_OPTIONS: &[OptionKind] = &[
    (IPOPT_RR, "rr", None),
    (IPOPT_TS, "ts", None),
    (IPOPT_LSRR, "lsrr", None),
    (IPOPT_SSRR, "ssrr", None),
    (IPOPT_RA, "ra", Some(4)),
];

pub fn layout() -> Layout {
    Layout::trusted(
        "ipv4",
        vec![
            Field::int("version", 4).default(4u8),
            Field::int("hlen", 4).default(5u8),
            Field::int("tos", 8),
            Field::int("length", 16),
            Field::int("id", 16),
            Field::int("flags", 3),
            Field::int("offset", 13),
            Field::int("ttl", 8).default(64u8),
            Field::int("protocol", 8).discriminator(),
            Field::int("checksum", 16),
            Field::int("src", 32),
            Field::int("dst", 32),
            Field::options("options"),
        ],
    )
}

#[derive(Debug, Clone, Copy)]
pub struct Ipv4Demux;

impl Demux for Ipv4Demux {
    fn decode_options(&self, packet: &mut Packet, reader: &mut BitReader<'_>) -> Result<(), Error> {
        let header_len = packet.get_int("hlen")? as usize * 4;
        let available = reader.position() + reader.remaining_bytes();
        if header_len < IP_HEADER_LEN {
            return Err(Error::Unpack(format!("IP header length {} is too short", header_len)));
        }
        if header_len > available {
            return Err(Error::Unpack(format!(
                "IP header is larger than input ({} > {})",
                header_len, available
            )));
        }
        let options = reader.read_bytes("options", header_len - reader.position())?;
        if !options.is_empty() {
            parse_options(packet.field_mut("options")?, options, KNOWN_OPTIONS)?;
        }
        Ok(())
    }

    /// Payload ends where the total length says, which drops link-layer padding.
    fn payload_range(&self, packet: &Packet, bytes: &[u8], header_len: usize) -> Result<Range<usize>, Error> {
        let total = packet.get_int("length")? as usize;
        let end = if total >= header_len && total <= bytes.len() {
            total
        } else {
            bytes.len()
        };
        Ok(header_len..end)
    }
}

/// Sets `hlen` from the header size and `length` from the header plus payload.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Length;

impl Lengthed for Ipv4Length {
    fn calc_length(&self, chain: &mut Chain, index: usize) -> Result<(), Error> {
        let following = chain.collate_following(index)?.len();
        let p = packet_at(chain, index)?;
        let hlen = words(p);
        p.set("hlen", hlen)?;
        p.set("length", hlen as usize * 4 + following)
    }
}

/// Header checksum; covers the header only.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Checksum;

impl Checksummable for Ipv4Checksum {
    fn calc_checksum(&self, chain: &mut Chain, index: usize) -> Result<(), Error> {
        let p = packet_at(chain, index)?;
        p.set("checksum", 0u16)?;
        let sum = internet_checksum(p.bytes()?);
        p.set("checksum", sum)
    }
}

pub fn protocol() -> Protocol {
    Protocol::new(layout())
        .description("IPv4")
        .map(IPPROTO_ICMP, "icmpv4")
        .map(IPPROTO_TCP, "tcp")
        .map(IPPROTO_UDP, "udp")
        .demux(Ipv4Demux)
        .length(Ipv4Length)
        .checksum(Ipv4Checksum)
}

pub fn addr(packet: &Packet, field: &str) -> Result<Ipv4Addr, Error> {
    Ok(Ipv4Addr::from(packet.get_int(field)? as u32))
}
