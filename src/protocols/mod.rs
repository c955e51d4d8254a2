//! Built-in protocol layouts.

pub mod arp;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;
pub mod localhost;
pub mod payload;
pub mod tcp;
pub mod udp;

use crate::chain::Chain;
use crate::error::Error;
use crate::field::Field;
use crate::packet::Packet;
use crate::protocol::Protocol;

pub const IPOPT_EOL: u8 = 0;
pub const IPOPT_NOP: u8 = 1;

/// Every built-in protocol, ready to register.
pub fn all() -> Vec<Protocol> {
    vec![
        ethernet::protocol(),
        localhost::protocol(),
        arp::protocol(),
        ipv4::protocol(),
        icmpv4::protocol(),
        tcp::protocol(),
        udp::protocol(),
        payload::protocol(),
    ]
}

/// A known option kind: (kind, name, required total length).
pub(crate) type OptionKind = (u8, &'static str, Option<usize>);

/// Parse an IPv4/TCP style option area into `options`. End-of-list and no-op are
/// single bytes; every other kind is type, length (inclusive, in bytes), value.
pub(crate) fn parse_options(options: &mut Field, bytes: &[u8], kinds: &[OptionKind]) -> Result<(), Error> {
    options.clear_options();
    let mut i = 0;
    while i < bytes.len() {
        let kind = bytes[i];
        match kind {
            IPOPT_EOL => {
                options.push_option(Field::int("end", 8).default(IPOPT_EOL))?;
                i += 1;
            }
            IPOPT_NOP => {
                options.push_option(Field::int("nop", 8).default(IPOPT_NOP))?;
                i += 1;
            }
            _ => {
                let len = *bytes
                    .get(i + 1)
                    .ok_or_else(|| Error::Unpack(format!("option {} truncated", kind)))?
                    as usize;
                let known = kinds.iter().find(|(k, _, _)| *k == kind);
                let bad_len = match known {
                    Some((_, _, Some(want))) => len != *want,
                    _ => false,
                };
                if len < 2 || bad_len || i + len > bytes.len() {
                    return Err(Error::Unpack(format!("bad length {} for option {}", len, kind)));
                }
                let name = known.map(|(_, n, _)| *n).unwrap_or("unknown");
                options.push_option(option_tlv(name, kind, bytes[i + 2..i + len].to_vec()))?;
                i += len;
            }
        }
    }
    Ok(())
}

/// Type-length-value option with an 8-bit type and an inclusive byte length.
pub fn option_tlv(name: &str, kind: u8, value: Vec<u8>) -> Field {
    Field::type_length_value(
        name,
        Field::int("t", 8).default(kind),
        Field::int("l", 8),
        Field::rest("v").default(value),
    )
}

/// Header size in 32-bit words, rounded up.
pub(crate) fn words(packet: &Packet) -> u64 {
    packet.sizeof().div_ceil(4) as u64
}

/// The packet at `index`, or `PacketNotInChain`.
pub(crate) fn packet_at(chain: &mut Chain, index: usize) -> Result<&mut Packet, Error> {
    chain.get_mut(index).ok_or(Error::PacketNotInChain(index))
}

/// Header bytes of `index` with the checksum zeroed, followed by everything it
/// carries.
pub(crate) fn segment_for_checksum(chain: &mut Chain, index: usize) -> Result<Vec<u8>, Error> {
    let following = chain.collate_following(index)?;
    let p = packet_at(chain, index)?;
    p.set("checksum", 0u16)?;
    let mut segment = p.bytes()?.to_vec();
    segment.extend_from_slice(&following);
    Ok(segment)
}
