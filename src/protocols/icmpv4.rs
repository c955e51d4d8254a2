//! ICMPv4 (RFC 792) common header.

use crate::chain::Chain;
use crate::checksum::internet_checksum;
use crate::error::Error;
use crate::field::Field;
use crate::layout::Layout;
use crate::protocol::{Checksummable, Protocol};
use crate::protocols::{packet_at, segment_for_checksum};

pub const ICMP_ECHOREPLY: u8 = 0;
pub const ICMP_UNREACH: u8 = 3;
pub const ICMP_ECHO: u8 = 8;
pub const ICMP_TIMXCEED: u8 = 11;

pub fn layout() -> Layout {
    Layout::trusted(
        "icmpv4",
        vec![
            Field::int("type", 8),
            Field::int("code", 8),
            Field::int("checksum", 16),
        ],
    )
}

/// Checksum over the ICMP header and everything after it.
#[derive(Debug, Clone, Copy)]
pub struct IcmpChecksum;

impl Checksummable for IcmpChecksum {
    fn calc_checksum(&self, chain: &mut Chain, index: usize) -> Result<(), Error> {
        let message = segment_for_checksum(chain, index)?;
        packet_at(chain, index)?.set("checksum", internet_checksum(&message))
    }
}

pub fn protocol() -> Protocol {
    Protocol::new(layout()).description("ICMPv4").checksum(IcmpChecksum)
}
