//! ARP for IPv4 over Ethernet (RFC 826).

use crate::field::Field;
use crate::layout::Layout;
use crate::protocol::Protocol;

pub const ARPHRD_ETHER: u16 = 1;
pub const ARPOP_REQUEST: u16 = 1;
pub const ARPOP_REPLY: u16 = 2;

pub fn layout() -> Layout {
    Layout::trusted(
        "arp",
        vec![
            Field::int("hrd", 16).default(ARPHRD_ETHER),
            Field::int("pro", 16).default(0x0800u16),
            Field::int("hln", 8).default(6u8),
            Field::int("pln", 8).default(4u8),
            Field::int("op", 16),
            Field::bytes("sha", 48),
            Field::int("spa", 32),
            Field::bytes("tha", 48),
            Field::int("tpa", 32),
        ],
    )
}

pub fn protocol() -> Protocol {
    Protocol::new(layout()).description("ARP")
}
