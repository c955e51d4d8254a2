//! Loopback (DLT_NULL / DLT_LOOP) link header: a 32-bit address family.

use crate::field::Field;
use crate::layout::Layout;
use crate::protocol::Protocol;

pub const AF_INET: u64 = 2;
/// `AF_INET` as written by a little-endian host, read back in network order.
pub const AF_INET_SWAPPED: u64 = 0x0200_0000;

pub fn layout() -> Layout {
    Layout::trusted("localhost", vec![Field::int("type", 32).discriminator()])
}

pub fn protocol() -> Protocol {
    Protocol::new(layout())
        .description("Localhost")
        .map(AF_INET, "ipv4")
        .map(AF_INET_SWAPPED, "ipv4")
}
