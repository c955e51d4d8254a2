//! Ethernet II.

use crate::error::Error;
use crate::field::Field;
use crate::layout::Layout;
use crate::protocol::Protocol;

pub const ETHERTYPE_IP: u64 = 0x0800;
pub const ETHERTYPE_ARP: u64 = 0x0806;
pub const ETHER_HEADER_LEN: usize = 14;

pub fn layout() -> Layout {
    Layout::trusted(
        "ethernet",
        vec![
            Field::bytes("dst", 48),
            Field::bytes("src", 48),
            Field::int("type", 16).discriminator(),
        ],
    )
}

pub fn protocol() -> Protocol {
    Protocol::new(layout())
        .description("Ethernet")
        .map(ETHERTYPE_IP, "ipv4")
        .map(ETHERTYPE_ARP, "arp")
}

/// Parse `aa:bb:cc:dd:ee:ff` (or `-` separated).
pub fn parse_mac(s: &str) -> Result<[u8; 6], Error> {
    let mut out = [0u8; 6];
    let mut parts = s.split([':', '-']);
    for byte in out.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| Error::Parse(format!("MAC address too short: {}", s)))?;
        *byte = u8::from_str_radix(part, 16)
            .map_err(|_| Error::Parse(format!("bad MAC address octet {:?} in {}", part, s)))?;
    }
    if parts.next().is_some() {
        return Err(Error::Parse(format!("MAC address too long: {}", s)));
    }
    Ok(out)
}

pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_roundtrip() {
        let mac = parse_mac("00:1b:21:3a:4F:0c").unwrap();
        assert_eq!(mac, [0x00, 0x1b, 0x21, 0x3a, 0x4f, 0x0c]);
        assert_eq!(format_mac(&mac), "00:1b:21:3a:4f:0c");
        assert!(parse_mac("00:1b:21").is_err());
        assert!(parse_mac("00:1b:21:3a:4f:0c:99").is_err());
        assert!(parse_mac("zz:1b:21:3a:4f:0c").is_err());
    }
}
