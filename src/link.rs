//! Link-layer types: which top-level protocol a captured frame starts with.

use crate::error::Error;
use crate::protocols::ethernet::ETHER_HEADER_LEN;

/// Data link types understood by the decoder, keyed by their pcap DLT code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// BSD loopback: 4-byte address family in host order.
    Null,
    Ethernet,
    /// Raw IPv4, no link header.
    Raw,
    /// OpenBSD loopback: 4-byte address family in network order.
    Loop,
}

impl LinkType {
    pub fn from_dlt(dlt: i32) -> Result<Self, Error> {
        match dlt {
            0 => Ok(LinkType::Null),
            1 => Ok(LinkType::Ethernet),
            12 | 14 | 101 => Ok(LinkType::Raw),
            108 => Ok(LinkType::Loop),
            other => Err(Error::Unpack(format!(
                "could not interpret packet: unsupported link type {}",
                other
            ))),
        }
    }

    pub fn dlt(self) -> i32 {
        match self {
            LinkType::Null => 0,
            LinkType::Ethernet => 1,
            LinkType::Raw => 101,
            LinkType::Loop => 108,
        }
    }

    /// Length of the link header in bytes.
    pub fn header_len(self) -> usize {
        match self {
            LinkType::Null | LinkType::Loop => 4,
            LinkType::Ethernet => ETHER_HEADER_LEN,
            LinkType::Raw => 0,
        }
    }

    /// Name of the protocol a frame of this type is decoded as.
    pub fn protocol(self) -> &'static str {
        match self {
            LinkType::Null | LinkType::Loop => "localhost",
            LinkType::Ethernet => "ethernet",
            LinkType::Raw => "ipv4",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlt_codes() {
        assert_eq!(LinkType::from_dlt(1).unwrap(), LinkType::Ethernet);
        assert_eq!(LinkType::from_dlt(0).unwrap().header_len(), 4);
        assert_eq!(LinkType::from_dlt(101).unwrap().protocol(), "ipv4");
        assert!(matches!(LinkType::from_dlt(105), Err(Error::Unpack(_))));
    }
}
