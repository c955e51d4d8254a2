//! Integration tests: build, fix up, decode and match real protocol stacks.

use std::net::Ipv4Addr;
use std::time::Duration;

use pktset::protocols::{ipv4, option_tlv};
use pktset::{Chain, Error, Field, LinkType, Packet, ProtocolRegistry, Value};

/// Ethernet / IPv4 / TCP SYN, 10.0.0.1:53678 -> 10.0.0.2:80.
const SYN: [u8; 54] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00, 0x45, 0x00,
    0x00, 0x28, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x06, 0x0a, 0x88, 0x0a, 0x00, 0x00, 0x01, 0x0a, 0x00,
    0x00, 0x02, 0xd1, 0xae, 0x00, 0x50, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00, 0x50, 0x02,
    0xff, 0xff, 0xc5, 0xdb, 0x00, 0x00,
];

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn build_syn(registry: &ProtocolRegistry) -> Chain {
    let mut eth = registry.packet("ethernet").unwrap();
    eth.set("dst", [0x00u8, 0x11, 0x22, 0x33, 0x44, 0x55]).unwrap();
    eth.set("src", [0x66u8, 0x77, 0x88, 0x99, 0xaa, 0xbb]).unwrap();
    let mut ip = registry.packet("ipv4").unwrap();
    ip.set("id", 0x1c46u16).unwrap();
    ip.set("flags", 2u8).unwrap();
    ip.set("src", Ipv4Addr::new(10, 0, 0, 1)).unwrap();
    ip.set("dst", Ipv4Addr::new(10, 0, 0, 2)).unwrap();
    let mut tcp = registry.packet("tcp").unwrap();
    tcp.set("sport", 53678u16).unwrap();
    tcp.set("dport", 80u16).unwrap();
    tcp.set("sequence", 0x01020304u32).unwrap();
    tcp.set("syn", 1u8).unwrap();
    tcp.set("window", 65535u16).unwrap();
    eth / ip / tcp
}

#[test]
fn syn_frame_decodes_into_three_layers() {
    let registry = ProtocolRegistry::builtin();
    let chain = registry.decode_link(LinkType::Ethernet, &SYN, None).unwrap();
    let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
    assert_eq!(names, ["ethernet", "ipv4", "tcp"]);

    assert_eq!(chain[0].get_int("type").unwrap(), 0x0800);
    assert_eq!(ipv4::addr(&chain[1], "src").unwrap(), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(ipv4::addr(&chain[1], "dst").unwrap(), Ipv4Addr::new(10, 0, 0, 2));
    assert_eq!(chain[1].get_int("length").unwrap(), 40);
    assert_eq!(chain[2].get_int("sport").unwrap(), 53678);
    assert_eq!(chain[2].get_int("dport").unwrap(), 80);
    assert_eq!(chain[2].get_int("syn").unwrap(), 1);
    assert_eq!(chain[2].get_int("ack").unwrap(), 0);
    assert_eq!(chain.to_bytes().unwrap(), SYN);
}

#[test]
fn fixup_reproduces_captured_syn() {
    let registry = ProtocolRegistry::builtin();
    let mut chain = build_syn(&registry);
    assert_eq!(chain.fixup().unwrap(), &SYN[..]);
    assert_eq!(chain[1].get_int("checksum").unwrap(), 0x0a88);
    assert_eq!(chain[2].get_int("checksum").unwrap(), 0xc5db);

    let decoded = registry.decode_link(LinkType::Ethernet, &SYN, None).unwrap();
    assert_eq!(chain, decoded);
}

#[test]
fn empty_tcp_segment_checksums() {
    let registry = ProtocolRegistry::builtin();
    let mut ip = registry.packet("ipv4").unwrap();
    ip.set("src", Ipv4Addr::new(1, 2, 3, 4)).unwrap();
    ip.set("dst", Ipv4Addr::new(5, 6, 7, 8)).unwrap();
    let mut chain = ip / registry.packet("tcp").unwrap();
    let bytes = chain.fixup().unwrap().to_vec();
    assert_eq!(
        bytes,
        hex("450000280000000040066abd0102030405060708000000000000000000000000500000009fd10000")
    );
    assert_eq!(chain[1].get_int("checksum").unwrap(), 0x9fd1);
    assert_eq!(chain[0].get_int("checksum").unwrap(), 0x6abd);
    assert_eq!(chain[0].get_int("protocol").unwrap(), 6);
}

#[test]
fn udp_length_and_checksum() {
    let registry = ProtocolRegistry::builtin();
    let mut ip = registry.packet("ipv4").unwrap();
    ip.set("src", Ipv4Addr::new(10, 0, 0, 1)).unwrap();
    ip.set("dst", Ipv4Addr::new(10, 0, 0, 2)).unwrap();
    let mut udp = registry.packet("udp").unwrap();
    udp.set("sport", 1000u16).unwrap();
    udp.set("dport", 2000u16).unwrap();
    let mut payload = registry.packet("payload").unwrap();
    payload.set("payload", "hi").unwrap();

    let mut chain = ip / udp / payload;
    let bytes = chain.fixup().unwrap().to_vec();
    assert_eq!(bytes.len(), 30);
    assert_eq!(chain[0].get_int("length").unwrap(), 30);
    assert_eq!(chain[0].get_int("protocol").unwrap(), 17);
    assert_eq!(chain[0].get_int("checksum").unwrap(), 0x66cd);
    assert_eq!(chain[1].get_int("length").unwrap(), 10);
    assert_eq!(chain[1].get_int("checksum").unwrap(), 0x77b6);

    let decoded = registry.decode_chain("ipv4", &bytes).unwrap();
    let names: Vec<&str> = decoded.iter().map(|p| p.name()).collect();
    assert_eq!(names, ["ipv4", "udp", "payload"]);
    assert_eq!(decoded[2].get_bytes("payload").unwrap(), b"hi");
}

#[test]
fn icmp_checksum_covers_payload() {
    let registry = ProtocolRegistry::builtin();
    let mut icmp = registry.packet("icmpv4").unwrap();
    icmp.set("type", 8u8).unwrap();
    let mut payload = registry.packet("payload").unwrap();
    payload.set("payload", "ping").unwrap();
    let mut chain = registry.packet("ipv4").unwrap() / icmp / payload;
    chain.fixup().unwrap();
    assert_eq!(chain[0].get_int("protocol").unwrap(), 1);
    assert_eq!(chain[1].get_int("checksum").unwrap(), 0x192f);
}

#[test]
fn ip_options_set_header_length() {
    let registry = ProtocolRegistry::builtin();
    let mut ip = registry.packet("ipv4").unwrap();
    {
        let options = ip.field_mut("options").unwrap();
        options.push_option(option_tlv("ra", ipv4::IPOPT_RA, vec![0, 0])).unwrap();
        for _ in 0..3 {
            options.push_option(Field::int("nop", 8).default(1u8)).unwrap();
        }
        options.push_option(Field::int("end", 8).default(0u8)).unwrap();
    }
    let mut chain = Chain::from(ip);
    let bytes = chain.fixup().unwrap().to_vec();
    assert_eq!(bytes.len(), 28);
    assert_eq!(bytes[0], 0x47);
    assert_eq!(&bytes[20..], &[148, 4, 0, 0, 1, 1, 1, 0]);

    let decoded = registry.decode("ipv4", &bytes).unwrap();
    let names: Vec<&str> = decoded
        .field("options")
        .unwrap()
        .option_fields()
        .iter()
        .map(|o| o.name())
        .collect();
    assert_eq!(names, ["ra", "nop", "nop", "nop", "end"]);
    assert_eq!(decoded.get_int("hlen").unwrap(), 7);
}

#[test]
fn chains_compare_by_value() {
    let registry = ProtocolRegistry::builtin();
    let mut a = build_syn(&registry);
    let mut b = build_syn(&registry);
    a.fixup().unwrap();
    b.fixup().unwrap();
    assert_eq!(a, b);

    b.get_mut(2).unwrap().set("dport", 81u16).unwrap();
    assert_ne!(a, b);

    let short = Chain::from_packets(a.packets()[..2].to_vec());
    assert_ne!(a, short);
}

#[test]
fn assignment_is_bounds_checked() {
    let registry = ProtocolRegistry::builtin();
    let mut ip = registry.packet("ipv4").unwrap();
    assert!(matches!(ip.set("ttl", 256u16), Err(Error::FieldBounds { .. })));
    assert!(matches!(ip.set("version", 16u8), Err(Error::FieldBounds { .. })));
    assert!(matches!(ip.set("nope", 1u8), Err(Error::UnknownField(_))));
    assert!(matches!(ip.set("ttl", "x"), Err(Error::FieldType { .. })));
    assert_eq!(ip.get_int("ttl").unwrap(), 64);

    let mut eth = registry.packet("ethernet").unwrap();
    assert!(matches!(eth.set("dst", [0u8; 7]), Err(Error::FieldBounds { .. })));
}

#[test]
fn explicit_discriminator_survives_encapsulation() {
    let registry = ProtocolRegistry::builtin();
    let mut eth = registry.packet("ethernet").unwrap();
    eth.set("type", 0x86ddu16).unwrap();
    assert!(eth.discriminator_initialized());
    let chain = eth / registry.packet("ipv4").unwrap();
    assert_eq!(chain[0].get_int("type").unwrap(), 0x86dd);

    let chain = registry.packet("ethernet").unwrap() / registry.packet("arp").unwrap();
    assert_eq!(chain[0].get_int("type").unwrap(), 0x0806);
}

#[test]
fn template_matching_with_wildcards() {
    let registry = ProtocolRegistry::builtin();
    let captured = registry.decode_link(LinkType::Ethernet, &SYN, None).unwrap();

    let mut eth = registry.packet("ethernet").unwrap();
    eth.wildcard_all();
    let mut ip = registry.packet("ipv4").unwrap();
    ip.wildcard_except(&["protocol"]).unwrap();
    let template = eth / ip;
    assert_eq!(template[1].get_int("protocol").unwrap(), 0);
    let mut template = template;
    template.get_mut(1).unwrap().set("protocol", 6u8).unwrap();
    assert!(template.matches(&captured));

    template.get_mut(1).unwrap().set("protocol", 17u8).unwrap();
    assert!(!template.matches(&captured));

    let mut longer = captured.clone();
    longer.wildcard_mask(true);
    longer.append(registry.packet("payload").unwrap());
    assert!(!longer.matches(&captured));

    let mut all = captured.clone();
    all.wildcard_mask(true);
    assert!(all.matches(&captured));
    all.wildcard_mask(false);
    assert!(all.matches(&captured));
}

#[test]
fn contains_finds_the_matching_layer() {
    let registry = ProtocolRegistry::builtin();
    let captured = registry.decode_link(LinkType::Ethernet, &SYN, None).unwrap();

    let mut tcp = registry.packet("tcp").unwrap();
    tcp.wildcard_except(&["dport"]).unwrap();
    tcp.set("dport", 80u16).unwrap();
    assert_eq!(captured.contains(&tcp), Some(2));

    tcp.set("dport", 443u16).unwrap();
    assert_eq!(captured.contains(&tcp), None);

    let mut udp = registry.packet("udp").unwrap();
    udp.wildcard_all();
    assert_eq!(captured.contains(&udp), None);
}

#[test]
fn chain_checksum_zeroes_every_checksum_field() {
    let registry = ProtocolRegistry::builtin();
    let mut chain = registry.decode_link(LinkType::Ethernet, &SYN, None).unwrap();
    assert_eq!(chain.chain_checksum().unwrap(), 0xdc1a);
    assert_eq!(chain[1].get_int("checksum").unwrap(), 0);
    assert_eq!(chain[2].get_int("checksum").unwrap(), 0);
}

#[test]
fn insert_and_search() {
    let registry = ProtocolRegistry::builtin();
    let mut chain = registry.packet("ethernet").unwrap() / registry.packet("tcp").unwrap();
    chain.insert_after(0, registry.packet("ipv4").unwrap()).unwrap();
    let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
    assert_eq!(names, ["ethernet", "ipv4", "tcp"]);
    assert_eq!(chain[0].get_int("type").unwrap(), 0x0800);

    assert_eq!(chain.find_first_of("tcp"), Some(2));
    assert_eq!(chain.find_preceding(2, "ethernet", false), Some(0));
    assert_eq!(chain.find_preceding(2, "ipv4", true), Some(1));
    assert_eq!(chain.find_preceding(1, "tcp", false), None);
    assert!(matches!(
        chain.insert_after(7, registry.packet("payload").unwrap()),
        Err(Error::PacketNotInChain(7))
    ));
    assert!(matches!(chain.collate_following(3), Err(Error::PacketNotInChain(3))));
}

#[test]
fn truncated_inner_layer_is_kept_as_payload_when_lenient() {
    let registry = ProtocolRegistry::builtin();
    let mut ip = registry.packet("ipv4").unwrap();
    ip.set("protocol", 6u8).unwrap();
    ip.set("length", 30u16).unwrap();
    let mut bytes = ip.encode().unwrap().to_vec();
    bytes.extend_from_slice(&[0u8; 10]);

    assert!(registry.decode_chain("ipv4", &bytes).is_err());

    let lenient = ProtocolRegistry::builtin().with_lenient(true);
    let chain = lenient.decode_chain("ipv4", &bytes).unwrap();
    let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
    assert_eq!(names, ["ipv4", "payload"]);
    assert_eq!(chain[1].get_bytes("payload").unwrap().len(), 10);
}

#[test]
fn link_padding_is_dropped_by_ip_length() {
    let registry = ProtocolRegistry::builtin();
    let mut padded = SYN.to_vec();
    padded.extend_from_slice(&[0u8; 6]);
    let chain = registry.decode_link(LinkType::Ethernet, &padded, None).unwrap();
    assert_eq!(chain.last().unwrap().name(), "tcp");
    assert_eq!(chain.to_bytes().unwrap(), SYN);
}

#[test]
fn timestamp_and_display() {
    let registry = ProtocolRegistry::builtin();
    let ts = Duration::new(1_700_000_000, 250_000_000);
    let chain = registry.decode_link(LinkType::Ethernet, &SYN, Some(ts)).unwrap();
    assert_eq!(chain.timestamp(), Some(ts));
    let text = chain.to_string();
    assert!(text.starts_with("@ 1700000000.250000\n"));
    assert!(text.contains("src      10.0.0.1"));
    assert!(text.contains("dport"));
    assert_eq!(chain[1].get("src").unwrap(), Value::Int(0x0a000001));
}

#[test]
fn with_values_assigns_fields_in_order() {
    let registry = ProtocolRegistry::builtin();
    let ip = Packet::with_values(
        registry.get("ipv4").unwrap(),
        [
            ("ttl", Value::from(9u8)),
            ("src", Value::from(Ipv4Addr::new(1, 2, 3, 4))),
        ],
    )
    .unwrap();
    assert_eq!(ip.name(), "ipv4");
    assert_eq!(ip.get_int("ttl").unwrap(), 9);
    assert_eq!(ip.get_int("version").unwrap(), 4);
    assert_eq!(ip.get_int("src").unwrap(), 0x0102_0304);

    let err = Packet::with_values(
        registry.get("ipv4").unwrap(),
        [("ttl", Value::from(1u8)), ("version", Value::from(16u8))],
    )
    .unwrap_err();
    assert!(matches!(err, Error::FieldBounds { ref field, .. } if field == "version"));
}
