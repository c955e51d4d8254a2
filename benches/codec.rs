//! Benchmark: decode vs fixup vs template match vs BPF for a batch of Ethernet/IPv4/TCP
//! frames, all generated in memory so no capture file is needed.

use std::net::Ipv4Addr;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pktset::bpf;
use pktset::{Chain, LinkType, ProtocolRegistry};

fn build(registry: &ProtocolRegistry, sport: u16) -> Chain {
    let mut ip = registry.packet("ipv4").unwrap();
    ip.set("src", Ipv4Addr::new(10, 0, 0, 1)).unwrap();
    ip.set("dst", Ipv4Addr::new(10, 0, 0, 2)).unwrap();
    let mut tcp = registry.packet("tcp").unwrap();
    tcp.set("sport", sport).unwrap();
    tcp.set("dport", 80u16).unwrap();
    tcp.set("ack", 1u8).unwrap();
    let mut payload = registry.packet("payload").unwrap();
    payload.set("payload", vec![0xa5u8; 64]).unwrap();
    registry.packet("ethernet").unwrap() / ip / tcp / payload
}

fn bench_codec(c: &mut Criterion) {
    let registry = ProtocolRegistry::builtin();
    let frames: Vec<Vec<u8>> = (0..256u16)
        .map(|i| build(&registry, 1024 + i).fixup().unwrap().to_vec())
        .collect();
    let decoded: Vec<Chain> = frames
        .iter()
        .map(|f| registry.decode_link(LinkType::Ethernet, f, None).unwrap())
        .collect();
    eprintln!("{} frames of {} bytes", frames.len(), frames[0].len());

    c.bench_function("decode_ethernet_ipv4_tcp", |b| {
        b.iter(|| {
            let mut layers = 0usize;
            for f in &frames {
                layers += registry
                    .decode_link(LinkType::Ethernet, black_box(f), None)
                    .map_or(0, |c| c.len());
            }
            black_box(layers)
        });
    });

    c.bench_function("build_and_fixup", |b| {
        b.iter(|| {
            let mut bytes = 0usize;
            for i in 0..frames.len() as u16 {
                let mut chain = build(&registry, black_box(1024 + i));
                bytes += chain.fixup().map_or(0, |b| b.len());
            }
            black_box(bytes)
        });
    });

    let mut template = registry.packet("tcp").unwrap();
    template.set("sport", 1200u16).unwrap();
    template.wildcard_except(&["sport"]).unwrap();
    c.bench_function("contains_tcp_template", |b| {
        b.iter(|| {
            let hits = decoded
                .iter()
                .filter(|chain| black_box(chain).contains(&template).is_some())
                .count();
            black_box(hits)
        });
    });

    let filter = bpf::compile(&build(&registry, 0), bpf::DEFAULT_SNAPLEN).unwrap();
    c.bench_function("bpf_run", |b| {
        b.iter(|| {
            let accepted = frames.iter().filter(|f| filter.accepts(black_box(f))).count();
            black_box(accepted)
        });
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
